//! Unified diff parsing and rendering
//!
//! Parses the multi-file output of `diff --unified --recursive`, validating
//! its structure, and renders it back without file timestamps.

use crate::error::{EngineError, Result};

/// One file's section of a multi-file diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    /// Lines preceding the `---`/`+++` headers (`diff ...`, `Binary files ...`)
    pub extended: Vec<String>,
    pub orig: Option<FileHeader>,
    pub new: Option<FileHeader>,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    fn has_headers(&self) -> bool {
        self.orig.is_some()
    }

    fn is_blank(&self) -> bool {
        self.extended.is_empty() && self.orig.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub path: String,
    pub timestamp: Option<String>,
}

impl FileHeader {
    fn parse(text: &str) -> Self {
        match text.split_once('\t') {
            Some((path, timestamp)) => Self {
                path: path.to_string(),
                timestamp: Some(timestamp.to_string()),
            },
            None => Self {
                path: text.to_string(),
                timestamp: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub orig_start: u64,
    pub orig_lines: u64,
    pub new_start: u64,
    pub new_lines: u64,
    /// Text after the closing `@@`, including its leading space
    pub section: String,
    /// Body lines with their ` `, `-`, `+` or `\` prefix
    pub body: Vec<String>,
}

/// Parses a multi-file unified diff
///
/// # Errors
/// `DiffParse` with the 1-based line number of the first malformed line:
/// a `---` header without `+++`, a hunk outside a file, a bad hunk header,
/// an unknown body prefix, or a hunk whose body disagrees with its counts.
pub fn parse(text: &str) -> Result<Vec<FileDiff>> {
    // Split on '\n' only; a '\r' belongs to the file content
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    let mut files = Vec::new();
    let mut current = FileDiff::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(orig) = line.strip_prefix("--- ") {
            if current.has_headers() {
                files.push(std::mem::take(&mut current));
            }
            let new = lines
                .get(i + 1)
                .and_then(|l| l.strip_prefix("+++ "))
                .ok_or_else(|| parse_error(i + 2, "expected '+++' header after '---'"))?;
            current.orig = Some(FileHeader::parse(orig));
            current.new = Some(FileHeader::parse(new));
            i += 2;

            while i < lines.len() && lines[i].starts_with("@@ ") {
                let (hunk, next) = parse_hunk(&lines, i)?;
                current.hunks.push(hunk);
                i = next;
            }
            continue;
        }

        if line.starts_with("@@ ") {
            return Err(parse_error(i + 1, "hunk outside of a file diff"));
        }

        if current.has_headers() {
            files.push(std::mem::take(&mut current));
        }
        current.extended.push(line.to_string());
        i += 1;
    }

    if !current.is_blank() {
        files.push(current);
    }
    Ok(files)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize)> {
    let header = lines[start];
    let (orig_start, orig_lines, new_start, new_lines, section) = parse_hunk_header(header)
        .ok_or_else(|| parse_error(start + 1, format!("malformed hunk header {:?}", header)))?;

    let mut hunk = Hunk {
        orig_start,
        orig_lines,
        new_start,
        new_lines,
        section,
        body: Vec::new(),
    };

    let (mut orig_left, mut new_left) = (orig_lines, new_lines);
    let mut i = start + 1;
    while orig_left > 0 || new_left > 0 {
        let Some(line) = lines.get(i) else {
            return Err(parse_error(i + 1, "unexpected end of diff inside hunk"));
        };
        match line.as_bytes().first() {
            // Some tools drop the space of an empty context line
            Some(b' ') | None => {
                orig_left = orig_left.checked_sub(1).ok_or_else(|| overflow(i))?;
                new_left = new_left.checked_sub(1).ok_or_else(|| overflow(i))?;
            }
            Some(b'-') => orig_left = orig_left.checked_sub(1).ok_or_else(|| overflow(i))?,
            Some(b'+') => new_left = new_left.checked_sub(1).ok_or_else(|| overflow(i))?,
            Some(b'\\') => {}
            _ => {
                return Err(parse_error(
                    i + 1,
                    format!("unexpected line in hunk: {:?}", line),
                ));
            }
        }
        hunk.body.push(line.to_string());
        i += 1;
    }

    // "\ No newline at end of file" may trail the last counted line
    while let Some(line) = lines.get(i) {
        if !line.starts_with('\\') {
            break;
        }
        hunk.body.push(line.to_string());
        i += 1;
    }

    Ok((hunk, i))
}

fn overflow(i: usize) -> EngineError {
    parse_error(i + 1, "hunk body longer than its header declares")
}

fn parse_hunk_header(line: &str) -> Option<(u64, u64, u64, u64, String)> {
    let rest = line.strip_prefix("@@ -")?;
    let end = rest.find(" @@")?;
    let (ranges, section) = (&rest[..end], &rest[end + 3..]);
    let (orig, new) = ranges.split_once(" +")?;
    let (orig_start, orig_lines) = parse_range(orig)?;
    let (new_start, new_lines) = parse_range(new)?;
    Some((orig_start, orig_lines, new_start, new_lines, section.to_string()))
}

fn parse_range(range: &str) -> Option<(u64, u64)> {
    match range.split_once(',') {
        Some((start, lines)) => Some((start.parse().ok()?, lines.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> EngineError {
    EngineError::DiffParse {
        line,
        message: message.into(),
    }
}

/// Renders file diffs back to text, omitting header timestamps
pub fn render(files: &[FileDiff]) -> String {
    let mut out = String::new();
    for file in files {
        for line in &file.extended {
            out.push_str(line);
            out.push('\n');
        }
        if let (Some(orig), Some(new)) = (&file.orig, &file.new) {
            out.push_str(&format!("--- {}\n+++ {}\n", orig.path, new.path));
        }
        for hunk in &file.hunks {
            out.push_str(&format!(
                "@@ -{} +{} @@{}\n",
                render_range(hunk.orig_start, hunk.orig_lines),
                render_range(hunk.new_start, hunk.new_lines),
                hunk.section
            ));
            for line in &hunk.body {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

fn render_range(start: u64, lines: u64) -> String {
    if lines == 1 {
        start.to_string()
    } else {
        format!("{},{}", start, lines)
    }
}

/// Size summary of a patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub files: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl DiffStat {
    pub fn from_files(files: &[FileDiff]) -> Self {
        let mut stat = DiffStat {
            files: files.iter().filter(|f| f.has_headers()).count(),
            ..Default::default()
        };
        for line in files.iter().flat_map(|f| &f.hunks).flat_map(|h| &h.body) {
            match line.as_bytes().first() {
                Some(b'+') => stat.insertions += 1,
                Some(b'-') => stat.deletions += 1,
                _ => {}
            }
        }
        stat
    }

    /// Parses `patch` and summarises it
    pub fn from_patch(patch: &str) -> Result<Self> {
        Ok(Self::from_files(&parse(patch)?))
    }
}

impl std::fmt::Display for DiffStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} changed +{} -{}",
            self.files,
            if self.files == 1 { "file" } else { "files" },
            self.insertions,
            self.deletions
        )
    }
}
