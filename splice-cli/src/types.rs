//! Common types used across CLI modules

use anyhow::{Context, Result, anyhow};
use splice_core::domain::action::Action;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::time::Duration;

/// A `<name>@<revision>` repository argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRevision {
    pub name: String,
    pub revision: String,
}

impl RepoRevision {
    /// Parses `name@revision`; the split is at the last `@`
    pub fn parse(input: &str) -> Result<Self> {
        let (name, revision) = input
            .rsplit_once('@')
            .ok_or_else(|| anyhow!("expected <name>@<revision>, got `{}`", input))?;
        if name.is_empty() || revision.is_empty() {
            return Err(anyhow!("expected <name>@<revision>, got `{}`", input));
        }
        Ok(Self {
            name: name.to_string(),
            revision: revision.to_string(),
        })
    }
}

impl std::fmt::Display for RepoRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.revision)
    }
}

/// Parses durations like `90s`, `60m`, `2h`, or plain seconds
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| anyhow!("invalid duration `{}`", input))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => return Err(anyhow!("invalid duration unit in `{}` (use s, m or h)", input)),
    };
    let seconds = value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("duration `{}` is too large", input))?;
    if seconds == 0 {
        return Err(anyhow!("duration must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

/// Reads an action from `file`, or from stdin when no file is given and
/// stdin is not a terminal
pub fn load_action(file: Option<&Path>) -> Result<Action> {
    let (source, raw) = match file {
        Some(path) if path != Path::new("-") => (
            path.display().to_string(),
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read action file: {}", path.display()))?,
        ),
        Some(_) => ("stdin".to_string(), read_stdin()?),
        None if !std::io::stdin().is_terminal() => ("stdin".to_string(), read_stdin()?),
        None => return Err(anyhow!("no action file given (use -f <file> or pipe one in)")),
    };

    parse_action(&raw).with_context(|| format!("Failed to parse action from {}", source))
}

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read action from stdin")?;
    Ok(raw)
}

pub fn parse_action(raw: &str) -> Result<Action> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_revision_parse() {
        let repo = RepoRevision::parse("github.com/acme/app@main").unwrap();
        assert_eq!(repo.name, "github.com/acme/app");
        assert_eq!(repo.revision, "main");
        assert_eq!(repo.to_string(), "github.com/acme/app@main");

        let repo = RepoRevision::parse("git@host:app@v1.2").unwrap();
        assert_eq!(repo.name, "git@host:app");
        assert_eq!(repo.revision, "v1.2");

        assert!(RepoRevision::parse("github.com/acme/app").is_err());
        assert!(RepoRevision::parse("app@").is_err());
        assert!(RepoRevision::parse("@main").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("60m").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        let err = parse_duration("99999999999999999h").unwrap_err();
        assert!(err.to_string().contains("too large"), "{}", err);
        assert!(parse_duration("99999999999999999999").is_err());
        assert_eq!(
            parse_duration("5124095576030431h").unwrap(),
            Duration::from_secs(5124095576030431 * 3600)
        );
    }

    #[test]
    fn test_load_action_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("action.json");
        std::fs::write(
            &path,
            r#"{"run": [{"kind": "command", "args": ["sh", "-c", "echo hi >> FILE"]}]}"#,
        )
        .unwrap();

        let action = load_action(Some(&path)).unwrap();
        assert_eq!(action.steps.len(), 1);

        std::fs::write(&path, "{").unwrap();
        let err = load_action(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse action"));

        assert!(load_action(Some(&dir.path().join("missing.json"))).is_err());
    }
}
