//! Repository domain types

use serde::{Deserialize, Serialize};

/// Identity of a source repository on the code host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    /// Opaque identifier assigned by the code host
    pub id: String,
    /// Repository name, e.g. `github.com/acme/app`
    pub name: String,
}

impl Repository {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Filesystem-safe slug used to prefix temporary files
    pub fn slug(&self) -> String {
        self.name
            .trim_start_matches("github.com/")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
            .collect()
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        let repo = Repository::new("1", "github.com/acme/my_app");
        assert_eq!(repo.slug(), "acme-my-app");
    }
}
