//! Action domain types

use serde::{Deserialize, Serialize};

/// A declarative, ordered list of steps run against a repository snapshot.
///
/// Immutable once loaded. Steps run strictly in order and execution stops at
/// the first failing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(alias = "run")]
    pub steps: Vec<Step>,
}

impl Action {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Distinct container images referenced by the action, in first-use order
    pub fn images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for image in self.steps.iter().filter_map(Step::image) {
            if !images.contains(&image) {
                images.push(image);
            }
        }
        images
    }
}

/// One unit of work inside an action
///
/// Serialized with an internal `kind` tag:
/// `{"kind":"command","args":[...]}` or
/// `{"kind":"container","image":"...","args":[...],"cacheDirs":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    /// Direct subprocess run inside the working tree
    Command { args: Vec<String> },

    /// Command run inside a container with the working tree bind-mounted
    #[serde(alias = "docker")]
    Container {
        image: String,
        #[serde(default)]
        args: Vec<String>,
        /// In-container paths backed by persistent host directories
        #[serde(default, rename = "cacheDirs")]
        cache_dirs: Vec<String>,
    },
}

impl Step {
    pub fn command<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Command {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn container<I, S>(image: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Container {
            image: image.into(),
            args: args.into_iter().map(Into::into).collect(),
            cache_dirs: Vec::new(),
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            Step::Command { args } => args,
            Step::Container { args, .. } => args,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            Step::Command { .. } => None,
            Step::Container { image, .. } => Some(image),
        }
    }

    /// Short human-readable form used in job logs and error messages
    pub fn describe(&self) -> String {
        match self {
            Step::Command { args } => format!("command {:?}", args),
            Step::Container { image, args, .. } => format!("container {} {:?}", image, args),
        }
    }
}
