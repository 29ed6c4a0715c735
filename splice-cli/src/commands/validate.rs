//! Validate command handler

use anyhow::{Context, Result};
use colored::*;
use splice_core::domain::action::Action;
use std::path::Path;

use crate::types::load_action;

/// Parses and validates an action file, then prints its steps
pub fn handle_validate(file: Option<&Path>) -> Result<()> {
    let action = load_action(file)?;
    splice_engine::validate(&action).context("Invalid action")?;

    print!("{}", describe_action(&action));
    Ok(())
}

fn describe_action(action: &Action) -> String {
    let mut out = format!(
        "{}\n",
        format!("Action is valid ({} steps):", action.steps.len()).bold()
    );
    for (i, step) in action.steps.iter().enumerate() {
        out.push_str(&format!("  {} {}\n", format!("{}.", i + 1).cyan(), step.describe()));
    }

    let images = action.images();
    if !images.is_empty() {
        out.push_str(&format!("{} {}\n", "Images:".bold(), images.join(", ")));
    }
    out
}
