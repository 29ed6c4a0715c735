//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod exec;
mod validate;

pub use exec::ExecArgs;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run an action against repositories and print the patches as JSON
    Exec(ExecArgs),
    /// Check an action file and list its steps
    Validate {
        /// Action file (JSON); read from stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Exec(args) => exec::handle_exec(args, config).await,
        Commands::Validate { file } => validate::handle_validate(file.as_deref()),
    }
}
