use std::process::Command;

use anyhow::{Context, Result};

pub struct CommandOutput {
    pub success: bool,
    pub combined: String,
}

/// Runs one constructed external-tool command and captures whatever it
/// printed. The pipeline owns command construction, never command semantics.
pub trait CommandRunner: Sync {
    fn run(&self, command: &str) -> Result<CommandOutput>;
}

pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .with_context(|| format!("Failed to launch: {}", command))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            combined,
        })
    }
}
