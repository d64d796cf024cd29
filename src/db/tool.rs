//! External schema tool invocation.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::db::bootstrap::{BootstrapError, SchemaTool};

/// Runs the schema tool as a child process with inherited stdio.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: String,
    prefix: Vec<String>,
}

impl CommandTool {
    /// Parse a command line such as `npx prisma` into program and leading
    /// arguments.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            prefix: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.prefix).args(args);
        command
    }

    async fn run(&self, mut command: Command, step: &str) -> Result<(), String> {
        tracing::debug!(service = "setup-db", program = %self.program, step, "Running schema tool");
        let status = command
            .status()
            .await
            .map_err(|e| format!("failed to spawn {}: {e}", self.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} {step} exited with {status}", self.program))
        }
    }
}

#[async_trait]
impl SchemaTool for CommandTool {
    async fn deploy(&self, schema: &Path, database_url: &str) -> Result<(), BootstrapError> {
        let schema = schema.to_string_lossy();
        let mut command = self.command(&["migrate", "deploy", "--schema", &schema]);
        command.env("DATABASE_URL", database_url);
        self.run(command, "migrate deploy")
            .await
            .map_err(BootstrapError::Migrate)
    }

    async fn generate(&self, schema: &Path) -> Result<(), BootstrapError> {
        let schema = schema.to_string_lossy();
        let command = self.command(&["generate", "--schema", &schema]);
        self.run(command, "generate")
            .await
            .map_err(BootstrapError::Generate)
    }
}
