//! Runs shell commands inside running containers.
//!
//! A [`ShellCommand`] is either a single line or an ordered sequence of lines
//! joined into one shell invocation. Joining adds nothing but a space, so the
//! sequencing operators (`&&`, `;`) are part of the caller's strings;
//! [`ProvisioningBatch::chained`] writes the `&&` for the common case.

use crate::console::Console;
use crate::engine::{ContainerEngine, OutputStream};
use crate::error::{DeployError, Result};
use futures::StreamExt;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Single(String),
    Sequence(Vec<String>),
}

impl ShellCommand {
    /// The command line handed to the container shell
    pub fn line(&self) -> String {
        match self {
            ShellCommand::Single(cmd) => cmd.clone(),
            ShellCommand::Sequence(cmds) => cmds.join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line().trim().is_empty()
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

impl From<&str> for ShellCommand {
    fn from(cmd: &str) -> Self {
        ShellCommand::Single(cmd.to_string())
    }
}

impl From<String> for ShellCommand {
    fn from(cmd: String) -> Self {
        ShellCommand::Single(cmd)
    }
}

impl From<Vec<String>> for ShellCommand {
    fn from(cmds: Vec<String>) -> Self {
        ShellCommand::Sequence(cmds)
    }
}

fn invalid(reason: impl Into<String>) -> DeployError {
    DeployError::InvalidCommand {
        reason: reason.into(),
    }
}

impl TryFrom<&serde_json::Value> for ShellCommand {
    type Error = DeployError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::String(cmd) => Ok(ShellCommand::Single(cmd.clone())),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(cmd) => Ok(cmd.clone()),
                    other => Err(invalid(format!(
                        "element {} of the command sequence is {}, expected a string",
                        i,
                        json_type(other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(ShellCommand::Sequence),
            other => Err(invalid(format!(
                "expected a string or a sequence of strings, got {}",
                json_type(other)
            ))),
        }
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;

    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

impl TryFrom<&toml::Value> for ShellCommand {
    type Error = DeployError;

    fn try_from(value: &toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(cmd) => Ok(ShellCommand::Single(cmd.clone())),
            toml::Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        invalid(format!(
                            "element {} of the command sequence is a {}, expected a string",
                            i,
                            item.type_str()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(ShellCommand::Sequence),
            other => Err(invalid(format!(
                "expected a string or a sequence of strings, got a {}",
                other.type_str()
            ))),
        }
    }
}

/// One logical provisioning step: several commands run as a single shell invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningBatch {
    pub name: String,
    pub command: ShellCommand,
}

impl ProvisioningBatch {
    pub fn new(name: impl Into<String>, command: impl Into<ShellCommand>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    /// Each command runs only if the previous one succeeded
    pub fn chained<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        let last = commands.len().saturating_sub(1);
        let joined = commands
            .into_iter()
            .enumerate()
            .map(|(i, cmd)| if i < last { format!("{} &&", cmd) } else { cmd })
            .collect();

        Self {
            name: name.into(),
            command: ShellCommand::Sequence(joined),
        }
    }
}

/// Single-quotes a value for the container shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Starts `cmd` inside `container`; the stream yields combined output chunks
pub async fn exec_cmd(
    engine: &dyn ContainerEngine,
    container: &str,
    cmd: &ShellCommand,
) -> Result<OutputStream> {
    let line = cmd.line();
    debug!("exec in {}: {}", container, line);
    Ok(engine.exec(container, &line).await?)
}

/// Runs `cmd` to completion, echoing output to the console and returning it
pub async fn run_command(
    engine: &dyn ContainerEngine,
    console: &dyn Console,
    container: &str,
    cmd: &ShellCommand,
) -> Result<String> {
    if cmd.is_empty() {
        debug!("Skipping empty command for {}", container);
        return Ok(String::new());
    }

    let mut output = String::new();
    let mut stream = exec_cmd(engine, container, cmd).await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        console.plain(&chunk);
        output.push_str(&chunk);
        output.push('\n');
    }
    Ok(output)
}

/// Runs batches strictly in order; the first failing batch stops the rest
pub async fn run_batches(
    engine: &dyn ContainerEngine,
    console: &dyn Console,
    container: &str,
    batches: &[ProvisioningBatch],
) -> Result<Vec<String>> {
    let mut outputs = Vec::with_capacity(batches.len());
    for (i, batch) in batches.iter().enumerate() {
        info!(
            "⚙️  {} [{}/{}]: {}",
            container,
            i + 1,
            batches.len(),
            batch.name
        );
        console.progress(&format!("{}: {}", container, batch.name));
        outputs.push(run_command(engine, console, container, &batch.command).await?);
    }
    Ok(outputs)
}
