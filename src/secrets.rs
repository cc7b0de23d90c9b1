//! Credential lookup through the 1Password CLI.

use log::debug;
use std::fmt;
use std::io::ErrorKind;
use std::process::Command;

#[derive(Debug)]
pub enum SecretError {
    /// The CLI binary could not be spawned because it is not installed.
    CliMissing,
    Spawn(std::io::Error),
    Lookup { label: String, stderr: String },
    Empty { label: String },
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretError::CliMissing => write!(f, "1Password CLI (op) not found in PATH."),
            SecretError::Spawn(e) => write!(f, "failed to run 1Password CLI: {}", e),
            SecretError::Lookup { label, stderr } => write!(f, "Failed to read {} from 1Password: {}", label, stderr),
            SecretError::Empty { label } => write!(f, "Empty {} from 1Password.", label),
        }
    }
}

impl std::error::Error for SecretError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SecretError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of the credentials. `label` is only used in error messages.
pub trait SecretStore {
    fn read(&self, reference: &str, label: &str) -> Result<String, SecretError>;
}

/// Runs `op read <reference> -n` for every lookup. Nothing is cached.
pub struct OpCli {
    program: String,
}

impl OpCli {
    pub fn new() -> Self {
        Self::with_program("op")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        OpCli { program: program.into() }
    }
}

impl Default for OpCli {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for OpCli {
    fn read(&self, reference: &str, label: &str) -> Result<String, SecretError> {
        debug!("reading {} from 1Password", label);
        let output = Command::new(&self.program)
            .args(["read", reference, "-n"])
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SecretError::CliMissing,
                _ => SecretError::Spawn(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SecretError::Lookup {
                label: label.to_string(),
                stderr: if stderr.is_empty() { "unknown error".to_string() } else { stderr },
            });
        }

        non_empty(label, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Trims surrounding whitespace and rejects blank values.
pub fn non_empty(label: &str, raw: &str) -> Result<String, SecretError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(SecretError::Empty { label: label.to_string() });
    }
    Ok(value.to_string())
}
