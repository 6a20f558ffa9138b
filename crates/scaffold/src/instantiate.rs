//! Template instantiation.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use code_play_core::{Error, Result};

/// Writes a template's files into a directory.
#[async_trait]
pub trait Instantiator: Send + Sync {
    /// Instantiate `template` at `target`. `target` does not exist yet; its
    /// parent does.
    async fn instantiate(&self, template: &str, target: &Path) -> Result<()>;
}

/// Runs `<program> create vite <target> --template <template>`.
///
/// The child process is killed if the call is dropped or times out.
#[derive(Debug, Clone)]
pub struct ViteInstantiator {
    program: String,
    timeout: Duration,
}

impl ViteInstantiator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for ViteInstantiator {
    fn default() -> Self {
        Self::new("pnpm", Duration::from_secs(120))
    }
}

/// Last few lines of tool output, for error messages.
fn tail(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}

#[async_trait]
impl Instantiator for ViteInstantiator {
    async fn instantiate(&self, template: &str, target: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(["create", "vite"])
            .arg(target)
            .args(["--template", template])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(parent) = target.parent() {
            command.current_dir(parent);
        }

        tracing::debug!(program = %self.program, template = %template, target = %target.display(), "Instantiating template");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "template {} not instantiated within {}s",
                    template,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::internal(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::internal(format!(
                "{} create vite failed ({}): {}",
                self.program,
                output.status,
                tail(&output.stderr)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_lines() {
        let out = b"1\n2\n3\n4\n5\n6\n7\n";
        assert_eq!(tail(out), "3\n4\n5\n6\n7");
        assert_eq!(tail(b""), "");
    }

    #[tokio::test]
    async fn test_missing_program_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let instantiator = ViteInstantiator::new("code-play-no-such-tool", Duration::from_secs(5));
        let err = instantiator
            .instantiate("vanilla-ts", &dir.path().join("app"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_failing_program_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let instantiator = ViteInstantiator::new("false", Duration::from_secs(5));
        let err = instantiator
            .instantiate("vanilla-ts", &dir.path().join("app"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("create vite failed"));
    }
}
