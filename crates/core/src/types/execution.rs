use serde::{Deserialize, Serialize};

/// Exit code reported when the runtime could not confirm how the process ended.
pub const UNKNOWN_EXIT_CODE: i64 = -1;

/// Outcome of a one-shot command run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Bytes accumulated from the stdout channel.
    pub stdout: Vec<u8>,
    /// Bytes accumulated from the stderr channel.
    pub stderr: Vec<u8>,
    /// Process exit code, `-1` if unknown.
    pub exit_code: i64,
}

impl ExecutionResult {
    /// Whether the process exited cleanly with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
