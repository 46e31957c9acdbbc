//! Blocking subprocess execution with captured output.
//!
//! Every collaborator (ledger executables, git, git-sizer, du) is driven
//! through [`run_captured`], so failures carry the same diagnostic shape:
//! the rendered command line, the exit status and whatever the program wrote
//! to stderr.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// Output of a command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A command that could not be spawned or exited non-zero.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    /// Rendered argv, for logs.
    pub command: String,
    /// Exit code; `None` when the process never ran or was killed by a signal.
    pub status: Option<i32>,
    /// Captured stderr, or the spawn error message.
    pub diagnostic: String,
    /// Captured stdout (some tools report on stdout even when failing).
    pub stdout: Vec<u8>,
}

impl CommandFailure {
    fn spawn(command: String, err: std::io::Error) -> Self {
        Self {
            command,
            status: None,
            diagnostic: err.to_string(),
            stdout: Vec::new(),
        }
    }

    fn exited(command: String, status: ExitStatus, stdout: Vec<u8>, stderr: &[u8]) -> Self {
        Self {
            command,
            status: status.code(),
            diagnostic: String::from_utf8_lossy(stderr).trim().to_string(),
            stdout,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(
                f,
                "`{}` exited with status {}: {}",
                self.command, code, self.diagnostic
            ),
            None => write!(f, "`{}` failed to run: {}", self.command, self.diagnostic),
        }
    }
}

impl std::error::Error for CommandFailure {}

/// Render a command as a single shell-like line.
pub fn render(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Run `cmd` to completion, capturing stdout and stderr.
pub fn run_captured(cmd: &mut Command) -> Result<Captured, CommandFailure> {
    let rendered = render(cmd);
    debug!("executing: {}", rendered);

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| CommandFailure::spawn(rendered.clone(), e))?;

    if !output.status.success() {
        return Err(CommandFailure::exited(
            rendered,
            output.status,
            output.stdout,
            &output.stderr,
        ));
    }

    Ok(Captured {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Run `cmd`, feeding `input` on stdin from a writer thread so large inputs
/// cannot deadlock against a full stdout pipe.
pub fn run_with_input(cmd: &mut Command, input: Vec<u8>) -> Result<Captured, CommandFailure> {
    let rendered = render(cmd);
    debug!("executing: {} ({} bytes on stdin)", rendered, input.len());

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CommandFailure::spawn(rendered.clone(), e))?;

    let writer = child.stdin.take().map(|mut stdin| {
        std::thread::spawn(move || {
            // A closed pipe shows up as a non-zero exit below.
            let _ = stdin.write_all(&input);
        })
    });

    let output = child
        .wait_with_output()
        .map_err(|e| CommandFailure::spawn(rendered.clone(), e))?;
    if let Some(handle) = writer {
        let _ = handle.join();
    }

    if !output.status.success() {
        return Err(CommandFailure::exited(
            rendered,
            output.status,
            output.stdout,
            &output.stderr,
        ));
    }

    Ok(Captured {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Run `cmd` with stdin read from `input`, e.g. a pack file.
pub fn run_with_stdin_file(cmd: &mut Command, input: File) -> Result<Captured, CommandFailure> {
    let rendered = render(cmd);
    debug!("executing: {} (stdin from file)", rendered);

    let output = cmd
        .stdin(Stdio::from(input))
        .output()
        .map_err(|e| CommandFailure::spawn(rendered.clone(), e))?;

    if !output.status.success() {
        return Err(CommandFailure::exited(
            rendered,
            output.status,
            output.stdout,
            &output.stderr,
        ));
    }

    Ok(Captured {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_joins_program_and_args() {
        let mut cmd = Command::new("token-create");
        cmd.args(["./accounts", "T1", "alice", "100"]);
        assert_eq!(render(&cmd), "token-create ./accounts T1 alice 100");
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let mut cmd = Command::new("definitely-not-a-real-program-4711");
        let err = run_captured(&mut cmd).unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.to_string().contains("failed to run"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        let err = run_captured(&mut cmd).unwrap_err();
        assert_eq!(err.status, Some(3));
        assert_eq!(err.diagnostic, "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "pack bytes").unwrap();
        let mut cmd = Command::new("cat");
        let out = run_with_stdin_file(&mut cmd, File::open(&path).unwrap()).unwrap();
        assert_eq!(out.stdout_str(), "pack bytes");
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_is_forwarded() {
        let mut cmd = Command::new("cat");
        let out = run_with_input(&mut cmd, b"a\nb\n".to_vec()).unwrap();
        assert_eq!(out.stdout_str(), "a\nb\n");
    }
}
