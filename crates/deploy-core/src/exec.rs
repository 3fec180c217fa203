//! Subprocess execution.
//!
//! A command runs through `sh -c` with stderr folded into stdout, so the log
//! receives the lines in the order the command produced them. A non-zero exit
//! is an ordinary result; interpreting it is the error policy's job.

use std::io::{self, BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::log::LogSink;

/// Exit status reported when the shell itself cannot be started.
pub const SPAWN_FAILURE_STATUS: i32 = 127;

/// Status and output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_status: i32,
    pub output_lines: Vec<String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs a shell command, handing each output line to `on_line` as it arrives.
pub trait Runner {
    fn run(&self, command: &str, cwd: &Path, on_line: &mut dyn FnMut(&str)) -> io::Result<i32>;
}

/// Production runner backed by `sh -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl Runner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path, on_line: &mut dyn FnMut(&str)) -> io::Result<i32> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("exec 2>&1\n{command}"))
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            // The pipe closes here even on a read error, so the child can be reaped.
            if let Err(err) = forward_lines(BufReader::new(stdout), on_line) {
                on_line(&format!("failed to read command output: {err}"));
            }
        }

        let status = child.wait()?;
        Ok(status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(SPAWN_FAILURE_STATUS))
    }
}

/// Hand each `\n`-terminated line of `reader` to `on_line`, lossily decoded.
fn forward_lines(mut reader: impl BufRead, on_line: &mut dyn FnMut(&str)) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(&['\n', '\r'][..]));
    }
}

/// Runs commands and logs their text and output.
pub struct CommandExecutor {
    runner: Box<dyn Runner>,
    log: Arc<dyn LogSink>,
}

impl CommandExecutor {
    pub fn new(runner: Box<dyn Runner>, log: Arc<dyn LogSink>) -> Self {
        Self { runner, log }
    }

    /// Run `command` in `cwd`.
    ///
    /// The command text is logged before anything starts, so it is on record
    /// even if the deployment later aborts.
    pub fn run(&self, command: &str, cwd: &Path) -> ExecutionResult {
        self.log.command(command);
        tracing::debug!(%command, cwd = %cwd.display(), "running command");

        let mut output_lines = Vec::new();
        let log = &self.log;
        let status = self.runner.run(command, cwd, &mut |line: &str| {
            log.output(line);
            output_lines.push(line.to_string());
        });

        let exit_status = match status {
            Ok(status) => status,
            Err(err) => {
                let line = format!("failed to execute command: {err}");
                self.log.output(&line);
                output_lines.push(line);
                SPAWN_FAILURE_STATUS
            }
        };

        tracing::debug!(%command, exit_status, "command finished");
        ExecutionResult {
            exit_status,
            output_lines,
        }
    }
}
