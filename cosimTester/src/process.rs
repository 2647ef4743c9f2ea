//! Spawning and reaping external tools with a wall-clock budget.
//!
//! Each child runs in its own process group with stdout and stderr sharing a
//! single pipe, so the captured text keeps the order the tool wrote it in.
//! A [`RunningProcess`] that is dropped before being waited on kills the
//! whole group and reaps the child, so no early return can leave a hung
//! simulator behind.

use std::fs::File;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, pipe};

use crate::error::TestError;
use crate::types::RunResult;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Treat a non-zero exit as [`TestError::Process`].
    pub expect_success: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            expect_success: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep the exit status in the result instead of failing on it.
    pub fn allow_failure(mut self) -> Self {
        self.expect_success = false;
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Runs `invocation` to completion.
pub fn run(invocation: &Invocation) -> Result<RunResult, TestError> {
    spawn(invocation)?.wait()
}

/// Starts `invocation` in the background; call [`RunningProcess::wait`] to
/// collect it.
pub fn spawn(invocation: &Invocation) -> Result<RunningProcess, TestError> {
    let (read_end, write_end) = pipe()
        .map_err(|e| TestError::resource("failed to create output pipe", e.into()))?;
    let stderr_end = write_end
        .try_clone()
        .map_err(|e| TestError::resource("failed to duplicate output pipe", e))?;

    log::debug!("spawning: {}", invocation.command_line());
    // The command owns the parent's copies of the write end; they must be
    // closed once the child has them or the reader never sees EOF.
    let child = {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .process_group(0);
        command.spawn().map_err(|e| TestError::Run {
            message: format!("failed to launch {}: {e}", invocation.program.display()),
            output: String::new(),
        })?
    };

    let mut stream = File::from(read_end);
    let reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(err) = stream.read_to_end(&mut buffer) {
            log::warn!("output capture stopped early: {err}");
        }
        buffer
    });

    Ok(RunningProcess {
        child,
        reader: Some(reader),
        program: invocation.program_name(),
        timeout: invocation.timeout,
        expect_success: invocation.expect_success,
        started: Instant::now(),
        reaped: false,
    })
}

pub struct RunningProcess {
    child: Child,
    reader: Option<JoinHandle<Vec<u8>>>,
    program: String,
    timeout: Duration,
    expect_success: bool,
    started: Instant,
    reaped: bool,
}

impl RunningProcess {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Instant at which the invocation's budget runs out.
    pub fn deadline(&self) -> Instant {
        self.started + self.timeout
    }

    pub fn has_exited(&mut self) -> Result<bool, TestError> {
        self.child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(|e| TestError::io(format!("failed to poll {}", self.program), e))
    }

    pub fn wait(self) -> Result<RunResult, TestError> {
        let deadline = self.deadline();
        self.wait_until(deadline)
    }

    /// Waits for exit, killing the process group once `deadline` passes.
    pub fn wait_until(mut self, deadline: Instant) -> Result<RunResult, TestError> {
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    return Err(TestError::io(format!("failed to poll {}", self.program), err));
                }
            }
            if Instant::now() >= deadline {
                self.terminate();
                let output = self.collect_output();
                log::warn!(
                    "{} killed after {:.1}s",
                    self.program,
                    self.started.elapsed().as_secs_f64()
                );
                return Err(TestError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                    output,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };
        self.reaped = true;
        // Leftover group members would hold the output pipe open.
        self.signal_group();

        let output = self.collect_output();
        let exit_code = exit_code(status);
        log::debug!(
            "{} exited with {exit_code} after {:.2}s",
            self.program,
            self.started.elapsed().as_secs_f64()
        );
        if self.expect_success && !status.success() {
            return Err(TestError::Process {
                program: self.program.clone(),
                status: exit_code,
                output,
            });
        }
        Ok(RunResult {
            exit_code,
            output,
            dump: None,
        })
    }

    /// Kills the process group if it is still running and returns what it
    /// printed so far.
    pub fn abort(&mut self) -> String {
        self.terminate();
        self.collect_output()
    }

    fn signal_group(&self) {
        let pgid = Pid::from_raw(self.child.id() as i32);
        // ESRCH just means the group is already gone.
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        self.signal_group();
        let _ = self.child.kill();
        if let Err(err) = self.child.wait() {
            log::warn!("failed to reap {}: {err}", self.program);
        }
        self.reaped = true;
    }

    fn collect_output(&mut self) -> String {
        let bytes = match self.reader.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => Vec::new(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.reaped {
            log::debug!("cleaning up {}", self.program);
            self.terminate();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation::new("/bin/sh", timeout).args(["-c", script])
    }

    #[test]
    fn captures_stdout_and_stderr_together() {
        let result = run(&sh("echo one; echo two >&2; echo three", Duration::from_secs(10)))
            .expect("run should succeed");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "one\ntwo\nthree\n");
        assert!(result.dump.is_none());
    }

    #[test]
    fn non_zero_exit_is_process_error_with_output() {
        let err = run(&sh("echo oops; exit 3", Duration::from_secs(10))).unwrap_err();
        match err {
            TestError::Process { status, output, .. } => {
                assert_eq!(status, 3);
                assert_eq!(output, "oops\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allow_failure_returns_status() {
        let result = run(&sh("echo PASS; exit 2", Duration::from_secs(10)).allow_failure())
            .expect("status is ignored");
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.output, "PASS\n");
    }

    #[test]
    fn hung_process_is_killed_at_deadline() {
        let started = Instant::now();
        let err = run(&sh("echo started; sleep 30; echo never", Duration::from_millis(500)))
            .unwrap_err();
        let elapsed = started.elapsed();
        match err {
            TestError::Timeout { output, .. } => assert_eq!(output, "started\n"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[test]
    fn dropping_running_process_kills_it() {
        let marker = tempfile::tempdir().unwrap();
        let path = marker.path().join("late");
        let script = format!("sleep 1; touch {}", path.display());
        let process = spawn(&sh(&script, Duration::from_secs(30))).unwrap();
        drop(process);
        thread::sleep(Duration::from_millis(1500));
        assert!(!path.exists());
    }

    #[test]
    fn abort_returns_partial_output() {
        let mut process = spawn(&sh("echo halfway; sleep 30", Duration::from_secs(30))).unwrap();
        thread::sleep(Duration::from_millis(200));
        let started = Instant::now();
        assert_eq!(process.abort(), "halfway\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_run_error() {
        let err = run(&Invocation::new("/nonexistent/simulator", Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Run);
    }

    #[test]
    fn command_line_joins_arguments() {
        let invocation = Invocation::new("/opt/bin/emulator", Duration::from_secs(1))
            .arg("-i")
            .arg("/tmp/pipe")
            .arg("image.hex");
        assert_eq!(invocation.command_line(), "/opt/bin/emulator -i /tmp/pipe image.hex");
        assert_eq!(invocation.program_name(), "emulator");
    }
}
