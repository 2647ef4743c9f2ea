//! Host interrupt delivery over named pipes.
//!
//! The payload is a raw byte stream: each byte is one interrupt, in order.
//! Two directions are supported:
//!
//! - host to guest: the harness writes timed single-byte pulses into the
//!   pipe the backend reads with `-i`;
//! - guest to host: the backend writes a byte per raised interrupt into the
//!   pipe given with `-o`, and the harness reads them after it exits.
//!
//! Opening the write end of a FIFO blocks until a reader appears. Here that
//! handshake is an explicit poll against the test deadline, so a guest that
//! never opens its end times out instead of hanging the suite.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::error::TestError;
use crate::process::RunningProcess;
use crate::types::RunResult;

const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// A FIFO on disk that is unlinked when dropped.
#[derive(Debug)]
pub struct InterruptPipe {
    path: PathBuf,
}

impl InterruptPipe {
    /// Creates the FIFO, first removing anything a previous run left at
    /// `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, TestError> {
        let path = path.into();
        match fs::remove_file(&path) {
            Ok(()) => log::warn!("removed stale interrupt pipe {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(TestError::resource(
                    format!("failed to remove stale pipe {}", path.display()),
                    err,
                ));
            }
        }
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| {
            TestError::resource(format!("failed to create pipe {}", path.display()), e.into())
        })?;
        log::debug!("created interrupt pipe {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the read end without waiting for a writer.
    pub fn open_reader(&self) -> Result<File, TestError> {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)
            .map_err(|e| {
                TestError::resource(format!("failed to open {} for reading", self.path.display()), e)
            })
    }

    /// Opens the write end once `process` has opened the read end.
    ///
    /// Fails with [`TestError::Timeout`] if that has not happened by
    /// `deadline`, or [`TestError::Run`] if the process exits first.
    pub fn open_writer(
        &self,
        process: &mut RunningProcess,
        deadline: Instant,
    ) -> Result<File, TestError> {
        loop {
            let attempt = OpenOptions::new()
                .write(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(&self.path);
            match attempt {
                Ok(file) => {
                    log::debug!("{} opened {}", process.program(), self.path.display());
                    return Ok(file);
                }
                // ENXIO: no reader yet.
                Err(err) if err.raw_os_error() == Some(nix::libc::ENXIO) => {}
                Err(err) => {
                    return Err(TestError::resource(
                        format!("failed to open {} for writing", self.path.display()),
                        err,
                    ));
                }
            }
            if process.has_exited()? {
                return Err(TestError::Run {
                    message: format!(
                        "{} exited without opening {}",
                        process.program(),
                        self.path.display()
                    ),
                    output: process.abort(),
                });
            }
            if Instant::now() >= deadline {
                log::warn!("{} never opened {}", process.program(), self.path.display());
                return Err(TestError::Timeout {
                    program: process.program().to_string(),
                    timeout: process.timeout(),
                    output: process.abort(),
                });
            }
            thread::sleep(HANDSHAKE_POLL);
        }
    }
}

impl Drop for InterruptPipe {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed interrupt pipe {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to remove {}: {err}", self.path.display()),
        }
    }
}

/// Timed sequence of interrupt pulses sent to the guest.
#[derive(Debug, Clone)]
pub struct PulseTrain {
    pub pulses: Vec<u8>,
    pub interval: Duration,
}

impl PulseTrain {
    pub fn new(pulses: impl Into<Vec<u8>>, interval: Duration) -> Self {
        Self {
            pulses: pulses.into(),
            interval,
        }
    }
}

/// Drives host-to-guest delivery for a backend already started with
/// `pipe` as its interrupt input, then waits for it to finish.
///
/// The write end stays open until the backend exits, so the guest never
/// sees end-of-file on its interrupt source while it runs.
pub fn deliver_to_guest(
    pipe: &InterruptPipe,
    mut process: RunningProcess,
    train: &PulseTrain,
) -> Result<RunResult, TestError> {
    let deadline = process.deadline();
    let mut writer = pipe.open_writer(&mut process, deadline)?;
    for (idx, &pulse) in train.pulses.iter().enumerate() {
        match write_pulse(&mut writer, pulse, deadline) {
            Ok(()) => log::debug!("sent interrupt pulse {pulse}"),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                log::warn!(
                    "{} closed its interrupt input after {idx} of {} pulses",
                    process.program(),
                    train.pulses.len()
                );
                break;
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                return Err(TestError::Timeout {
                    program: process.program().to_string(),
                    timeout: process.timeout(),
                    output: process.abort(),
                });
            }
            Err(err) => {
                return Err(TestError::resource(
                    format!("failed to write {}", pipe.path().display()),
                    err,
                ));
            }
        }
        thread::sleep(train.interval);
    }
    let result = process.wait_until(deadline);
    drop(writer);
    result
}

fn write_pulse(writer: &mut File, pulse: u8, deadline: Instant) -> io::Result<()> {
    loop {
        match writer.write(&[pulse]) {
            Ok(1) => return Ok(()),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "interrupt pipe stayed full",
            ));
        }
        thread::sleep(HANDSHAKE_POLL);
    }
}

/// Collects guest-to-host interrupts from a backend started with `pipe` as
/// its interrupt output; `reader` must have been opened before the spawn.
///
/// Returns the run result and at most `max_bytes` bytes read after exit.
pub fn collect_from_guest(
    mut reader: File,
    process: RunningProcess,
    max_bytes: usize,
) -> Result<(RunResult, Vec<u8>), TestError> {
    let result = process.wait()?;
    let received = read_available(&mut reader, max_bytes)
        .map_err(|e| TestError::resource("failed to read interrupt pipe", e))?;
    log::debug!("received host interrupts {received:?}");
    Ok((result, received))
}

/// Reads whatever is buffered, stopping at `max_bytes`, end-of-file or an
/// empty non-blocking read.
pub fn read_available(reader: &mut impl Read, max_bytes: usize) -> io::Result<Vec<u8>> {
    let mut received = Vec::with_capacity(max_bytes);
    let mut chunk = [0u8; 64];
    while received.len() < max_bytes {
        let want = (max_bytes - received.len()).min(chunk.len());
        match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(received)
}
