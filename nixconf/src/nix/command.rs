//! Subprocess helper with a deadline.

use std::{
    ffi::OsStr,
    io::Read,
    ops::{Deref, DerefMut},
    process::{Child, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A `std::process::Command` that is killed when it runs too long.
pub struct Command {
    inner: std::process::Command,
    timeout: Duration,
}

impl Deref for Command {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Command {
    /// Creates a new command.
    ///
    /// # Arguments
    ///
    /// * `program` - The program to execute.
    /// * `timeout` - How long to wait before killing the process.
    pub fn new<S: AsRef<OsStr>>(program: S, timeout: Duration) -> Self {
        Self {
            inner: std::process::Command::new(program),
            timeout,
        }
    }

    fn program_name(&self) -> String {
        self.get_program().to_string_lossy().into_owned()
    }

    fn command_line(&self) -> String {
        let mut line = self.program_name();
        for arg in self.get_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Runs the command to completion and returns its standard output.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] if the process cannot be spawned.
    /// * [`Error::SubprocessTimeout`] if it is still running at the deadline;
    ///   the process is killed first.
    /// * [`Error::Subprocess`] if it exits unsuccessfully.
    pub fn output_with_timeout(&mut self) -> Result<Vec<u8>> {
        debug!("spawning `{}`", self.command_line());
        let started = Instant::now();
        let mut child = self
            .inner
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // read both pipes while waiting
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_until(&mut child, started + self.timeout)? {
            Some(status) => status,
            None => {
                warn!(
                    "`{}` exceeded {:?}, killing it",
                    self.program_name(),
                    self.timeout
                );
                child.kill()?;
                child.wait()?;
                return Err(Error::SubprocessTimeout {
                    program: self.program_name(),
                    timeout: self.timeout,
                });
            }
        };

        let output = Output {
            status,
            stdout: join(stdout),
            stderr: join(stderr),
        };
        debug!(
            "`{}` finished with {} after {:?}",
            self.program_name(),
            output.status,
            started.elapsed()
        );

        if !output.status.success() {
            return Err(Error::Subprocess {
                program: self.program_name(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
