//! Run the capture process piped into the stream process.

use std::io;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::command::CommandLine;
use crate::error::{Result, StreamerError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// The two command lines, not yet started.
#[derive(Debug, Clone)]
pub struct Pipeline {
    capture: CommandLine,
    stream: CommandLine,
    grace_period: Duration,
}

impl Pipeline {
    pub fn new(capture: CommandLine, stream: CommandLine) -> Self {
        Self {
            capture,
            stream,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// How long stopped processes get to exit before they are killed.
    #[cfg(test)]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Programs of this pipeline that aren't installed.
    pub fn missing_programs(&self) -> Vec<String> {
        [&self.capture, &self.stream]
            .into_iter()
            .filter(|cmd| cmd.locate().is_none())
            .map(|cmd| cmd.program.clone())
            .collect()
    }

    /// Start capture, then stream with its stdin fed from capture's stdout.
    ///
    /// Fails before anything is spawned if a program is missing.
    pub fn start(&self) -> Result<RunningPipeline> {
        let (Some(capture_path), Some(stream_path)) = (self.capture.locate(), self.stream.locate())
        else {
            return Err(StreamerError::MissingCommands(self.missing_programs()));
        };

        debug!("spawning capture: {}", self.capture);
        let mut capture = self
            .capture
            .to_command(&capture_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| StreamerError::Spawn {
                program: self.capture.program.clone(),
                source,
            })?;

        let Some(capture_out) = capture.stdout.take() else {
            kill_and_reap(&mut capture);
            return Err(io::Error::other("failed to take capture stdout").into());
        };

        debug!("spawning stream: {}", self.stream);
        let stream = self
            .stream
            .to_command(&stream_path)
            .stdin(Stdio::from(capture_out))
            .stdout(Stdio::null())
            .spawn();
        let stream = match stream {
            Ok(child) => child,
            Err(source) => {
                kill_and_reap(&mut capture);
                return Err(StreamerError::Spawn {
                    program: self.stream.program.clone(),
                    source,
                });
            }
        };

        info!(
            "started {} (pid {}) piped into {} (pid {})",
            self.capture.program,
            capture.id(),
            self.stream.program,
            stream.id()
        );

        Ok(RunningPipeline {
            capture: Stage::new(&self.capture.program, capture),
            stream: Stage::new(&self.stream.program, stream),
            grace_period: self.grace_period,
        })
    }
}

struct Stage {
    program: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl Stage {
    fn new(program: &str, child: Child) -> Self {
        Self {
            program: program.to_string(),
            child,
            status: None,
        }
    }

    fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }
}

/// Both processes, running.
pub struct RunningPipeline {
    capture: Stage,
    stream: Stage,
    grace_period: Duration,
}

impl RunningPipeline {
    /// Block until `running` is cleared or one of the processes exits.
    ///
    /// Whatever is still running afterwards is stopped. `Ok` means the user
    /// stopped the stream; a process ending on its own is an error:
    /// [`StreamerError::ProcessFailed`] for a failure status,
    /// [`StreamerError::ProcessEnded`] otherwise.
    pub fn wait(mut self, running: &AtomicBool) -> Result<()> {
        let result = self.supervise(running);
        if result.is_err() {
            self.kill_all();
        }
        result
    }

    fn supervise(&mut self, running: &AtomicBool) -> Result<()> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{} | {}", self.capture.program, self.stream.program));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let interrupted = loop {
            if !running.load(Ordering::SeqCst) {
                break true;
            }
            let capture_done = self.capture.poll()?.is_some();
            let stream_done = self.stream.poll()?.is_some();
            if capture_done || stream_done {
                break false;
            }
            thread::sleep(POLL_INTERVAL);
        };
        spinner.finish_and_clear();

        // Exits we didn't cause; whatever stop() does afterwards doesn't count.
        self.capture.poll()?;
        self.stream.poll()?;
        let exited: Vec<(String, ExitStatus)> = [&self.capture, &self.stream]
            .into_iter()
            .filter_map(|stage| stage.status.map(|status| (stage.program.clone(), status)))
            .collect();

        self.stop()?;

        if interrupted {
            info!("stream stopped");
            return Ok(());
        }
        // Ctrl+C reaches the children too, so they may beat our own handler.
        if running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
        if !running.load(Ordering::SeqCst) {
            info!("stream stopped");
            return Ok(());
        }

        if let Some((program, status)) = exited.iter().find(|(_, status)| !status.success()) {
            return Err(StreamerError::ProcessFailed {
                program: program.clone(),
                status: *status,
            });
        }
        let program = exited
            .into_iter()
            .next()
            .map(|(program, _)| program)
            .unwrap_or_else(|| self.capture.program.clone());
        Err(StreamerError::ProcessEnded { program })
    }

    /// Ask both processes to terminate, give them the grace period to exit,
    /// then kill the rest.
    pub fn stop(&mut self) -> Result<()> {
        let result = self.terminate_then_kill();
        if result.is_err() {
            self.kill_all();
        }
        result
    }

    fn terminate_then_kill(&mut self) -> Result<()> {
        for stage in [&mut self.capture, &mut self.stream] {
            if stage.poll()?.is_none() {
                debug!("terminating {}", stage.program);
                terminate(&stage.child);
            }
        }

        let deadline = Instant::now() + self.grace_period;
        loop {
            let capture_done = self.capture.poll()?.is_some();
            let stream_done = self.stream.poll()?.is_some();
            if capture_done && stream_done {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        for stage in [&mut self.capture, &mut self.stream] {
            if stage.status.is_none() {
                warn!("{} did not exit, killing it", stage.program);
                kill_and_reap(&mut stage.child);
                stage.status = stage.child.try_wait()?;
            }
        }
        Ok(())
    }

    /// Kill and reap both processes. Used when supervising them failed.
    fn kill_all(&mut self) {
        for stage in [&mut self.capture, &mut self.stream] {
            if stage.status.is_none() {
                kill_and_reap(&mut stage.child);
                stage.status = stage.child.try_wait().ok().flatten();
            }
        }
    }
}

/// Send SIGTERM. The child must not have been reaped yet.
#[cfg(unix)]
fn terminate(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we own and haven't waited on.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!("SIGTERM to {} failed: {}", pid, io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("kill failed: {}", e);
    }
    let _ = child.wait();
}
