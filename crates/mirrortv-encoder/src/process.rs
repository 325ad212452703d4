//! Encoder subprocess lifecycle.
//!
//! One monitor thread per process owns the [`Child`]. It polls for exit,
//! accepts control messages from the owning [`EncoderProcess`] handle and
//! escalates a graceful stop to a forced kill after the configured grace.
//! Two reader threads drain stdout (status) and stderr (diagnostics).
//! None of these threads touch session state; they only emit
//! [`ProcessEvent`]s for the orchestrator to apply on its own thread.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use mirrortv_ipc::{ClientId, ExitStatus};

use crate::config::EncoderConfig;
use crate::diagnostics::DiagnosticTail;
use crate::error::EncoderError;
use crate::{EncoderResult, EXIT_POLL_INTERVAL, READER_DRAIN_TIMEOUT};

/// Engine-local number identifying one session instance.
pub type SessionId = u64;

/// Everything the supervisor needs to launch one session's encoder.
#[derive(Debug, Clone)]
pub struct SpawnContext {
    pub client_id: ClientId,
    pub session_id: SessionId,

    /// Live title of the resolved window.
    pub window_title: String,

    /// OS id of the resolved window.
    pub window_id: String,

    /// Private working directory, already created.
    pub output_dir: PathBuf,
}

/// Notifications from supervisor threads.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// The encoder wrote its first status output.
    FirstOutput {
        client_id: ClientId,
        session_id: SessionId,
    },

    /// The encoder is gone. Sent exactly once per process.
    Exited {
        client_id: ClientId,
        session_id: SessionId,
        status: ExitStatus,

        /// Last diagnostic lines, oldest first.
        diagnostics: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy)]
enum ProcessControl {
    Terminate,
    Kill,
}

/// Owning handle to a running encoder.
///
/// Dropping the handle disconnects the monitor's control channel, which
/// kills the process if it is still running.
#[derive(Debug)]
pub struct EncoderProcess {
    pid: u32,
    control_tx: Sender<ProcessControl>,
    terminate_sent: bool,
}

impl EncoderProcess {
    /// Launch the encoder and start its monitor and reader threads.
    ///
    /// A spawn failure is returned directly; no [`ProcessEvent`] is sent for
    /// a process that never started.
    #[instrument(name = "spawn_encoder", skip(config, context, events), fields(client_id = %context.client_id, session_id = context.session_id))]
    pub fn spawn(
        config: &EncoderConfig,
        context: SpawnContext,
        events: Sender<ProcessEvent>,
    ) -> EncoderResult<Self> {
        let args = config.render_args(&context.window_title, &context.window_id, &context.output_dir);
        debug!(program = %config.program.display(), ?args, "Encoder command");

        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncoderError::SpawnFailed {
                program: config.program.clone(),
                source,
            })?;

        let pid = child.id();
        info!(pid, output_dir = %context.output_dir.display(), "Encoder started");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let tail = Arc::new(Mutex::new(DiagnosticTail::default()));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(2);
        let readers = match start_readers(stdout, stderr, &context, &events, &tail, &done_tx) {
            Ok(readers) => readers,
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(EncoderError::Monitor(e));
            }
        };
        drop(done_tx);

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let monitor = Monitor {
            child,
            stdin,
            pid,
            client_id: context.client_id.clone(),
            session_id: context.session_id,
            kill_grace: config.kill_grace,
            control_rx,
            events,
            tail,
            done_rx,
            readers,
        };

        // The monitor owns the child; if its thread cannot start the child
        // is dropped here, so kill it through the pid first.
        let monitor_thread = thread::Builder::new()
            .name(format!("encoder-monitor-{}", context.session_id))
            .spawn(move || monitor.run());

        if let Err(e) = monitor_thread {
            force_kill_pid(pid);
            return Err(EncoderError::Monitor(e));
        }

        Ok(Self {
            pid,
            control_tx,
            terminate_sent: false,
        })
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request a graceful stop. Returns immediately; the exit arrives later
    /// as [`ProcessEvent::Exited`]. Repeated calls are no-ops.
    pub fn terminate(&mut self) {
        if self.terminate_sent {
            return;
        }
        self.terminate_sent = true;
        // A closed channel means the monitor already saw the exit.
        let _ = self.control_tx.send(ProcessControl::Terminate);
    }

    /// Force the process down now.
    pub fn kill(&self) {
        let _ = self.control_tx.send(ProcessControl::Kill);
    }
}

struct Monitor {
    child: Child,
    stdin: Option<ChildStdin>,
    pid: u32,
    client_id: ClientId,
    session_id: SessionId,
    kill_grace: Duration,
    control_rx: Receiver<ProcessControl>,
    events: Sender<ProcessEvent>,
    tail: Arc<Mutex<DiagnosticTail>>,
    done_rx: Receiver<()>,
    readers: usize,
}

impl Monitor {
    fn run(mut self) {
        let status = self.wait_for_exit();
        match &status {
            ExitStatus::Code(code) => info!(client_id = %self.client_id, pid = self.pid, code, "Encoder exited"),
            ExitStatus::Signaled => info!(client_id = %self.client_id, pid = self.pid, "Encoder terminated by signal"),
            ExitStatus::WaitFailed(e) => error!(client_id = %self.client_id, pid = self.pid, "Waiting on encoder failed: {}", e),
        }

        self.drain_readers();
        let diagnostics = self.tail.lock().to_vec();

        let event = ProcessEvent::Exited {
            client_id: self.client_id.clone(),
            session_id: self.session_id,
            status,
            diagnostics,
        };
        if self.events.send(event).is_err() {
            debug!(client_id = %self.client_id, "Exit event dropped, receiver gone");
        }
    }

    fn wait_for_exit(&mut self) -> ExitStatus {
        let mut kill_deadline: Option<Instant> = None;
        let mut killed = false;
        let mut control_open = true;

        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    return match status.code() {
                        Some(code) => ExitStatus::Code(code),
                        None => ExitStatus::Signaled,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    kill_and_reap(&mut self.child);
                    return ExitStatus::WaitFailed(e.to_string());
                }
            }

            if let Some(deadline) = kill_deadline {
                if !killed && Instant::now() >= deadline {
                    warn!(
                        client_id = %self.client_id,
                        pid = self.pid,
                        grace_ms = self.kill_grace.as_millis() as u64,
                        "Encoder ignored graceful stop, killing"
                    );
                    self.force_kill(&mut killed);
                }
            }

            if !control_open {
                thread::sleep(EXIT_POLL_INTERVAL);
                continue;
            }

            match self.control_rx.recv_timeout(EXIT_POLL_INTERVAL) {
                Ok(ProcessControl::Terminate) => {
                    if kill_deadline.is_none() && !killed {
                        debug!(client_id = %self.client_id, pid = self.pid, "Sending graceful stop");
                        self.request_graceful_stop();
                        kill_deadline = Some(Instant::now() + self.kill_grace);
                    }
                }
                Ok(ProcessControl::Kill) => self.force_kill(&mut killed),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    control_open = false;
                    if !killed {
                        debug!(client_id = %self.client_id, pid = self.pid, "Handle dropped, killing encoder");
                        self.force_kill(&mut killed);
                    }
                }
            }
        }
    }

    fn force_kill(&mut self, killed: &mut bool) {
        if let Err(e) = self.child.kill() {
            debug!(pid = self.pid, "Kill failed (already exited?): {}", e);
        }
        *killed = true;
    }

    #[cfg(unix)]
    fn request_graceful_stop(&mut self) {
        let Ok(pid) = libc::pid_t::try_from(self.pid) else {
            warn!(pid = self.pid, "PID out of range, cannot signal");
            return;
        };
        // SAFETY: the child has not been reaped (try_wait returned None on
        // this thread), so the pid still names our process.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    fn request_graceful_stop(&mut self) {
        use std::io::Write;

        // ffmpeg quits cleanly on `q` from its interactive stdin.
        match self.stdin.as_mut() {
            Some(stdin) => {
                if let Err(e) = stdin.write_all(b"q").and_then(|()| stdin.flush()) {
                    debug!(pid = self.pid, "Writing quit command failed: {}", e);
                }
            }
            None => warn!(pid = self.pid, "No stdin to send quit command"),
        }
    }

    fn drain_readers(&mut self) {
        // Closing stdin lets encoders that wait on it finish.
        self.stdin.take();

        let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
        for _ in 0..self.readers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.done_rx.recv_timeout(remaining).is_err() {
                debug!(client_id = %self.client_id, "Output readers still open after exit");
                break;
            }
        }
    }
}

fn start_readers(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    context: &SpawnContext,
    events: &Sender<ProcessEvent>,
    tail: &Arc<Mutex<DiagnosticTail>>,
    done_tx: &Sender<()>,
) -> std::io::Result<usize> {
    let mut readers = 0;
    if let Some(stdout) = stdout {
        spawn_status_reader(stdout, context, events.clone(), done_tx.clone())?;
        readers += 1;
    }
    if let Some(stderr) = stderr {
        spawn_diagnostic_reader(stderr, context, Arc::clone(tail), done_tx.clone())?;
        readers += 1;
    }
    Ok(readers)
}

fn spawn_status_reader<R: Read + Send + 'static>(
    stdout: R,
    context: &SpawnContext,
    events: Sender<ProcessEvent>,
    done_tx: Sender<()>,
) -> std::io::Result<()> {
    let client_id = context.client_id.clone();
    let session_id = context.session_id;

    thread::Builder::new()
        .name(format!("encoder-status-{}", session_id))
        .spawn(move || {
            let mut seen_output = false;
            let result = for_each_line(stdout, |line| {
                if !seen_output {
                    seen_output = true;
                    let _ = events.send(ProcessEvent::FirstOutput {
                        client_id: client_id.clone(),
                        session_id,
                    });
                }
                trace!(client_id = %client_id, "encoder status: {}", line);
            });
            if let Err(e) = result {
                debug!(client_id = %client_id, "Status pipe read failed: {}", e);
            }
            let _ = done_tx.send(());
        })?;

    Ok(())
}

fn spawn_diagnostic_reader<R: Read + Send + 'static>(
    stderr: R,
    context: &SpawnContext,
    tail: Arc<Mutex<DiagnosticTail>>,
    done_tx: Sender<()>,
) -> std::io::Result<()> {
    let client_id = context.client_id.clone();

    thread::Builder::new()
        .name(format!("encoder-diag-{}", context.session_id))
        .spawn(move || {
            let result = for_each_line(stderr, |line| {
                if line.trim().is_empty() {
                    return;
                }
                let lower = line.to_lowercase();
                if lower.contains("error") || lower.contains("can't find window") {
                    warn!(client_id = %client_id, "encoder: {}", line);
                } else {
                    debug!(client_id = %client_id, "encoder: {}", line);
                }
                tail.lock().push(line);
            });
            if let Err(e) = result {
                debug!(client_id = %client_id, "Diagnostic pipe read failed: {}", e);
            }
            let _ = done_tx.send(());
        })?;

    Ok(())
}

/// Call `on_line` for every line until EOF. Invalid UTF-8 is replaced
/// instead of ending the read; a reader that stops early closes the pipe
/// and the encoder dies on its next write.
fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(&str)) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(['\r', '\n']));
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn force_kill_pid(pid: u32) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        // SAFETY: called right after spawn, before anything could reap it.
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn force_kill_pid(pid: u32) {
    warn!(pid, "Cannot kill encoder without its monitor thread");
}
