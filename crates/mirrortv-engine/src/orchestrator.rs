//! Main engine orchestrator.
//!
//! One core thread owns the session registry and the broadcast hub. It
//! selects over three inputs: commands from [`EngineHandle`]s, window
//! resolutions posted back by short-lived worker threads, and
//! [`ProcessEvent`]s from encoder monitors. Nothing else touches the
//! registry, so every check-then-act on it is atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use mirrortv_capture::{resolve, suggest, Resolution, WindowSource};
use mirrortv_encoder::{
    classify_diagnostics, classify_spawn_error, prepare_session_dir, remove_session_dir,
    EncoderProcess, FailureHint, ProcessEvent, SessionId, SpawnContext, MAX_CLIENT_ID_BYTES,
};
use mirrortv_ipc::{
    ClientId, ErrorKind, ErrorRecord, ExitStatus, HubEvent, Roster, SessionState,
    SessionSummary, StartRequest, StopReason, TargetDescriptor, WindowSuggestion,
};

use crate::error_log::ErrorLog;
use crate::hub::BroadcastHub;
use crate::registry::{Reservation, Session, SessionRegistry};
use crate::{EngineConfig, EngineError, EngineResult, COMMAND_CHANNEL_CAPACITY, IDLE_TICK};

type Reply<T> = Sender<T>;

enum Command {
    Start {
        request: StartRequest,
        reply: Reply<EngineResult<SessionSummary>>,
    },
    Stop {
        client_id: ClientId,
        reply: Reply<EngineResult<()>>,
    },
    StopAll {
        reply: Reply<usize>,
    },
    ListActive {
        reply: Reply<Roster>,
    },
    Session {
        client_id: ClientId,
        reply: Reply<Option<SessionSummary>>,
    },
    Subscribe {
        reply: Reply<Receiver<HubEvent>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// A start request waiting for its window resolution.
struct PendingStart {
    reservation: Reservation,
    request: StartRequest,
    reply: Reply<EngineResult<SessionSummary>>,

    /// Set by a stop for the same client; the start releases its slot
    /// instead of launching.
    cancelled: bool,
}

struct ResolutionOutcome {
    ticket: u64,
    result: Result<Resolution, Vec<WindowSuggestion>>,
}

struct ShutdownState {
    deadline: Instant,
    waiters: Vec<Reply<()>>,
}

/// The capture-session engine.
pub struct Engine {
    config: EngineConfig,
    command_rx: Receiver<Command>,
    process_tx: Sender<ProcessEvent>,
    process_rx: Receiver<ProcessEvent>,
    resolved_tx: Sender<ResolutionOutcome>,
    resolved_rx: Receiver<ResolutionOutcome>,
    registry: SessionRegistry<EncoderProcess>,
    pending_starts: HashMap<u64, PendingStart>,
    next_ticket: u64,
    next_session_id: SessionId,
    hub: BroadcastHub,
    error_log: Arc<ErrorLog>,
    windows: Arc<dyn WindowSource>,
    shutdown: Option<ShutdownState>,
}

impl Engine {
    /// Create an engine and the handle used to drive it.
    pub fn new(
        config: EngineConfig,
        windows: Arc<dyn WindowSource>,
        error_log: Arc<ErrorLog>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY);
        let (process_tx, process_rx) = crossbeam_channel::unbounded();
        let (resolved_tx, resolved_rx) = crossbeam_channel::unbounded();

        let engine = Self {
            registry: SessionRegistry::new(config.max_sessions),
            config,
            command_rx,
            process_tx,
            process_rx,
            resolved_tx,
            resolved_rx,
            pending_starts: HashMap::new(),
            next_ticket: 0,
            next_session_id: 1,
            hub: BroadcastHub::new(),
            error_log,
            windows,
            shutdown: None,
        };

        (engine, EngineHandle { command_tx })
    }

    /// Run the engine until shutdown (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(mut self) {
        info!(
            max_sessions = self.config.max_sessions,
            stream_root = %self.config.stream_root.display(),
            "Engine starting"
        );

        let mut commands = self.command_rx.clone();
        let resolved = self.resolved_rx.clone();
        let process_events = self.process_rx.clone();

        loop {
            let mut disconnected = false;

            crossbeam_channel::select! {
                recv(commands) -> msg => match msg {
                    Ok(command) => self.handle_command(command),
                    Err(_) => disconnected = true,
                },
                recv(resolved) -> msg => {
                    if let Ok(outcome) = msg {
                        self.finish_start(outcome);
                    }
                },
                recv(process_events) -> msg => {
                    if let Ok(event) = msg {
                        self.handle_process_event(event);
                    }
                },
                default(IDLE_TICK) => {}
            }

            if disconnected {
                info!("Command channel disconnected, shutting down");
                commands = crossbeam_channel::never();
                self.begin_shutdown(None);
            }

            if self.shutdown_complete() {
                break;
            }
        }

        self.finish_shutdown();
        info!("Engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => self.start_session(request, reply),
            Command::Stop { client_id, reply } => {
                let _ = reply.send(self.stop_session(&client_id, StopReason::UserRequested));
            }
            Command::StopAll { reply } => {
                let _ = reply.send(self.stop_all(StopReason::StopAll));
            }
            Command::ListActive { reply } => {
                let _ = reply.send(self.registry.roster());
            }
            Command::Session { client_id, reply } => {
                let summary = self.registry.get(&client_id).map(|s| s.summary(Utc::now()));
                let _ = reply.send(summary);
            }
            Command::Subscribe { reply } => {
                let rx = self.hub.subscribe(self.registry.roster());
                let _ = reply.send(rx);
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    /// Validate, reserve a slot and hand resolution to a worker thread.
    #[instrument(name = "start_session", skip(self, request, reply), fields(client_id = %request.client_id))]
    fn start_session(&mut self, request: StartRequest, reply: Reply<EngineResult<SessionSummary>>) {
        if self.shutdown.is_some() {
            let _ = reply.send(Err(EngineError::EngineUnavailable));
            return;
        }
        if request.client_id.is_blank() {
            let _ = reply.send(Err(EngineError::InvalidRequest("clientId is required".into())));
            return;
        }
        if request.client_id.as_str().len() > MAX_CLIENT_ID_BYTES {
            let _ = reply.send(Err(EngineError::InvalidRequest(format!(
                "clientId must be at most {MAX_CLIENT_ID_BYTES} bytes"
            ))));
            return;
        }
        if request.window_title.trim().is_empty() {
            let _ = reply.send(Err(EngineError::InvalidRequest("windowTitle is required".into())));
            return;
        }

        let reservation = match self.registry.reserve(&request.client_id) {
            Ok(reservation) => reservation,
            Err(e) => {
                info!("Start rejected: {}", e);
                let _ = reply.send(Err(e));
                return;
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let target = request.window_title.clone();
        let fallback_target = target.clone();
        self.pending_starts.insert(
            ticket,
            PendingStart {
                reservation,
                request,
                reply,
                cancelled: false,
            },
        );

        let windows = Arc::clone(&self.windows);
        let resolved_tx = self.resolved_tx.clone();
        let limit = self.config.suggestion_limit;

        let spawned = thread::Builder::new()
            .name("window-resolver".into())
            .spawn(move || {
                let result = resolve_target(windows.as_ref(), &target, limit);
                let _ = resolved_tx.send(ResolutionOutcome { ticket, result });
            });

        if let Err(e) = spawned {
            warn!("Failed to start resolver thread, resolving inline: {}", e);
            let result = resolve_target(self.windows.as_ref(), &fallback_target, limit);
            self.finish_start(ResolutionOutcome { ticket, result });
        }
    }

    /// Second half of a start: launch the encoder or release the slot.
    fn finish_start(&mut self, outcome: ResolutionOutcome) {
        let Some(pending) = self.pending_starts.remove(&outcome.ticket) else {
            warn!(ticket = outcome.ticket, "Resolution for unknown start request");
            return;
        };
        let PendingStart {
            reservation,
            request,
            reply,
            cancelled,
        } = pending;

        if self.shutdown.is_some() {
            self.registry.release(reservation);
            let _ = reply.send(Err(EngineError::EngineUnavailable));
            return;
        }
        if cancelled {
            info!(client_id = %request.client_id, "Start cancelled before launch");
            self.registry.release(reservation);
            let _ = reply.send(Err(EngineError::StartCancelled(request.client_id)));
            return;
        }

        let result = match outcome.result {
            Ok(resolution) => self.launch(reservation, &request, resolution),
            Err(suggestions) => {
                self.registry.release(reservation);
                self.record_resolution_failure(&request, &suggestions);
                Err(EngineError::ResolutionFailed {
                    target: request.window_title.clone(),
                    suggestions,
                })
            }
        };

        if result.is_ok() {
            self.publish_roster();
        }
        let _ = reply.send(result);
    }

    #[instrument(name = "launch_session", skip_all, fields(client_id = %request.client_id))]
    fn launch(
        &mut self,
        reservation: Reservation,
        request: &StartRequest,
        resolution: Resolution,
    ) -> EngineResult<SessionSummary> {
        let client_id = request.client_id.clone();
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        info!(
            stage = resolution.stage.name(),
            window = %resolution.window.raw_title,
            window_id = %resolution.window.os_id,
            "Resolved capture target"
        );

        let output_dir = match prepare_session_dir(&self.config.stream_root, &client_id) {
            Ok(dir) => dir,
            Err(e) => {
                self.registry.release(reservation);
                let message = format!("Failed to prepare output directory: {e}");
                self.record_spawn_failure(request, &message, classify_spawn_error(e.kind()));
                return Err(EngineError::SpawnFailed { message });
            }
        };

        let context = SpawnContext {
            client_id: client_id.clone(),
            session_id,
            window_title: resolution.window.raw_title.clone(),
            window_id: resolution.window.os_id.clone(),
            output_dir: output_dir.clone(),
        };

        match EncoderProcess::spawn(&self.config.encoder, context, self.process_tx.clone()) {
            Ok(process) => {
                let mut target = TargetDescriptor::new(&*request.window_title, request.window_id.clone());
                target.resolved_id = Some(resolution.window.os_id);
                target.resolved_title = Some(resolution.window.raw_title);

                let session = Session::new(
                    client_id,
                    session_id,
                    target,
                    request.label().to_string(),
                    output_dir,
                    process,
                );
                info!(pid = session.process().pid(), session_id, "Session started");

                let summary = session.summary(Utc::now());
                self.registry.commit(reservation, session);
                Ok(summary)
            }
            Err(e) => {
                self.registry.release(reservation);
                if let Err(err) = remove_session_dir(&output_dir) {
                    warn!(path = %output_dir.display(), "Failed to remove output directory: {}", err);
                }
                let message = e.to_string();
                self.record_spawn_failure(request, &message, classify_spawn_error(e.io_kind()));
                Err(EngineError::SpawnFailed { message })
            }
        }
    }

    /// Ask a session's encoder to stop. Cleanup happens when it exits.
    #[instrument(name = "stop_session", skip(self), fields(client_id = %client_id))]
    fn stop_session(&mut self, client_id: &ClientId, reason: StopReason) -> EngineResult<()> {
        let Some(session) = self.registry.get_mut(client_id) else {
            return self.cancel_pending_start(client_id);
        };

        if session.state().is_stopping() {
            debug!("Already stopping, ignoring stop");
            return Ok(());
        }

        info!(reason = reason.message(), "Stopping session");
        session.transition_to(SessionState::Stopping);
        session.process_mut().terminate();

        self.publish_roster();
        Ok(())
    }

    /// Mark a start that is still resolving as cancelled. Repeated stops
    /// are no-ops, like a stop while stopping.
    fn cancel_pending_start(&mut self, client_id: &ClientId) -> EngineResult<()> {
        let pending = self
            .pending_starts
            .values_mut()
            .find(|pending| pending.reservation.client_id() == client_id);

        match pending {
            Some(pending) => {
                if !pending.cancelled {
                    info!("Stop arrived during window resolution, cancelling start");
                    pending.cancelled = true;
                }
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(client_id.clone())),
        }
    }

    /// Signal every session that is not already stopping.
    fn stop_all(&mut self, reason: StopReason) -> usize {
        let mut signalled = 0;

        for client_id in self.registry.client_ids() {
            let already_stopping = self
                .registry
                .get(&client_id)
                .map_or(true, |s| s.state().is_stopping());
            if already_stopping {
                continue;
            }
            if self.stop_session(&client_id, reason.clone()).is_ok() {
                signalled += 1;
            }
        }

        info!(signalled, reason = reason.message(), "Stop-all complete");
        signalled
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::FirstOutput {
                client_id,
                session_id,
            } => {
                let Some(session) = self.registry.get_mut(&client_id) else {
                    return;
                };
                if session.session_id != session_id || session.state() != SessionState::Starting {
                    return;
                }
                if session.transition_to(SessionState::Running) {
                    info!(client_id = %client_id, "Encoder producing output");
                    self.publish_roster();
                }
            }
            ProcessEvent::Exited {
                client_id,
                session_id,
                status,
                diagnostics,
            } => self.handle_exit(client_id, session_id, status, diagnostics),
        }
    }

    /// Remove the session, delete its directory and tell observers.
    #[instrument(name = "session_exit", skip(self, diagnostics), fields(client_id = %client_id))]
    fn handle_exit(
        &mut self,
        client_id: ClientId,
        session_id: SessionId,
        status: ExitStatus,
        diagnostics: Vec<String>,
    ) {
        let Some(mut session) = self.registry.remove(&client_id, session_id) else {
            debug!(session_id, "Exit for a session that is no longer registered");
            return;
        };

        let stop_requested = session.state().is_stopping();
        session.transition_to(SessionState::Terminated);

        match remove_session_dir(&session.output_dir) {
            Ok(_) => debug!(path = %session.output_dir.display(), "Removed session directory"),
            Err(e) => warn!(path = %session.output_dir.display(), "Failed to remove session directory: {}", e),
        }

        info!(session_id, ?status, stop_requested, "Session terminated");
        self.hub.publish(HubEvent::SessionStopped {
            client_id: client_id.clone(),
        });

        if status.is_abnormal() {
            if stop_requested {
                debug!(?status, "Encoder exited non-zero after a stop request");
            } else {
                self.record_runtime_failure(&session, &status, &diagnostics);
            }
        }

        self.publish_roster();
    }

    fn record_resolution_failure(&self, request: &StartRequest, suggestions: &[WindowSuggestion]) {
        let mut details = format!(
            "Window not found: \"{}\" (client {})",
            request.window_title, request.client_id
        );
        if suggestions.is_empty() {
            details.push_str("\nNo similar windows are open.");
        } else {
            details.push_str("\nSimilar windows:");
            for s in suggestions {
                details.push_str(&format!(
                    "\n  - {} ({:.0}% match: {})",
                    s.title,
                    s.score * 100.0,
                    s.common_words.join(", ")
                ));
            }
        }

        self.error_log.append(ErrorRecord::new(
            ErrorKind::ResolutionFailed,
            details,
            Some(request.client_id.clone()),
        ));
    }

    fn record_spawn_failure(&mut self, request: &StartRequest, message: &str, hint: FailureHint) {
        error!(client_id = %request.client_id, "Encoder spawn failed: {}", message);

        let details = format!(
            "Failed to start encoder for client {} ({})\nWindow: {}\nError: {}\n\n{}",
            request.client_id,
            request.label(),
            request.window_title,
            message,
            hint.suggestion()
        );
        self.error_log.append(ErrorRecord::new(
            ErrorKind::SpawnFailed,
            details,
            Some(request.client_id.clone()),
        ));

        self.hub.publish(HubEvent::SessionError {
            client_id: request.client_id.clone(),
            message: format!("Failed to start encoder: {message}"),
        });
    }

    fn record_runtime_failure(
        &mut self,
        session: &Session<EncoderProcess>,
        status: &ExitStatus,
        diagnostics: &[String],
    ) {
        let message = match status {
            ExitStatus::Code(code) => format!("Encoder exited with code {code}"),
            ExitStatus::WaitFailed(e) => format!("Lost track of encoder: {e}"),
            ExitStatus::Signaled => "Encoder was terminated by a signal".to_string(),
        };
        let hint = classify_diagnostics(diagnostics);

        let mut details = format!(
            "{} for client {} ({})\nWindow: {}",
            message,
            session.client_id,
            session.display_label,
            session
                .target
                .resolved_title
                .as_deref()
                .unwrap_or(&session.target.requested)
        );
        if !diagnostics.is_empty() {
            details.push_str("\n\nEncoder output:\n");
            details.push_str(&diagnostics.join("\n"));
        }
        details.push_str("\n\n");
        details.push_str(hint.suggestion());

        self.error_log.append(ErrorRecord::new(
            ErrorKind::EncoderRuntimeFailure,
            details,
            Some(session.client_id.clone()),
        ));

        self.hub.publish(HubEvent::SessionError {
            client_id: session.client_id.clone(),
            message,
        });
    }

    fn publish_roster(&mut self) {
        let roster = self.registry.roster();
        self.hub.publish(HubEvent::RosterChanged(roster));
    }

    fn begin_shutdown(&mut self, waiter: Option<Reply<()>>) {
        if let Some(state) = self.shutdown.as_mut() {
            state.waiters.extend(waiter);
            return;
        }

        info!(
            sessions = self.registry.len(),
            pending = self.pending_starts.len(),
            "Engine shutting down"
        );
        self.shutdown = Some(ShutdownState {
            deadline: Instant::now() + self.config.shutdown_timeout,
            waiters: waiter.into_iter().collect(),
        });
        self.stop_all(StopReason::Shutdown);
    }

    fn shutdown_complete(&self) -> bool {
        match &self.shutdown {
            None => false,
            Some(state) => {
                (self.registry.is_empty() && self.pending_starts.is_empty())
                    || Instant::now() >= state.deadline
            }
        }
    }

    /// Kill whatever outlived the shutdown deadline and release waiters.
    fn finish_shutdown(&mut self) {
        for session in self.registry.drain() {
            warn!(client_id = %session.client_id, "Encoder outlived shutdown deadline, killing");
            session.process().kill();
            if let Err(e) = remove_session_dir(&session.output_dir) {
                warn!(path = %session.output_dir.display(), "Failed to remove session directory: {}", e);
            }
            self.hub.publish(HubEvent::SessionStopped {
                client_id: session.client_id.clone(),
            });
        }

        for (_, pending) in self.pending_starts.drain() {
            self.registry.release(pending.reservation);
            let _ = pending.reply.send(Err(EngineError::EngineUnavailable));
        }

        self.publish_roster();

        if let Some(state) = self.shutdown.take() {
            for waiter in state.waiters {
                let _ = waiter.send(());
            }
        }
    }
}

fn resolve_target(
    windows: &dyn WindowSource,
    target: &str,
    limit: usize,
) -> Result<Resolution, Vec<WindowSuggestion>> {
    let candidates = windows.list_windows_or_empty();
    resolve(target, &candidates).map_err(|e| {
        info!(candidates = candidates.len(), "{}", e);
        suggest(target, &candidates, limit)
    })
}

/// Cloneable front end to a running [`Engine`].
///
/// Every call blocks until the engine answers. Calls fail with
/// [`EngineError::EngineUnavailable`] once the engine has stopped.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: Sender<Command>,
}

impl EngineHandle {
    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| EngineError::EngineUnavailable)?;
        reply_rx.recv().map_err(|_| EngineError::EngineUnavailable)
    }

    /// Start capturing for a client. Returns once the encoder is launched
    /// or the start has failed.
    pub fn start(&self, request: StartRequest) -> EngineResult<SessionSummary> {
        self.request(|reply| Command::Start { request, reply })?
    }

    /// Ask a client's session to stop. Returns before the encoder exits.
    pub fn stop(&self, client_id: &ClientId) -> EngineResult<()> {
        let client_id = client_id.clone();
        self.request(|reply| Command::Stop { client_id, reply })?
    }

    /// Signal every session. Returns how many were newly signalled.
    pub fn stop_all(&self) -> EngineResult<usize> {
        self.request(|reply| Command::StopAll { reply })
    }

    pub fn list_active(&self) -> EngineResult<Roster> {
        self.request(|reply| Command::ListActive { reply })
    }

    pub fn session(&self, client_id: &ClientId) -> EngineResult<Option<SessionSummary>> {
        let client_id = client_id.clone();
        self.request(|reply| Command::Session { client_id, reply })
    }

    /// Subscribe to hub events. The first event is a roster snapshot.
    pub fn subscribe(&self) -> EngineResult<Receiver<HubEvent>> {
        self.request(|reply| Command::Subscribe { reply })
    }

    /// Stop every session and wait for the engine to finish.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.request(|reply| Command::Shutdown { reply })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread::JoinHandle;
    use std::time::Duration;

    use mirrortv_capture::{CaptureResult, StaticWindowSource, WindowCandidate};
    use mirrortv_encoder::{session_dir, EncoderConfig};

    use crate::spawn_engine;

    const SLOW_EXIT: &str = "trap 'sleep 0.3; exit 0' TERM; echo ready; while true; do sleep 0.05; done";
    const LONG_RUNNING: &str = "trap 'exit 0' TERM; echo ready; while true; do sleep 0.05; done";
    const STUBBORN: &str = "trap '' TERM; echo ready; while true; do sleep 0.05; done";
    const CRASHING: &str = "echo ready; echo \"Unknown encoder 'h264_nvenc'\" >&2; sleep 0.5; exit 3";
    // ffmpeg's exit code when it is interrupted by a signal.
    const EXITS_255_ON_TERM: &str = "trap 'exit 255' TERM; echo ready; while true; do sleep 0.05; done";

    /// Window source whose enumeration takes a while.
    struct SlowWindows {
        inner: StaticWindowSource,
        delay: Duration,
    }

    impl WindowSource for SlowWindows {
        fn list_windows(&self) -> CaptureResult<Vec<WindowCandidate>> {
            thread::sleep(self.delay);
            self.inner.list_windows()
        }
    }

    struct Harness {
        handle: EngineHandle,
        thread: Option<JoinHandle<()>>,
        log: Arc<ErrorLog>,
        root: tempfile::TempDir,
    }

    impl Harness {
        fn stream_root(&self) -> std::path::PathBuf {
            self.root.path().join("stream")
        }

        fn join(&mut self) {
            if let Some(thread) = self.thread.take() {
                thread.join().unwrap();
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = self.handle.shutdown();
            self.join();
        }
    }

    fn sh_encoder(script: &str) -> EncoderConfig {
        let mut encoder = EncoderConfig::custom("sh", vec!["-c".to_string(), script.to_string()]);
        encoder.kill_grace = Duration::from_millis(500);
        encoder
    }

    fn harness_with(encoder: EncoderConfig, max_sessions: usize, titles: &[&str]) -> Harness {
        let windows: Arc<dyn WindowSource> =
            Arc::new(StaticWindowSource::from_titles(titles.iter().copied()));
        harness_with_windows(encoder, max_sessions, windows)
    }

    fn harness_with_windows(
        encoder: EncoderConfig,
        max_sessions: usize,
        windows: Arc<dyn WindowSource>,
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            max_sessions,
            stream_root: root.path().join("stream"),
            encoder,
            shutdown_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let log = Arc::new(ErrorLog::in_memory());
        let (handle, thread) = spawn_engine(config, windows, Arc::clone(&log)).unwrap();

        Harness {
            handle,
            thread: Some(thread),
            log,
            root,
        }
    }

    fn harness(script: &str, max_sessions: usize) -> Harness {
        harness_with(sh_encoder(script), max_sessions, &["Foo - Bar (1)", "YouTube - Cats Video"])
    }

    fn next_matching(
        rx: &Receiver<HubEvent>,
        pred: impl Fn(&HubEvent) -> bool,
    ) -> Option<HubEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match rx.recv_timeout(remaining) {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Every event up to and including the first that matches `pred`.
    fn events_until(rx: &Receiver<HubEvent>, pred: impl Fn(&HubEvent) -> bool) -> Vec<HubEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            let done = pred(&event);
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn is_stopped(client: &str) -> impl Fn(&HubEvent) -> bool + '_ {
        move |e| matches!(e, HubEvent::SessionStopped { client_id } if client_id.as_str() == client)
    }

    fn is_running(client: &str) -> impl Fn(&HubEvent) -> bool + '_ {
        move |e| {
            matches!(e, HubEvent::RosterChanged(roster) if roster.sessions.iter().any(|s| {
                s.client_id.as_str() == client && s.state == SessionState::Running
            }))
        }
    }

    #[test]
    fn test_start_stop_cleans_up_once() {
        let h = harness(SLOW_EXIT, 10);
        let events = h.handle.subscribe().unwrap();
        assert!(matches!(events.recv().unwrap(), HubEvent::RosterChanged(r) if r.total == 0));

        let summary = h.handle.start(StartRequest::new("a", "Bar")).unwrap();
        assert_eq!(summary.window_id.as_deref(), Some("1"));
        assert_eq!(summary.display_label, "Bar");

        let dir = session_dir(&h.stream_root(), &ClientId::from("a"));
        assert!(dir.is_dir());
        let roster = h.handle.list_active().unwrap();
        assert_eq!(roster.sessions[0].client_id.as_str(), "a");

        h.handle.stop(&ClientId::from("a")).unwrap();
        h.handle.stop(&ClientId::from("a")).unwrap();

        assert!(next_matching(&events, is_stopped("a")).is_some());
        thread::sleep(Duration::from_millis(300));
        assert!(!events.try_iter().any(|e| is_stopped("a")(&e)));

        assert_eq!(h.handle.list_active().unwrap().total, 0);
        assert!(!dir.exists());
        assert!(h.log.is_empty());
        assert!(matches!(
            h.handle.stop(&ClientId::from("a")),
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_and_capacity() {
        let h = harness(LONG_RUNNING, 2);
        h.handle.start(StartRequest::new("a", "Bar")).unwrap();
        h.handle.start(StartRequest::new("b", "Cats")).unwrap();

        assert!(matches!(
            h.handle.start(StartRequest::new("a", "Bar")),
            Err(EngineError::DuplicateSession(_))
        ));
        assert!(matches!(
            h.handle.start(StartRequest::new("c", "Bar")),
            Err(EngineError::CapacityExceeded { max: 2 })
        ));

        let roster = h.handle.list_active().unwrap();
        assert_eq!(roster.total, 2);
        assert_eq!(roster.max, 2);
    }

    #[test]
    fn test_stop_unknown_client_publishes_nothing() {
        let h = harness(LONG_RUNNING, 10);
        let events = h.handle.subscribe().unwrap();
        let _snapshot = events.recv().unwrap();

        assert!(matches!(
            h.handle.stop(&ClientId::from("ghost")),
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_encoder_crash_logs_one_error() {
        let h = harness(CRASHING, 10);
        let events = h.handle.subscribe().unwrap();

        h.handle.start(StartRequest::new("a", "Cats Video")).unwrap();

        let before_exit = events_until(&events, is_running("a"));
        assert!(before_exit.last().is_some_and(is_running("a")));
        assert!(!before_exit.iter().any(is_stopped("a")));

        assert!(next_matching(&events, is_stopped("a")).is_some());
        let error = next_matching(&events, |e| matches!(e, HubEvent::SessionError { .. }));
        assert!(matches!(error, Some(HubEvent::SessionError { message, .. }) if message.contains("code 3")));
        thread::sleep(Duration::from_millis(200));
        assert!(!events.try_iter().any(|e| matches!(e, HubEvent::SessionError { .. })));

        let records = h.log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::EncoderRuntimeFailure);
        assert!(records[0].details.contains("Unknown encoder"));
        assert!(records[0].details.contains("h264_nvenc"));
        assert!(!session_dir(&h.stream_root(), &ClientId::from("a")).exists());
        assert_eq!(h.handle.list_active().unwrap().total, 0);
    }

    #[test]
    fn test_nonzero_exit_after_stop_is_not_a_failure() {
        let h = harness(EXITS_255_ON_TERM, 10);
        let events = h.handle.subscribe().unwrap();

        h.handle.start(StartRequest::new("a", "Bar")).unwrap();
        let dir = session_dir(&h.stream_root(), &ClientId::from("a"));
        assert!(dir.is_dir());
        assert!(next_matching(&events, is_running("a")).is_some());

        h.handle.stop(&ClientId::from("a")).unwrap();

        let mut seen = events_until(&events, is_stopped("a"));
        thread::sleep(Duration::from_millis(300));
        seen.extend(events.try_iter());

        assert_eq!(seen.iter().filter(|e| is_stopped("a")(e)).count(), 1);
        assert!(!seen.iter().any(|e| matches!(e, HubEvent::SessionError { .. })));
        assert!(h.log.is_empty());
        assert!(!dir.exists());
        assert_eq!(h.handle.list_active().unwrap().total, 0);
    }

    #[test]
    fn test_stop_during_resolution_cancels_start() {
        let windows: Arc<dyn WindowSource> = Arc::new(SlowWindows {
            inner: StaticWindowSource::from_titles(["Foo - Bar (1)"]),
            delay: Duration::from_millis(300),
        });
        let h = harness_with_windows(sh_encoder(LONG_RUNNING), 10, windows);

        let handle = h.handle.clone();
        let start = thread::spawn(move || handle.start(StartRequest::new("a", "Bar")));

        thread::sleep(Duration::from_millis(100));
        h.handle.stop(&ClientId::from("a")).unwrap();
        h.handle.stop(&ClientId::from("a")).unwrap();

        assert!(matches!(start.join().unwrap(), Err(EngineError::StartCancelled(_))));
        assert_eq!(h.handle.list_active().unwrap().total, 0);
        assert!(!session_dir(&h.stream_root(), &ClientId::from("a")).exists());
        assert!(h.log.is_empty());

        // The slot is free again.
        h.handle.start(StartRequest::new("a", "Bar")).unwrap();
    }

    #[test]
    fn test_overlong_client_id_is_rejected_before_reserving() {
        let h = harness(LONG_RUNNING, 1);
        let long_id = "x".repeat(MAX_CLIENT_ID_BYTES + 1);

        assert!(matches!(
            h.handle.start(StartRequest::new(long_id, "Bar")),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(!h.stream_root().exists() || std::fs::read_dir(h.stream_root()).unwrap().next().is_none());

        let longest = "x".repeat(MAX_CLIENT_ID_BYTES);
        h.handle.start(StartRequest::new(longest, "Bar")).unwrap();
    }

    #[test]
    fn test_resolution_failure_releases_slot() {
        let h = harness(LONG_RUNNING, 1);

        let err = h
            .handle
            .start(StartRequest::new("a", "Cats Playlist Music Radio"))
            .unwrap_err();
        match err {
            EngineError::ResolutionFailed {
                target,
                suggestions,
            } => {
                assert_eq!(target, "Cats Playlist Music Radio");
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].common_words, vec!["cats".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let records = h.log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::ResolutionFailed);
        assert_eq!(h.handle.list_active().unwrap().total, 0);

        h.handle.start(StartRequest::new("b", "Cats Video")).unwrap();
    }

    #[test]
    fn test_spawn_failure_leaves_nothing_behind() {
        let encoder = EncoderConfig::custom("/nonexistent/mirrortv-encoder", Vec::new());
        let h = harness_with(encoder, 1, &["Foo"]);
        let events = h.handle.subscribe().unwrap();

        assert!(matches!(
            h.handle.start(StartRequest::new("a", "Foo")),
            Err(EngineError::SpawnFailed { .. })
        ));
        assert!(next_matching(&events, |e| matches!(e, HubEvent::SessionError { .. })).is_some());

        assert!(!session_dir(&h.stream_root(), &ClientId::from("a")).exists());
        let records = h.log.read_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ErrorKind::SpawnFailed);
        assert!(records[0].details.contains("Install FFmpeg"));

        // The slot was released.
        assert!(matches!(
            h.handle.start(StartRequest::new("b", "Foo")),
            Err(EngineError::SpawnFailed { .. })
        ));
    }

    #[test]
    fn test_concurrent_starts_respect_cap() {
        let h = harness(LONG_RUNNING, 3);

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let handle = h.handle.clone();
                thread::spawn(move || handle.start(StartRequest::new(format!("client-{i}"), "Bar")))
            })
            .collect();
        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(EngineError::CapacityExceeded { max: 3 })))
                .count(),
            5
        );
        assert_eq!(h.handle.list_active().unwrap().total, 3);
    }

    #[test]
    fn test_stop_all_counts_newly_signalled() {
        let h = harness(STUBBORN, 10);
        h.handle.start(StartRequest::new("a", "Bar")).unwrap();
        h.handle.start(StartRequest::new("b", "Cats")).unwrap();
        h.handle.stop(&ClientId::from("a")).unwrap();

        assert_eq!(h.handle.stop_all().unwrap(), 1);
        assert_eq!(h.handle.stop_all().unwrap(), 0);

        let roster = h.handle.list_active().unwrap();
        assert!(roster.sessions.iter().all(|s| s.state == SessionState::Stopping));
    }

    #[test]
    fn test_shutdown_kills_stubborn_encoders() {
        let mut encoder = sh_encoder(STUBBORN);
        encoder.kill_grace = Duration::from_secs(30);
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            stream_root: root.path().join("stream"),
            encoder,
            shutdown_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let windows: Arc<dyn WindowSource> = Arc::new(StaticWindowSource::from_titles(["Foo"]));
        let (handle, thread) = spawn_engine(config, windows, Arc::new(ErrorLog::in_memory())).unwrap();

        handle.start(StartRequest::new("a", "Foo")).unwrap();
        let events = handle.subscribe().unwrap();

        let started = Instant::now();
        handle.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(next_matching(&events, is_stopped("a")).is_some());
        assert!(!session_dir(&root.path().join("stream"), &ClientId::from("a")).exists());

        thread.join().unwrap();
        assert!(matches!(
            handle.start(StartRequest::new("b", "Foo")),
            Err(EngineError::EngineUnavailable)
        ));
    }
}
