//! Session controller: the state machine behind the start/stop controls.
//!
//! ```text
//! Idle ─start─▶ Starting ─acquired─▶ CountingDown ─elapsed─▶ Recording
//!   ▲                                                          │ stop
//!   └──── all formats done ◀── Transcoding ◀─finalized── Stopping
//! ```
//!
//! The controller runs as one task that owns the only [`Session`]. UI and
//! shortcut code reach it through a [`ControllerHandle`]; every asynchronous
//! step is awaited inside the task, so a transition never starts before the
//! previous step has settled. `reset` is the only way to cancel and it is
//! reachable from every state.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureConstraints, CaptureSurface, RecorderEvent};
use crate::countdown::{CountdownConfig, CountdownGate};
use crate::delivery::FileSink;
use crate::error::CaptureError;
use crate::session::{Controls, Session, SessionStatus};
use crate::settings::{Settings, SettingsStore};
use crate::shortcut::{ShortcutListener, ShortcutTarget};
use crate::transcode::{TranscodePipeline, TranscodeReport, RAW_FILE_NAME};

/// When settings are re-read besides change notifications and completed sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReloadPolicy {
    /// On every teardown, including error resets and restarts.
    #[default]
    EveryReset,
    /// Only when the user starts a new session.
    UserCycle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerConfig {
    pub countdown: CountdownConfig,
    pub reload_policy: ReloadPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Reset,
    ReloadSettings,
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    CountdownTick { generation: u64, remaining: u32 },
    CountdownElapsed { generation: u64 },
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub generation: u64,
    pub raw_bytes: usize,
    pub raw_delivered: bool,
    pub report: TranscodeReport,
}

/// Everything the UI needs to render, published after each transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerSnapshot {
    pub status: SessionStatus,
    pub controls: Controls,
    /// Generation of the live session, if any.
    pub session: Option<u64>,
    /// Number on the countdown overlay; `Some(0)` while it fades out.
    pub countdown: Option<u32>,
    pub buffered_bytes: usize,
    pub last_error: Option<String>,
    pub last_summary: Option<SessionSummary>,
    pub settings: Settings,
}

/// Cloneable front door to a running [`SessionController`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ControllerSnapshot>,
}

impl ControllerHandle {
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Session controller is gone, dropping {:?}", command);
        }
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn reload_settings(&self) {
        self.send(Command::ReloadSettings);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.clone()
    }

    /// Resolves with the first published snapshot matching `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&ControllerSnapshot) -> bool) -> ControllerSnapshot {
        let mut rx = self.snapshot.clone();
        let matched = rx.wait_for(predicate).await.map(|snapshot| (*snapshot).clone());
        matched.unwrap_or_else(|_| self.snapshot())
    }
}

impl ShortcutTarget for ControllerHandle {
    fn start(&self) {
        ControllerHandle::start(self);
    }

    fn stop(&self) {
        ControllerHandle::stop(self);
    }
}

pub struct SessionController {
    store: Arc<dyn SettingsStore>,
    surface: Box<dyn CaptureSurface>,
    pipeline: TranscodePipeline,
    sink: Box<dyn FileSink>,
    config: ControllerConfig,
    settings: Settings,
    shortcuts: Arc<Mutex<ShortcutListener>>,
    session: Option<Session>,
    generation: u64,
    countdown: CountdownGate,
    countdown_display: Option<u32>,
    last_error: Option<String>,
    last_summary: Option<SessionSummary>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot: watch::Sender<ControllerSnapshot>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        surface: Box<dyn CaptureSurface>,
        pipeline: TranscodePipeline,
        sink: Box<dyn FileSink>,
        config: ControllerConfig,
    ) -> (Self, ControllerHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(ControllerSnapshot::default());

        let mut controller = Self {
            store,
            surface,
            pipeline,
            sink,
            config,
            settings: Settings::default(),
            shortcuts: Arc::new(Mutex::new(ShortcutListener::new())),
            session: None,
            generation: 0,
            countdown: CountdownGate::new(config.countdown),
            countdown_display: None,
            last_error: None,
            last_summary: None,
            commands,
            internal_tx,
            internal_rx,
            snapshot,
        };
        controller.reload_settings();

        let handle = ControllerHandle { commands: command_tx, snapshot: snapshot_rx };
        (controller, handle)
    }

    /// Listener kept bound to the current settings; the UI feeds it key presses.
    pub fn shortcuts(&self) -> Arc<Mutex<ShortcutListener>> {
        self.shortcuts.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.as_ref().map_or(SessionStatus::Idle, |session| session.status)
    }

    /// Drives the state machine until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        let mut settings_rx = self.store.subscribe();
        let mut settings_live = true;
        info!("Session controller running");

        loop {
            let buffering = matches!(self.status(), SessionStatus::Recording | SessionStatus::Stopping);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(event) = self.internal_rx.recv() => self.on_internal(event),
                event = next_recorder_event(&mut self.session), if buffering => {
                    self.on_recorder_event(event).await;
                }
                changed = settings_rx.changed(), if settings_live => match changed {
                    Ok(()) => {
                        debug!("Settings changed, reloading");
                        self.reload_settings();
                    }
                    Err(_) => settings_live = false,
                },
            }
        }

        self.reset();
        info!("Session controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        debug!("Command {:?} in {}", command, self.status());
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop(),
            Command::Reset => self.reset(),
            Command::ReloadSettings => self.reload_settings(),
            Command::Shutdown => {}
        }
    }

    /// Starts a fresh session, tearing down whatever was active first.
    async fn start(&mut self) {
        self.reset();
        if self.config.reload_policy == ReloadPolicy::UserCycle {
            self.reload_settings();
        }
        self.last_error = None;

        self.generation += 1;
        let generation = self.generation;
        let session = Session::new(generation, self.settings.clone());
        let constraints = CaptureConstraints::from(&session.settings);
        self.session = Some(session);
        self.publish();
        info!("Starting session {} ({}px wide, audio: {})", generation, constraints.width, constraints.audio);

        let acquired = self.surface.acquire(&constraints).await;
        let attached = acquired.and_then(|mut stream| match stream.recorder() {
            Ok(recorder) => Ok((stream, recorder)),
            Err(e) => {
                stream.stop_tracks();
                Err(e)
            }
        });

        match attached {
            Ok((stream, recorder)) => {
                if let Some(session) = self.session.as_mut() {
                    session.attach(stream, recorder);
                    session.status = SessionStatus::CountingDown;
                }
                self.arm_countdown(generation);
                self.publish();
            }
            Err(e) => self.fail(e),
        }
    }

    fn arm_countdown(&mut self, generation: u64) {
        let tick_tx = self.internal_tx.clone();
        let done_tx = self.internal_tx.clone();
        self.countdown.arm(
            move |remaining| {
                let _ = tick_tx.send(Internal::CountdownTick { generation, remaining });
            },
            move || {
                let _ = done_tx.send(Internal::CountdownElapsed { generation });
            },
        );
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::CountdownTick { generation, remaining } => {
                if self.is_counting_down(generation) {
                    self.countdown_display = Some(remaining);
                    self.publish();
                }
            }
            Internal::CountdownElapsed { generation } => {
                if self.is_counting_down(generation) {
                    self.begin_recording();
                } else {
                    debug!("Ignoring countdown of stale session {}", generation);
                }
            }
        }
    }

    fn is_counting_down(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.generation == generation && session.status == SessionStatus::CountingDown)
    }

    fn begin_recording(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let started = match session.recorder_mut() {
            Some(recorder) => recorder.start(),
            None => Err(CaptureError::RecorderState("missing")),
        };
        match started {
            Ok(()) => {
                session.status = SessionStatus::Recording;
                info!("Recording session {}", session.generation);
                self.countdown_display = None;
                self.publish();
            }
            Err(e) => self.fail(e),
        }
    }

    fn stop(&mut self) {
        match self.status() {
            SessionStatus::Recording => {
                if let Some(session) = self.session.as_mut() {
                    if let Some(recorder) = session.recorder_mut() {
                        recorder.stop();
                    }
                    session.release_tracks();
                    session.status = SessionStatus::Stopping;
                    info!("Stopping session {} ({} bytes buffered)", session.generation, session.buffered_bytes());
                }
                self.publish();
            }
            SessionStatus::Starting | SessionStatus::CountingDown => {
                info!("Stop before recording began, cancelling session");
                self.reset();
            }
            status => debug!("Stop ignored in {}", status),
        }
    }

    async fn on_recorder_event(&mut self, event: Option<RecorderEvent>) {
        match event {
            Some(RecorderEvent::Data(chunk)) => {
                if let Some(session) = self.session.as_mut() {
                    session.push_chunk(chunk);
                }
            }
            Some(RecorderEvent::Finalized) | None => {
                if self.status() == SessionStatus::Recording {
                    warn!("Capture ended without a stop request");
                    if let Some(session) = self.session.as_mut() {
                        session.release_tracks();
                    }
                }
                self.finish_session().await;
            }
        }
    }

    /// Materializes the raw recording, delivers it, then runs every requested format.
    async fn finish_session(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.status = SessionStatus::Transcoding;
        let generation = session.generation;
        let formats = session.settings.output_formats.clone();
        let raw = session.take_recording();
        session.teardown();
        self.publish();

        if raw.is_empty() {
            warn!("Session {} captured no data", generation);
        }
        let raw_delivered = match self.sink.deliver(RAW_FILE_NAME, raw.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to deliver {}: {}", RAW_FILE_NAME, e);
                false
            }
        };

        let report = self.pipeline.run(&raw, &formats, self.sink.as_mut()).await;
        info!(
            "Session {} done: {} converted, {} failed, {} skipped",
            generation,
            report.delivered.len(),
            report.failed.len(),
            report.skipped.len()
        );

        self.last_summary = Some(SessionSummary { generation, raw_bytes: raw.len(), raw_delivered, report });
        self.session = None;
        self.reload_settings();
        self.publish();
    }

    fn fail(&mut self, error: CaptureError) {
        warn!("Capture failed: {}", error);
        self.last_error = Some(error.to_string());
        self.reset();
    }

    /// Tears down any session from any state. Safe to repeat.
    fn reset(&mut self) {
        self.countdown.cancel();
        self.countdown_display = None;
        if let Some(mut session) = self.session.take() {
            info!("Tearing down session {} in {}", session.generation, session.status);
            session.teardown();
        }
        if self.config.reload_policy == ReloadPolicy::EveryReset {
            self.reload_settings();
        }
        self.publish();
    }

    fn reload_settings(&mut self) {
        match self.store.load() {
            Ok(settings) => self.settings = settings,
            Err(e) => error!("Failed to load settings, keeping current: {}", e),
        }
        self.shortcuts.lock().rebind(&self.settings);
        self.publish();
    }

    fn publish(&self) {
        let status = self.status();
        self.snapshot.send_replace(ControllerSnapshot {
            status,
            controls: Controls::for_status(status),
            session: self.session.as_ref().map(|session| session.generation),
            countdown: self.countdown_display,
            buffered_bytes: self.session.as_ref().map_or(0, Session::buffered_bytes),
            last_error: self.last_error.clone(),
            last_summary: self.last_summary.clone(),
            settings: self.settings.clone(),
        });
    }
}

async fn next_recorder_event(session: &mut Option<Session>) -> Option<RecorderEvent> {
    match session.as_mut().and_then(Session::recorder_mut) {
        Some(recorder) => recorder.next_event().await,
        None => std::future::pending().await,
    }
}
