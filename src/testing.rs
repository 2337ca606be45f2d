//! In-memory stand-ins for the capture surface, recorder, engine and download folder.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::capture::{CaptureConstraints, CaptureStream, CaptureSurface, MediaRecorder, RecorderEvent, RecorderState};
use crate::delivery::FileSink;
use crate::error::{CaptureError, DeliveryError, EngineError};
use crate::transcode::TranscodeEngine;

#[derive(Default)]
struct EngineState {
    calls: Vec<String>,
    loaded: bool,
    files: HashMap<String, Vec<u8>>,
}

/// Read side of a [`FakeEngine`]'s call log.
#[derive(Clone, Default)]
pub struct EngineLog(Arc<Mutex<EngineState>>);

impl EngineLog {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.0.lock().loaded
    }
}

/// Engine that "converts" by prefixing the input with the output extension.
#[derive(Default)]
pub struct FakeEngine {
    log: EngineLog,
    fail_run_for: Option<String>,
    fail_loads: usize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> EngineLog {
        self.log.clone()
    }

    /// `run` fails whenever the output file has this extension.
    pub fn fail_run_for(mut self, extension: &str) -> Self {
        self.fail_run_for = Some(format!(".{}", extension));
        self
    }

    pub fn fail_load_times(mut self, times: usize) -> Self {
        self.fail_loads = times;
        self
    }

    pub fn preloaded(self) -> Self {
        self.log.0.lock().loaded = true;
        self
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    fn is_loaded(&self) -> bool {
        self.log.0.lock().loaded
    }

    async fn load(&mut self) -> Result<(), EngineError> {
        let mut state = self.log.0.lock();
        state.calls.push("load".to_string());
        if self.fail_loads > 0 {
            self.fail_loads -= 1;
            return Err(EngineError::Load("core missing".to_string()));
        }
        state.loaded = true;
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), EngineError> {
        let mut state = self.log.0.lock();
        state.calls.push("unload".to_string());
        state.loaded = false;
        state.files.clear();
        Ok(())
    }

    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let mut state = self.log.0.lock();
        state.calls.push(format!("write {}", name));
        if !state.loaded {
            return Err(EngineError::NotLoaded);
        }
        state.files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn run(&mut self, args: &[String]) -> Result<(), EngineError> {
        let mut state = self.log.0.lock();
        state.calls.push(format!("run {}", args.join(" ")));
        if !state.loaded {
            return Err(EngineError::NotLoaded);
        }
        let output = args.last().cloned().unwrap_or_default();
        if let Some(ext) = &self.fail_run_for {
            if output.ends_with(ext.as_str()) {
                return Err(EngineError::Run(format!("no muxer for {}", output)));
            }
        }
        let input_name = args
            .iter()
            .position(|arg| arg == "-i")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_default();
        let input = state
            .files
            .get(&input_name)
            .cloned()
            .ok_or_else(|| EngineError::Run(format!("{} not found", input_name)))?;
        let extension = output.rsplit('.').next().unwrap_or_default().to_string();
        let mut converted = format!("{}:", extension).into_bytes();
        converted.extend_from_slice(&input);
        state.files.insert(output, converted);
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        let mut state = self.log.0.lock();
        state.calls.push(format!("read {}", name));
        state
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, name.to_string())))
    }
}

/// Collects delivered files in order.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<(String, Vec<u8>)>>>);

impl MemorySink {
    pub fn names(&self) -> Vec<String> {
        self.0.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.0.lock().iter().find(|(n, _)| n == name).map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn deliver(&mut self, name: &str, bytes: &[u8]) -> Result<(), DeliveryError> {
        self.0.lock().push((name.to_string(), bytes.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct CaptureState {
    acquisitions: usize,
    denials_left: usize,
    last_constraints: Option<CaptureConstraints>,
    live_streams: usize,
    peak_live_streams: usize,
    live_recorders: usize,
    peak_live_recorders: usize,
    recorder_starts: usize,
    recorder_stops: usize,
    feed: Option<mpsc::UnboundedSender<RecorderEvent>>,
}

/// Test-side view of a [`FakeSurface`]: counters plus a way to push recorder data.
#[derive(Clone, Default)]
pub struct CaptureLedger(Arc<Mutex<CaptureState>>);

impl CaptureLedger {
    pub fn acquisitions(&self) -> usize {
        self.0.lock().acquisitions
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.0.lock().last_constraints
    }

    pub fn live_streams(&self) -> usize {
        self.0.lock().live_streams
    }

    pub fn peak_live_streams(&self) -> usize {
        self.0.lock().peak_live_streams
    }

    pub fn live_recorders(&self) -> usize {
        self.0.lock().live_recorders
    }

    pub fn peak_live_recorders(&self) -> usize {
        self.0.lock().peak_live_recorders
    }

    pub fn recorder_starts(&self) -> usize {
        self.0.lock().recorder_starts
    }

    pub fn recorder_stops(&self) -> usize {
        self.0.lock().recorder_stops
    }

    /// The next `times` acquisitions are refused.
    pub fn deny_next(&self, times: usize) {
        self.0.lock().denials_left = times;
    }

    /// Hands a chunk to the most recent recorder.
    pub fn feed(&self, chunk: Vec<u8>) {
        if let Some(feed) = &self.0.lock().feed {
            let _ = feed.send(RecorderEvent::Data(chunk));
        }
    }

    /// The capture source goes away without anyone calling stop.
    pub fn end_capture(&self) {
        if let Some(feed) = &self.0.lock().feed {
            let _ = feed.send(RecorderEvent::Finalized);
        }
    }
}

pub struct FakeSurface {
    ledger: CaptureLedger,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self { ledger: CaptureLedger::default() }
    }

    pub fn ledger(&self) -> CaptureLedger {
        self.ledger.clone()
    }
}

#[async_trait]
impl CaptureSurface for FakeSurface {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut state = self.ledger.0.lock();
        state.acquisitions += 1;
        state.last_constraints = Some(*constraints);
        if state.denials_left > 0 {
            state.denials_left -= 1;
            return Err(CaptureError::PermissionDenied("user denied screen capture".to_string()));
        }
        state.live_streams += 1;
        state.peak_live_streams = state.peak_live_streams.max(state.live_streams);
        Ok(Box::new(FakeStream { ledger: self.ledger.clone(), live: true }))
    }
}

struct FakeStream {
    ledger: CaptureLedger,
    live: bool,
}

impl CaptureStream for FakeStream {
    fn recorder(&mut self) -> Result<Box<dyn MediaRecorder>, CaptureError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.ledger.0.lock().feed = Some(tx.clone());
        Ok(Box::new(FakeRecorder { ledger: self.ledger.clone(), state: RecorderState::Inactive, tx, rx }))
    }

    fn stop_tracks(&mut self) {
        if self.live {
            self.live = false;
            self.ledger.0.lock().live_streams -= 1;
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

struct FakeRecorder {
    ledger: CaptureLedger,
    state: RecorderState,
    tx: mpsc::UnboundedSender<RecorderEvent>,
    rx: mpsc::UnboundedReceiver<RecorderEvent>,
}

#[async_trait]
impl MediaRecorder for FakeRecorder {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != RecorderState::Inactive {
            return Err(CaptureError::RecorderState("already started"));
        }
        self.state = RecorderState::Recording;
        let mut ledger = self.ledger.0.lock();
        ledger.recorder_starts += 1;
        ledger.live_recorders += 1;
        ledger.peak_live_recorders = ledger.peak_live_recorders.max(ledger.live_recorders);
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == RecorderState::Recording {
            let mut ledger = self.ledger.0.lock();
            ledger.recorder_stops += 1;
            ledger.live_recorders -= 1;
            let _ = self.tx.send(RecorderEvent::Finalized);
        }
        self.state = RecorderState::Stopped;
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    async fn next_event(&mut self) -> Option<RecorderEvent> {
        self.rx.recv().await
    }
}
