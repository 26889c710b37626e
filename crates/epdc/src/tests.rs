//! Scenario tests driving the real worker thread with fake collaborators
//! and explicitly injected hardware events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use model::{
    MarkerToken, PowerDownDelay, Rect, ScreenInfo, UpdateRequest, UpdateScheme, WaveformMode,
    WaveformTable,
};
use scheduler::UpdateError;
use update_protocol::{
    DispatchParams, HardwareEvent, ImageProcessor, LutId, LutMask, PowerRail, ProcessingError,
    ProcessingJob, ProcessingStats, UpdateEngine,
};

use crate::{ControllerConfig, EpdController};

struct ImmediateProcessor;

impl ImageProcessor for ImmediateProcessor {
    fn process(&mut self, job: &ProcessingJob) -> Result<ProcessingStats, ProcessingError> {
        Ok(ProcessingStats {
            processed_pixels: u64::from(job.rect.width) * u64::from(job.rect.height),
        })
    }
}

struct FailingProcessor;

impl ImageProcessor for FailingProcessor {
    fn process(&mut self, _job: &ProcessingJob) -> Result<ProcessingStats, ProcessingError> {
        Err(ProcessingError::SourceUnavailable)
    }
}

/// Records register programming and reports every `start` through a
/// channel so tests can synchronize with the worker.
struct RecordingEngine {
    programmed: HashMap<u8, DispatchParams>,
    starts: mpsc::Sender<(LutId, DispatchParams)>,
}

impl UpdateEngine for RecordingEngine {
    fn program(&mut self, lut: LutId, params: &DispatchParams) {
        self.programmed.insert(lut.0, *params);
    }

    fn start(&mut self, lut: LutId) {
        let params = self.programmed[&lut.0];
        let _ = self.starts.send((lut, params));
    }
}

struct NullRail;

impl PowerRail for NullRail {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

struct RecordingRail {
    name: &'static str,
    transitions: Arc<Mutex<Vec<String>>>,
}

impl PowerRail for RecordingRail {
    fn enable(&mut self) {
        self.transitions
            .lock()
            .expect("rail log mutex should not be poisoned")
            .push(format!("{}+", self.name));
    }

    fn disable(&mut self) {
        self.transitions
            .lock()
            .expect("rail log mutex should not be poisoned")
            .push(format!("{}-", self.name));
    }
}

struct Fixture {
    controller: EpdController,
    starts: mpsc::Receiver<(LutId, DispatchParams)>,
}

impl Fixture {
    fn new(scheme: UpdateScheme, pool_capacity: usize) -> Self {
        Self::with_processor(scheme, pool_capacity, Box::new(ImmediateProcessor))
    }

    fn with_processor(
        scheme: UpdateScheme,
        pool_capacity: usize,
        processor: Box<dyn ImageProcessor>,
    ) -> Self {
        let (starts_tx, starts_rx) = mpsc::channel();
        let mut config = ControllerConfig::new(ScreenInfo {
            width: 800,
            height: 600,
        });
        config.scheme = scheme;
        config.pool_capacity = pool_capacity;
        let controller = EpdController::new(
            config,
            processor,
            Box::new(RecordingEngine {
                programmed: HashMap::new(),
                starts: starts_tx,
            }),
            Box::new(NullRail),
            Box::new(NullRail),
        );
        controller.set_waveform_modes(table());
        Self {
            controller,
            starts: starts_rx,
        }
    }

    fn await_start(&self) -> (LutId, DispatchParams) {
        self.starts
            .recv_timeout(Duration::from_secs(2))
            .expect("hardware dispatch within timeout")
    }

    fn working_buffer_done(&self, collision: LutMask) {
        self.controller
            .handle_interrupt(HardwareEvent::WorkingBufferComplete { collision });
    }

    fn lut_done(&self, lut: LutId) {
        self.controller.handle_interrupt(HardwareEvent::LutComplete(lut));
    }
}

fn table() -> WaveformTable {
    WaveformTable::new(0, 1, 2, 3, WaveformMode::Gc16).expect("valid table")
}

fn marked(rect: Rect, token: u32) -> UpdateRequest {
    let mut request = UpdateRequest::region(rect);
    request.marker = Some(MarkerToken(token));
    request
}

#[test]
fn send_update_before_waveform_table_is_not_ready() {
    let (starts_tx, _starts_rx) = mpsc::channel();
    let controller = EpdController::new(
        ControllerConfig::new(ScreenInfo {
            width: 800,
            height: 600,
        }),
        Box::new(ImmediateProcessor),
        Box::new(RecordingEngine {
            programmed: HashMap::new(),
            starts: starts_tx,
        }),
        Box::new(NullRail),
        Box::new(NullRail),
    );
    assert!(matches!(
        controller.send_update(UpdateRequest::region(Rect::new(0, 0, 10, 10))),
        Err(UpdateError::NotReady)
    ));
}

#[test]
fn disjoint_updates_complete_independently() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 100, 50)))
        .expect("first admission");
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(200, 0, 100, 50)))
        .expect("second admission");

    let (first_lut, first_params) = fixture.await_start();
    assert_eq!(first_params.rect, Rect::new(0, 0, 100, 50));
    fixture.working_buffer_done(LutMask::EMPTY);

    let (second_lut, second_params) = fixture.await_start();
    assert_eq!(second_params.rect, Rect::new(200, 0, 100, 50));
    assert_ne!(first_lut, second_lut);
    fixture.working_buffer_done(LutMask::EMPTY);

    fixture.lut_done(first_lut);
    fixture.lut_done(second_lut);
    fixture.controller.flush();

    let stats = fixture.controller.stats();
    assert_eq!(stats.collisions, 0);
    assert_eq!(stats.completed, 2);
    assert!(fixture.controller.is_idle());
}

#[test]
fn overlapping_updates_retry_after_collision() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 100, 100)))
        .expect("first admission");
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(50, 50, 100, 100)))
        .expect("second admission");

    let (first_lut, _) = fixture.await_start();
    fixture.working_buffer_done(LutMask::EMPTY);

    let (second_lut, _) = fixture.await_start();
    assert_ne!(first_lut, second_lut);
    // Hardware reports the spatial overlap with the first, older update:
    // older blocker means retry, not discard.
    fixture.working_buffer_done(LutMask::single(first_lut));

    fixture.lut_done(first_lut);
    let (retry_lut, retry_params) = fixture.await_start();
    assert_eq!(retry_params.rect, Rect::new(50, 50, 100, 100));
    fixture.working_buffer_done(LutMask::EMPTY);
    fixture.lut_done(retry_lut);
    fixture.controller.flush();

    let stats = fixture.controller.stats();
    assert_eq!(stats.collisions, 1);
    assert_eq!(stats.discarded, 0);
    assert_eq!(stats.dispatched, 3);
    assert!(fixture.controller.is_idle());
}

#[test]
fn queued_merge_produces_one_dispatch_for_overlapping_submissions() {
    let fixture = Fixture::new(UpdateScheme::QueuedMerge, 4);
    // Occupy the working buffer so the two mergeable updates queue up.
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(300, 300, 20, 20)))
        .expect("blocker admission");
    let (blocker_lut, _) = fixture.await_start();

    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 50, 50)))
        .expect("first admission");
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(40, 40, 50, 50)))
        .expect("second admission");

    fixture.working_buffer_done(LutMask::EMPTY);
    let (merged_lut, merged_params) = fixture.await_start();
    assert_eq!(merged_params.rect, Rect::new(0, 0, 90, 90));
    fixture.working_buffer_done(LutMask::EMPTY);

    fixture.lut_done(blocker_lut);
    fixture.lut_done(merged_lut);
    fixture.controller.flush();

    let stats = fixture.controller.stats();
    assert_eq!(stats.merged, 1);
    assert_eq!(stats.dispatched, 2);
    assert!(fixture.controller.is_idle());
}

#[test]
fn marker_signals_only_after_lut_completion() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    let token = MarkerToken(42);
    fixture
        .controller
        .send_update(marked(Rect::new(0, 0, 64, 64), 42))
        .expect("admission");

    let (lut, _) = fixture.await_start();
    fixture.working_buffer_done(LutMask::EMPTY);
    assert!(matches!(
        fixture
            .controller
            .wait_for_update(token, Duration::from_millis(50)),
        Err(UpdateError::WaitTimeout { .. })
    ));

    fixture.lut_done(lut);
    fixture
        .controller
        .wait_for_update(token, Duration::from_secs(2))
        .expect("marker signaled after lut completion");
}

#[test]
fn waiting_on_an_unknown_marker_fails_fast() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    assert!(matches!(
        fixture
            .controller
            .wait_for_update(MarkerToken(99), Duration::from_millis(10)),
        Err(UpdateError::UnknownMarker {
            token: MarkerToken(99)
        })
    ));
}

#[test]
fn processing_failure_disconnects_the_marker_waiter() {
    let fixture = Fixture::with_processor(UpdateScheme::Queued, 4, Box::new(FailingProcessor));
    fixture
        .controller
        .send_update(marked(Rect::new(0, 0, 32, 32), 7))
        .expect("admission");

    let began = Instant::now();
    assert!(matches!(
        fixture
            .controller
            .wait_for_update(MarkerToken(7), Duration::from_secs(10)),
        Err(UpdateError::WaitTimeout { .. })
    ));
    assert!(
        began.elapsed() < Duration::from_secs(5),
        "disconnect should surface before the full deadline"
    );
    fixture.controller.flush();
    assert_eq!(fixture.controller.stats().processing_failures, 1);
    assert!(fixture.controller.is_idle());
}

#[test]
fn pool_exhaustion_rejects_further_submissions() {
    let fixture = Fixture::new(UpdateScheme::Queued, 2);
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 10, 10)))
        .expect("first admission");
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(100, 0, 10, 10)))
        .expect("second admission");
    // No completions injected: both buffers stay owned.
    assert!(matches!(
        fixture
            .controller
            .send_update(UpdateRequest::region(Rect::new(200, 0, 10, 10))),
        Err(UpdateError::NoFreeBuffer)
    ));
}

#[test]
fn deferred_power_down_fires_after_idle_delay() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let (starts_tx, starts_rx) = mpsc::channel();
    let mut config = ControllerConfig::new(ScreenInfo {
        width: 800,
        height: 600,
    });
    config.scheme = UpdateScheme::Queued;
    config.power_down_delay = PowerDownDelay::After(Duration::from_millis(20));
    let controller = EpdController::new(
        config,
        Box::new(ImmediateProcessor),
        Box::new(RecordingEngine {
            programmed: HashMap::new(),
            starts: starts_tx,
        }),
        Box::new(RecordingRail {
            name: "display",
            transitions: transitions.clone(),
        }),
        Box::new(RecordingRail {
            name: "vcom",
            transitions: transitions.clone(),
        }),
    );
    controller.set_waveform_modes(table());

    controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 10, 10)))
        .expect("admission");
    let (lut, _) = starts_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("dispatch");
    controller.handle_interrupt(HardwareEvent::WorkingBufferComplete {
        collision: LutMask::EMPTY,
    });
    controller.handle_interrupt(HardwareEvent::LutComplete(lut));
    controller.flush();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let log = transitions.lock().expect("rail log").clone();
        if log == vec!["display+", "vcom+", "vcom-", "display-"] {
            break;
        }
        assert!(Instant::now() < deadline, "power-down never fired: {log:?}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn flush_on_an_idle_controller_returns_promptly() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    let began = Instant::now();
    fixture.controller.flush();
    assert!(began.elapsed() < Duration::from_secs(1));
}

#[test]
fn out_of_range_lut_completion_leaves_the_worker_alive() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    // Slot indices come straight from a hardware register; 16 is past the
    // last valid slot.
    fixture
        .controller
        .handle_interrupt(HardwareEvent::LutComplete(LutId(16)));

    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 10, 10)))
        .expect("admission");
    let (lut, _) = fixture.await_start();
    fixture.working_buffer_done(LutMask::EMPTY);
    fixture.lut_done(lut);
    fixture.controller.flush();
    assert_eq!(fixture.controller.stats().completed, 1);
    assert!(fixture.controller.is_idle());
}

#[test]
fn underrun_is_absorbed_without_dropping_updates() {
    let fixture = Fixture::new(UpdateScheme::Queued, 4);
    fixture
        .controller
        .send_update(UpdateRequest::region(Rect::new(0, 0, 10, 10)))
        .expect("admission");
    let (lut, _) = fixture.await_start();
    fixture.controller.handle_interrupt(HardwareEvent::Underrun);
    fixture.working_buffer_done(LutMask::EMPTY);
    fixture.lut_done(lut);
    fixture.controller.flush();
    assert_eq!(fixture.controller.stats().completed, 1);
    assert!(fixture.controller.is_idle());
}
