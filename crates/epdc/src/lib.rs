//! Public controller for the e-paper update scheduling engine.
//!
//! Owns the queue lock, the background worker thread, and the interrupt
//! boundary. Callers submit updates and optionally block on completion
//! markers; the hardware side injects [`HardwareEvent`]s through a
//! non-blocking channel, keeping the truly asynchronous portion minimal.

mod worker;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError, bounded};
use model::{
    MarkerToken, PowerDownDelay, ScreenInfo, UpdateRequest, UpdateScheme, WaveformMode,
    WaveformTable,
};
use scheduler::{CoreConfig, MarkerSignal, PowerManager, SchedulerCore, SchedulerStats, UpdateError};
use update_protocol::{HardwareEvent, ImageProcessor, PowerRail, UpdateEngine};

use crate::worker::{WorkerMessage, WorkerParts, worker_loop};

/// Interrupt events buffered between the interrupt side and the worker.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Upper bound on `flush` waits. Quiescence is best-effort: expiry is
/// logged and the caller proceeds.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub screen: ScreenInfo,
    pub pool_capacity: usize,
    pub pool_base_address: u64,
    pub buffer_size: u64,
    pub scheme: UpdateScheme,
    pub power_down_delay: PowerDownDelay,
}

impl ControllerConfig {
    pub fn new(screen: ScreenInfo) -> Self {
        let core = CoreConfig::new(screen);
        Self {
            screen,
            pool_capacity: core.pool_capacity,
            pool_base_address: core.pool_base_address,
            buffer_size: core.buffer_size,
            scheme: core.scheme,
            power_down_delay: core.power_down_delay,
        }
    }

    fn core_config(&self) -> CoreConfig {
        CoreConfig {
            screen: self.screen,
            pool_capacity: self.pool_capacity,
            pool_base_address: self.pool_base_address,
            buffer_size: self.buffer_size,
            scheme: self.scheme,
            power_down_delay: self.power_down_delay,
        }
    }
}

pub struct EpdController {
    core: Arc<Mutex<SchedulerCore>>,
    markers: Mutex<HashMap<MarkerToken, mpsc::Receiver<()>>>,
    sender: Sender<WorkerMessage>,
    worker: Option<thread::JoinHandle<()>>,
}

impl EpdController {
    pub fn new(
        config: ControllerConfig,
        processor: Box<dyn ImageProcessor>,
        engine: Box<dyn UpdateEngine>,
        display_rail: Box<dyn PowerRail>,
        vcom_rail: Box<dyn PowerRail>,
    ) -> Self {
        let core = Arc::new(Mutex::new(SchedulerCore::new(config.core_config())));
        let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY);
        let parts = WorkerParts {
            core: core.clone(),
            receiver,
            processor,
            engine,
            power: PowerManager::new(display_rail, vcom_rail),
        };
        let worker = thread::Builder::new()
            .name("epdc-worker".to_owned())
            .spawn(move || worker_loop(parts))
            .expect("spawn epdc worker thread");
        Self {
            core,
            markers: Mutex::new(HashMap::new()),
            sender,
            worker: Some(worker),
        }
    }

    /// Admits an update. Never blocks; admission failures leave nothing
    /// mutated. Returns the waveform mode actually selected (`Auto`
    /// resolved against the loaded table).
    pub fn send_update(&self, request: UpdateRequest) -> Result<WaveformMode, UpdateError> {
        let marker_channel = request.marker.map(|token| {
            let (sender, receiver) = mpsc::channel();
            (token, MarkerSignal::new(token, sender), receiver)
        });
        let (signal, pending_receiver) = match marker_channel {
            Some((token, signal, receiver)) => (Some(signal), Some((token, receiver))),
            None => (None, None),
        };

        let mode = self
            .core
            .lock()
            .expect("queue lock should not be poisoned")
            .admit(request, signal)?;

        if let Some((token, receiver)) = pending_receiver {
            self.markers
                .lock()
                .expect("marker map lock should not be poisoned")
                .insert(token, receiver);
        }
        self.kick();
        Ok(mode)
    }

    /// Blocks until the marker is signaled or `timeout` elapses. A marker
    /// dropped unsignaled (overtaken or failed update) also reports
    /// `WaitTimeout`, just without waiting out the clock.
    pub fn wait_for_update(
        &self,
        token: MarkerToken,
        timeout: Duration,
    ) -> Result<(), UpdateError> {
        let receiver = self
            .markers
            .lock()
            .expect("marker map lock should not be poisoned")
            .remove(&token)
            .ok_or(UpdateError::UnknownMarker { token })?;
        match receiver.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Completion may still land later; keep the waiter armed.
                self.markers
                    .lock()
                    .expect("marker map lock should not be poisoned")
                    .insert(token, receiver);
                Err(UpdateError::WaitTimeout { token })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(UpdateError::WaitTimeout { token }),
        }
    }

    /// Interrupt-side entry point. Enqueues and returns; never blocks.
    pub fn handle_interrupt(&self, event: HardwareEvent) {
        match self.sender.try_send(WorkerMessage::Hardware(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::error!("hardware event queue full; dropping {event:?}");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("worker gone; dropping {event:?}");
            }
        }
    }

    /// Blocks until the scheduler reaches full idle (every pool buffer
    /// free, no LUT active) or a bounded timeout expires. Best-effort.
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.sender.send(WorkerMessage::Flush { ack }).is_err() {
            return;
        }
        if done.recv_timeout(FLUSH_TIMEOUT).is_err() {
            log::warn!("flush timed out after {FLUSH_TIMEOUT:?}; proceeding");
        }
    }

    pub fn set_temperature(&self, celsius: i32) {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .set_temperature(celsius);
    }

    /// Loads the waveform mode table. The controller rejects updates with
    /// `NotReady` until this is called.
    pub fn set_waveform_modes(&self, table: WaveformTable) {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .set_waveform_table(table);
        self.kick();
    }

    pub fn set_scheme(&self, scheme: UpdateScheme) {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .set_scheme(scheme);
    }

    pub fn set_power_down_delay(&self, delay: PowerDownDelay) {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .set_power_down_delay(delay);
        self.kick();
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .stats()
    }

    pub fn is_idle(&self) -> bool {
        self.core
            .lock()
            .expect("queue lock should not be poisoned")
            .is_idle()
    }

    fn kick(&self) {
        match self.sender.try_send(WorkerMessage::Kick) {
            Ok(()) => {}
            // A full queue already guarantees a wakeup.
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::error!("worker gone; kick dropped");
            }
        }
    }
}

impl Drop for EpdController {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
