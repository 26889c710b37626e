//! Background worker: submission scheduling and completion dispatch.
//!
//! Single consumer of the event channel. The worker never blocks while
//! holding the queue lock; image processing and hardware programming run
//! between lock scopes. Waits for resources are satisfied purely by the
//! next hardware event arriving on the channel.

use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use model::PowerDownDelay;
use scheduler::{PowerManager, SchedulerCore};
use update_protocol::{HardwareEvent, ImageProcessor, UpdateEngine};

/// Window after dispatch in which a hardware interrupt is expected.
/// Expiry is logged and the dispatched entry stays in place; the channel
/// does not stall on its own.
const HARDWARE_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) enum WorkerMessage {
    /// Queue state changed; re-evaluate scheduling.
    Kick,
    Hardware(HardwareEvent),
    Flush { ack: mpsc::Sender<()> },
    Shutdown,
}

pub(crate) struct WorkerParts {
    pub core: Arc<Mutex<SchedulerCore>>,
    pub receiver: Receiver<WorkerMessage>,
    pub processor: Box<dyn ImageProcessor>,
    pub engine: Box<dyn UpdateEngine>,
    pub power: PowerManager,
}

struct Worker {
    core: Arc<Mutex<SchedulerCore>>,
    processor: Box<dyn ImageProcessor>,
    engine: Box<dyn UpdateEngine>,
    power: PowerManager,
    flush_waiters: Vec<mpsc::Sender<()>>,
    power_deadline: Option<Instant>,
    dispatched_at: Option<Instant>,
}

pub(crate) fn worker_loop(parts: WorkerParts) {
    let WorkerParts {
        core,
        receiver,
        processor,
        engine,
        power,
    } = parts;
    let mut worker = Worker {
        core,
        processor,
        engine,
        power,
        flush_waiters: Vec::new(),
        power_deadline: None,
        dispatched_at: None,
    };

    loop {
        let message = match worker.next_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => return,
            },
        };

        match message {
            Some(WorkerMessage::Kick) => {}
            Some(WorkerMessage::Hardware(event)) => worker.handle_event(event),
            Some(WorkerMessage::Flush { ack }) => {
                if worker.lock_core().is_idle() {
                    let _ = ack.send(());
                } else {
                    worker.flush_waiters.push(ack);
                }
            }
            Some(WorkerMessage::Shutdown) => return,
            None => worker.handle_timer(),
        }

        worker.pump();
        worker.observe_idle();
    }
}

impl Worker {
    fn lock_core(&self) -> MutexGuard<'_, SchedulerCore> {
        self.core.lock().expect("queue lock should not be poisoned")
    }

    fn next_deadline(&self) -> Option<Instant> {
        let watchdog = self
            .dispatched_at
            .map(|dispatched| dispatched + HARDWARE_TIMEOUT);
        match (self.power_deadline, watchdog) {
            (Some(power), Some(watchdog)) => Some(power.min(watchdog)),
            (deadline, None) | (None, deadline) => deadline,
        }
    }

    fn handle_event(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::LutComplete(lut) => {
                let outcome = self.lock_core().on_lut_complete(lut);
                if let Some(marker) = outcome.marker {
                    marker.signal();
                }
            }
            HardwareEvent::WorkingBufferComplete { collision } => {
                let _outcome = self.lock_core().on_working_buffer_complete(collision);
                self.dispatched_at = None;
            }
            HardwareEvent::Underrun => {
                log::warn!("pixel transfer underrun reported; continuing");
            }
        }
    }

    fn handle_timer(&mut self) {
        let now = Instant::now();
        if let Some(dispatched) = self.dispatched_at
            && dispatched + HARDWARE_TIMEOUT <= now
        {
            log::warn!(
                "no hardware completion within {HARDWARE_TIMEOUT:?} of dispatch; \
                 update left in place"
            );
            // Restart the window rather than logging every wakeup.
            self.dispatched_at = Some(now);
        }
        if let Some(deadline) = self.power_deadline
            && deadline <= now
        {
            self.power_deadline = None;
            if self.lock_core().is_idle() {
                self.power.power_down();
            }
        }
    }

    /// Drives the dispatch cycle as far as resources allow: complete any
    /// staged dispatch, then pick and process candidates until the working
    /// buffer is occupied or the queue has nothing runnable.
    fn pump(&mut self) {
        loop {
            let dispatch = self.lock_core().try_dispatch();
            if let Some(order) = dispatch {
                self.engine.program(order.lut, &order.params);
                self.engine.start(order.lut);
                self.dispatched_at = Some(Instant::now());
                continue;
            }

            let Some(job) = self.lock_core().start_next() else {
                break;
            };
            self.power.power_up();
            self.power_deadline = None;
            let result = self.processor.process(&job);
            // Failure outcome already returned the buffer; either way the
            // next iteration advances the cycle.
            let _ = self.lock_core().finish_processing(result);
        }
    }

    fn observe_idle(&mut self) {
        if !self.lock_core().is_idle() {
            return;
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(());
        }
        if self.power.is_on() && self.power_deadline.is_none() {
            let delay = self.lock_core().power_down_delay();
            match delay {
                PowerDownDelay::Disabled => {}
                PowerDownDelay::After(delay) => {
                    self.power_deadline = Some(Instant::now() + delay);
                }
            }
        }
    }
}
