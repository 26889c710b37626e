//! The scheduler core: admission, selection, dispatch bookkeeping, and
//! completion handling over the buffer pool, update queue, and LUT table.
//!
//! Every method runs under the caller's queue lock and never blocks. The
//! worker thread in the `epdc` crate drives the cycle: `admit` →
//! `start_next` → (image processing outside the lock) → `finish_processing`
//! → `try_dispatch` → hardware events via `on_working_buffer_complete` /
//! `on_lut_complete`.

use model::{
    PowerDownDelay, ScreenInfo, Temperature, UpdateFlags, UpdateRequest, UpdateScheme,
    WaveformMode, WaveformTable,
};
use update_protocol::{DispatchParams, LutId, LutMask, NUM_LUTS, ProcessingError, ProcessingJob};

use crate::entry::{MarkerSignal, UpdateEntry};
use crate::error::{RegionError, UpdateError};
use crate::lut::LutTable;
use crate::pool::BufferPool;
use crate::queue::UpdateQueue;

/// Sentinel temperature index meaning "use the panel's ambient reading";
/// forwarded to the hardware when neither the request nor the controller
/// carries an explicit temperature.
pub const TEMP_USE_AMBIENT: i32 = 0x1000;

#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub screen: ScreenInfo,
    pub pool_capacity: usize,
    pub pool_base_address: u64,
    pub buffer_size: u64,
    pub scheme: UpdateScheme,
    pub power_down_delay: PowerDownDelay,
}

impl CoreConfig {
    pub fn new(screen: ScreenInfo) -> Self {
        Self {
            screen,
            pool_capacity: 8,
            pool_base_address: 0x8000_0000,
            buffer_size: 0x0010_0000,
            scheme: UpdateScheme::QueuedMerge,
            power_down_delay: PowerDownDelay::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessingPhase {
    Preparing,
    AwaitingLut,
    Dispatched,
}

#[derive(Debug)]
struct ProcessingSlot {
    entry: UpdateEntry,
    phase: ProcessingPhase,
}

/// Running counters, exposed read-only for tests and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub merged: u64,
    pub dispatched: u64,
    pub collisions: u64,
    pub discarded: u64,
    pub completed: u64,
    pub processing_failures: u64,
}

/// One dispatch the worker must program into the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOrder {
    pub lut: LutId,
    pub params: DispatchParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Processed pixels staged; the entry now waits for a LUT.
    Staged,
    /// Processing failed; the entry was dropped and its buffer freed.
    Aborted,
}

#[derive(Debug)]
pub struct LutCompleteOutcome {
    /// Marker detached from the completed slot, to be signaled outside the
    /// lock.
    pub marker: Option<MarkerSignal>,
    pub idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingBufferOutcome {
    /// The update reached the panel; its LUT keeps driving until its own
    /// completion interrupt.
    Committed,
    /// Hardware reported an overlap with in-flight LUTs; the entry is
    /// queued as colliding for retry.
    Collided,
    /// Snapshot-scheme overlap with a strictly newer update; the stale
    /// result was dropped, marker unsignaled.
    Discarded { idle: bool },
    /// No dispatched entry was outstanding. Logged and ignored.
    Spurious,
}

pub struct SchedulerCore {
    screen: ScreenInfo,
    scheme: UpdateScheme,
    temperature: Temperature,
    waveform: Option<WaveformTable>,
    power_down_delay: PowerDownDelay,
    pool: BufferPool,
    queue: UpdateQueue,
    luts: LutTable,
    processing: Option<ProcessingSlot>,
    next_order: u64,
    stats: SchedulerStats,
}

impl SchedulerCore {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            screen: config.screen,
            scheme: config.scheme,
            temperature: Temperature::Ambient,
            waveform: None,
            power_down_delay: config.power_down_delay,
            pool: BufferPool::new(
                config.pool_capacity,
                config.pool_base_address,
                config.buffer_size,
            ),
            queue: UpdateQueue::new(),
            luts: LutTable::new(),
            processing: None,
            next_order: 1,
            stats: SchedulerStats::default(),
        }
    }

    /// Admission. Fails fast with nothing mutated; on success the request
    /// owns a pool buffer and sits in pending (possibly merged into an
    /// earlier compatible entry under the merge scheme).
    pub fn admit(
        &mut self,
        request: UpdateRequest,
        marker: Option<MarkerSignal>,
    ) -> Result<WaveformMode, UpdateError> {
        let Some(table) = self.waveform else {
            return Err(UpdateError::NotReady);
        };
        self.validate_region(&request)?;
        if self.pool.free_len() == 0 {
            return Err(UpdateError::NoFreeBuffer);
        }
        let buffer = self.pool.take().expect("free count checked above");

        let resolved = table.resolve(request.waveform);
        let order = self.next_order;
        self.next_order += 1;
        let entry = UpdateEntry::new(buffer, request, resolved, order, marker);
        self.stats.submitted += 1;

        if self.scheme == UpdateScheme::QueuedMerge {
            match self.queue.try_merge(entry) {
                Ok(donor) => {
                    self.pool.give_back(donor);
                    self.stats.merged += 1;
                }
                Err(entry) => self.queue.push_pending(entry),
            }
        } else {
            self.queue.push_pending(entry);
        }
        Ok(resolved)
    }

    fn validate_region(&self, request: &UpdateRequest) -> Result<(), UpdateError> {
        let rect = request.rect;
        if rect.is_empty() {
            return Err(UpdateError::InvalidRegion {
                rect,
                reason: RegionError::EmptyRegion,
            });
        }
        if !rect.fits(self.screen) {
            return Err(UpdateError::InvalidRegion {
                rect,
                reason: RegionError::OutOfBounds {
                    screen: self.screen,
                },
            });
        }
        if request.flags.contains(UpdateFlags::USE_ALT_BUFFER) {
            let Some(alt) = request.alt_buffer else {
                return Err(UpdateError::InvalidRegion {
                    rect,
                    reason: RegionError::AltBufferMissing,
                });
            };
            if alt.width != rect.width || alt.height != rect.height {
                return Err(UpdateError::InvalidRegion {
                    rect,
                    reason: RegionError::AltBufferMismatch {
                        width: alt.width,
                        height: alt.height,
                    },
                });
            }
        }
        Ok(())
    }

    /// Moves the next selected entry into the processing slot and returns
    /// the job for the image processor. `None` while the working buffer is
    /// occupied or nothing is runnable.
    pub fn start_next(&mut self) -> Option<ProcessingJob> {
        if self.processing.is_some() {
            return None;
        }
        let merge = self.scheme == UpdateScheme::QueuedMerge;
        let (entry, freed) = self.queue.select_next(merge)?;
        for buffer in freed {
            self.pool.give_back(buffer);
            self.stats.merged += 1;
        }
        let job = ProcessingJob {
            rect: entry.request.rect,
            update_mode: entry.request.mode,
            flags: entry.request.flags,
            alt_buffer_address: entry.request.alt_buffer.map(|alt| alt.address),
            dest_address: entry.buffer.address(),
        };
        self.processing = Some(ProcessingSlot {
            entry,
            phase: ProcessingPhase::Preparing,
        });
        Some(job)
    }

    /// Applies the image processor result for the entry in the processing
    /// slot. Failure drops the entry: buffer freed, marker never signaled,
    /// no retry.
    pub fn finish_processing(
        &mut self,
        result: Result<update_protocol::ProcessingStats, ProcessingError>,
    ) -> ProcessOutcome {
        let Some(slot) = self.processing.as_mut() else {
            log::warn!("processing result with no entry in flight");
            return ProcessOutcome::Aborted;
        };
        debug_assert_eq!(slot.phase, ProcessingPhase::Preparing);
        match result {
            Ok(_) => {
                slot.phase = ProcessingPhase::AwaitingLut;
                ProcessOutcome::Staged
            }
            Err(error) => {
                let slot = self
                    .processing
                    .take()
                    .expect("processing slot checked above");
                log::warn!(
                    "image processing failed for order {}: {error:?}; update dropped",
                    slot.entry.order
                );
                self.pool.give_back(slot.entry.buffer);
                self.stats.processing_failures += 1;
                ProcessOutcome::Aborted
            }
        }
    }

    /// Completes a staged entry's dispatch once a LUT is free. Returns the
    /// register programming for the worker, or `None` while no entry is
    /// staged or all LUTs are in flight.
    pub fn try_dispatch(&mut self) -> Option<DispatchOrder> {
        let table = self.waveform?;
        let slot = self.processing.as_mut()?;
        if slot.phase != ProcessingPhase::AwaitingLut {
            return None;
        }
        let lut = self.luts.acquire(slot.entry.order, slot.entry.request.rect)?;
        slot.entry.lut = Some(lut);
        slot.phase = ProcessingPhase::Dispatched;
        self.stats.dispatched += 1;

        let temperature_index = match slot.entry.request.temperature {
            Temperature::Celsius(celsius) => celsius,
            Temperature::Ambient => match self.temperature {
                Temperature::Celsius(celsius) => celsius,
                Temperature::Ambient => TEMP_USE_AMBIENT,
            },
        };
        Some(DispatchOrder {
            lut,
            params: DispatchParams {
                address: slot.entry.buffer.address(),
                rect: slot.entry.request.rect,
                hardware_mode: table.hardware_mode(slot.entry.waveform),
                update_mode: slot.entry.request.mode,
                temperature_index,
            },
        })
    }

    /// LUT completion interrupt: the slot's region is on glass. Frees the
    /// slot, clears its bit from every queued mask, and hands back the
    /// marker for signaling outside the lock.
    pub fn on_lut_complete(&mut self, lut: LutId) -> LutCompleteOutcome {
        // The interrupt side hands slot indices straight from hardware
        // registers; an out-of-range index is noise, same as a stray
        // working-buffer completion.
        if lut.index() >= NUM_LUTS {
            log::warn!("lut completion for out-of-range slot {lut:?}; ignored");
            return LutCompleteOutcome {
                marker: None,
                idle: self.is_idle(),
            };
        }
        let marker = self.luts.release(lut);
        self.queue.clear_collision_bit(lut);
        self.stats.completed += 1;
        LutCompleteOutcome {
            marker,
            idle: self.is_idle(),
        }
    }

    /// Working-buffer completion interrupt for the dispatched entry.
    /// `collision` is the hardware-reported set of overlapping LUTs at
    /// this instant.
    pub fn on_working_buffer_complete(&mut self, collision: LutMask) -> WorkingBufferOutcome {
        match self.processing.as_ref() {
            Some(slot) if slot.phase == ProcessingPhase::Dispatched => {}
            _ => {
                log::warn!("working buffer completion with no dispatched entry");
                return WorkingBufferOutcome::Spurious;
            }
        }
        let slot = self.processing.take().expect("slot matched above");
        let mut entry = slot.entry;
        let own_lut = entry.lut.take().expect("dispatched entry holds a lut");

        // The collision register works at LUT granularity; keep only bits
        // whose slot actually overlaps this update's rectangle.
        let mut reported = collision.intersect(self.luts.collision_mask(entry.request.rect));
        reported.clear(own_lut);

        if reported.is_empty() {
            if let Some(marker) = entry.marker.take() {
                self.luts.bind_marker(own_lut, marker);
            }
            self.pool.give_back(entry.buffer);
            return WorkingBufferOutcome::Committed;
        }

        // The staged pixels never reached the panel; the LUT goes back.
        let unbound = self.luts.release(own_lut);
        debug_assert!(unbound.is_none(), "marker bound before commit");
        self.queue.clear_collision_bit(own_lut);
        self.stats.collisions += 1;

        let overtaken = self.scheme == UpdateScheme::Snapshot
            && self.luts.any_newer_than(reported, entry.order);
        if overtaken {
            log::debug!(
                "snapshot update order {} overtaken by newer in-flight update; dropped",
                entry.order
            );
            self.pool.give_back(entry.buffer);
            self.stats.discarded += 1;
            return WorkingBufferOutcome::Discarded {
                idle: self.is_idle(),
            };
        }

        entry.collision_mask = reported;
        self.queue.push_colliding(entry);
        WorkingBufferOutcome::Collided
    }

    /// System idle: every pool buffer free, nothing processing, no LUT
    /// active. Gates flush completion and the deferred power-down.
    pub fn is_idle(&self) -> bool {
        self.pool.is_full() && self.processing.is_none() && self.luts.is_idle()
    }

    pub fn set_scheme(&mut self, scheme: UpdateScheme) {
        self.scheme = scheme;
    }

    pub fn set_temperature(&mut self, celsius: i32) {
        self.temperature = Temperature::Celsius(celsius);
    }

    pub fn set_waveform_table(&mut self, table: WaveformTable) {
        self.waveform = Some(table);
    }

    pub fn set_power_down_delay(&mut self, delay: PowerDownDelay) {
        self.power_down_delay = delay;
    }

    pub fn power_down_delay(&self) -> PowerDownDelay {
        self.power_down_delay
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn free_buffers(&self) -> usize {
        self.pool.free_len()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }
}
