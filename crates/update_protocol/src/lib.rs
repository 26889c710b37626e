//! Contracts between the update scheduler and its collaborators.
//!
//! This crate carries the trait seams for the image-processing pipeline,
//! the hardware update engine, and power-rail control, plus the event
//! descriptors the interrupt side feeds back to the scheduler. The
//! scheduler crate depends on these shapes only, so every collaborator can
//! be faked in tests.

use model::{Rect, UpdateFlags, UpdateMode};

/// Number of hardware LUT slots the controller exposes.
pub const NUM_LUTS: usize = 16;

/// Index of one hardware LUT slot, `0..NUM_LUTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LutId(pub u8);

impl LutId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bitset over LUT indices, laid out like the controller's collision
/// status register (bit i = LUT i).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LutMask(pub u32);

impl LutMask {
    pub const EMPTY: LutMask = LutMask(0);

    pub fn single(lut: LutId) -> Self {
        LutMask(1 << lut.index())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, lut: LutId) -> bool {
        self.0 & (1 << lut.index()) != 0
    }

    pub fn set(&mut self, lut: LutId) {
        self.0 |= 1 << lut.index();
    }

    pub fn clear(&mut self, lut: LutId) {
        self.0 &= !(1 << lut.index());
    }

    pub fn intersect(self, other: LutMask) -> LutMask {
        LutMask(self.0 & other.0)
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate the set LUT indices in ascending order.
    pub fn iter(self) -> LutMaskIter {
        LutMaskIter { remaining: self.0 }
    }
}

pub struct LutMaskIter {
    remaining: u32,
}

impl Iterator for LutMaskIter {
    type Item = LutId;

    fn next(&mut self) -> Option<LutId> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.remaining.trailing_zeros() as u8;
        self.remaining &= self.remaining - 1;
        Some(LutId(index))
    }
}

/// One hardware interrupt, reduced to a small descriptor so the interrupt
/// side only enqueues and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    /// The named LUT finished driving its region on the panel.
    LutComplete(LutId),
    /// The shared working buffer finished staging the dispatched update.
    /// `collision` is the controller-reported set of still-active LUTs
    /// whose regions overlap the staged update.
    WorkingBufferComplete { collision: LutMask },
    /// Transfer underrun/overrun on the pixel path. Logged, never fatal.
    Underrun,
}

/// Everything the image processor needs for one update's source region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingJob {
    pub rect: Rect,
    pub update_mode: UpdateMode,
    pub flags: UpdateFlags,
    /// Caller-supplied source when `USE_ALT_BUFFER` is set.
    pub alt_buffer_address: Option<u64>,
    /// Destination: the pool buffer the processed pixels land in.
    pub dest_address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingStats {
    pub processed_pixels: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingError {
    SourceUnavailable,
    Conversion { stage: &'static str },
}

/// Rotation, color-space conversion, scaling. Synchronous; the worker
/// calls it without holding the queue lock.
pub trait ImageProcessor: Send {
    fn process(&mut self, job: &ProcessingJob) -> Result<ProcessingStats, ProcessingError>;
}

/// Register image for one dispatch, as handed to the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchParams {
    pub address: u64,
    pub rect: Rect,
    pub hardware_mode: u32,
    pub update_mode: UpdateMode,
    pub temperature_index: i32,
}

/// Register-level programming of the display controller. Completion and
/// collision status come back through [`HardwareEvent`]s instead of status
/// polls.
pub trait UpdateEngine: Send {
    fn program(&mut self, lut: LutId, params: &DispatchParams);
    fn start(&mut self, lut: LutId);
}

/// One supply rail. Enable/disable are synchronous and idempotent.
pub trait PowerRail: Send {
    fn enable(&mut self);
    fn disable(&mut self);
}
