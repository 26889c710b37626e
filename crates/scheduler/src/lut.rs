//! Hardware LUT slot allocator and spatial collision resolver.
//!
//! An active slot outlives the [`crate::entry::UpdateEntry`] that dispatched it:
//! the entry's buffer returns to the pool at working-buffer completion
//! while the slot keeps driving the panel, carrying the update's order,
//! rectangle, and any detached completion marker until its own LUT
//! completion interrupt.

use model::Rect;
use update_protocol::{LutId, LutMask, NUM_LUTS};

use crate::entry::MarkerSignal;

#[derive(Debug)]
enum Slot {
    Free,
    Active {
        order: u64,
        rect: Rect,
        marker: Option<MarkerSignal>,
    },
}

#[derive(Debug)]
pub struct LutTable {
    slots: [Slot; NUM_LUTS],
}

impl LutTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::Free),
        }
    }

    /// Claims the lowest free slot for an update about to be dispatched.
    /// Returns `None` when all slots are driving the panel.
    pub fn acquire(&mut self, order: u64, rect: Rect) -> Option<LutId> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))?;
        self.slots[index] = Slot::Active {
            order,
            rect,
            marker: None,
        };
        Some(LutId(index as u8))
    }

    /// Frees a completed slot and hands back its marker for signaling.
    pub fn release(&mut self, lut: LutId) -> Option<MarkerSignal> {
        match std::mem::replace(&mut self.slots[lut.index()], Slot::Free) {
            Slot::Active { marker, .. } => marker,
            Slot::Free => None,
        }
    }

    /// Attaches a completion marker to an active slot; signaled on that
    /// slot's LUT completion.
    pub fn bind_marker(&mut self, lut: LutId, signal: MarkerSignal) {
        match &mut self.slots[lut.index()] {
            Slot::Active { marker, .. } => {
                debug_assert!(marker.is_none(), "slot {lut:?} already carries a marker");
                *marker = Some(signal);
            }
            Slot::Free => {
                debug_assert!(false, "marker bound to free slot {lut:?}");
            }
        }
    }

    pub fn active_mask(&self) -> LutMask {
        let mut mask = LutMask::EMPTY;
        for (index, slot) in self.slots.iter().enumerate() {
            if matches!(slot, Slot::Active { .. }) {
                mask.set(LutId(index as u8));
            }
        }
        mask
    }

    pub fn is_idle(&self) -> bool {
        self.active_mask().is_empty()
    }

    /// Set of active slots whose recorded rectangle overlaps `rect`
    /// (touching edges count). Used to strip noise bits from the
    /// hardware-reported collision register, which works at LUT
    /// granularity.
    pub fn collision_mask(&self, rect: Rect) -> LutMask {
        let mut mask = LutMask::EMPTY;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Slot::Active {
                rect: active_rect, ..
            } = slot
                && active_rect.collides(rect)
            {
                mask.set(LutId(index as u8));
            }
        }
        mask
    }

    /// True when any active slot in `mask` belongs to an update submitted
    /// strictly after `order`.
    pub fn any_newer_than(&self, mask: LutMask, order: u64) -> bool {
        mask.iter().any(|lut| match &self.slots[lut.index()] {
            Slot::Active {
                order: slot_order, ..
            } => *slot_order > order,
            Slot::Free => false,
        })
    }
}
