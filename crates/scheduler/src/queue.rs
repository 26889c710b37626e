//! Pending/colliding update collections with merge-on-submit.
//!
//! Entries move by value: admission pushes to pending, a hardware-reported
//! collision moves the entry here with a non-empty mask, and selection
//! hands the entry to the processing slot. Buffers freed by merging are
//! returned to the caller for the pool.

use std::collections::VecDeque;

use model::{UpdateFlags, WaveformMode};
use smallvec::SmallVec;
use update_protocol::LutId;

use crate::entry::UpdateEntry;
use crate::pool::UpdateBuffer;

/// Donor buffers freed when candidates merge into a selected entry.
pub type FreedBuffers = SmallVec<[UpdateBuffer; 2]>;

#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: VecDeque<UpdateEntry>,
    colliding: Vec<UpdateEntry>,
}

fn waveform_compatible(a: WaveformMode, b: WaveformMode) -> bool {
    a == b || a == WaveformMode::Auto || b == WaveformMode::Auto
}

/// Two updates may coalesce when the result is indistinguishable from
/// running both: identical mode and flags, no alternate source, compatible
/// waveform, rectangles that overlap or touch (so the union bounding box
/// adds no unrelated pixels), and no more than one completion marker.
fn mergeable(a: &UpdateEntry, b: &UpdateEntry) -> bool {
    waveform_compatible(a.request.waveform, b.request.waveform)
        && a.request.mode == b.request.mode
        && a.request.flags == b.request.flags
        && !a.request.flags.contains(UpdateFlags::USE_ALT_BUFFER)
        && a.request.rect.collides(b.request.rect)
        && (a.marker.is_none() || b.marker.is_none())
}

/// Folds `donor` into `target`: union rectangle, max order (so a marker on
/// either waits for every contributing pixel), the surviving marker, and
/// the concrete waveform when one side requested `Auto`.
fn merge_into(target: &mut UpdateEntry, donor: UpdateEntry) -> UpdateBuffer {
    target.request.rect = target.request.rect.merged(donor.request.rect);
    target.order = target.order.max(donor.order);
    if target.request.waveform == WaveformMode::Auto
        && donor.request.waveform != WaveformMode::Auto
    {
        target.request.waveform = donor.request.waveform;
        target.waveform = donor.waveform;
    }
    if target.marker.is_none() {
        target.marker = donor.marker;
    }
    donor.buffer
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pending(&mut self, entry: UpdateEntry) {
        self.pending.push_back(entry);
    }

    pub fn push_colliding(&mut self, entry: UpdateEntry) {
        debug_assert!(!entry.collision_mask.is_empty());
        self.colliding.push(entry);
    }

    /// Merge-on-submit: folds `entry` into the first compatible queued
    /// entry and returns the freed donor buffer, or hands `entry` back.
    pub fn try_merge(&mut self, entry: UpdateEntry) -> Result<UpdateBuffer, UpdateEntry> {
        for existing in self.pending.iter_mut().chain(self.colliding.iter_mut()) {
            if mergeable(existing, &entry) {
                return Ok(merge_into(existing, entry));
            }
        }
        Err(entry)
    }

    /// Preference order: the oldest colliding entry whose mask has fully
    /// cleared, else the pending head. Under the merge scheme, compatible
    /// pending candidates are coalesced into the selection before
    /// dispatch; their buffers come back alongside.
    pub fn select_next(&mut self, merge: bool) -> Option<(UpdateEntry, FreedBuffers)> {
        let mut selected = match self.take_cleared_colliding() {
            Some(entry) => entry,
            None => self.pending.pop_front()?,
        };

        let mut freed = FreedBuffers::new();
        if merge {
            let mut index = 0;
            while index < self.pending.len() {
                if mergeable(&selected, &self.pending[index]) {
                    let donor = self
                        .pending
                        .remove(index)
                        .expect("index checked against len");
                    freed.push(merge_into(&mut selected, donor));
                } else {
                    index += 1;
                }
            }
        }
        Some((selected, freed))
    }

    fn take_cleared_colliding(&mut self) -> Option<UpdateEntry> {
        let position = self
            .colliding
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.collision_mask.is_empty())
            .min_by_key(|(_, entry)| entry.order)
            .map(|(position, _)| position)?;
        Some(self.colliding.swap_remove(position))
    }

    /// LUT `lut` completed: drop its bit from every queued entry's mask.
    pub fn clear_collision_bit(&mut self, lut: LutId) {
        for entry in self.pending.iter_mut().chain(self.colliding.iter_mut()) {
            entry.collision_mask.clear(lut);
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn colliding_len(&self) -> usize {
        self.colliding.len()
    }
}
