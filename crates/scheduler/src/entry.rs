//! In-flight update representation.

use std::sync::mpsc;

use model::{MarkerToken, UpdateRequest, WaveformMode};
use update_protocol::{LutId, LutMask};

use crate::pool::UpdateBuffer;

/// Completion side of a caller marker. Signaling is a non-blocking send;
/// dropping the signal unsignaled disconnects the waiter.
#[derive(Debug)]
pub struct MarkerSignal {
    token: MarkerToken,
    sender: mpsc::Sender<()>,
}

impl MarkerSignal {
    pub fn new(token: MarkerToken, sender: mpsc::Sender<()>) -> Self {
        Self { token, sender }
    }

    pub fn token(&self) -> MarkerToken {
        self.token
    }

    pub fn signal(self) {
        // Waiter may have timed out and dropped its receiver already.
        let _ = self.sender.send(());
    }
}

/// One admitted update. Owns its pool buffer for its whole lifetime;
/// exactly one of {pending, colliding, processing} holds the entry until
/// the buffer goes back to the pool.
#[derive(Debug)]
pub struct UpdateEntry {
    pub buffer: UpdateBuffer,
    pub request: UpdateRequest,
    /// Concrete mode after `Auto` resolution at admission.
    pub waveform: WaveformMode,
    /// Submission sequence number, strictly increasing, never reused while
    /// the entry is live.
    pub order: u64,
    pub lut: Option<LutId>,
    pub collision_mask: LutMask,
    pub marker: Option<MarkerSignal>,
}

impl UpdateEntry {
    pub fn new(
        buffer: UpdateBuffer,
        request: UpdateRequest,
        waveform: WaveformMode,
        order: u64,
        marker: Option<MarkerSignal>,
    ) -> Self {
        Self {
            buffer,
            request,
            waveform,
            order,
            lut: None,
            collision_mask: LutMask::EMPTY,
            marker,
        }
    }
}
