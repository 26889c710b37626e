use model::{MarkerToken, Rect, ScreenInfo};

/// Why an update rectangle was rejected at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    OutOfBounds { screen: ScreenInfo },
    EmptyRegion,
    AltBufferMissing,
    AltBufferMismatch { width: u32, height: u32 },
}

/// Errors surfaced at the public boundary. Post-admission failures are
/// absorbed internally and only show up as a marker wait timing out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    InvalidRegion { rect: Rect, reason: RegionError },
    NoFreeBuffer,
    /// No waveform table loaded yet.
    NotReady,
    WaitTimeout { token: MarkerToken },
    UnknownMarker { token: MarkerToken },
}
