//! Core data types for the e-paper update scheduler.
//!
//! Plain copyable descriptions of screen regions, waveform selection, and
//! caller update requests. No scheduling state lives here.

use std::time::Duration;

use bitflags::bitflags;

/// Screen-space rectangle in pixels. `width`/`height` may not be zero for
/// an admitted update; zero-sized rects only appear transiently in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge, widened so rects near the top of the `u32`
    /// range cannot overflow bounds checks.
    pub fn right(self) -> u64 {
        u64::from(self.left) + u64::from(self.width)
    }

    /// Exclusive bottom edge, widened like [`Rect::right`].
    pub fn bottom(self) -> u64 {
        u64::from(self.top) + u64::from(self.height)
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Inclusive-bounds intersection test: rects whose edges merely touch
    /// still collide. This matches the controller's coarse per-LUT
    /// collision detection, which reports LUT granularity, not pixels.
    pub fn collides(self, other: Rect) -> bool {
        !(self.right() < u64::from(other.left)
            || other.right() < u64::from(self.left)
            || self.bottom() < u64::from(other.top)
            || other.bottom() < u64::from(self.top))
    }

    /// Union bounding box. Both inputs are screen-validated rects, so the
    /// result's extent stays within `u32`.
    pub fn merged(self, other: Rect) -> Rect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect {
            left,
            top,
            width: (right - u64::from(left)) as u32,
            height: (bottom - u64::from(top)) as u32,
        }
    }

    pub fn fits(self, screen: ScreenInfo) -> bool {
        !self.is_empty()
            && self.right() <= u64::from(screen.width)
            && self.bottom() <= u64::from(screen.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

/// Waveform processing profile for one update. `Auto` is resolved against
/// the loaded [`WaveformTable`] at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformMode {
    Auto,
    /// Full-screen initialization / clear.
    Init,
    /// Fast monochrome direct update.
    Du,
    /// 4-level grayscale clear.
    Gc4,
    /// 16-level grayscale clear.
    Gc16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformTableError {
    AutoDefaultNotConcrete,
}

/// Maps concrete waveform modes to the hardware mode indices parsed out of
/// the loaded waveform firmware, plus the mode `Auto` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformTable {
    pub init: u32,
    pub du: u32,
    pub gc4: u32,
    pub gc16: u32,
    auto_default: WaveformMode,
}

impl WaveformTable {
    pub fn new(
        init: u32,
        du: u32,
        gc4: u32,
        gc16: u32,
        auto_default: WaveformMode,
    ) -> Result<Self, WaveformTableError> {
        if auto_default == WaveformMode::Auto {
            return Err(WaveformTableError::AutoDefaultNotConcrete);
        }
        Ok(Self {
            init,
            du,
            gc4,
            gc16,
            auto_default,
        })
    }

    pub fn resolve(&self, mode: WaveformMode) -> WaveformMode {
        match mode {
            WaveformMode::Auto => self.auto_default,
            concrete => concrete,
        }
    }

    /// Hardware mode index for a concrete mode. `Auto` must be resolved
    /// before programming; resolving here again keeps the call total.
    pub fn hardware_mode(&self, mode: WaveformMode) -> u32 {
        match self.resolve(mode) {
            WaveformMode::Auto => unreachable!("auto_default is validated concrete"),
            WaveformMode::Init => self.init,
            WaveformMode::Du => self.du,
            WaveformMode::Gc4 => self.gc4,
            WaveformMode::Gc16 => self.gc16,
        }
    }
}

/// Full refresh repaints the whole target region through the waveform;
/// partial refresh only drives pixels that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScheme {
    /// Pixel data captured at submit time; collisions with newer updates
    /// discard the stale result.
    Snapshot,
    /// Deferred processing, no merging.
    Queued,
    /// Deferred processing with bounding-box merge of compatible updates.
    QueuedMerge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDownDelay {
    Disabled,
    After(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temperature {
    Ambient,
    Celsius(i32),
}

/// Opaque caller-chosen completion token. Zero is reserved for "no marker"
/// at the boundary; internally absence is `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerToken(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateFlags: u32 {
        /// Source pixels come from a caller-supplied buffer instead of the
        /// framebuffer.
        const USE_ALT_BUFFER = 1 << 0;
        /// Collapse the region to 1-bit black/white during processing.
        const FORCE_MONOCHROME = 1 << 1;
    }
}

/// Caller-supplied alternate source buffer. Dimensions must match the
/// update rectangle exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltBuffer {
    pub address: u64,
    pub width: u32,
    pub height: u32,
}

/// One caller update request. Immutable once admitted, except that the
/// queue may widen `rect` when merging compatible updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub rect: Rect,
    pub waveform: WaveformMode,
    pub mode: UpdateMode,
    pub marker: Option<MarkerToken>,
    pub flags: UpdateFlags,
    pub temperature: Temperature,
    pub alt_buffer: Option<AltBuffer>,
}

impl UpdateRequest {
    /// Partial GC16 update of `rect` with no marker and ambient temperature.
    pub fn region(rect: Rect) -> Self {
        Self {
            rect,
            waveform: WaveformMode::Gc16,
            mode: UpdateMode::Partial,
            marker: None,
            flags: UpdateFlags::empty(),
            temperature: Temperature::Ambient,
            alt_buffer: None,
        }
    }
}
