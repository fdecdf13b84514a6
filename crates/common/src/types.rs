//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parser clock rate: the hardware parser counts in 100 ns units (10 MHz).
pub const PARSER_TICKS_PER_MS: i64 = 10_000;

/// Width and height in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count.
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Number of 16x16 macroblocks (partial blocks truncated).
    pub fn macroblocks(self) -> u64 {
        (self.width >> 4) as u64 * (self.height >> 4) as u64
    }

    /// Whether both dimensions fit inside `bound`.
    pub fn fits_within(self, bound: Resolution) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }

    /// Component-wise maximum.
    pub fn max(self, other: Resolution) -> Resolution {
        Resolution::new(self.width.max(other.width), self.height.max(other.height))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle in frame coordinates, right/bottom exclusive.
///
/// An all-zero rectangle is the "driver default" display area.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin.
    pub fn from_size(size: Resolution) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn size(self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn is_empty(self) -> bool {
        self.size().is_empty()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Wall-clock timestamp in milliseconds, as supplied by the packet source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallClockMs(pub i64);

impl WallClockMs {
    /// Offset of `self` from `origin`, expressed on the parser clock.
    pub fn ticks_since(self, origin: WallClockMs) -> ParserTicks {
        ParserTicks((self.0 - origin.0).saturating_mul(PARSER_TICKS_PER_MS))
    }

    /// `self` advanced by a parser-clock offset (truncated to whole ms).
    pub fn advanced_by(self, ticks: ParserTicks) -> WallClockMs {
        WallClockMs(self.0 + ticks.as_millis())
    }
}

impl fmt::Display for WallClockMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Timestamp on the hardware parser's 10 MHz clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParserTicks(pub i64);

impl ParserTicks {
    pub const ZERO: Self = Self(0);

    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(PARSER_TICKS_PER_MS))
    }

    pub fn as_millis(self) -> i64 {
        self.0 / PARSER_TICKS_PER_MS
    }
}
