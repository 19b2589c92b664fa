use std::fmt;

use static_assertions::assert_eq_size;

mod address;
mod pool;

pub use address::TileAddressTranslator;
pub use pool::{TilePool, TilePoolConfig, TilePoolEntry};

/// Working-set layers: irradiance, SH directionality, shadow mask, shadow sample count and
/// SH correction.
pub const WORKING_SET_LAYERS: u32 = 5;
/// Extra working-set layers holding first-bounce ray guiding state.
pub const RAY_GUIDING_LAYERS: u32 = 3;
pub const SCRATCH_LAYERS: u32 = 3;

/// Linear index of a physical slot inside a tile pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileSlot(u32);

assert_eq_size!(TileSlot, u32);

impl TileSlot {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAddressError {
    EmptyAtlas,
    AtlasTooLarge,
    SlotOutOfRange { slot: u32, capacity: u32 },
    PositionOutOfRange { x: u32, y: u32, tiles_per_edge: u32 },
}

impl fmt::Display for TileAddressError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileAddressError::EmptyAtlas => write!(formatter, "tile atlas has zero tiles per edge"),
            TileAddressError::AtlasTooLarge => write!(formatter, "tile atlas size overflows u32"),
            TileAddressError::SlotOutOfRange { slot, capacity } => write!(
                formatter,
                "tile slot {slot} outside atlas of capacity {capacity}"
            ),
            TileAddressError::PositionOutOfRange {
                x,
                y,
                tiles_per_edge,
            } => write!(
                formatter,
                "tile position ({x}, {y}) outside atlas of {tiles_per_edge} tiles per edge"
            ),
        }
    }
}

impl std::error::Error for TileAddressError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePoolError {
    Address(TileAddressError),
    SlotNotLocked { slot: u32 },
    AlreadyResident { slot: u32 },
    LengthMismatch { tiles: usize, slots: usize },
    LockCountOverflow { slot: u32 },
}

impl fmt::Display for TilePoolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TilePoolError::Address(error) => write!(formatter, "{error}"),
            TilePoolError::SlotNotLocked { slot } => {
                write!(formatter, "tile slot {slot} is not locked")
            }
            TilePoolError::AlreadyResident { slot } => {
                write!(formatter, "tile is already resident in slot {slot}")
            }
            TilePoolError::LengthMismatch { tiles, slots } => write!(
                formatter,
                "cannot map {tiles} tiles onto {slots} slots"
            ),
            TilePoolError::LockCountOverflow { slot } => {
                write!(formatter, "lock count overflow on tile slot {slot}")
            }
        }
    }
}

impl std::error::Error for TilePoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TilePoolError::Address(error) => Some(error),
            _ => None,
        }
    }
}

impl From<TileAddressError> for TilePoolError {
    fn from(error: TileAddressError) -> Self {
        TilePoolError::Address(error)
    }
}
