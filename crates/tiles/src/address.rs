use model::TilePosition;

use crate::{TileAddressError, TileSlot};

/// Maps linear slot indices of a square tile atlas to 2D tile positions and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAddressTranslator {
    tiles_per_edge: u32,
    capacity: u32,
}

impl TileAddressTranslator {
    pub fn new(tiles_per_edge: u32) -> Result<Self, TileAddressError> {
        if tiles_per_edge == 0 {
            return Err(TileAddressError::EmptyAtlas);
        }
        let capacity = tiles_per_edge
            .checked_mul(tiles_per_edge)
            .ok_or(TileAddressError::AtlasTooLarge)?;
        Ok(Self {
            tiles_per_edge,
            capacity,
        })
    }

    pub const fn tiles_per_edge(&self) -> u32 {
        self.tiles_per_edge
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn position_from_linear(&self, slot: TileSlot) -> Result<TilePosition, TileAddressError> {
        let index = slot.index();
        if index >= self.capacity {
            return Err(TileAddressError::SlotOutOfRange {
                slot: index,
                capacity: self.capacity,
            });
        }
        Ok(TilePosition::new(
            index % self.tiles_per_edge,
            index / self.tiles_per_edge,
        ))
    }

    pub fn linear_from_position(
        &self,
        position: TilePosition,
    ) -> Result<TileSlot, TileAddressError> {
        if position.x >= self.tiles_per_edge || position.y >= self.tiles_per_edge {
            return Err(TileAddressError::PositionOutOfRange {
                x: position.x,
                y: position.y,
                tiles_per_edge: self.tiles_per_edge,
            });
        }
        Ok(TileSlot::new(position.y * self.tiles_per_edge + position.x))
    }

    /// Top-left texel of `slot` for a layer whose tiles are `tile_edge` texels wide.
    pub fn texel_origin(
        &self,
        slot: TileSlot,
        tile_edge: u32,
    ) -> Result<[u32; 2], TileAddressError> {
        let position = self.position_from_linear(slot)?;
        let x = position
            .x
            .checked_mul(tile_edge)
            .ok_or(TileAddressError::AtlasTooLarge)?;
        let y = position
            .y
            .checked_mul(tile_edge)
            .ok_or(TileAddressError::AtlasTooLarge)?;
        Ok([x, y])
    }
}
