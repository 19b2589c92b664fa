use model::{TileCoordinate, TilePosition};

use crate::SceneError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipTileExtent {
    pub width: u32,
    pub height: u32,
    first_index: u32,
}

/// Padded tile grid of a lightmap across its whole mip chain.
///
/// Every tile of every mip has a dense index; mip 0 tiles come first in row-major order, followed
/// by each coarser mip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightmapTileLayout {
    mips: Vec<MipTileExtent>,
    total_tiles: u32,
}

impl LightmapTileLayout {
    pub fn new(width_in_tiles: u32, height_in_tiles: u32) -> Result<Self, SceneError> {
        if width_in_tiles == 0 || height_in_tiles == 0 {
            return Err(SceneError::EmptyLightmap);
        }
        let mut mips = Vec::new();
        let mut total_tiles = 0u32;
        let mut width = width_in_tiles;
        let mut height = height_in_tiles;
        loop {
            mips.push(MipTileExtent {
                width,
                height,
                first_index: total_tiles,
            });
            total_tiles = width
                .checked_mul(height)
                .and_then(|count| total_tiles.checked_add(count))
                .ok_or(SceneError::LightmapTooLarge)?;
            if width == 1 && height == 1 {
                break;
            }
            width = width.div_ceil(2);
            height = height.div_ceil(2);
        }
        Ok(Self { mips, total_tiles })
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn extent_at_mip(&self, mip_level: u32) -> Option<MipTileExtent> {
        self.mips.get(mip_level as usize).copied()
    }

    pub fn num_tiles_across_all_mips(&self) -> u32 {
        self.total_tiles
    }

    pub fn contains(&self, tile: TileCoordinate) -> bool {
        self.extent_at_mip(tile.mip_level).is_some_and(|extent| {
            tile.position.x < extent.width && tile.position.y < extent.height
        })
    }

    pub fn tile_state_index(&self, tile: TileCoordinate) -> Result<u32, SceneError> {
        let extent = self
            .extent_at_mip(tile.mip_level)
            .filter(|extent| tile.position.x < extent.width && tile.position.y < extent.height)
            .ok_or(SceneError::TileOutOfRange { tile })?;
        Ok(extent.first_index + tile.position.y * extent.width + tile.position.x)
    }

    /// Clamps a possibly negative tile position into the grid of `mip_level`.
    pub fn clamp_position(&self, mip_level: u32, x: i64, y: i64) -> Option<TilePosition> {
        let extent = self.extent_at_mip(mip_level)?;
        Some(TilePosition::new(
            x.clamp(0, extent.width as i64 - 1) as u32,
            y.clamp(0, extent.height as i64 - 1) as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_halves_rounding_up_until_single_tile() {
        let layout = LightmapTileLayout::new(5, 3).expect("create layout");
        let extents: Vec<(u32, u32)> = (0..layout.mip_count())
            .map(|mip| {
                let extent = layout.extent_at_mip(mip).expect("mip extent");
                (extent.width, extent.height)
            })
            .collect();
        assert_eq!(extents, vec![(5, 3), (3, 2), (2, 1), (1, 1)]);
        assert_eq!(layout.num_tiles_across_all_mips(), 15 + 6 + 2 + 1);
    }

    #[test]
    fn tile_state_indices_are_dense_and_unique() {
        let layout = LightmapTileLayout::new(4, 4).expect("create layout");
        let mut seen = Vec::new();
        for mip in 0..layout.mip_count() {
            let extent = layout.extent_at_mip(mip).expect("mip extent");
            for y in 0..extent.height {
                for x in 0..extent.width {
                    seen.push(
                        layout
                            .tile_state_index(TileCoordinate::new(mip, x, y))
                            .expect("tile index"),
                    );
                }
            }
        }
        let expected: Vec<u32> = (0..layout.num_tiles_across_all_mips()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn out_of_range_tiles_are_rejected() {
        let layout = LightmapTileLayout::new(2, 2).expect("create layout");
        let tile = TileCoordinate::new(1, 1, 0);
        assert_eq!(
            layout.tile_state_index(tile),
            Err(SceneError::TileOutOfRange { tile })
        );
        assert!(!layout.contains(TileCoordinate::new(2, 0, 0)));
        assert_eq!(
            LightmapTileLayout::new(0, 3),
            Err(SceneError::EmptyLightmap)
        );
    }

    #[test]
    fn clamp_position_stays_inside_mip() {
        let layout = LightmapTileLayout::new(3, 2).expect("create layout");
        assert_eq!(
            layout.clamp_position(0, -1, 5),
            Some(TilePosition::new(0, 1))
        );
        assert_eq!(layout.clamp_position(1, 4, 0), Some(TilePosition::new(1, 0)));
        assert_eq!(layout.clamp_position(9, 0, 0), None);
    }
}
