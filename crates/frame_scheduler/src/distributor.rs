use model::VirtualTileCoordinate;
use scene::SceneRenderState;

/// Spreads tiles over accelerators by their scene-wide tile index.
///
/// The index is the lightmap's distribution prefix sum plus the tile-state index, so neighbouring
/// tiles land on different accelerators and the assignment of a tile never changes while the
/// lightmap set is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiAcceleratorDistributor {
    num_accelerators: u32,
}

impl MultiAcceleratorDistributor {
    pub fn new(num_accelerators: u32) -> Self {
        assert!(num_accelerators > 0, "distributor needs at least one accelerator");
        Self { num_accelerators }
    }

    pub const fn num_accelerators(&self) -> u32 {
        self.num_accelerators
    }

    pub fn assign(&self, distribution_prefix_sum: u32, tile_state_index: u32) -> u32 {
        distribution_prefix_sum.wrapping_add(tile_state_index) % self.num_accelerators
    }

    /// `None` when the tile no longer belongs to a live lightmap.
    pub fn assign_tile(
        &self,
        scene: &SceneRenderState,
        coordinate: &VirtualTileCoordinate,
    ) -> Option<u32> {
        let lightmap = scene.lightmap(coordinate.lightmap)?;
        let index = lightmap.tile_state_index(coordinate.tile).ok()?;
        Some(self.assign(lightmap.distribution_prefix_sum(), index))
    }
}
