use std::collections::HashMap;

use model::{LightId, Revision, TileCoordinate, TileImage};

use crate::{LightmapTileLayout, SceneError, TileConvergenceTracker, TileState};

#[derive(Debug, Clone, PartialEq)]
pub struct LightmapDesc {
    pub name: String,
    pub width_in_tiles: u32,
    pub height_in_tiles: u32,
    pub lod_index: u32,
    pub origin: [f32; 3],
    /// Stationary point, spot and rect lights affecting this lightmap. Directional lights affect
    /// every lightmap and are not listed.
    pub relevant_lights: Vec<LightId>,
}

/// CPU-resident copy of a retired tile. `raw_data` keeps the undenoised result while interactive
/// denoising is on.
#[derive(Debug, Clone, PartialEq)]
pub struct TileStorage {
    pub data: TileImage,
    pub raw_data: Option<TileImage>,
}

impl TileStorage {
    pub fn zeroed(edge: u32) -> Self {
        Self {
            data: TileImage::zeroed(edge),
            raw_data: None,
        }
    }

    /// Image the denoiser should read for this tile.
    pub fn denoise_source(&self) -> &TileImage {
        self.raw_data.as_ref().unwrap_or(&self.data)
    }
}

/// Persistent render state of one lightmap: tile convergence and retired CPU tiles.
#[derive(Debug, Clone)]
pub struct LightmapRenderState {
    name: String,
    lod_index: u32,
    origin: [f32; 3],
    relevant_lights: Vec<LightId>,
    layout: LightmapTileLayout,
    distribution_prefix_sum: u32,
    tracker: TileConvergenceTracker,
    storage: HashMap<TileCoordinate, TileStorage>,
}

impl LightmapRenderState {
    pub fn new(desc: LightmapDesc) -> Result<Self, SceneError> {
        let layout = LightmapTileLayout::new(desc.width_in_tiles, desc.height_in_tiles)?;
        let tracker = TileConvergenceTracker::new(layout.num_tiles_across_all_mips());
        Ok(Self {
            name: desc.name,
            lod_index: desc.lod_index,
            origin: desc.origin,
            relevant_lights: desc.relevant_lights,
            layout,
            distribution_prefix_sum: 0,
            tracker,
            storage: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn lod_index(&self) -> u32 {
        self.lod_index
    }

    pub const fn origin(&self) -> [f32; 3] {
        self.origin
    }

    pub fn relevant_lights(&self) -> &[LightId] {
        &self.relevant_lights
    }

    pub(crate) fn forget_light(&mut self, light: LightId) {
        self.relevant_lights.retain(|relevant| *relevant != light);
    }

    pub const fn layout(&self) -> &LightmapTileLayout {
        &self.layout
    }

    pub const fn distribution_prefix_sum(&self) -> u32 {
        self.distribution_prefix_sum
    }

    pub(crate) fn set_distribution_prefix_sum(&mut self, prefix_sum: u32) {
        self.distribution_prefix_sum = prefix_sum;
    }

    pub fn tile_state_index(&self, tile: TileCoordinate) -> Result<u32, SceneError> {
        self.layout.tile_state_index(tile)
    }

    pub fn tile_state(&self, tile: TileCoordinate) -> Option<&TileState> {
        let index = self.layout.tile_state_index(tile).ok()?;
        self.tracker.get(index)
    }

    pub fn retrieve_tile_state(
        &mut self,
        tile: TileCoordinate,
    ) -> Result<&mut TileState, SceneError> {
        let index = self.layout.tile_state_index(tile)?;
        Ok(self.tracker.retrieve(index))
    }

    pub const fn tracker(&self) -> &TileConvergenceTracker {
        &self.tracker
    }

    pub fn does_tile_have_valid_cpu_data(&self, tile: TileCoordinate, revision: Revision) -> bool {
        self.tile_state(tile)
            .is_some_and(|state| state.has_cpu_data_for(revision))
            && self.storage.contains_key(&tile)
    }

    pub fn tile_storage(&self, tile: TileCoordinate) -> Option<&TileStorage> {
        self.storage.get(&tile)
    }

    pub fn tile_storage_mut(&mut self, tile: TileCoordinate) -> Option<&mut TileStorage> {
        self.storage.get_mut(&tile)
    }

    /// Storage for `tile`, created zero-filled with `edge` texels per side on first use.
    pub fn tile_storage_or_insert(
        &mut self,
        tile: TileCoordinate,
        edge: u32,
    ) -> Result<&mut TileStorage, SceneError> {
        if !self.layout.contains(tile) {
            return Err(SceneError::TileOutOfRange { tile });
        }
        Ok(self
            .storage
            .entry(tile)
            .or_insert_with(|| TileStorage::zeroed(edge)))
    }

    pub fn stored_tile_count(&self) -> usize {
        self.storage.len()
    }
}
