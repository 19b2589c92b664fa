use std::fmt;

use model::{LightCategory, LightId, LightmapId, Revision, TileCoordinate, VirtualTileCoordinate};
use slotmap::SlotMap;
use smallvec::SmallVec;

mod convergence;
mod layout;
mod lightmap;
mod morton;

pub use convergence::{
    LightSampleCount, RelevantLightSampleState, TileConvergenceTracker, TileState,
};
pub use layout::{LightmapTileLayout, MipTileExtent};
pub use lightmap::{LightmapDesc, LightmapRenderState, TileStorage};
pub use morton::morton_less;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneError {
    UnknownLightmap,
    UnknownLight,
    DirectionalLightInRelevantList,
    EmptyLightmap,
    LightmapTooLarge,
    TileOutOfRange { tile: TileCoordinate },
}

impl fmt::Display for SceneError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::UnknownLightmap => write!(formatter, "lightmap handle is no longer valid"),
            SceneError::UnknownLight => write!(formatter, "light handle is no longer valid"),
            SceneError::DirectionalLightInRelevantList => write!(
                formatter,
                "directional lights affect every lightmap and cannot be listed as relevant"
            ),
            SceneError::EmptyLightmap => write!(formatter, "lightmap has zero tiles"),
            SceneError::LightmapTooLarge => write!(formatter, "lightmap tile count overflows u32"),
            SceneError::TileOutOfRange { tile } => write!(
                formatter,
                "tile ({}, {}) at mip {} is outside the lightmap",
                tile.position.x, tile.position.y, tile.mip_level
            ),
        }
    }
}

impl std::error::Error for SceneError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationaryLight {
    pub category: LightCategory,
}

/// Every lightmap and stationary light taking part in the bake.
#[derive(Debug, Default)]
pub struct SceneRenderState {
    lightmaps: SlotMap<LightmapId, LightmapRenderState>,
    lights: SlotMap<LightId, StationaryLight>,
    morton_sorted_lightmaps: Vec<LightmapId>,
}

impl SceneRenderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_light(&mut self, category: LightCategory) -> LightId {
        self.lights.insert(StationaryLight { category })
    }

    pub fn remove_light(&mut self, light: LightId) -> Result<StationaryLight, SceneError> {
        let removed = self.lights.remove(light).ok_or(SceneError::UnknownLight)?;
        for (_, lightmap) in &mut self.lightmaps {
            lightmap.forget_light(light);
        }
        log::debug!("stationary {:?} light removed", removed.category);
        Ok(removed)
    }

    pub fn light(&self, light: LightId) -> Option<&StationaryLight> {
        self.lights.get(light)
    }

    pub fn add_lightmap(&mut self, desc: LightmapDesc) -> Result<LightmapId, SceneError> {
        for light in &desc.relevant_lights {
            let stationary = self.lights.get(*light).ok_or(SceneError::UnknownLight)?;
            if stationary.category == LightCategory::Directional {
                return Err(SceneError::DirectionalLightInRelevantList);
            }
        }
        let lightmap = LightmapRenderState::new(desc)?;
        let id = self.lightmaps.insert(lightmap);
        self.on_lightmap_set_changed();
        log::debug!(
            "lightmap {} added, {} lightmaps in scene",
            self.lightmaps[id].name(),
            self.lightmaps.len()
        );
        Ok(id)
    }

    pub fn remove_lightmap(&mut self, id: LightmapId) -> Result<LightmapRenderState, SceneError> {
        let removed = self.lightmaps.remove(id).ok_or(SceneError::UnknownLightmap)?;
        self.on_lightmap_set_changed();
        log::debug!("lightmap {} removed", removed.name());
        Ok(removed)
    }

    pub fn lightmap(&self, id: LightmapId) -> Option<&LightmapRenderState> {
        self.lightmaps.get(id)
    }

    pub fn lightmap_mut(&mut self, id: LightmapId) -> Option<&mut LightmapRenderState> {
        self.lightmaps.get_mut(id)
    }

    pub fn lightmaps(&self) -> impl Iterator<Item = (LightmapId, &LightmapRenderState)> {
        self.lightmaps.iter()
    }

    pub fn lightmap_count(&self) -> usize {
        self.lightmaps.len()
    }

    pub fn contains(&self, coordinate: &VirtualTileCoordinate) -> bool {
        self.lightmaps
            .get(coordinate.lightmap)
            .is_some_and(|lightmap| lightmap.layout().contains(coordinate.tile))
    }

    pub fn tile_state(&self, coordinate: &VirtualTileCoordinate) -> Option<&TileState> {
        self.lightmaps
            .get(coordinate.lightmap)?
            .tile_state(coordinate.tile)
    }

    pub fn retrieve_tile_state(
        &mut self,
        coordinate: &VirtualTileCoordinate,
    ) -> Result<&mut TileState, SceneError> {
        self.lightmaps
            .get_mut(coordinate.lightmap)
            .ok_or(SceneError::UnknownLightmap)?
            .retrieve_tile_state(coordinate.tile)
    }

    pub fn does_tile_have_valid_cpu_data(
        &self,
        coordinate: &VirtualTileCoordinate,
        revision: Revision,
    ) -> bool {
        self.lightmaps
            .get(coordinate.lightmap)
            .is_some_and(|lightmap| {
                lightmap.does_tile_have_valid_cpu_data(coordinate.tile, revision)
            })
    }

    /// Stationary lights whose shadows a tile of `lightmap` accumulates: every directional light,
    /// then the lightmap's own point, spot and rect lights.
    pub fn relevant_lights_for(
        &self,
        lightmap: LightmapId,
    ) -> Result<SmallVec<[(LightCategory, LightId); 8]>, SceneError> {
        let state = self.lightmaps.get(lightmap).ok_or(SceneError::UnknownLightmap)?;
        let mut lights: SmallVec<[(LightCategory, LightId); 8]> = self
            .lights
            .iter()
            .filter(|(_, light)| light.category == LightCategory::Directional)
            .map(|(id, light)| (light.category, id))
            .collect();
        for id in state.relevant_lights() {
            let light = self.lights.get(*id).ok_or(SceneError::UnknownLight)?;
            lights.push((light.category, *id));
        }
        Ok(lights)
    }

    /// Restarts a tile's accumulation for `revision`: GI passes, light sample counts and the
    /// revision stamp.
    pub fn reset_tile_for_revision(
        &mut self,
        coordinate: &VirtualTileCoordinate,
        revision: Revision,
    ) -> Result<(), SceneError> {
        let lights = self.relevant_lights_for(coordinate.lightmap)?;
        let state = self.retrieve_tile_state(coordinate)?;
        state.invalidate();
        state.lights.reset(lights);
        state.revision = Some(revision);
        Ok(())
    }

    /// Assigns every lightmap the running tile count of the lightmaps before it.
    pub fn calculate_distribution_prefix_sums(&mut self) {
        let mut prefix_sum = 0u32;
        for (_, lightmap) in &mut self.lightmaps {
            lightmap.set_distribution_prefix_sum(prefix_sum);
            prefix_sum = prefix_sum.wrapping_add(lightmap.layout().num_tiles_across_all_mips());
        }
    }

    /// Lightmaps in Z-order of their origins. Built on first use after a change.
    pub fn morton_sorted_lightmaps(&mut self) -> &[LightmapId] {
        if self.morton_sorted_lightmaps.is_empty() && !self.lightmaps.is_empty() {
            let mut entries: Vec<(LightmapId, [f32; 3])> = self
                .lightmaps
                .iter()
                .map(|(id, lightmap)| (id, lightmap.origin()))
                .collect();
            morton::sort_by_origin(&mut entries);
            self.morton_sorted_lightmaps = entries.into_iter().map(|(id, _)| id).collect();
        }
        &self.morton_sorted_lightmaps
    }

    pub fn clear_morton_sorted_lightmaps(&mut self) {
        self.morton_sorted_lightmaps.clear();
    }

    fn on_lightmap_set_changed(&mut self) {
        self.calculate_distribution_prefix_sums();
        self.clear_morton_sorted_lightmaps();
    }
}
