use std::fmt;
use std::io::Read;
use std::sync::Arc;

use denoise::{
    DENOISE_TILE_PROXIMITY, DenoiseError, DenoiseGroup, DenoisePipeline, DenoiseStatus,
    NeighborhoodImage, TileDenoiser,
};
use model::{Revision, TileCoordinate, TileGeometry, VirtualTileCoordinate};
use scene::SceneRenderState;
use serde::{Deserialize, Serialize};
use tiles::{
    RAY_GUIDING_LAYERS, SCRATCH_LAYERS, TileAddressError, TilePool, TilePoolConfig,
    WORKING_SET_LAYERS,
};

use crate::{BakeBackend, BakeSettings, ReadbackPipeline, SchedulerLimits, SettingsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSessionConfig {
    pub settings: BakeSettings,
    pub limits: SchedulerLimits,
    pub geometry: TileGeometry,
    pub working_set_tiles_per_edge: u32,
}

impl Default for BakeSessionConfig {
    fn default() -> Self {
        Self {
            settings: BakeSettings::default(),
            limits: SchedulerLimits::default(),
            geometry: TileGeometry::default(),
            working_set_tiles_per_edge: 64,
        }
    }
}

impl BakeSessionConfig {
    /// Reads a JSON config. Absent sections and fields keep their defaults; values are checked
    /// when the session is created.
    pub fn read_json(reader: &mut dyn Read) -> Result<Self, std::io::Error> {
        serde_json::from_reader(reader).map_err(|error| {
            std::io::Error::other(format!("parse bake session config JSON failed: {error}"))
        })
    }
}

#[derive(Debug)]
pub enum BakeSessionError {
    Settings(SettingsError),
    TilePool(TileAddressError),
    Denoise(DenoiseError),
}

impl fmt::Display for BakeSessionError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BakeSessionError::Settings(error) => {
                write!(formatter, "invalid bake settings: {error}")
            }
            BakeSessionError::TilePool(error) => {
                write!(formatter, "working set pool creation failed: {error}")
            }
            BakeSessionError::Denoise(error) => {
                write!(formatter, "denoise pipeline failed: {error}")
            }
        }
    }
}

impl std::error::Error for BakeSessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BakeSessionError::Settings(error) => Some(error),
            BakeSessionError::TilePool(error) => Some(error),
            BakeSessionError::Denoise(error) => Some(error),
        }
    }
}

impl From<SettingsError> for BakeSessionError {
    fn from(error: SettingsError) -> Self {
        BakeSessionError::Settings(error)
    }
}

impl From<TileAddressError> for BakeSessionError {
    fn from(error: TileAddressError) -> Self {
        BakeSessionError::TilePool(error)
    }
}

impl From<DenoiseError> for BakeSessionError {
    fn from(error: DenoiseError) -> Self {
        BakeSessionError::Denoise(error)
    }
}

/// Everything one bake owns: scene state, tile pools, in-flight readbacks and denoise jobs, the
/// global revision and the GPU collaborator.
pub struct BakeSession<B: BakeBackend> {
    pub(crate) settings: BakeSettings,
    pub(crate) limits: SchedulerLimits,
    pub(crate) geometry: TileGeometry,
    pub(crate) scene: SceneRenderState,
    pub(crate) working_set: TilePool<VirtualTileCoordinate>,
    pub(crate) scratch: TilePool<VirtualTileCoordinate>,
    pub(crate) readback: ReadbackPipeline<B::Readback>,
    pub(crate) denoise: DenoisePipeline,
    pub(crate) denoise_groups: Vec<DenoiseGroup>,
    pub(crate) revision: Revision,
    pub(crate) realtime_viewport: bool,
    pub(crate) backend: B,
}

impl<B: BakeBackend> BakeSession<B> {
    pub fn new(
        config: BakeSessionConfig,
        backend: B,
        denoiser: Arc<dyn TileDenoiser>,
    ) -> Result<Self, BakeSessionError> {
        config.settings.validate()?;
        config.limits.validate()?;
        let working_set_layers = if config.settings.use_first_bounce_ray_guiding {
            WORKING_SET_LAYERS + RAY_GUIDING_LAYERS
        } else {
            WORKING_SET_LAYERS
        };
        let working_set = TilePool::new(TilePoolConfig {
            tiles_per_edge: config.working_set_tiles_per_edge,
            layer_count: working_set_layers,
        })?;
        let scratch = TilePool::new(TilePoolConfig {
            tiles_per_edge: 1,
            layer_count: SCRATCH_LAYERS,
        })?;
        let denoise = DenoisePipeline::new(denoiser)?;
        log::debug!(
            "bake session created: working set {0}x{0} tiles, {1} accelerators",
            config.working_set_tiles_per_edge,
            config.settings.num_accelerators
        );
        Ok(Self {
            settings: config.settings,
            limits: config.limits,
            geometry: config.geometry,
            scene: SceneRenderState::new(),
            working_set,
            scratch,
            readback: ReadbackPipeline::new(config.limits.max_free_readback_groups),
            denoise,
            denoise_groups: Vec::new(),
            revision: Revision::default(),
            realtime_viewport: true,
            backend,
        })
    }

    pub const fn settings(&self) -> &BakeSettings {
        &self.settings
    }

    pub const fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    pub const fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    pub const fn scene(&self) -> &SceneRenderState {
        &self.scene
    }

    pub const fn revision(&self) -> Revision {
        self.revision
    }

    pub const fn working_set(&self) -> &TilePool<VirtualTileCoordinate> {
        &self.working_set
    }

    pub const fn scratch_pool(&self) -> &TilePool<VirtualTileCoordinate> {
        &self.scratch
    }

    pub const fn readback(&self) -> &ReadbackPipeline<B::Readback> {
        &self.readback
    }

    pub fn denoise_group_count(&self) -> usize {
        self.denoise_groups.len()
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub const fn is_realtime_viewport(&self) -> bool {
        self.realtime_viewport
    }

    /// A non-realtime viewport lets background ticks run in full-speed mode.
    pub fn set_realtime_viewport(&mut self, realtime: bool) {
        self.realtime_viewport = realtime;
    }

    /// Advances the revision and drops all GPU residency. Scheduler-side state is reset by
    /// [`crate::FrameScheduler::bump_revision`].
    pub(crate) fn advance_revision(&mut self) {
        self.revision = self.revision.next();
        self.working_set.unmap_all();
        self.scene.clear_morton_sorted_lightmaps();
        self.backend.invalidate_cached_scene();
        log::info!("bake revision bumped to {}", self.revision);
    }

    /// Settles every in-flight denoise group, storing finished tiles.
    pub(crate) fn process_denoise_groups(&mut self) {
        let groups = std::mem::take(&mut self.denoise_groups);
        for mut group in groups {
            match self.denoise.update(&mut group, self.revision) {
                DenoiseStatus::Pending => self.denoise_groups.push(group),
                DenoiseStatus::Stale | DenoiseStatus::Retracted | DenoiseStatus::Discarded => {
                    log::trace!("denoise group for {:?} settled without result", group.tile());
                }
                DenoiseStatus::Finished(image) => self.store_denoised(group.tile(), image),
            }
        }
    }

    fn store_denoised(&mut self, tile: VirtualTileCoordinate, image: model::TileImage) {
        let revision = self.revision;
        let Some(lightmap) = self.scene.lightmap_mut(tile.lightmap) else {
            return;
        };
        let Some(storage) = lightmap.tile_storage_mut(tile.tile) else {
            return;
        };
        storage.data = image;
        let state = lightmap
            .retrieve_tile_state(tile.tile)
            .expect("stored tile lies inside the lightmap");
        state.cpu_revision = Some(revision);
        state.ongoing_readback_revision = None;
    }

    /// Submits one denoise job per tile, cancelling older jobs for the same tile first.
    pub(crate) fn submit_denoise_jobs(&mut self, tiles: Vec<VirtualTileCoordinate>) {
        for tile in tiles {
            for group in &mut self.denoise_groups {
                if group.tile() == tile {
                    group.request_cancel();
                }
            }
            let Some((neighborhood, complete)) = self.gather_neighborhood(&tile) else {
                continue;
            };
            let group = self.denoise.submit(tile, self.revision, neighborhood);
            self.denoise_groups.push(group);
            if let Ok(state) = self.scene.retrieve_tile_state(&tile) {
                state.was_denoised_without_proximity = !complete;
            }
        }
    }

    /// 3x3 neighbourhood around `tile`, zero where a neighbour has no readback data yet.
    fn gather_neighborhood(
        &self,
        tile: &VirtualTileCoordinate,
    ) -> Option<(NeighborhoodImage, bool)> {
        let lightmap = self.scene.lightmap(tile.lightmap)?;
        let mut neighborhood = NeighborhoodImage::zeroed(self.geometry.virtual_edge);
        let mut complete = true;
        let radius = (DENOISE_TILE_PROXIMITY / 2) as i64;
        for cell_y in 0..DENOISE_TILE_PROXIMITY {
            for cell_x in 0..DENOISE_TILE_PROXIMITY {
                let position = lightmap.layout().clamp_position(
                    tile.mip_level(),
                    tile.position().x as i64 + cell_x as i64 - radius,
                    tile.position().y as i64 + cell_y as i64 - radius,
                )?;
                let neighbor = TileCoordinate {
                    mip_level: tile.mip_level(),
                    position,
                };
                let ready = lightmap
                    .tile_state(neighbor)
                    .is_some_and(|state| state.can_be_denoised);
                match lightmap.tile_storage(neighbor) {
                    Some(storage) if ready => {
                        neighborhood.write_tile(cell_x, cell_y, storage.denoise_source());
                    }
                    _ => complete = false,
                }
            }
        }
        Some((neighborhood, complete))
    }
}
