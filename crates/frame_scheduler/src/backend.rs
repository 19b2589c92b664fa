use std::ops::Range;
use std::task::Poll;

use bytemuck::{Pod, Zeroable};
use model::{
    LightCategory, LightId, MAX_OUTPUT_TARGETS, TILE_DATA_LAYERS, Texel, TileImage,
    VirtualTileCoordinate,
};
use static_assertions::const_assert_eq;
use tiles::TileSlot;

use crate::OutputTarget;

/// Output position written for layers a tile does not target.
pub const NO_OUTPUT_POSITION: [u32; 2] = [u32::MAX; 2];

/// Per-tile record consumed by the GI, shadow, raster and compose passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuTileDescription {
    /// Lightmap extent in tiles at the tile's mip level.
    pub lightmap_size: [u32; 2],
    pub virtual_tile_position: [u32; 2],
    pub working_set_position: [u32; 2],
    pub scratch_position: [u32; 2],
    pub output_layer_positions: [[u32; 2]; MAX_OUTPUT_TARGETS],
    pub frame_index: u32,
    pub render_pass_index: u32,
    pub mip_level: u32,
    pub _padding: [u32; 3],
}

const_assert_eq!(std::mem::size_of::<GpuTileDescription>() % 16, 0);

/// Readback staging image covering a whole readback group, borders included.
///
/// Row pitch equals `edge`.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingImage {
    pub edge: u32,
    pub layers: [Vec<Texel>; TILE_DATA_LAYERS],
}

impl StagingImage {
    pub fn zeroed(edge: u32) -> Self {
        let texels = edge as usize * edge as usize;
        Self {
            edge,
            layers: std::array::from_fn(|_| vec![[0.0; 4]; texels]),
        }
    }

    pub fn texel(&self, layer: usize, x: u32, y: u32) -> Texel {
        self.layers[layer][y as usize * self.edge as usize + x as usize]
    }
}

/// Asynchronous GPU-to-CPU copy started by [`BakeBackend::begin_readback`].
pub trait ReadbackTransfer {
    fn poll(&mut self) -> Poll<StagingImage>;
}

#[derive(Debug, Clone, Copy)]
pub struct TileUpload<'a> {
    pub coordinate: VirtualTileCoordinate,
    /// Slot in the transient upload pool.
    pub upload_slot: TileSlot,
    pub working_set: Option<TileSlot>,
    pub image: &'a TileImage,
    pub output_targets: &'a [OutputTarget],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackTile {
    pub coordinate: VirtualTileCoordinate,
    pub working_set: TileSlot,
    /// Slot in the readback group's staging grid.
    pub readback_slot: TileSlot,
}

/// GPU-side collaborator driven by the frame scheduler.
///
/// Every call is recorded into the backend's command stream; nothing is expected to execute before
/// [`BakeBackend::flush`] or the host's own frame submission.
pub trait BakeBackend {
    type Readback: ReadbackTransfer;

    /// Shader pipelines still compiling. The scheduler skips frames meanwhile.
    fn is_compiling(&self) -> bool;

    /// Builds or reuses the acceleration structure for `lod_index`. `false` skips the frame.
    fn setup_scene(&mut self, lod_index: u32) -> bool;

    /// Drops the cached acceleration structures after a scene edit.
    fn invalidate_cached_scene(&mut self) {}

    /// Copies CPU tiles into a transient upload pool of `pool_edge` x `pool_edge` slots, then into
    /// their output targets.
    fn upload_tiles(&mut self, pool_edge: u32, uploads: &[TileUpload<'_>]);

    fn clear_working_set(&mut self, slots: &[TileSlot]);

    /// Clears the scratch slots of `tiles` and re-rasterizes their G-buffers.
    fn rasterize_gbuffer(&mut self, accelerator: u32, tiles: &[GpuTileDescription]);

    fn dispatch_gi(&mut self, accelerator: u32, tiles: &[GpuTileDescription]);

    fn dispatch_shadow(
        &mut self,
        accelerator: u32,
        category: LightCategory,
        light: LightId,
        tiles: &[GpuTileDescription],
    );

    /// Copies working-set `layers` of `slots` from `accelerator` to accelerator 0.
    fn transfer_to_primary(&mut self, accelerator: u32, slots: &[TileSlot], layers: Range<u32>);

    fn compose_output(&mut self, layer: u32, show_progress: bool, tiles: &[GpuTileDescription]);

    /// Copies `tiles` into a `pool_edge` x `pool_edge` staging grid and starts the transfer.
    fn begin_readback(
        &mut self,
        accelerator: u32,
        pool_edge: u32,
        tiles: &[ReadbackTile],
    ) -> Self::Readback;

    fn flush(&mut self);
}
