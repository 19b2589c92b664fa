//! Software [`BakeBackend`] recording every call, for tests of the scheduler and its hosts.

use std::collections::HashMap;
use std::ops::Range;
use std::task::Poll;

use model::{
    LightCategory, LightId, TILE_DATA_LAYERS, Texel, TileGeometry, TileImage, TilePosition,
    VirtualTileCoordinate,
};
use tiles::{TileAddressTranslator, TileSlot};

use crate::{
    BakeBackend, GpuTileDescription, ReadbackTile, ReadbackTransfer, StagingImage, TileUpload,
};

/// Texel a [`RecordingBackend`] readback reports at interior texel (`x`, `y`) of `layer` for the
/// tile in `readback_slot`.
pub fn staging_texel(readback_slot: u32, x: u32, y: u32, layer: usize) -> Texel {
    [readback_slot as f32, x as f32, y as f32, layer as f32]
}

/// Texel written into tile borders of staging images.
pub const BORDER_TEXEL: Texel = [-1.0; 4];

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SetupScene { lod_index: u32 },
    InvalidateCachedScene,
    UploadTiles { pool_edge: u32, tiles: Vec<VirtualTileCoordinate> },
    ClearWorkingSet { slots: Vec<TileSlot> },
    RasterizeGBuffer { accelerator: u32, tiles: Vec<GpuTileDescription> },
    DispatchGi { accelerator: u32, tiles: Vec<GpuTileDescription> },
    DispatchShadow {
        accelerator: u32,
        category: LightCategory,
        light: LightId,
        tiles: Vec<GpuTileDescription>,
    },
    TransferToPrimary { accelerator: u32, slots: Vec<TileSlot>, layers: Range<u32> },
    ComposeOutput { layer: u32, show_progress: bool, tiles: Vec<GpuTileDescription> },
    BeginReadback { accelerator: u32, pool_edge: u32, tiles: Vec<ReadbackTile> },
    Flush,
}

#[derive(Debug)]
pub struct RecordingReadback {
    polls_remaining: u32,
    staging: Option<StagingImage>,
}

impl ReadbackTransfer for RecordingReadback {
    fn poll(&mut self) -> Poll<StagingImage> {
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
            return Poll::Pending;
        }
        Poll::Ready(
            self.staging
                .take()
                .expect("recording readback polled after completion"),
        )
    }
}

#[derive(Debug)]
pub struct RecordingBackend {
    pub calls: Vec<BackendCall>,
    pub compiling: bool,
    pub scene_ready: bool,
    /// `Pending` polls every readback reports before its staging image is ready.
    pub readback_polls_before_ready: u32,
    /// Images written to output layers by uploads, keyed by layer and physical tile position.
    pub output_tiles: HashMap<(u32, TilePosition), TileImage>,
    geometry: TileGeometry,
}

impl RecordingBackend {
    pub fn new(geometry: TileGeometry) -> Self {
        Self {
            calls: Vec::new(),
            compiling: false,
            scene_ready: true,
            readback_polls_before_ready: 0,
            output_tiles: HashMap::new(),
            geometry,
        }
    }

    pub fn calls_matching(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn gi_dispatches(&self) -> impl Iterator<Item = (u32, &[GpuTileDescription])> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::DispatchGi { accelerator, tiles } => {
                Some((*accelerator, tiles.as_slice()))
            }
            _ => None,
        })
    }

    pub fn shadow_dispatches(&self) -> impl Iterator<Item = (LightId, &[GpuTileDescription])> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::DispatchShadow { light, tiles, .. } => Some((*light, tiles.as_slice())),
            _ => None,
        })
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl BakeBackend for RecordingBackend {
    type Readback = RecordingReadback;

    fn is_compiling(&self) -> bool {
        self.compiling
    }

    fn setup_scene(&mut self, lod_index: u32) -> bool {
        self.calls.push(BackendCall::SetupScene { lod_index });
        self.scene_ready
    }

    fn invalidate_cached_scene(&mut self) {
        self.calls.push(BackendCall::InvalidateCachedScene);
    }

    fn upload_tiles(&mut self, pool_edge: u32, uploads: &[TileUpload<'_>]) {
        for upload in uploads {
            for target in upload.output_targets {
                self.output_tiles
                    .insert((target.layer, target.position), upload.image.clone());
            }
        }
        self.calls.push(BackendCall::UploadTiles {
            pool_edge,
            tiles: uploads.iter().map(|upload| upload.coordinate).collect(),
        });
    }

    fn clear_working_set(&mut self, slots: &[TileSlot]) {
        self.calls.push(BackendCall::ClearWorkingSet {
            slots: slots.to_vec(),
        });
    }

    fn rasterize_gbuffer(&mut self, accelerator: u32, tiles: &[GpuTileDescription]) {
        self.calls.push(BackendCall::RasterizeGBuffer {
            accelerator,
            tiles: tiles.to_vec(),
        });
    }

    fn dispatch_gi(&mut self, accelerator: u32, tiles: &[GpuTileDescription]) {
        self.calls.push(BackendCall::DispatchGi {
            accelerator,
            tiles: tiles.to_vec(),
        });
    }

    fn dispatch_shadow(
        &mut self,
        accelerator: u32,
        category: LightCategory,
        light: LightId,
        tiles: &[GpuTileDescription],
    ) {
        self.calls.push(BackendCall::DispatchShadow {
            accelerator,
            category,
            light,
            tiles: tiles.to_vec(),
        });
    }

    fn transfer_to_primary(&mut self, accelerator: u32, slots: &[TileSlot], layers: Range<u32>) {
        self.calls.push(BackendCall::TransferToPrimary {
            accelerator,
            slots: slots.to_vec(),
            layers,
        });
    }

    fn compose_output(&mut self, layer: u32, show_progress: bool, tiles: &[GpuTileDescription]) {
        self.calls.push(BackendCall::ComposeOutput {
            layer,
            show_progress,
            tiles: tiles.to_vec(),
        });
    }

    fn begin_readback(
        &mut self,
        accelerator: u32,
        pool_edge: u32,
        tiles: &[ReadbackTile],
    ) -> RecordingReadback {
        let physical_edge = self.geometry.physical_edge();
        let translator =
            TileAddressTranslator::new(pool_edge).expect("readback pool edge is positive");
        let mut staging = StagingImage::zeroed(pool_edge * physical_edge);
        for layer in &mut staging.layers {
            layer.fill(BORDER_TEXEL);
        }
        for tile in tiles {
            let origin = translator
                .texel_origin(tile.readback_slot, physical_edge)
                .expect("readback slot inside staging grid");
            for layer in 0..TILE_DATA_LAYERS {
                for y in 0..self.geometry.virtual_edge {
                    for x in 0..self.geometry.virtual_edge {
                        let staging_x = origin[0] + self.geometry.border + x;
                        let staging_y = origin[1] + self.geometry.border + y;
                        staging.layers[layer]
                            [(staging_y * staging.edge + staging_x) as usize] =
                            staging_texel(tile.readback_slot.index(), x, y, layer);
                    }
                }
            }
        }
        self.calls.push(BackendCall::BeginReadback {
            accelerator,
            pool_edge,
            tiles: tiles.to_vec(),
        });
        RecordingReadback {
            polls_remaining: self.readback_polls_before_ready,
            staging: Some(staging),
        }
    }

    fn flush(&mut self) {
        self.calls.push(BackendCall::Flush);
    }
}
