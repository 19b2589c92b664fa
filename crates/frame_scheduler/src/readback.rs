use std::task::Poll;

use model::{Revision, TILE_DATA_LAYERS, TileCoordinate, TileGeometry, VirtualTileCoordinate};
use scene::SceneRenderState;
use tiles::{TileAddressTranslator, TileSlot};

use crate::{BakeBackend, ReadbackTile, ReadbackTransfer, StagingImage, pool_edge_for};

/// One staging grid and the tiles it carries back for a single revision.
#[derive(Debug)]
struct ReadbackGroup<T> {
    accelerator: u32,
    translator: TileAddressTranslator,
    revision: Revision,
    tiles: Vec<VirtualTileCoordinate>,
    transfer: Option<T>,
}

impl<T> ReadbackGroup<T> {
    fn is_free(&self) -> bool {
        self.transfer.is_none()
    }

    fn release(&mut self) {
        self.tiles.clear();
        self.transfer = None;
    }
}

/// Pooled readback groups moving converged tiles from the working set into CPU storage.
#[derive(Debug)]
pub struct ReadbackPipeline<T> {
    groups: Vec<ReadbackGroup<T>>,
    max_free_groups: usize,
}

impl<T> ReadbackPipeline<T>
where
    T: ReadbackTransfer,
{
    pub fn new(max_free_groups: usize) -> Self {
        Self {
            groups: Vec::new(),
            max_free_groups,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn free_group_count(&self) -> usize {
        self.groups.iter().filter(|group| group.is_free()).count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.groups.len() - self.free_group_count()
    }

    /// Starts one readback of `tiles` on `accelerator`, reusing a free group whose staging grid
    /// is large enough.
    pub fn enqueue<B>(
        &mut self,
        backend: &mut B,
        accelerator: u32,
        revision: Revision,
        tiles: &[(VirtualTileCoordinate, TileSlot)],
    ) where
        B: BakeBackend<Readback = T>,
    {
        if tiles.is_empty() {
            return;
        }
        let pool_edge = pool_edge_for(tiles.len());
        let reusable = self.groups.iter().position(|group| {
            group.is_free()
                && group.accelerator == accelerator
                && group.translator.tiles_per_edge() >= pool_edge
        });
        let index = match reusable {
            Some(index) => {
                log::debug!("recycling readback group {index} for {} tiles", tiles.len());
                index
            }
            None => {
                let translator = TileAddressTranslator::new(pool_edge)
                    .expect("readback pool edge is positive and bounded by the tile count");
                log::debug!(
                    "creating readback group {pool_edge}x{pool_edge} on accelerator {accelerator}"
                );
                self.groups.push(ReadbackGroup {
                    accelerator,
                    translator,
                    revision,
                    tiles: Vec::new(),
                    transfer: None,
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];
        let readback_tiles: Vec<ReadbackTile> = tiles
            .iter()
            .enumerate()
            .map(|(slot, (coordinate, working_set))| ReadbackTile {
                coordinate: *coordinate,
                working_set: *working_set,
                readback_slot: TileSlot::new(slot as u32),
            })
            .collect();
        group.revision = revision;
        group.tiles = tiles.iter().map(|(coordinate, _)| *coordinate).collect();
        group.transfer = Some(backend.begin_readback(
            accelerator,
            group.translator.tiles_per_edge(),
            &readback_tiles,
        ));
    }

    /// Polls every in-flight group and copies finished tiles into CPU storage.
    ///
    /// Groups of an older revision are released without copying. Returns the tiles that should be
    /// denoised next when `interactive_denoise` is set.
    pub fn poll_and_complete(
        &mut self,
        scene: &mut SceneRenderState,
        current_revision: Revision,
        geometry: TileGeometry,
        interactive_denoise: bool,
    ) -> Vec<VirtualTileCoordinate> {
        let mut denoise_queue = Vec::new();
        for group in &mut self.groups {
            let Some(transfer) = group.transfer.as_mut() else {
                continue;
            };
            if group.revision != current_revision {
                log::debug!(
                    "dropping readback of {} tiles from revision {}",
                    group.tiles.len(),
                    group.revision
                );
                group.release();
                continue;
            }
            let Poll::Ready(staging) = transfer.poll() else {
                continue;
            };
            let pool_edge = group.translator.tiles_per_edge();
            assert_eq!(
                staging.edge,
                pool_edge * geometry.physical_edge(),
                "staging image does not match readback group"
            );
            for (slot, coordinate) in group.tiles.iter().enumerate() {
                let origin = group
                    .translator
                    .texel_origin(TileSlot::new(slot as u32), geometry.physical_edge())
                    .expect("readback slot inside its group");
                store_tile(
                    scene,
                    coordinate,
                    &staging,
                    origin,
                    geometry,
                    current_revision,
                    interactive_denoise,
                    &mut denoise_queue,
                );
            }
            log::debug!("completed readback of {} tiles", group.tiles.len());
            group.release();
        }
        denoise_queue
    }

    /// Drops free groups beyond the retention limit, oldest first.
    pub fn trim_free_groups(&mut self) {
        let mut excess = self.free_group_count().saturating_sub(self.max_free_groups);
        if excess == 0 {
            return;
        }
        log::debug!("trimming {excess} free readback groups");
        self.groups.retain(|group| {
            if excess > 0 && group.is_free() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn store_tile(
    scene: &mut SceneRenderState,
    coordinate: &VirtualTileCoordinate,
    staging: &StagingImage,
    origin: [u32; 2],
    geometry: TileGeometry,
    revision: Revision,
    interactive_denoise: bool,
    denoise_queue: &mut Vec<VirtualTileCoordinate>,
) {
    let Some(lightmap) = scene.lightmap_mut(coordinate.lightmap) else {
        return;
    };
    let Ok(storage) = lightmap.tile_storage_or_insert(coordinate.tile, geometry.virtual_edge) else {
        return;
    };
    for layer in 0..TILE_DATA_LAYERS {
        let destination = storage.data.layer_mut(layer);
        for y in 0..geometry.virtual_edge {
            for x in 0..geometry.virtual_edge {
                destination[(y * geometry.virtual_edge + x) as usize] = staging.texel(
                    layer,
                    origin[0] + geometry.border + x,
                    origin[1] + geometry.border + y,
                );
            }
        }
    }
    if interactive_denoise {
        storage.raw_data = Some(storage.data.clone());
    }

    let state = lightmap
        .retrieve_tile_state(coordinate.tile)
        .expect("stored tile lies inside the lightmap");
    state.can_be_denoised = true;
    if !interactive_denoise {
        state.cpu_revision = Some(revision);
        state.ongoing_readback_revision = None;
        return;
    }

    push_unique(denoise_queue, *coordinate);
    // Neighbours denoised before this tile existed get another pass with the full neighbourhood.
    let mip_level = coordinate.tile.mip_level;
    let position = coordinate.tile.position;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let Some(neighbor) = lightmap.layout().clamp_position(
                mip_level,
                position.x as i64 + dx,
                position.y as i64 + dy,
            ) else {
                continue;
            };
            let tile = TileCoordinate {
                mip_level,
                position: neighbor,
            };
            let needs_redenoise = lightmap
                .tile_state(tile)
                .is_some_and(|state| state.was_denoised_without_proximity);
            if !needs_redenoise {
                continue;
            }
            let state = lightmap
                .retrieve_tile_state(tile)
                .expect("clamped neighbour lies inside the lightmap");
            state.cpu_revision = None;
            state.ongoing_readback_revision = Some(revision);
            push_unique(
                denoise_queue,
                VirtualTileCoordinate::new(coordinate.lightmap, tile),
            );
        }
    }
}

fn push_unique(queue: &mut Vec<VirtualTileCoordinate>, coordinate: VirtualTileCoordinate) {
    if !queue.contains(&coordinate) {
        queue.push(coordinate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingBackend, staging_texel};
    use scene::LightmapDesc;

    const GEOMETRY: TileGeometry = TileGeometry {
        virtual_edge: 2,
        border: 1,
    };

    fn scene_with_lightmap() -> (SceneRenderState, model::LightmapId) {
        let mut scene = SceneRenderState::new();
        let lightmap = scene
            .add_lightmap(LightmapDesc {
                name: "Lightmap_Floor".to_owned(),
                width_in_tiles: 4,
                height_in_tiles: 4,
                lod_index: 0,
                origin: [0.0; 3],
                relevant_lights: Vec::new(),
            })
            .expect("add lightmap");
        (scene, lightmap)
    }

    fn readback_tiles(
        lightmap: model::LightmapId,
        count: u32,
    ) -> Vec<(VirtualTileCoordinate, TileSlot)> {
        (0..count)
            .map(|x| {
                (
                    VirtualTileCoordinate::new(lightmap, TileCoordinate::new(0, x, 0)),
                    TileSlot::new(x),
                )
            })
            .collect()
    }

    #[test]
    fn completed_readback_copies_tile_interiors() {
        let (mut scene, lightmap) = scene_with_lightmap();
        let mut backend = RecordingBackend::new(GEOMETRY);
        backend.readback_polls_before_ready = 1;
        let mut pipeline = ReadbackPipeline::new(100);
        let revision = Revision::new(1);
        pipeline.enqueue(&mut backend, 0, revision, &readback_tiles(lightmap, 3));
        assert_eq!(pipeline.in_flight_count(), 1);

        assert!(pipeline
            .poll_and_complete(&mut scene, revision, GEOMETRY, false)
            .is_empty());
        let coordinate = VirtualTileCoordinate::new(lightmap, TileCoordinate::new(0, 2, 0));
        assert!(!scene.does_tile_have_valid_cpu_data(&coordinate, revision));

        pipeline.poll_and_complete(&mut scene, revision, GEOMETRY, false);
        assert!(scene.does_tile_have_valid_cpu_data(&coordinate, revision));
        let storage = scene
            .lightmap(lightmap)
            .and_then(|lightmap| lightmap.tile_storage(coordinate.tile))
            .expect("stored tile");
        assert_eq!(storage.data.texel(3, 1, 0), staging_texel(2, 1, 0, 3));
        assert_eq!(pipeline.free_group_count(), 1);
    }

    #[test]
    fn stale_group_is_recycled_without_copying() {
        let (mut scene, lightmap) = scene_with_lightmap();
        let mut backend = RecordingBackend::new(GEOMETRY);
        let mut pipeline = ReadbackPipeline::new(100);
        pipeline.enqueue(&mut backend, 0, Revision::new(1), &readback_tiles(lightmap, 4));

        pipeline.poll_and_complete(&mut scene, Revision::new(2), GEOMETRY, false);
        assert_eq!(pipeline.free_group_count(), 1);
        assert_eq!(
            scene
                .lightmap(lightmap)
                .expect("lightmap")
                .stored_tile_count(),
            0
        );

        pipeline.enqueue(&mut backend, 0, Revision::new(2), &readback_tiles(lightmap, 2));
        assert_eq!(pipeline.group_count(), 1);
        pipeline.enqueue(&mut backend, 1, Revision::new(2), &readback_tiles(lightmap, 2));
        assert_eq!(pipeline.group_count(), 2);
    }

    #[test]
    fn interactive_readback_queues_tile_and_stale_neighbours_for_denoise() {
        let (mut scene, lightmap) = scene_with_lightmap();
        let neighbor = VirtualTileCoordinate::new(lightmap, TileCoordinate::new(0, 1, 1));
        let revision = Revision::new(1);
        {
            let state = scene.retrieve_tile_state(&neighbor).expect("neighbour state");
            state.was_denoised_without_proximity = true;
            state.cpu_revision = Some(revision);
        }
        let mut backend = RecordingBackend::new(GEOMETRY);
        let mut pipeline = ReadbackPipeline::new(100);
        pipeline.enqueue(&mut backend, 0, revision, &readback_tiles(lightmap, 1));

        let queued = pipeline.poll_and_complete(&mut scene, revision, GEOMETRY, true);
        let read = VirtualTileCoordinate::new(lightmap, TileCoordinate::new(0, 0, 0));
        assert_eq!(queued, vec![read, neighbor]);
        let state = scene.tile_state(&neighbor).expect("neighbour state");
        assert_eq!(state.cpu_revision, None);
        assert_eq!(state.ongoing_readback_revision, Some(revision));
        let storage = scene
            .lightmap(lightmap)
            .and_then(|lightmap| lightmap.tile_storage(read.tile))
            .expect("stored tile");
        assert_eq!(storage.raw_data.as_ref(), Some(&storage.data));
        assert!(!scene.does_tile_have_valid_cpu_data(&read, revision));
    }

    #[test]
    fn trimming_keeps_the_newest_free_groups() {
        let (mut scene, lightmap) = scene_with_lightmap();
        let mut backend = RecordingBackend::new(GEOMETRY);
        let mut pipeline = ReadbackPipeline::new(1);
        for accelerator in 0..3 {
            pipeline.enqueue(
                &mut backend,
                accelerator,
                Revision::new(1),
                &readback_tiles(lightmap, 1),
            );
        }
        pipeline.poll_and_complete(&mut scene, Revision::new(2), GEOMETRY, false);
        pipeline.trim_free_groups();
        assert_eq!(pipeline.group_count(), 1);
        assert_eq!(pipeline.groups[0].accelerator, 2);
    }
}
