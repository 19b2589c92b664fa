use std::collections::{BTreeMap, HashSet};

use model::{LightmapId, Revision, TileCoordinate, VirtualTileCoordinate};
use scene::SceneRenderState;

use crate::{RequestBatcher, TileRequest};

/// LOD whose acceleration structure the frame renders with.
///
/// Full-speed frames take the most common LOD, lowest index on ties. Other frames rotate over every
/// LOD with pending requests, so each of them gets a frame within `count` frames.
pub fn select_lod(
    lods: impl IntoIterator<Item = u32>,
    most_common: bool,
    frame_number: u64,
) -> Option<u32> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for lod in lods {
        *counts.entry(lod).or_default() += 1;
    }
    if counts.is_empty() {
        return None;
    }
    if most_common {
        let mut best: Option<(u32, usize)> = None;
        for (lod, count) in &counts {
            if best.is_none_or(|(_, best_count)| *count > best_count) {
                best = Some((*lod, *count));
            }
        }
        return best.map(|(lod, _)| lod);
    }
    let candidates: Vec<u32> = counts.keys().copied().collect();
    Some(candidates[(frame_number % candidates.len() as u64) as usize])
}

/// Screen-output requests of the most recent frames, one ring entry per frame.
#[derive(Debug)]
pub struct VisibleTileHistory {
    frames: Vec<Vec<TileRequest>>,
}

impl VisibleTileHistory {
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "visible tile history needs at least one frame");
        Self {
            frames: vec![Vec::new(); frame_count],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn slot(&self, frame_number: u64) -> usize {
        let len = self.frames.len() as u64;
        ((frame_number + len - 1) % len) as usize
    }

    /// Replaces the entry of `frame_number` with its screen-output requests.
    pub fn record(&mut self, frame_number: u64, requests: &[TileRequest]) {
        let slot = self.slot(frame_number);
        let entry = &mut self.frames[slot];
        entry.clear();
        entry.extend(
            requests
                .iter()
                .filter(|request| request.is_screen_output())
                .map(|request| TileRequest::new(request.coordinate, &request.output_targets)),
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileRequest> + Clone {
        self.frames.iter().flatten()
    }

    pub fn clear(&mut self) {
        for frame in &mut self.frames {
            frame.clear();
        }
    }
}

/// Screen-output requests accumulated while recording is on.
#[derive(Debug, Default)]
pub struct RecordedTileRequests {
    requests: Vec<TileRequest>,
    coordinates: HashSet<VirtualTileCoordinate>,
}

impl RecordedTileRequests {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, coordinate: &VirtualTileCoordinate) -> bool {
        self.coordinates.contains(coordinate)
    }

    pub fn record(&mut self, request: &TileRequest) {
        if self.coordinates.insert(request.coordinate) {
            self.requests
                .push(TileRequest::new(request.coordinate, &request.output_targets));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileRequest> + Clone {
        self.requests.iter()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
        self.coordinates.clear();
    }

    /// Drops mip>0 tiles whose four children are all recorded. Returns how many were dropped.
    pub fn deduplicate(&mut self, scene: &SceneRenderState) -> usize {
        self.requests
            .sort_by(|a, b| b.coordinate.mip_level().cmp(&a.coordinate.mip_level()));
        let before = self.requests.len();
        let mut index = 0;
        while index < self.requests.len() {
            let coordinate = self.requests[index].coordinate;
            if self.children_recorded(scene, &coordinate) {
                self.coordinates.remove(&coordinate);
                self.requests.remove(index);
            } else {
                index += 1;
            }
        }
        before - self.requests.len()
    }

    fn children_recorded(
        &self,
        scene: &SceneRenderState,
        coordinate: &VirtualTileCoordinate,
    ) -> bool {
        let mip_level = coordinate.mip_level();
        if mip_level == 0 {
            return false;
        }
        let Some(lightmap) = scene.lightmap(coordinate.lightmap) else {
            return false;
        };
        let child_mip = mip_level - 1;
        let x = coordinate.position().x as i64 * 2;
        let y = coordinate.position().y as i64 * 2;
        [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
            .into_iter()
            .all(|(child_x, child_y)| {
                lightmap
                    .layout()
                    .clamp_position(child_mip, child_x, child_y)
                    .is_some_and(|position| {
                        self.contains(&VirtualTileCoordinate::new(
                            coordinate.lightmap,
                            TileCoordinate {
                                mip_level: child_mip,
                                position,
                            },
                        ))
                    })
            })
    }
}

fn needs_work(
    scene: &SceneRenderState,
    coordinate: &VirtualTileCoordinate,
    revision: Revision,
) -> bool {
    !scene.does_tile_have_valid_cpu_data(coordinate, revision)
        && !scene
            .tile_state(coordinate)
            .is_some_and(|state| state.has_readback_in_flight(revision))
}

/// Queues up to `budget` unfinished mip-0 tiles, walking Morton-sorted lightmaps from the highest
/// LOD down. Stops after the first LOD that produced work. Returns the names of the lightmaps
/// that received work.
pub fn generate_fixed_budget_work(
    scene: &mut SceneRenderState,
    revision: Revision,
    budget: usize,
    batcher: &mut RequestBatcher,
) -> Vec<String> {
    let mut selected = Vec::new();
    if budget == 0 {
        return selected;
    }
    let order: Vec<LightmapId> = scene.morton_sorted_lightmaps().to_vec();
    let Some(max_lod) = order
        .iter()
        .filter_map(|id| scene.lightmap(*id).map(|lightmap| lightmap.lod_index()))
        .max()
    else {
        return selected;
    };

    let mut generated = 0;
    for lod in (0..=max_lod).rev() {
        for id in &order {
            let Some(lightmap) = scene.lightmap(*id) else {
                continue;
            };
            if lightmap.lod_index() != lod {
                continue;
            }
            let Some(extent) = lightmap.layout().extent_at_mip(0) else {
                continue;
            };
            let mut any_work = false;
            'tiles: for y in 0..extent.height {
                for x in 0..extent.width {
                    let coordinate = VirtualTileCoordinate::new(*id, TileCoordinate::new(0, x, y));
                    if !needs_work(scene, &coordinate, revision) {
                        continue;
                    }
                    batcher.add(coordinate, &[]);
                    any_work = true;
                    generated += 1;
                    if generated >= budget {
                        break 'tiles;
                    }
                }
            }
            if any_work {
                selected.push(lightmap.name().to_owned());
            }
            if generated >= budget {
                break;
            }
        }
        if !selected.is_empty() {
            break;
        }
    }
    selected
}

/// Re-queues up to `budget` remembered visible tiles, highest LOD first, with their output
/// targets.
pub fn generate_visible_work<'a>(
    scene: &SceneRenderState,
    revision: Revision,
    budget: usize,
    remembered: impl Iterator<Item = &'a TileRequest> + Clone,
    batcher: &mut RequestBatcher,
) -> usize {
    let Some(max_lod) = remembered
        .clone()
        .filter_map(|request| scene.lightmap(request.coordinate.lightmap))
        .map(|lightmap| lightmap.lod_index())
        .max()
    else {
        return 0;
    };
    let mut generated = 0;
    for lod in (0..=max_lod).rev() {
        for request in remembered.clone() {
            if generated >= budget {
                return generated;
            }
            let Some(lightmap) = scene.lightmap(request.coordinate.lightmap) else {
                continue;
            };
            if lightmap.lod_index() != lod
                || !lightmap.layout().contains(request.coordinate.tile)
                || !needs_work(scene, &request.coordinate, revision)
            {
                continue;
            }
            batcher.add(request.coordinate, &request.output_targets);
            generated += 1;
        }
    }
    generated
}
