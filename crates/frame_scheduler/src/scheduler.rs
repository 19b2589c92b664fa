use std::collections::BTreeMap;

use model::{LightCategory, LightId, LightmapId, MAX_OUTPUT_TARGETS, VirtualTileCoordinate};
use scene::{LightmapDesc, LightmapRenderState, SceneError};
use tiles::{
    RAY_GUIDING_LAYERS, SCRATCH_LAYERS, TilePool, TilePoolConfig, TileSlot, WORKING_SET_LAYERS,
};

use crate::work_selection::{
    RecordedTileRequests, VisibleTileHistory, generate_fixed_budget_work, generate_visible_work,
    select_lod,
};
use crate::{
    BakeBackend, BakeSession, FrameReport, FrameSkipReason, GpuTileDescription,
    MultiAcceleratorDistributor, NO_OUTPUT_POSITION, OutputTarget, RequestBatcher, RequestError,
    TileRequest, TileUpload, pool_edge_for, validate_request,
};

/// Stages of one `finalize` call, entered strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameStage {
    Idle,
    UploadConverged,
    AllocateAndInvalidate,
    DispatchGi,
    DispatchShadow,
    CrossAcceleratorTransfer,
    ComposeOutput,
    IssueReadback,
}

/// Per-frame orchestration of tile requests through allocation, GPU passes and readback.
#[derive(Debug)]
pub struct FrameScheduler {
    stage: FrameStage,
    frame_number: u64,
    batcher: RequestBatcher,
    visible_tiles: Option<VisibleTileHistory>,
    recorded: RecordedTileRequests,
    recording_tile_requests: bool,
    inside_background_tick: bool,
    mip0_work_done_last_frame: usize,
    was_full_speed: Option<bool>,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            stage: FrameStage::Idle,
            frame_number: 0,
            batcher: RequestBatcher::new(),
            visible_tiles: None,
            recorded: RecordedTileRequests::default(),
            recording_tile_requests: false,
            inside_background_tick: false,
            mip0_work_done_last_frame: 0,
            was_full_speed: None,
        }
    }

    pub const fn stage(&self) -> FrameStage {
        self.stage
    }

    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn pending_request_count(&self) -> usize {
        self.batcher.len()
    }

    pub fn recorded_tile_count(&self) -> usize {
        self.recorded.len()
    }

    pub const fn is_recording_tile_requests(&self) -> bool {
        self.recording_tile_requests
    }

    pub fn set_recording_tile_requests(&mut self, recording: bool) {
        self.recording_tile_requests = recording;
    }

    /// Queues a tile for this frame. Duplicates collapse into one request.
    pub fn add_request<B: BakeBackend>(
        &mut self,
        session: &BakeSession<B>,
        coordinate: VirtualTileCoordinate,
        output_targets: &[OutputTarget],
    ) -> Result<(), RequestError> {
        validate_request(&session.scene, &coordinate, output_targets)?;
        self.batcher.add(coordinate, output_targets);
        Ok(())
    }

    /// Invalidates every piece of accumulated or in-flight work.
    pub fn bump_revision<B: BakeBackend>(&mut self, session: &mut BakeSession<B>) {
        session.advance_revision();
        self.frame_number = 0;
        self.batcher.clear();
        self.recorded.clear();
        if let Some(history) = self.visible_tiles.as_mut() {
            history.clear();
        }
    }

    pub fn add_light<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        category: LightCategory,
    ) -> LightId {
        let light = session.scene.add_light(category);
        self.bump_revision(session);
        light
    }

    pub fn remove_light<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        light: LightId,
    ) -> Result<(), SceneError> {
        session.scene.remove_light(light)?;
        self.bump_revision(session);
        Ok(())
    }

    pub fn add_lightmap<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        desc: LightmapDesc,
    ) -> Result<LightmapId, SceneError> {
        let lightmap = session.scene.add_lightmap(desc)?;
        self.bump_revision(session);
        Ok(lightmap)
    }

    pub fn remove_lightmap<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        lightmap: LightmapId,
    ) -> Result<LightmapRenderState, SceneError> {
        let removed = session.scene.remove_lightmap(lightmap)?;
        self.bump_revision(session);
        Ok(removed)
    }

    /// Removes recorded mip>0 tiles fully covered by recorded children.
    pub fn deduplicate_recorded_tile_requests<B: BakeBackend>(
        &mut self,
        session: &BakeSession<B>,
    ) -> usize {
        let before = self.recorded.len();
        let removed = self.recorded.deduplicate(&session.scene);
        log::info!(
            "deduplicated recorded tile requests: {before} -> {}",
            self.recorded.len()
        );
        removed
    }

    /// Runs the frame's pipeline over every pending request.
    pub fn finalize<B: BakeBackend>(&mut self, session: &mut BakeSession<B>) -> FrameReport {
        let mut report = FrameReport {
            frame_number: self.frame_number,
            ..FrameReport::default()
        };
        self.enter(FrameStage::UploadConverged);
        if session.backend.is_compiling() {
            self.batcher.clear();
            return self.skip(report, FrameSkipReason::ShadersCompiling);
        }
        if self.batcher.is_empty() {
            return self.skip(report, FrameSkipReason::NoPendingRequests);
        }

        let mut requests: Vec<TileRequest> = self
            .batcher
            .take()
            .into_iter()
            .filter(|request| session.scene.contains(&request.coordinate))
            .collect();
        report.uploaded = upload_converged(session, &mut requests);
        self.apply_frame_filters(session, &mut requests);
        log::debug!(
            "frame {}: {} requests after upload and filters",
            self.frame_number,
            requests.len()
        );
        if requests.is_empty() {
            return self.skip(report, FrameSkipReason::NoPendingRequests);
        }

        self.enter(FrameStage::AllocateAndInvalidate);
        RequestBatcher::sort_for_allocation(&mut requests);
        self.allocate_working_set(session, &mut requests, &mut report);
        self.allocate_scratch(session, &mut requests, &mut report);
        if requests.is_empty() {
            return self.skip(report, FrameSkipReason::AllocationExhausted);
        }
        report.scheduled = requests.len();

        let full_speed = self.inside_background_tick && !session.realtime_viewport;
        let lod_index = select_lod(
            requests.iter().filter_map(|request| {
                session
                    .scene
                    .lightmap(request.coordinate.lightmap)
                    .map(|lightmap| lightmap.lod_index())
            }),
            full_speed,
            self.frame_number,
        )
        .expect("at least one scheduled request");
        report.lod_index = Some(lod_index);
        if !session.backend.setup_scene(lod_index) {
            log::warn!("scene for LOD {lod_index} is not ready, skipping frame");
            return self.skip(report, FrameSkipReason::SceneNotReady);
        }
        report.invalidated = invalidate_stale_tiles(session, &requests);

        let distributor = MultiAcceleratorDistributor::new(session.settings.num_accelerators);
        let accelerators: Vec<u32> = requests
            .iter()
            .map(|request| {
                distributor
                    .assign_tile(&session.scene, &request.coordinate)
                    .expect("scheduled tile belongs to a live lightmap")
            })
            .collect();
        let in_lod: Vec<usize> = (0..requests.len())
            .filter(|index| {
                session
                    .scene
                    .lightmap(requests[*index].coordinate.lightmap)
                    .is_some_and(|lightmap| lightmap.lod_index() == lod_index)
            })
            .collect();
        let samples = session.settings.samples_per_frame(full_speed);

        self.enter(FrameStage::DispatchGi);
        report.gi_tile_passes =
            self.dispatch_gi(session, &requests, &accelerators, &in_lod, samples);

        self.enter(FrameStage::DispatchShadow);
        report.shadow_tile_passes =
            dispatch_shadow(session, &requests, &accelerators, &in_lod, samples, self.frame_number);

        self.enter(FrameStage::CrossAcceleratorTransfer);
        if !self.inside_background_tick && distributor.num_accelerators() > 1 {
            report.transferred = transfer_to_primary(session, &requests, &accelerators, &in_lod);
        }

        self.enter(FrameStage::ComposeOutput);
        report.composed = compose_output(session, &requests, self.frame_number);

        self.enter(FrameStage::IssueReadback);
        report.readbacks_issued = issue_readbacks(session, &requests, &accelerators, &in_lod);

        log::debug!(
            "frame {}: LOD {lod_index}, {} scheduled, {} GI and {} shadow passes, {} readbacks",
            self.frame_number,
            report.scheduled,
            report.gi_tile_passes,
            report.shadow_tile_passes,
            report.readbacks_issued
        );
        self.frame_number += 1;
        self.enter(FrameStage::Idle);
        report
    }

    /// Idle-time work: settles denoise jobs and readbacks, generates background requests and
    /// finalizes them.
    pub fn background_tick<B: BakeBackend>(&mut self, session: &mut BakeSession<B>) -> FrameReport {
        session.process_denoise_groups();
        let interactive_denoise = session.settings.denoise_during_interactive_bake;
        let denoise_queue = session.readback.poll_and_complete(
            &mut session.scene,
            session.revision,
            session.geometry,
            interactive_denoise,
        );
        session.readback.trim_free_groups();
        if !denoise_queue.is_empty() {
            log::debug!("queueing {} tiles for denoise", denoise_queue.len());
            session.submit_denoise_jobs(denoise_queue);
        }

        let full_speed = !session.realtime_viewport;
        if self.was_full_speed != Some(full_speed) {
            if full_speed {
                log::info!(
                    "Entering full speed mode: {} tile passes per frame",
                    session.settings.tile_passes_in_full_speed_mode
                );
            } else if self.was_full_speed.is_some() {
                log::info!("Exiting full speed mode");
            }
            self.was_full_speed = Some(full_speed);
        }

        if !session.settings.only_bake_what_you_see {
            self.generate_fixed_budget_requests(session, full_speed);
        } else if full_speed {
            self.generate_visible_requests(session);
        }

        self.inside_background_tick = true;
        let report = self.finalize(session);
        self.inside_background_tick = false;
        if full_speed {
            session.backend.flush();
        }
        report
    }

    fn generate_fixed_budget_requests<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        full_speed: bool,
    ) {
        let work_per_frame = if full_speed {
            session.limits.work_per_frame_full_speed
        } else {
            session.limits.work_per_frame_realtime
        };
        let budget = work_per_frame.saturating_sub(self.mip0_work_done_last_frame);
        self.mip0_work_done_last_frame = 0;
        let selected = generate_fixed_budget_work(
            &mut session.scene,
            session.revision,
            budget,
            &mut self.batcher,
        );
        if full_speed
            && !selected.is_empty()
            && self.frame_number % session.limits.progress_log_interval_frames == 0
        {
            log::info!("Working on: {}", selected.join(", "));
        }
    }

    fn generate_visible_requests<B: BakeBackend>(&mut self, session: &BakeSession<B>) {
        let budget = session.limits.bake_what_you_see_budget;
        let generated = if !self.recorded.is_empty() {
            generate_visible_work(
                &session.scene,
                session.revision,
                budget,
                self.recorded.iter(),
                &mut self.batcher,
            )
        } else if let Some(history) = self.visible_tiles.as_ref() {
            generate_visible_work(
                &session.scene,
                session.revision,
                budget,
                history.iter(),
                &mut self.batcher,
            )
        } else {
            0
        };
        log::trace!("replayed {generated} visible tiles");
    }

    fn enter(&mut self, stage: FrameStage) {
        let expected_order = stage == FrameStage::Idle || stage > self.stage;
        assert!(
            expected_order,
            "frame stage {stage:?} entered after {:?}",
            self.stage
        );
        self.stage = stage;
    }

    fn skip(&mut self, mut report: FrameReport, reason: FrameSkipReason) -> FrameReport {
        log::debug!("frame {} skipped: {reason:?}", self.frame_number);
        report.skipped = Some(reason);
        self.stage = FrameStage::Idle;
        report
    }

    fn apply_frame_filters<B: BakeBackend>(
        &mut self,
        session: &BakeSession<B>,
        requests: &mut Vec<TileRequest>,
    ) {
        if self.inside_background_tick {
            return;
        }
        if !session.settings.only_bake_what_you_see {
            let cap = session.limits.max_requests_per_accelerator_per_frame
                * session.settings.num_accelerators as usize;
            *requests = RequestBatcher::throttle(std::mem::take(requests), cap, self.frame_number);
            return;
        }

        let history_frames = session.limits.visible_tile_history_frames;
        let history = self
            .visible_tiles
            .get_or_insert_with(|| VisibleTileHistory::new(history_frames));
        history.record(self.frame_number, requests);
        if self.recording_tile_requests {
            for request in requests.iter().filter(|request| request.is_screen_output()) {
                self.recorded.record(request);
            }
        } else if !self.recorded.is_empty() {
            let recorded = &self.recorded;
            requests.retain(|request| recorded.contains(&request.coordinate));
        }
    }

    fn allocate_working_set<B: BakeBackend>(
        &self,
        session: &mut BakeSession<B>,
        requests: &mut [TileRequest],
        report: &mut FrameReport,
    ) {
        let coordinates: Vec<VirtualTileCoordinate> =
            requests.iter().map(|request| request.coordinate).collect();
        let residency = session.working_set.query_residency(&coordinates);
        let resident_slots: Vec<TileSlot> = residency.iter().flatten().copied().collect();
        session
            .working_set
            .lock(&resident_slots)
            .expect("resident slots belong to the working set");

        let mut missing = Vec::new();
        for (index, slot) in residency.iter().enumerate() {
            match slot {
                Some(slot) => requests[index].working_set = Some(*slot),
                None => missing.push(index),
            }
        }
        for &index in &missing {
            if let Ok(state) = session.scene.retrieve_tile_state(&requests[index].coordinate) {
                state.invalidate();
            }
        }

        let new_slots = session.working_set.alloc_and_lock(missing.len());
        let mapped: Vec<VirtualTileCoordinate> = missing
            .iter()
            .zip(&new_slots)
            .map(|(&index, slot)| {
                requests[index].working_set = Some(*slot);
                requests[index].coordinate
            })
            .collect();
        let evicted = session
            .working_set
            .map(&mapped, &new_slots)
            .expect("freshly locked slots accept non-resident tiles");
        for tile in &evicted {
            if let Ok(state) = session.scene.retrieve_tile_state(tile) {
                state.invalidate();
            }
        }
        session
            .working_set
            .make_available(&resident_slots, self.frame_number)
            .expect("resident slots were locked above");
        session
            .working_set
            .make_available(&new_slots, self.frame_number)
            .expect("new slots were locked by allocation");

        report.newly_mapped = new_slots.len();
        report.evicted = evicted.len();
        if new_slots.len() < missing.len() {
            log::debug!(
                "working set exhausted: {} of {} tiles mapped",
                new_slots.len(),
                missing.len()
            );
        }
    }

    fn allocate_scratch<B: BakeBackend>(
        &self,
        session: &mut BakeSession<B>,
        requests: &mut Vec<TileRequest>,
        report: &mut FrameReport,
    ) {
        let wanted = requests
            .iter()
            .filter(|request| request.working_set.is_some())
            .count();
        let max_edge = session.limits.max_scratch_pool_edge;
        let slots = loop {
            let slots = session.scratch.alloc_and_lock(wanted);
            session
                .scratch
                .make_available(&slots, self.frame_number)
                .expect("scratch slots were locked by allocation");
            if slots.len() == wanted {
                break slots;
            }
            if session.scratch.tiles_per_edge() >= max_edge {
                log::warn!(
                    "scratch pool at maximum size, {} of {wanted} tiles dropped",
                    wanted - slots.len()
                );
                break slots;
            }
            let edge = pool_edge_for(wanted).min(max_edge);
            if edge <= session.scratch.tiles_per_edge() {
                break slots;
            }
            log::debug!("growing scratch pool to {edge}x{edge}");
            session.scratch = TilePool::new(TilePoolConfig {
                tiles_per_edge: edge,
                layer_count: SCRATCH_LAYERS,
            })
            .expect("scratch pool edge is positive");
        };

        let mut slots = slots.into_iter();
        for request in requests.iter_mut() {
            if request.working_set.is_some() {
                request.scratch = slots.next();
            }
        }
        let before = requests.len();
        requests.retain(|request| request.working_set.is_some() && request.scratch.is_some());
        report.dropped_by_allocation = before - requests.len();
    }

    fn dispatch_gi<B: BakeBackend>(
        &mut self,
        session: &mut BakeSession<B>,
        requests: &[TileRequest],
        accelerators: &[u32],
        in_lod: &[usize],
        samples: u32,
    ) -> usize {
        let total_passes = session.settings.total_passes();
        let reraster_interval = session.settings.gbuffer_reraster_interval;
        let mut tile_passes = 0;
        for sample_index in 0..samples {
            let pending: Vec<usize> = in_lod
                .iter()
                .copied()
                .filter(|index| {
                    session
                        .scene
                        .tile_state(&requests[*index].coordinate)
                        .is_some_and(|state| !state.is_gi_converged(total_passes))
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for accelerator in 0..session.settings.num_accelerators {
                let batch: Vec<usize> = pending
                    .iter()
                    .copied()
                    .filter(|index| accelerators[*index] == accelerator)
                    .collect();
                if batch.is_empty() {
                    continue;
                }
                let descriptions: Vec<GpuTileDescription> = batch
                    .iter()
                    .map(|index| describe_tile(session, &requests[*index], self.frame_number))
                    .collect();
                if sample_index % reraster_interval == 0 {
                    session.backend.rasterize_gbuffer(accelerator, &descriptions);
                }
                session.backend.dispatch_gi(accelerator, &descriptions);
                for index in batch {
                    let request = &requests[index];
                    let state = session
                        .scene
                        .retrieve_tile_state(&request.coordinate)
                        .expect("scheduled tile belongs to a live lightmap");
                    if sample_index == 0
                        && !self.inside_background_tick
                        && request.coordinate.mip_level() == 0
                    {
                        self.mip0_work_done_last_frame += 1;
                    }
                    state.record_gi_pass(total_passes);
                    tile_passes += 1;
                }
            }
        }
        tile_passes
    }
}

fn upload_converged<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &mut Vec<TileRequest>,
) -> usize {
    let revision = session.revision;
    let interactive = session.settings.denoise_during_interactive_bake;
    let scene = &session.scene;
    let uploadable = |request: &TileRequest| {
        if scene.does_tile_have_valid_cpu_data(&request.coordinate, revision) {
            return true;
        }
        interactive
            && scene.tile_state(&request.coordinate).is_some_and(|state| {
                state.has_readback_in_flight(revision) && state.can_be_denoised
            })
    };

    let to_upload: Vec<&TileRequest> = requests
        .iter()
        .filter(|request| uploadable(request))
        .collect();
    if !to_upload.is_empty() {
        let uploads: Vec<TileUpload<'_>> = to_upload
            .iter()
            .enumerate()
            .filter_map(|(slot, request)| {
                let storage = scene
                    .lightmap(request.coordinate.lightmap)?
                    .tile_storage(request.coordinate.tile)?;
                Some(TileUpload {
                    coordinate: request.coordinate,
                    upload_slot: TileSlot::new(slot as u32),
                    working_set: session.working_set.query_residency(&[request.coordinate])[0],
                    image: &storage.data,
                    output_targets: &request.output_targets,
                })
            })
            .collect();
        session
            .backend
            .upload_tiles(pool_edge_for(to_upload.len()), &uploads);
    }

    let uploaded = to_upload.len();
    requests.retain(|request| {
        !uploadable(request)
            && !scene
                .tile_state(&request.coordinate)
                .is_some_and(|state| state.has_readback_in_flight(revision))
    });
    uploaded
}

fn invalidate_stale_tiles<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &[TileRequest],
) -> usize {
    let revision = session.revision;
    let stale: Vec<&TileRequest> = requests
        .iter()
        .filter(|request| {
            session
                .scene
                .tile_state(&request.coordinate)
                .is_none_or(|state| state.revision != Some(revision))
        })
        .collect();
    if stale.is_empty() {
        return 0;
    }
    let slots: Vec<TileSlot> = stale
        .iter()
        .map(|request| request.working_set.expect("allocated request has a working-set slot"))
        .collect();
    session.backend.clear_working_set(&slots);
    for request in &stale {
        session
            .scene
            .reset_tile_for_revision(&request.coordinate, revision)
            .expect("scheduled tile belongs to a live lightmap");
    }
    log::trace!("reset {} stale tiles for revision {revision}", stale.len());
    stale.len()
}

fn dispatch_shadow<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &[TileRequest],
    accelerators: &[u32],
    in_lod: &[usize],
    samples: u32,
    frame_number: u64,
) -> usize {
    let target = session.settings.stationary_light_shadow_samples;
    let mut tile_passes = 0;
    for _ in 0..samples {
        let mut batches: BTreeMap<(u32, LightId), (LightCategory, Vec<GpuTileDescription>)> =
            BTreeMap::new();
        for &index in in_lod {
            let request = &requests[index];
            let converged = session
                .scene
                .tile_state(&request.coordinate)
                .is_none_or(|state| state.is_shadow_converged(target));
            if converged {
                continue;
            }
            let description = describe_tile(session, request, frame_number);
            let picked = session
                .scene
                .retrieve_tile_state(&request.coordinate)
                .expect("scheduled tile belongs to a live lightmap")
                .lights
                .pick_next_light(target);
            if let Some((category, light)) = picked {
                batches
                    .entry((accelerators[index], light))
                    .or_insert_with(|| (category, Vec::new()))
                    .1
                    .push(description);
            }
        }
        if batches.is_empty() {
            break;
        }
        for ((accelerator, light), (category, descriptions)) in batches {
            session
                .backend
                .dispatch_shadow(accelerator, category, light, &descriptions);
            tile_passes += descriptions.len();
        }
    }
    tile_passes
}

fn transfer_to_primary<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &[TileRequest],
    accelerators: &[u32],
    in_lod: &[usize],
) -> usize {
    let layer_count = if session.settings.use_first_bounce_ray_guiding {
        WORKING_SET_LAYERS + RAY_GUIDING_LAYERS
    } else {
        WORKING_SET_LAYERS
    };
    let mut transferred = 0;
    for accelerator in 1..session.settings.num_accelerators {
        let slots: Vec<TileSlot> = in_lod
            .iter()
            .filter(|index| accelerators[**index] == accelerator)
            .filter_map(|index| requests[*index].working_set)
            .collect();
        if slots.is_empty() {
            continue;
        }
        session
            .backend
            .transfer_to_primary(accelerator, &slots, 0..layer_count);
        transferred += slots.len();
    }
    transferred
}

fn compose_output<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &[TileRequest],
    frame_number: u64,
) -> usize {
    let mut composed = 0;
    for layer in 0..MAX_OUTPUT_TARGETS as u32 {
        let descriptions: Vec<GpuTileDescription> = requests
            .iter()
            .filter(|request| request.target_on_layer(layer).is_some())
            .map(|request| describe_tile(session, request, frame_number))
            .collect();
        if descriptions.is_empty() {
            continue;
        }
        let show_progress = session.settings.show_progress_bars && layer < 2;
        session
            .backend
            .compose_output(layer, show_progress, &descriptions);
        composed += descriptions.len();
    }
    composed
}

fn issue_readbacks<B: BakeBackend>(
    session: &mut BakeSession<B>,
    requests: &[TileRequest],
    accelerators: &[u32],
    in_lod: &[usize],
) -> usize {
    let revision = session.revision;
    let total_passes = session.settings.total_passes();
    let shadow_target = session.settings.stationary_light_shadow_samples;
    let read_any_mip = session.settings.denoise_during_interactive_bake
        || session.settings.only_bake_what_you_see;
    let mut per_accelerator: BTreeMap<u32, Vec<(VirtualTileCoordinate, TileSlot)>> =
        BTreeMap::new();
    for &index in in_lod {
        let request = &requests[index];
        if request.coordinate.mip_level() != 0 && !read_any_mip {
            continue;
        }
        let Ok(state) = session.scene.retrieve_tile_state(&request.coordinate) else {
            continue;
        };
        if !state.is_gi_converged(total_passes) || !state.is_shadow_converged(shadow_target) {
            continue;
        }
        state.ongoing_readback_revision = Some(revision);
        per_accelerator.entry(accelerators[index]).or_default().push((
            request.coordinate,
            request
                .working_set
                .expect("allocated request has a working-set slot"),
        ));
    }
    let mut issued = 0;
    for (accelerator, tiles) in per_accelerator {
        session
            .readback
            .enqueue(&mut session.backend, accelerator, revision, &tiles);
        issued += tiles.len();
    }
    issued
}

fn describe_tile<B: BakeBackend>(
    session: &BakeSession<B>,
    request: &TileRequest,
    frame_number: u64,
) -> GpuTileDescription {
    let coordinate = &request.coordinate;
    let lightmap = session
        .scene
        .lightmap(coordinate.lightmap)
        .expect("scheduled tile belongs to a live lightmap");
    let extent = lightmap
        .layout()
        .extent_at_mip(coordinate.mip_level())
        .expect("scheduled tile lies inside the mip chain");
    let render_pass_index = lightmap
        .tile_state(coordinate.tile)
        .map_or(0, |state| state.render_pass_index);
    let slot_position = |pool: &TilePool<VirtualTileCoordinate>, slot: Option<TileSlot>| {
        let slot = slot.expect("allocated request has both slots");
        let position = pool
            .translator()
            .position_from_linear(slot)
            .expect("allocated slot lies inside its pool");
        [position.x, position.y]
    };
    let mut output_layer_positions = [NO_OUTPUT_POSITION; MAX_OUTPUT_TARGETS];
    for target in &request.output_targets {
        output_layer_positions[target.layer as usize] = [target.position.x, target.position.y];
    }
    GpuTileDescription {
        lightmap_size: [extent.width, extent.height],
        virtual_tile_position: [coordinate.position().x, coordinate.position().y],
        working_set_position: slot_position(&session.working_set, request.working_set),
        scratch_position: slot_position(&session.scratch, request.scratch),
        output_layer_positions,
        frame_index: frame_number as u32,
        render_pass_index,
        mip_level: coordinate.mip_level(),
        _padding: [0; 3],
    }
}
