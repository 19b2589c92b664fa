use std::sync::Arc;
use std::time::Duration;

use denoise::{NeighborhoodImage, TileDenoiser};
use model::{
    LightCategory, LightmapId, TileCoordinate, TileGeometry, TilePosition, VirtualTileCoordinate,
};
use scene::LightmapDesc;
use tiles::TileSlot;

use super::*;
use crate::testing::{BackendCall, RecordingBackend, staging_texel};

const GEOMETRY: TileGeometry = TileGeometry {
    virtual_edge: 2,
    border: 1,
};

struct PassThroughDenoiser;

impl TileDenoiser for PassThroughDenoiser {
    fn denoise(&self, _neighborhood: &mut NeighborhoodImage) {}
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn settings(gi_samples: u32, shadow_samples: u32, passes_per_frame: u32) -> BakeSettings {
    BakeSettings {
        gi_samples,
        use_irradiance_caching: false,
        stationary_light_shadow_samples: shadow_samples,
        tile_passes_in_slow_mode: passes_per_frame,
        tile_passes_in_full_speed_mode: passes_per_frame,
        ..BakeSettings::default()
    }
}

fn session_with(
    settings: BakeSettings,
    limits: SchedulerLimits,
    working_set_tiles_per_edge: u32,
) -> BakeSession<RecordingBackend> {
    init_logging();
    BakeSession::new(
        BakeSessionConfig {
            settings,
            limits,
            geometry: GEOMETRY,
            working_set_tiles_per_edge,
        },
        RecordingBackend::new(GEOMETRY),
        Arc::new(PassThroughDenoiser),
    )
    .expect("create bake session")
}

fn session(settings: BakeSettings) -> BakeSession<RecordingBackend> {
    session_with(settings, SchedulerLimits::default(), 8)
}

fn lightmap_desc(name: &str, width: u32, height: u32) -> LightmapDesc {
    LightmapDesc {
        name: name.to_owned(),
        width_in_tiles: width,
        height_in_tiles: height,
        lod_index: 0,
        origin: [0.0; 3],
        relevant_lights: Vec::new(),
    }
}

fn tile(lightmap: LightmapId, x: u32, y: u32) -> VirtualTileCoordinate {
    VirtualTileCoordinate::new(lightmap, TileCoordinate::new(0, x, y))
}

fn request_all(
    scheduler: &mut FrameScheduler,
    session: &BakeSession<RecordingBackend>,
    tiles: &[VirtualTileCoordinate],
) {
    for coordinate in tiles {
        scheduler
            .add_request(session, *coordinate, &[])
            .expect("add request");
    }
}

fn gi_dispatch_count(session: &BakeSession<RecordingBackend>) -> usize {
    session.backend().gi_dispatches().count()
}

#[test]
fn cold_start_tile_converges_and_is_read_back() {
    let mut session = session(settings(2, 2, 2));
    let mut scheduler = FrameScheduler::new();
    scheduler.add_light(&mut session, LightCategory::Directional);
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 2, 2))
        .expect("add lightmap");
    session.backend_mut().clear_calls();

    let coordinate = tile(lightmap, 0, 0);
    request_all(&mut scheduler, &session, &[coordinate]);
    let report = scheduler.finalize(&mut session);

    assert_eq!(report.skipped, None);
    assert_eq!(report.newly_mapped, 1);
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.gi_tile_passes, 2);
    assert_eq!(report.shadow_tile_passes, 2);
    assert_eq!(report.readbacks_issued, 1);
    assert_eq!(scheduler.stage(), FrameStage::Idle);

    let kinds: Vec<&'static str> = session
        .backend()
        .calls
        .iter()
        .map(|call| match call {
            BackendCall::SetupScene { .. } => "setup",
            BackendCall::ClearWorkingSet { .. } => "clear",
            BackendCall::RasterizeGBuffer { .. } => "raster",
            BackendCall::DispatchGi { .. } => "gi",
            BackendCall::DispatchShadow { .. } => "shadow",
            BackendCall::BeginReadback { .. } => "readback",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["setup", "clear", "raster", "gi", "gi", "shadow", "shadow", "readback"]
    );
    let state = session.scene().tile_state(&coordinate).expect("tile state");
    assert_eq!(state.render_pass_index, 2);
    assert_eq!(state.ongoing_readback_revision, Some(session.revision()));

    scheduler.background_tick(&mut session);
    assert!(
        session
            .scene()
            .does_tile_have_valid_cpu_data(&coordinate, session.revision())
    );
    let storage = session
        .scene()
        .lightmap(lightmap)
        .and_then(|lightmap| lightmap.tile_storage(coordinate.tile))
        .expect("stored tile");
    assert_eq!(storage.data.texel(2, 1, 1), staging_texel(0, 1, 1, 2));
}

#[test]
fn oversubscribed_working_set_maps_what_fits() {
    let mut session = session_with(settings(64, 1, 1), SchedulerLimits::default(), 2);
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Wall", 5, 1))
        .expect("add lightmap");
    let tiles: Vec<VirtualTileCoordinate> = (0..5).map(|x| tile(lightmap, x, 0)).collect();

    request_all(&mut scheduler, &session, &tiles);
    let report = scheduler.finalize(&mut session);

    assert_eq!(report.newly_mapped, 4);
    assert_eq!(report.dropped_by_allocation, 1);
    assert_eq!(report.scheduled, 4);
    assert_eq!(report.gi_tile_passes, 4);
    assert_eq!(session.working_set().resident_count(), 4);
    assert_eq!(session.working_set().locked_slot_count(), 0);
    // Allocation walks virtual addresses in order, so the last tile misses out.
    assert_eq!(
        session.working_set().query_residency(&[tiles[4]]),
        vec![None]
    );
}

#[test]
fn resident_tiles_keep_accumulating_across_frames() {
    let mut session = session(settings(64, 1, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 2, 1))
        .expect("add lightmap");
    let tiles = [tile(lightmap, 0, 0), tile(lightmap, 1, 0)];

    for frame in 0..3 {
        request_all(&mut scheduler, &session, &tiles);
        let report = scheduler.finalize(&mut session);
        assert_eq!(report.frame_number, frame);
        assert_eq!(report.newly_mapped, if frame == 0 { 2 } else { 0 });
        assert_eq!(report.invalidated, if frame == 0 { 2 } else { 0 });
    }
    for coordinate in &tiles {
        let state = session.scene().tile_state(coordinate).expect("tile state");
        assert_eq!(state.render_pass_index, 3);
    }
}

#[test]
fn gi_passes_stop_at_convergence() {
    let mut session = session(settings(3, 0, 2));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    let coordinate = tile(lightmap, 0, 0);

    let mut passes = Vec::new();
    for _ in 0..3 {
        request_all(&mut scheduler, &session, &[coordinate]);
        let report = scheduler.finalize(&mut session);
        passes.push((report.gi_tile_passes, report.skipped));
        let state = session.scene().tile_state(&coordinate).expect("tile state");
        assert!(state.render_pass_index <= session.settings().total_passes());
    }
    assert_eq!(
        passes,
        vec![
            (2, None),
            (1, None),
            (0, Some(FrameSkipReason::NoPendingRequests))
        ]
    );
    assert_eq!(gi_dispatch_count(&session), 3);
}

#[test]
fn shadow_samples_rotate_over_relevant_lights() {
    let mut session = session(settings(100, 100, 1));
    let mut scheduler = FrameScheduler::new();
    let sun = scheduler.add_light(&mut session, LightCategory::Directional);
    let lamp = scheduler.add_light(&mut session, LightCategory::Point);
    let spot = scheduler.add_light(&mut session, LightCategory::Spot);
    let lightmap = scheduler
        .add_lightmap(
            &mut session,
            LightmapDesc {
                relevant_lights: vec![spot, lamp],
                ..lightmap_desc("Lightmap_Floor", 1, 1)
            },
        )
        .expect("add lightmap");
    let coordinate = tile(lightmap, 0, 0);

    for _ in 0..6 {
        request_all(&mut scheduler, &session, &[coordinate]);
        scheduler.finalize(&mut session);
    }
    let lights: Vec<_> = session
        .backend()
        .shadow_dispatches()
        .map(|(light, _)| light)
        .collect();
    assert_eq!(lights, vec![sun, lamp, spot, sun, lamp, spot]);
    let state = session.scene().tile_state(&coordinate).expect("tile state");
    for light in [sun, lamp, spot] {
        assert_eq!(state.lights.sample_count(light), Some(2));
    }
}

#[test]
fn evicted_tile_restarts_accumulation_when_requested_again() {
    let mut session = session_with(settings(64, 0, 1), SchedulerLimits::default(), 1);
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 2, 1))
        .expect("add lightmap");
    let first = tile(lightmap, 0, 0);
    let second = tile(lightmap, 1, 0);

    for _ in 0..2 {
        request_all(&mut scheduler, &session, &[first]);
        let report = scheduler.finalize(&mut session);
        assert_eq!(report.evicted, 0);
    }
    let state = session.scene().tile_state(&first).expect("tile state");
    assert_eq!(state.render_pass_index, 2);

    request_all(&mut scheduler, &session, &[second]);
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.newly_mapped, 1);
    assert_eq!(report.evicted, 1);
    let state = session.scene().tile_state(&first).expect("tile state");
    assert_eq!(state.render_pass_index, 0);
    assert_eq!(state.revision, None);
    let residency = session.working_set().query_residency(&[first, second]);
    assert!(residency[0].is_none());
    assert!(residency[1].is_some());

    request_all(&mut scheduler, &session, &[first]);
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.evicted, 1);
    assert_eq!(report.invalidated, 1);
    let state = session.scene().tile_state(&first).expect("tile state");
    assert_eq!(state.render_pass_index, 1);
    assert_eq!(state.revision, Some(session.revision()));
    let state = session.scene().tile_state(&second).expect("tile state");
    assert_eq!(state.render_pass_index, 0);
}

#[test]
fn realtime_frames_give_every_requested_lod_gi_passes() {
    let mut session = session(settings(64, 0, 1));
    let mut scheduler = FrameScheduler::new();
    let near = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Near", 1, 1))
        .expect("add near lightmap");
    let far = scheduler
        .add_lightmap(
            &mut session,
            LightmapDesc {
                lod_index: 1,
                ..lightmap_desc("Lightmap_Far", 1, 1)
            },
        )
        .expect("add far lightmap");
    let tiles = [tile(near, 0, 0), tile(far, 0, 0)];
    session.backend_mut().clear_calls();

    let mut lods = Vec::new();
    for _ in 0..4 {
        request_all(&mut scheduler, &session, &tiles);
        let report = scheduler.finalize(&mut session);
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.gi_tile_passes, 1);
        lods.push(report.lod_index);
    }
    assert_eq!(lods, vec![Some(0), Some(1), Some(0), Some(1)]);

    let scene_lods: Vec<u32> = session
        .backend()
        .calls
        .iter()
        .filter_map(|call| match call {
            BackendCall::SetupScene { lod_index } => Some(*lod_index),
            _ => None,
        })
        .collect();
    assert_eq!(scene_lods, vec![0, 1, 0, 1]);
    for coordinate in &tiles {
        let state = session.scene().tile_state(coordinate).expect("tile state");
        assert_eq!(state.render_pass_index, 2);
    }
}

#[test]
fn revision_bump_discards_readback_in_flight() {
    let mut session = session(settings(1, 0, 1));
    session.backend_mut().readback_polls_before_ready = 2;
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    let coordinate = tile(lightmap, 0, 0);
    request_all(&mut scheduler, &session, &[coordinate]);
    assert_eq!(scheduler.finalize(&mut session).readbacks_issued, 1);
    let stale_revision = session.revision();

    scheduler.bump_revision(&mut session);
    assert_eq!(scheduler.frame_number(), 0);
    assert_eq!(session.working_set().resident_count(), 0);

    // The stale group is released and recycled for the re-bake of the same tile.
    let report = scheduler.background_tick(&mut session);
    assert_eq!(report.readbacks_issued, 1);
    assert_eq!(session.readback().group_count(), 1);
    assert_eq!(session.readback().in_flight_count(), 1);
    let lightmap_state = session.scene().lightmap(lightmap).expect("lightmap");
    assert_eq!(lightmap_state.stored_tile_count(), 0);
    assert_ne!(session.revision(), stale_revision);

    for _ in 0..3 {
        scheduler.background_tick(&mut session);
    }
    assert!(
        session
            .scene()
            .does_tile_have_valid_cpu_data(&coordinate, session.revision())
    );
}

#[test]
fn converged_tile_upload_reproduces_stored_image() {
    let mut session = session(settings(1, 0, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    let coordinate = tile(lightmap, 0, 0);
    request_all(&mut scheduler, &session, &[coordinate]);
    scheduler.finalize(&mut session);
    scheduler.background_tick(&mut session);
    assert!(
        session
            .scene()
            .does_tile_have_valid_cpu_data(&coordinate, session.revision())
    );

    let target = OutputTarget {
        layer: 0,
        position: TilePosition::new(3, 3),
    };
    scheduler
        .add_request(&session, coordinate, &[target])
        .expect("add request");
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.skipped, Some(FrameSkipReason::NoPendingRequests));

    let stored = &session
        .scene()
        .lightmap(lightmap)
        .and_then(|lightmap| lightmap.tile_storage(coordinate.tile))
        .expect("stored tile")
        .data;
    assert_eq!(
        session.backend().output_tiles.get(&(0, target.position)),
        Some(stored)
    );
}

#[test]
fn identical_inputs_produce_identical_command_streams() {
    fn run() -> (Vec<BackendCall>, Vec<u8>) {
        let mut session = session_with(settings(4, 2, 2), SchedulerLimits::default(), 2);
        let mut scheduler = FrameScheduler::new();
        scheduler.add_light(&mut session, LightCategory::Directional);
        let lightmap = scheduler
            .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 3, 2))
            .expect("add lightmap");
        let mut log = Vec::new();
        for frame in 0..4u32 {
            let tiles: Vec<VirtualTileCoordinate> = (0..3)
                .map(|x| tile(lightmap, (x + frame) % 3, frame % 2))
                .collect();
            request_all(&mut scheduler, &session, &tiles);
            let report = scheduler.finalize(&mut session);
            write_frame_report_line(&mut log, &report).expect("log frame report");
            let report = scheduler.background_tick(&mut session);
            write_frame_report_line(&mut log, &report).expect("log frame report");
        }
        (session.backend().calls.clone(), log)
    }

    let (first_calls, first_log) = run();
    let (second_calls, second_log) = run();
    assert_eq!(first_calls, second_calls);
    assert_eq!(first_log, second_log);
    let reports = read_frame_reports(&mut first_log.as_slice()).expect("read frame reports");
    assert_eq!(reports.len(), 8);
    assert!(reports.iter().any(|report| report.readbacks_issued > 0));
}

#[test]
fn large_batches_are_throttled_per_frame() {
    let limits = SchedulerLimits {
        max_requests_per_accelerator_per_frame: 4,
        ..SchedulerLimits::default()
    };
    let mut session = session_with(settings(64, 1, 1), limits, 4);
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Wall", 10, 1))
        .expect("add lightmap");
    let tiles: Vec<VirtualTileCoordinate> = (0..10).map(|x| tile(lightmap, x, 0)).collect();

    let mut scheduled = 0;
    for _ in 0..3 {
        request_all(&mut scheduler, &session, &tiles);
        let report = scheduler.finalize(&mut session);
        assert!(report.scheduled <= 4);
        scheduled += report.scheduled;
    }
    assert_eq!(scheduled, 10);
}

#[test]
fn scratch_pool_grows_to_fit_and_stops_at_its_limit() {
    let mut session = session(settings(64, 1, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Wall", 5, 1))
        .expect("add lightmap");
    let tiles: Vec<VirtualTileCoordinate> = (0..5).map(|x| tile(lightmap, x, 0)).collect();
    request_all(&mut scheduler, &session, &tiles);
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.scheduled, 5);
    assert_eq!(session.scratch_pool().tiles_per_edge(), 3);

    let limits = SchedulerLimits {
        max_scratch_pool_edge: 2,
        ..SchedulerLimits::default()
    };
    let mut session = session_with(settings(64, 1, 1), limits, 8);
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Wall", 5, 1))
        .expect("add lightmap");
    let tiles: Vec<VirtualTileCoordinate> = (0..5).map(|x| tile(lightmap, x, 0)).collect();
    request_all(&mut scheduler, &session, &tiles);
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.scheduled, 4);
    assert_eq!(report.dropped_by_allocation, 1);
    assert_eq!(session.scratch_pool().tiles_per_edge(), 2);
}

#[test]
fn compiling_shaders_skip_the_frame_and_drop_requests() {
    let mut session = session(settings(4, 1, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    session.backend_mut().compiling = true;
    request_all(&mut scheduler, &session, &[tile(lightmap, 0, 0)]);

    let report = scheduler.finalize(&mut session);
    assert_eq!(report.skipped, Some(FrameSkipReason::ShadersCompiling));
    assert_eq!(scheduler.pending_request_count(), 0);
    assert_eq!(scheduler.frame_number(), 0);
}

#[test]
fn refused_scene_setup_skips_gpu_work() {
    let mut session = session(settings(4, 1, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    session.backend_mut().scene_ready = false;
    request_all(&mut scheduler, &session, &[tile(lightmap, 0, 0)]);

    let report = scheduler.finalize(&mut session);
    assert_eq!(report.skipped, Some(FrameSkipReason::SceneNotReady));
    assert_eq!(report.lod_index, Some(0));
    assert_eq!(gi_dispatch_count(&session), 0);
    assert_eq!(scheduler.stage(), FrameStage::Idle);
}

#[test]
fn second_accelerator_transfers_results_to_primary() {
    let mut session = session(BakeSettings {
        num_accelerators: 2,
        ..settings(1, 0, 1)
    });
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 2, 1))
        .expect("add lightmap");
    session.backend_mut().clear_calls();
    request_all(&mut scheduler, &session, &[tile(lightmap, 0, 0), tile(lightmap, 1, 0)]);

    let report = scheduler.finalize(&mut session);
    assert_eq!(report.transferred, 1);
    let accelerators: Vec<u32> = session
        .backend()
        .gi_dispatches()
        .map(|(accelerator, _)| accelerator)
        .collect();
    assert_eq!(accelerators, vec![0, 1]);
    assert!(session.backend().calls.contains(&BackendCall::TransferToPrimary {
        accelerator: 1,
        slots: vec![TileSlot::new(1)],
        layers: 0..5,
    }));
    assert_eq!(
        session
            .backend()
            .calls_matching(|call| matches!(call, BackendCall::BeginReadback { .. })),
        2
    );
}

#[test]
fn recorded_visible_tiles_filter_later_frames() {
    let mut session = session(BakeSettings {
        only_bake_what_you_see: true,
        ..settings(100, 1, 1)
    });
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 4, 1))
        .expect("add lightmap");
    let target = OutputTarget {
        layer: 0,
        position: TilePosition::new(0, 0),
    };

    scheduler.set_recording_tile_requests(true);
    scheduler
        .add_request(&session, tile(lightmap, 0, 0), &[target])
        .expect("add request");
    scheduler
        .add_request(&session, tile(lightmap, 3, 0), &[])
        .expect("add request");
    assert_eq!(scheduler.finalize(&mut session).scheduled, 2);
    assert_eq!(scheduler.recorded_tile_count(), 1);

    scheduler.set_recording_tile_requests(false);
    scheduler
        .add_request(&session, tile(lightmap, 0, 0), &[target])
        .expect("add request");
    scheduler
        .add_request(&session, tile(lightmap, 1, 0), &[])
        .expect("add request");
    let report = scheduler.finalize(&mut session);
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.composed, 1);
}

#[test]
fn recorded_parent_covered_by_recorded_children_is_deduplicated() {
    let mut session = session(settings(100, 1, 1));
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 2, 2))
        .expect("add lightmap");
    let target = OutputTarget {
        layer: 0,
        position: TilePosition::new(0, 0),
    };

    scheduler.set_recording_tile_requests(true);
    let parent = VirtualTileCoordinate::new(lightmap, TileCoordinate::new(1, 0, 0));
    let children = [
        tile(lightmap, 0, 0),
        tile(lightmap, 1, 0),
        tile(lightmap, 0, 1),
        tile(lightmap, 1, 1),
    ];
    for coordinate in std::iter::once(parent).chain(children) {
        scheduler
            .add_request(&session, coordinate, &[target])
            .expect("add request");
    }
    scheduler.finalize(&mut session);
    assert_eq!(scheduler.recorded_tile_count(), 5);

    assert_eq!(scheduler.deduplicate_recorded_tile_requests(&session), 1);
    assert_eq!(scheduler.recorded_tile_count(), 4);
}

#[test]
fn interactive_denoise_publishes_filtered_tile() {
    let mut session = session(BakeSettings {
        denoise_during_interactive_bake: true,
        ..settings(1, 0, 1)
    });
    let mut scheduler = FrameScheduler::new();
    let lightmap = scheduler
        .add_lightmap(&mut session, lightmap_desc("Lightmap_Floor", 1, 1))
        .expect("add lightmap");
    let coordinate = tile(lightmap, 0, 0);
    request_all(&mut scheduler, &session, &[coordinate]);
    scheduler.finalize(&mut session);

    scheduler.background_tick(&mut session);
    assert_eq!(session.denoise_group_count(), 1);
    for _ in 0..400 {
        if session
            .scene()
            .does_tile_have_valid_cpu_data(&coordinate, session.revision())
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
        scheduler.background_tick(&mut session);
    }
    assert!(
        session
            .scene()
            .does_tile_have_valid_cpu_data(&coordinate, session.revision())
    );
    assert_eq!(session.denoise_group_count(), 0);
    let state = session.scene().tile_state(&coordinate).expect("tile state");
    assert!(!state.was_denoised_without_proximity);
    assert_eq!(state.ongoing_readback_revision, None);
}

#[test]
fn pool_edge_is_ceiled_square_root() {
    assert_eq!(pool_edge_for(0), 1);
    assert_eq!(pool_edge_for(2), 2);
    assert_eq!(pool_edge_for(4), 2);
    assert_eq!(pool_edge_for(5), 3);
    assert_eq!(pool_edge_for(4096), 64);
}
