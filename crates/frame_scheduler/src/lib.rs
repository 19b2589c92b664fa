//! Incremental tile scheduling for GPU lightmap baking.
//!
//! A host feeds visible tiles through [`FrameScheduler::add_request`], calls
//! [`FrameScheduler::finalize`] once per rendered frame and [`FrameScheduler::background_tick`]
//! while idle. GPU work is recorded through the [`BakeBackend`] collaborator.

mod backend;
mod distributor;
mod readback;
mod report;
mod request;
mod scheduler;
mod session;
mod settings;
pub mod work_selection;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use backend::{
    BakeBackend, GpuTileDescription, NO_OUTPUT_POSITION, ReadbackTile, ReadbackTransfer,
    StagingImage, TileUpload,
};
pub use distributor::MultiAcceleratorDistributor;
pub use readback::ReadbackPipeline;
pub use report::{FrameReport, FrameSkipReason, read_frame_reports, write_frame_report_line};
pub use request::{OutputTarget, RequestBatcher, RequestError, TileRequest, validate_request};
pub use scheduler::{FrameScheduler, FrameStage};
pub use session::{BakeSession, BakeSessionConfig, BakeSessionError};
pub use settings::{BakeSettings, SchedulerLimits, SettingsError};

/// Smallest square grid edge holding `count` tiles, at least 1.
pub fn pool_edge_for(count: usize) -> u32 {
    let mut edge = (count as f64).sqrt() as u32;
    while (edge as usize) * (edge as usize) < count {
        edge += 1;
    }
    edge.max(1)
}
