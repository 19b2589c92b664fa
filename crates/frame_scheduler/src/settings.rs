use std::fmt;

use serde::{Deserialize, Serialize};

/// Quality and behaviour switches of one bake. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    pub gi_samples: u32,
    pub use_irradiance_caching: bool,
    pub irradiance_cache_quality: u32,
    pub use_first_bounce_ray_guiding: bool,
    pub first_bounce_ray_guiding_trial_samples: u32,
    pub stationary_light_shadow_samples: u32,
    pub tile_passes_in_full_speed_mode: u32,
    pub tile_passes_in_slow_mode: u32,
    pub denoise_during_interactive_bake: bool,
    pub only_bake_what_you_see: bool,
    pub show_progress_bars: bool,
    pub num_accelerators: u32,
    /// GI sub-samples between scratch clears and G-buffer re-rasterization.
    pub gbuffer_reraster_interval: u32,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            gi_samples: 512,
            use_irradiance_caching: true,
            irradiance_cache_quality: 128,
            use_first_bounce_ray_guiding: false,
            first_bounce_ray_guiding_trial_samples: 128,
            stationary_light_shadow_samples: 128,
            tile_passes_in_full_speed_mode: 4,
            tile_passes_in_slow_mode: 1,
            denoise_during_interactive_bake: false,
            only_bake_what_you_see: false,
            show_progress_bars: false,
            num_accelerators: 1,
            gbuffer_reraster_interval: 8,
        }
    }
}

impl BakeSettings {
    /// GI passes a tile needs before it counts as converged. Saturates at `u32::MAX`; `validate`
    /// rejects settings whose sum does not fit.
    pub fn total_passes(&self) -> u32 {
        self.checked_total_passes().unwrap_or(u32::MAX)
    }

    fn checked_total_passes(&self) -> Option<u32> {
        let irradiance_cache = if self.use_irradiance_caching {
            self.irradiance_cache_quality
        } else {
            0
        };
        let ray_guiding = if self.use_first_bounce_ray_guiding {
            self.first_bounce_ray_guiding_trial_samples
        } else {
            0
        };
        self.gi_samples
            .checked_add(irradiance_cache)
            .and_then(|passes| passes.checked_add(ray_guiding))
    }

    pub fn samples_per_frame(&self, full_speed: bool) -> u32 {
        let requested = if full_speed {
            self.tile_passes_in_full_speed_mode
        } else {
            self.tile_passes_in_slow_mode
        };
        requested.min(self.total_passes())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.num_accelerators == 0 {
            return Err(SettingsError::NoAccelerators);
        }
        if self.num_accelerators > 32 {
            return Err(SettingsError::TooManyAccelerators {
                count: self.num_accelerators,
            });
        }
        if self.gbuffer_reraster_interval == 0 {
            return Err(SettingsError::ZeroRerasterInterval);
        }
        if self.checked_total_passes().is_none() {
            return Err(SettingsError::TotalPassesOverflow);
        }
        Ok(())
    }
}

/// Fixed budgets of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerLimits {
    pub max_requests_per_accelerator_per_frame: usize,
    pub max_scratch_pool_edge: u32,
    pub max_free_readback_groups: usize,
    pub work_per_frame_realtime: usize,
    pub work_per_frame_full_speed: usize,
    pub bake_what_you_see_budget: usize,
    pub visible_tile_history_frames: usize,
    pub progress_log_interval_frames: u64,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_requests_per_accelerator_per_frame: 128,
            max_scratch_pool_edge: 64,
            max_free_readback_groups: 100,
            work_per_frame_realtime: 32,
            work_per_frame_full_speed: 128,
            bake_what_you_see_budget: 512,
            visible_tile_history_frames: 60,
            progress_log_interval_frames: 100,
        }
    }
}

impl SchedulerLimits {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_scratch_pool_edge == 0 {
            return Err(SettingsError::ZeroScratchPoolEdge);
        }
        if self.visible_tile_history_frames == 0 {
            return Err(SettingsError::EmptyVisibleTileHistory);
        }
        if self.progress_log_interval_frames == 0 {
            return Err(SettingsError::ZeroProgressLogInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    NoAccelerators,
    TooManyAccelerators { count: u32 },
    ZeroRerasterInterval,
    TotalPassesOverflow,
    ZeroScratchPoolEdge,
    EmptyVisibleTileHistory,
    ZeroProgressLogInterval,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::NoAccelerators => {
                write!(formatter, "bake needs at least one accelerator")
            }
            SettingsError::TooManyAccelerators { count } => {
                write!(formatter, "{count} accelerators requested, at most 32 supported")
            }
            SettingsError::ZeroRerasterInterval => {
                write!(formatter, "G-buffer re-raster interval must be positive")
            }
            SettingsError::TotalPassesOverflow => {
                write!(formatter, "total GI pass count overflows u32")
            }
            SettingsError::ZeroScratchPoolEdge => {
                write!(formatter, "scratch pool edge limit must be positive")
            }
            SettingsError::EmptyVisibleTileHistory => {
                write!(formatter, "visible tile history needs at least one frame")
            }
            SettingsError::ZeroProgressLogInterval => {
                write!(formatter, "progress log interval must be positive")
            }
        }
    }
}

impl std::error::Error for SettingsError {}
