use model::{LightCategory, LightId, Revision};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSampleCount {
    pub light: LightId,
    pub samples: u32,
}

/// Shadow sample counts of every stationary light relevant to one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelevantLightSampleState {
    categories: [Vec<LightSampleCount>; LightCategory::COUNT],
    round_robin_index: u32,
}

impl RelevantLightSampleState {
    /// Restarts every count at zero for the given light set.
    pub fn reset(&mut self, lights: impl IntoIterator<Item = (LightCategory, LightId)>) {
        for counts in &mut self.categories {
            counts.clear();
        }
        for (category, light) in lights {
            self.categories[category.index()].push(LightSampleCount { light, samples: 0 });
        }
        self.round_robin_index = 0;
    }

    pub fn lights(&self, category: LightCategory) -> &[LightSampleCount] {
        &self.categories[category.index()]
    }

    pub fn sample_count(&self, light: LightId) -> Option<u32> {
        self.categories
            .iter()
            .flatten()
            .find(|count| count.light == light)
            .map(|count| count.samples)
    }

    pub const fn round_robin_index(&self) -> u32 {
        self.round_robin_index
    }

    pub fn is_converged(&self, target_samples: u32) -> bool {
        self.categories
            .iter()
            .flatten()
            .all(|count| count.samples >= target_samples)
    }

    /// Lights still below `target_samples`, directional first, then point, spot and rect.
    pub fn unconverged_lights(
        &self,
        target_samples: u32,
    ) -> SmallVec<[(LightCategory, LightId); 8]> {
        LightCategory::ALL
            .iter()
            .flat_map(|category| {
                self.categories[category.index()]
                    .iter()
                    .filter(move |count| count.samples < target_samples)
                    .map(move |count| (*category, count.light))
            })
            .collect()
    }

    /// Picks the next unconverged light in round-robin order and charges one sample to it.
    pub fn pick_next_light(&mut self, target_samples: u32) -> Option<(LightCategory, LightId)> {
        let candidates = self.unconverged_lights(target_samples);
        if candidates.is_empty() {
            return None;
        }
        let picked = candidates[self.round_robin_index as usize % candidates.len()];
        self.round_robin_index = self.round_robin_index.wrapping_add(1);
        let count = self.categories[picked.0.index()]
            .iter_mut()
            .find(|count| count.light == picked.1)
            .expect("picked light must be tracked");
        count.samples += 1;
        Some(picked)
    }
}

/// Convergence bookkeeping of one virtual tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileState {
    /// Revision the accumulated data belongs to. `None` marks the tile stale.
    pub revision: Option<Revision>,
    pub render_pass_index: u32,
    pub ongoing_readback_revision: Option<Revision>,
    pub can_be_denoised: bool,
    pub cpu_revision: Option<Revision>,
    pub was_denoised_without_proximity: bool,
    pub lights: RelevantLightSampleState,
}

impl TileState {
    pub fn invalidate(&mut self) {
        self.revision = None;
        self.render_pass_index = 0;
    }

    pub fn is_gi_converged(&self, total_passes: u32) -> bool {
        self.render_pass_index >= total_passes
    }

    pub fn is_shadow_converged(&self, target_samples: u32) -> bool {
        self.lights.is_converged(target_samples)
    }

    pub fn has_cpu_data_for(&self, revision: Revision) -> bool {
        self.cpu_revision == Some(revision)
    }

    pub fn has_readback_in_flight(&self, revision: Revision) -> bool {
        self.ongoing_readback_revision == Some(revision)
    }

    pub fn record_gi_pass(&mut self, total_passes: u32) {
        assert!(
            self.render_pass_index < total_passes,
            "GI pass dispatched to a converged tile ({} of {total_passes} passes)",
            self.render_pass_index
        );
        self.render_pass_index += 1;
    }
}

/// Lazily created tile states of one lightmap, addressed by dense tile-state index.
#[derive(Debug, Clone)]
pub struct TileConvergenceTracker {
    states: Vec<Option<TileState>>,
}

impl TileConvergenceTracker {
    pub fn new(tile_count: u32) -> Self {
        Self {
            states: vec![None; tile_count as usize],
        }
    }

    pub fn get(&self, index: u32) -> Option<&TileState> {
        self.states.get(index as usize).and_then(Option::as_ref)
    }

    pub fn retrieve(&mut self, index: u32) -> &mut TileState {
        self.states
            .get_mut(index as usize)
            .expect("tile state index outside lightmap")
            .get_or_insert_with(TileState::default)
    }

    pub fn created_count(&self) -> usize {
        self.states.iter().filter(|state| state.is_some()).count()
    }
}
