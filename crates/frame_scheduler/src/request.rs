use std::collections::HashMap;
use std::fmt;

use model::{MAX_OUTPUT_TARGETS, TilePosition, VirtualTileCoordinate};
use scene::SceneRenderState;
use smallvec::SmallVec;
use tiles::TileSlot;

/// Physical tile position a request writes its result to in one output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputTarget {
    pub layer: u32,
    pub position: TilePosition,
}

/// One tile the renderer asked for this frame, plus the slots it received during allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub coordinate: VirtualTileCoordinate,
    pub output_targets: SmallVec<[OutputTarget; MAX_OUTPUT_TARGETS]>,
    pub working_set: Option<TileSlot>,
    pub scratch: Option<TileSlot>,
}

impl TileRequest {
    pub fn new(coordinate: VirtualTileCoordinate, output_targets: &[OutputTarget]) -> Self {
        Self {
            coordinate,
            output_targets: output_targets.iter().copied().collect(),
            working_set: None,
            scratch: None,
        }
    }

    /// Requests writing to an output layer come from on-screen feedback.
    pub fn is_screen_output(&self) -> bool {
        !self.output_targets.is_empty()
    }

    pub fn target_on_layer(&self, layer: u32) -> Option<&OutputTarget> {
        self.output_targets
            .iter()
            .find(|target| target.layer == layer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    UnknownLightmap,
    TileOutOfRange,
    TooManyOutputTargets { count: usize },
    InvalidOutputLayer { layer: u32 },
}

impl fmt::Display for RequestError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::UnknownLightmap => {
                write!(formatter, "tile request names a lightmap that no longer exists")
            }
            RequestError::TileOutOfRange => {
                write!(formatter, "tile request lies outside the lightmap's mip chain")
            }
            RequestError::TooManyOutputTargets { count } => write!(
                formatter,
                "tile request has {count} output targets, at most {MAX_OUTPUT_TARGETS} allowed"
            ),
            RequestError::InvalidOutputLayer { layer } => write!(
                formatter,
                "output layer {layer} out of range, at most {MAX_OUTPUT_TARGETS} layers"
            ),
        }
    }
}

impl std::error::Error for RequestError {}

pub fn validate_request(
    scene: &SceneRenderState,
    coordinate: &VirtualTileCoordinate,
    output_targets: &[OutputTarget],
) -> Result<(), RequestError> {
    let lightmap = scene
        .lightmap(coordinate.lightmap)
        .ok_or(RequestError::UnknownLightmap)?;
    if !lightmap.layout().contains(coordinate.tile) {
        return Err(RequestError::TileOutOfRange);
    }
    if output_targets.len() > MAX_OUTPUT_TARGETS {
        return Err(RequestError::TooManyOutputTargets {
            count: output_targets.len(),
        });
    }
    if let Some(target) = output_targets
        .iter()
        .find(|target| target.layer as usize >= MAX_OUTPUT_TARGETS)
    {
        return Err(RequestError::InvalidOutputLayer {
            layer: target.layer,
        });
    }
    Ok(())
}

/// Pending requests of the current frame, unique per virtual tile.
#[derive(Debug, Default)]
pub struct RequestBatcher {
    pending: Vec<TileRequest>,
    index_by_coordinate: HashMap<VirtualTileCoordinate, usize>,
}

impl RequestBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request. A repeated coordinate merges its output targets into the first request and
    /// returns `false`.
    pub fn add(
        &mut self,
        coordinate: VirtualTileCoordinate,
        output_targets: &[OutputTarget],
    ) -> bool {
        match self.index_by_coordinate.get(&coordinate) {
            Some(&index) => {
                let request = &mut self.pending[index];
                for target in output_targets {
                    if !request.output_targets.contains(target)
                        && request.output_targets.len() < MAX_OUTPUT_TARGETS
                    {
                        request.output_targets.push(*target);
                    }
                }
                false
            }
            None => {
                self.index_by_coordinate
                    .insert(coordinate, self.pending.len());
                self.pending.push(TileRequest::new(coordinate, output_targets));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, coordinate: &VirtualTileCoordinate) -> bool {
        self.index_by_coordinate.contains_key(coordinate)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.index_by_coordinate.clear();
    }

    pub fn take(&mut self) -> Vec<TileRequest> {
        self.index_by_coordinate.clear();
        std::mem::take(&mut self.pending)
    }

    /// Allocation order: lightmap handle, then virtual address, then mip level.
    pub fn sort_for_allocation(requests: &mut [TileRequest]) {
        requests.sort_by_key(|request| request.coordinate.sort_key());
    }

    /// Keeps a frame-rotating window of `max_len` requests when the batch is larger.
    pub fn throttle(
        requests: Vec<TileRequest>,
        max_len: usize,
        frame_number: u64,
    ) -> Vec<TileRequest> {
        if requests.len() <= max_len || max_len == 0 {
            return requests;
        }
        let divisor = requests.len().div_ceil(max_len) as u64;
        let phase = frame_number % divisor;
        let kept: Vec<TileRequest> = requests
            .into_iter()
            .enumerate()
            .filter(|(index, _)| *index as u64 % divisor == phase)
            .map(|(_, request)| request)
            .collect();
        log::debug!(
            "throttled pending requests to {} (phase {phase} of {divisor})",
            kept.len()
        );
        kept
    }
}
