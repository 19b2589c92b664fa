use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Number of texel layers kept per tile on the CPU side and moved by uploads and readbacks.
pub const TILE_DATA_LAYERS: usize = 4;
/// Upper bound on output target references carried by a single tile request.
pub const MAX_OUTPUT_TARGETS: usize = 5;

const_assert!(TILE_DATA_LAYERS <= MAX_OUTPUT_TARGETS);

slotmap::new_key_type! {
    pub struct LightmapId;
    pub struct LightId;
}

/// Global invalidation counter. Every scene edit moves it forward; work tagged with an older
/// value is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u32);

impl Revision {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("revision counter overflow"))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TilePosition {
    pub x: u32,
    pub y: u32,
}

impl TilePosition {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A tile inside one lightmap's mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TileCoordinate {
    pub mip_level: u32,
    pub position: TilePosition,
}

impl TileCoordinate {
    pub const fn new(mip_level: u32, x: u32, y: u32) -> Self {
        Self {
            mip_level,
            position: TilePosition::new(x, y),
        }
    }

    /// Morton code of the tile position, the address virtual texturing uses for this tile.
    pub fn virtual_address(self) -> u64 {
        morton2(self.position.x) | (morton2(self.position.y) << 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualTileCoordinate {
    pub lightmap: LightmapId,
    pub tile: TileCoordinate,
}

impl VirtualTileCoordinate {
    pub const fn new(lightmap: LightmapId, tile: TileCoordinate) -> Self {
        Self { lightmap, tile }
    }

    pub const fn mip_level(&self) -> u32 {
        self.tile.mip_level
    }

    pub const fn position(&self) -> TilePosition {
        self.tile.position
    }

    /// Allocation order key: lightmap first, then virtual address.
    pub fn sort_key(&self) -> (LightmapId, u64, u32) {
        (self.lightmap, self.tile.virtual_address(), self.tile.mip_level)
    }
}

/// Interleaves the bits of `value` with zeros: bit `i` moves to bit `2 * i`.
pub fn morton2(value: u32) -> u64 {
    let mut spread = value as u64;
    spread = (spread | (spread << 16)) & 0x0000_ffff_0000_ffff;
    spread = (spread | (spread << 8)) & 0x00ff_00ff_00ff_00ff;
    spread = (spread | (spread << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    spread = (spread | (spread << 2)) & 0x3333_3333_3333_3333;
    spread = (spread | (spread << 1)) & 0x5555_5555_5555_5555;
    spread
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightCategory {
    Directional,
    Point,
    Spot,
    Rect,
}

impl LightCategory {
    pub const COUNT: usize = 4;
    /// Order in which shadow round-robin enumerates lights.
    pub const ALL: [LightCategory; Self::COUNT] = [
        LightCategory::Directional,
        LightCategory::Point,
        LightCategory::Spot,
        LightCategory::Rect,
    ];

    pub const fn index(self) -> usize {
        match self {
            LightCategory::Directional => 0,
            LightCategory::Point => 1,
            LightCategory::Spot => 2,
            LightCategory::Rect => 3,
        }
    }
}

/// Tile texel geometry. The physical tile carries a border on every side so filtering never
/// reads a neighbouring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileGeometry {
    pub virtual_edge: u32,
    pub border: u32,
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self {
            virtual_edge: 64,
            border: 2,
        }
    }
}

impl TileGeometry {
    pub fn physical_edge(self) -> u32 {
        self.border
            .checked_mul(2)
            .and_then(|borders| borders.checked_add(self.virtual_edge))
            .expect("physical tile edge overflow")
    }

    pub fn virtual_texels(self) -> usize {
        self.virtual_edge as usize * self.virtual_edge as usize
    }
}

pub type Texel = [f32; 4];

/// CPU copy of one virtual tile, without border.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    edge: u32,
    layers: [Box<[Texel]>; TILE_DATA_LAYERS],
}

impl TileImage {
    pub fn zeroed(edge: u32) -> Self {
        let texels = edge as usize * edge as usize;
        Self {
            edge,
            layers: std::array::from_fn(|_| vec![[0.0; 4]; texels].into_boxed_slice()),
        }
    }

    pub const fn edge(&self) -> u32 {
        self.edge
    }

    pub fn layer(&self, layer: usize) -> &[Texel] {
        &self.layers[layer]
    }

    pub fn layer_mut(&mut self, layer: usize) -> &mut [Texel] {
        &mut self.layers[layer]
    }

    pub fn texel(&self, layer: usize, x: u32, y: u32) -> Texel {
        assert!(x < self.edge && y < self.edge, "texel outside tile image");
        self.layers[layer][(y * self.edge + x) as usize]
    }

    pub fn set_texel(&mut self, layer: usize, x: u32, y: u32, texel: Texel) {
        assert!(x < self.edge && y < self.edge, "texel outside tile image");
        self.layers[layer][(y * self.edge + x) as usize] = texel;
    }
}
