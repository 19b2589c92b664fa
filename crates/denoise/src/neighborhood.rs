use model::{TILE_DATA_LAYERS, Texel, TileImage};

/// Tiles per side of the square neighbourhood handed to the denoiser.
pub const DENOISE_TILE_PROXIMITY: u32 = 3;

/// `DENOISE_TILE_PROXIMITY` x `DENOISE_TILE_PROXIMITY` tiles stitched into one image, the tile
/// being denoised in the centre.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodImage {
    tile_edge: u32,
    layers: [Vec<Texel>; TILE_DATA_LAYERS],
}

impl NeighborhoodImage {
    pub fn zeroed(tile_edge: u32) -> Self {
        let edge = (tile_edge * DENOISE_TILE_PROXIMITY) as usize;
        Self {
            tile_edge,
            layers: std::array::from_fn(|_| vec![[0.0; 4]; edge * edge]),
        }
    }

    pub const fn tile_edge(&self) -> u32 {
        self.tile_edge
    }

    pub const fn edge(&self) -> u32 {
        self.tile_edge * DENOISE_TILE_PROXIMITY
    }

    pub fn layer(&self, layer: usize) -> &[Texel] {
        &self.layers[layer]
    }

    pub fn layer_mut(&mut self, layer: usize) -> &mut [Texel] {
        &mut self.layers[layer]
    }

    /// Copies `image` into the neighbourhood cell (`cell_x`, `cell_y`).
    pub fn write_tile(&mut self, cell_x: u32, cell_y: u32, image: &TileImage) {
        assert!(
            cell_x < DENOISE_TILE_PROXIMITY && cell_y < DENOISE_TILE_PROXIMITY,
            "neighbourhood cell ({cell_x}, {cell_y}) out of range"
        );
        assert_eq!(
            image.edge(),
            self.tile_edge,
            "tile edge does not match neighbourhood"
        );
        let edge = self.edge() as usize;
        let tile_edge = self.tile_edge as usize;
        for (layer, destination) in self.layers.iter_mut().enumerate() {
            let source = image.layer(layer);
            for row in 0..tile_edge {
                let start =
                    (cell_y as usize * tile_edge + row) * edge + cell_x as usize * tile_edge;
                destination[start..start + tile_edge]
                    .copy_from_slice(&source[row * tile_edge..(row + 1) * tile_edge]);
            }
        }
    }

    pub fn center_tile(&self) -> TileImage {
        let center = DENOISE_TILE_PROXIMITY / 2;
        let edge = self.edge() as usize;
        let tile_edge = self.tile_edge as usize;
        let mut image = TileImage::zeroed(self.tile_edge);
        for (layer, source) in self.layers.iter().enumerate() {
            let destination = image.layer_mut(layer);
            for row in 0..tile_edge {
                let start =
                    (center as usize * tile_edge + row) * edge + center as usize * tile_edge;
                destination[row * tile_edge..(row + 1) * tile_edge]
                    .copy_from_slice(&source[start..start + tile_edge]);
            }
        }
        image
    }
}
