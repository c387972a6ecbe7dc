//! RGB frames and batch tiling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Display as a side effect; nothing is returned.
    Human,
    /// Return an RGB frame.
    RgbArray,
}

/// A row-major `height × width × 3` RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn black(width: usize, height: usize) -> Self {
        Self::filled(width, height, [0, 0, 0])
    }

    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let pixels = rgb.iter().copied().cycle().take(width * height * Self::CHANNELS).collect();
        Self { width, height, pixels }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * Self::CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }
}

/// Tile equally sized frames into one image.
///
/// `N` frames go on a grid of `⌈√N⌉` rows and `⌈N / rows⌉` columns, filled
/// row by row; empty cells are black. Returns `None` for no frames or for
/// frames of differing sizes.
pub fn tile_frames(frames: &[Frame]) -> Option<Frame> {
    let first = frames.first()?;
    let (w, h) = (first.width, first.height);
    if frames.iter().any(|f| f.width != w || f.height != h) {
        return None;
    }

    let n = frames.len();
    let rows = (n as f64).sqrt().ceil() as usize;
    let cols = n.div_ceil(rows);
    let out_w = cols * w;
    let row_bytes = w * Frame::CHANNELS;
    let mut pixels = vec![0u8; rows * h * out_w * Frame::CHANNELS];

    for (k, frame) in frames.iter().enumerate() {
        let (grid_row, grid_col) = (k / cols, k % cols);
        for y in 0..h {
            let dst = ((grid_row * h + y) * out_w + grid_col * w) * Frame::CHANNELS;
            let src = y * row_bytes;
            pixels[dst..dst + row_bytes].copy_from_slice(&frame.pixels[src..src + row_bytes]);
        }
    }

    Some(Frame {
        width: out_w,
        height: rows * h,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_frames_on_two_by_two_grid() {
        let frames = vec![
            Frame::filled(2, 1, [1, 1, 1]),
            Frame::filled(2, 1, [2, 2, 2]),
            Frame::filled(2, 1, [3, 3, 3]),
        ];
        let tiled = tile_frames(&frames).unwrap();
        assert_eq!((tiled.width, tiled.height), (4, 2));

        assert_eq!(tiled.pixel(0, 0), [1, 1, 1]);
        assert_eq!(tiled.pixel(2, 0), [2, 2, 2]);
        assert_eq!(tiled.pixel(1, 1), [3, 3, 3]);
        // Padding cell.
        assert_eq!(tiled.pixel(3, 1), [0, 0, 0]);
    }

    #[test]
    fn test_single_frame_is_unchanged() {
        let frame = Frame::filled(3, 2, [9, 8, 7]);
        assert_eq!(tile_frames(std::slice::from_ref(&frame)), Some(frame));
    }

    #[test]
    fn test_empty_or_mismatched() {
        assert_eq!(tile_frames(&[]), None);
        assert_eq!(tile_frames(&[Frame::black(1, 1), Frame::black(2, 1)]), None);
    }
}
