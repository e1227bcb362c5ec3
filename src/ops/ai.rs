// ============================================================================
// BACKGROUND REMOVAL: produces the processed image whose alpha is the mask
// ============================================================================
//
// The editor never runs segmentation itself.  A `BackgroundRemover` takes the
// encoded source and returns an encoded image of the same size; its alpha
// channel seeds the mask.  Two local implementations are provided: a mask
// computed ahead of time, and a border-connected color key.

use std::collections::VecDeque;

use image::RgbaImage;
use rayon::prelude::*;
use thiserror::Error;

use crate::io::{self, ImageCrateDecoder, ImageDecoder};
use crate::log_info;

#[derive(Debug, Error)]
pub enum RemoveBgError {
    #[error("background removal is unavailable: {0}")]
    Unavailable(String),
    #[error("could not read the submitted image: {0}")]
    InvalidInput(String),
    #[error("background removal failed: {0}")]
    Failed(String),
}

/// Submits an encoded image and receives the encoded processed image.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(&self, image_bytes: &[u8]) -> Result<Vec<u8>, RemoveBgError>;
}

/// A processed image that already exists, e.g. a mask file on disk.
#[derive(Clone, Debug)]
pub struct PrecomputedMask {
    bytes: Vec<u8>,
}

impl PrecomputedMask {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl BackgroundRemover for PrecomputedMask {
    fn remove_background(&self, _image_bytes: &[u8]) -> Result<Vec<u8>, RemoveBgError> {
        if self.bytes.is_empty() {
            return Err(RemoveBgError::Unavailable("no mask was provided".into()));
        }
        Ok(self.bytes.clone())
    }
}

/// Settings for [`ColorKeyRemover`].
#[derive(Clone, Debug)]
pub struct ColorKeySettings {
    /// Max per-channel distance (0–255) from the key color still counted as
    /// background.
    pub tolerance: u8,
    /// Key color; `None` samples the top-left pixel.
    pub key: Option<[u8; 3]>,
}

impl Default for ColorKeySettings {
    fn default() -> Self {
        Self {
            tolerance: 24,
            key: None,
        }
    }
}

/// Removes a flat backdrop: every pixel connected to the image border whose
/// color is within tolerance of the key becomes transparent.
#[derive(Clone, Debug, Default)]
pub struct ColorKeyRemover {
    pub settings: ColorKeySettings,
}

impl ColorKeyRemover {
    pub fn new(settings: ColorKeySettings) -> Self {
        Self { settings }
    }

    /// Apply the key to decoded pixels.  Alpha becomes 0 for background and
    /// stays as in the input elsewhere.
    pub fn key_out(&self, pixels: &RgbaImage) -> RgbaImage {
        let (w, h) = pixels.dimensions();
        let mut out = pixels.clone();
        if w == 0 || h == 0 {
            return out;
        }

        let key = self.settings.key.unwrap_or_else(|| {
            let p = pixels.get_pixel(0, 0);
            [p[0], p[1], p[2]]
        });
        let tolerance = self.settings.tolerance;

        // Per-pixel key match, then a BFS from the border through matches
        let matches: Vec<bool> = pixels
            .as_raw()
            .par_chunks_exact(4)
            .map(|p| within_tolerance(p, key, tolerance))
            .collect();

        let mut background = vec![false; matches.len()];
        let mut queue = VecDeque::with_capacity(1024);
        let mut seed = |x: u32, y: u32, queue: &mut VecDeque<(u32, u32)>| {
            let idx = (y * w + x) as usize;
            if matches[idx] && !background[idx] {
                background[idx] = true;
                queue.push_back((x, y));
            }
        };
        for x in 0..w {
            seed(x, 0, &mut queue);
            seed(x, h - 1, &mut queue);
        }
        for y in 0..h {
            seed(0, y, &mut queue);
            seed(w - 1, y, &mut queue);
        }

        while let Some((px, py)) = queue.pop_front() {
            let neighbors = [
                (px.wrapping_sub(1), py),
                (px + 1, py),
                (px, py.wrapping_sub(1)),
                (px, py + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= w || ny >= h {
                    continue;
                }
                let idx = (ny * w + nx) as usize;
                if matches[idx] && !background[idx] {
                    background[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        let dst: &mut [u8] = &mut out;
        dst.par_chunks_exact_mut(4)
            .zip(background.par_iter())
            .for_each(|(px, &bg)| {
                if bg {
                    px[3] = 0;
                }
            });
        out
    }
}

fn within_tolerance(p: &[u8], key: [u8; 3], tolerance: u8) -> bool {
    p[3] == 0 || (0..3).all(|c| p[c].abs_diff(key[c]) <= tolerance)
}

impl BackgroundRemover for ColorKeyRemover {
    fn remove_background(&self, image_bytes: &[u8]) -> Result<Vec<u8>, RemoveBgError> {
        let pixels = ImageCrateDecoder
            .decode(image_bytes)
            .map_err(|e| RemoveBgError::InvalidInput(e.to_string()))?;
        let keyed = self.key_out(&pixels);
        let removed = keyed.pixels().filter(|p| p[3] == 0).count();
        log_info!(
            "[AI] Color key removed {} of {} pixels (tolerance {})",
            removed,
            keyed.width() as usize * keyed.height() as usize,
            self.settings.tolerance
        );
        io::encode_png(&keyed).map_err(|e| RemoveBgError::Failed(e.to_string()))
    }
}
