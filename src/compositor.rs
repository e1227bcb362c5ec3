//! Viewport frame rendering: background, ghost original, masked result.
//!
//! A frame is a pure function of (viewport size, transform, source, mask,
//! background).  The only state kept between frames is the image-resolution
//! masked composite, reused while the mask generation is unchanged so that
//! pan/zoom redraws skip the per-pixel mask pass.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{MaskBuffer, Point, Transform};

/// Opacity of the unmasked source drawn under the result.
pub const GHOST_OPACITY: f32 = 0.2;
/// Checkerboard tile edge in viewport pixels.
pub const CHECKER_SIZE: u32 = 20;
pub const CHECKER_DARK: Rgba<u8> = Rgba([0x18, 0x18, 0x1b, 255]);
pub const CHECKER_LIGHT: Rgba<u8> = Rgba([0x27, 0x27, 0x2a, 255]);

pub const WHITE: [u8; 3] = [255, 255, 255];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// What fills the viewport behind the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackgroundMode {
    #[default]
    Checkerboard,
    Solid([u8; 3]),
}

impl BackgroundMode {
    pub const WHITE: BackgroundMode = BackgroundMode::Solid(WHITE);
    pub const BLACK: BackgroundMode = BackgroundMode::Solid(BLACK);

    /// Toolbar toggle order: checkerboard → white → black → checkerboard.
    pub fn next(self) -> Self {
        match self {
            BackgroundMode::Checkerboard => BackgroundMode::WHITE,
            BackgroundMode::Solid(WHITE) => BackgroundMode::BLACK,
            BackgroundMode::Solid(_) => BackgroundMode::Checkerboard,
        }
    }

    pub fn config_name(self) -> String {
        match self {
            BackgroundMode::Checkerboard => "checkerboard".to_string(),
            BackgroundMode::Solid(WHITE) => "white".to_string(),
            BackgroundMode::Solid(BLACK) => "black".to_string(),
            BackgroundMode::Solid([r, g, b]) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        }
    }

    /// Parse `checkerboard`, `white`, `black` or `#rrggbb`.
    pub fn from_config_name(name: &str) -> Option<Self> {
        let name = name.trim();
        match name.to_ascii_lowercase().as_str() {
            "checkerboard" => return Some(BackgroundMode::Checkerboard),
            "white" => return Some(BackgroundMode::WHITE),
            "black" => return Some(BackgroundMode::BLACK),
            _ => {}
        }
        let hex = name.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(BackgroundMode::Solid([channel(0)?, channel(2)?, channel(4)?]))
    }

    /// Background color of viewport pixel `(x, y)`.
    pub fn color_at(self, x: u32, y: u32) -> Rgba<u8> {
        match self {
            BackgroundMode::Checkerboard => {
                if (x / CHECKER_SIZE + y / CHECKER_SIZE) % 2 == 0 {
                    CHECKER_LIGHT
                } else {
                    CHECKER_DARK
                }
            }
            BackgroundMode::Solid([r, g, b]) => Rgba([r, g, b, 255]),
        }
    }
}

struct MaskedComposite {
    generation: u64,
    image: RgbaImage,
}

/// Renders viewport frames.
pub struct Compositor {
    ghost_opacity: f32,
    masked: Option<MaskedComposite>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            ghost_opacity: GHOST_OPACITY,
            masked: None,
        }
    }

    /// The source masked by the current mask at native resolution.
    pub fn masked_composite(&mut self, source: &RgbaImage, mask: &MaskBuffer) -> &RgbaImage {
        let stale = self
            .masked
            .as_ref()
            .is_none_or(|m| m.generation != mask.generation());
        if stale {
            self.masked = None;
        }
        let masked = self.masked.get_or_insert_with(|| MaskedComposite {
            generation: mask.generation(),
            image: mask.composite(source),
        });
        &masked.image
    }

    /// Render one full viewport frame.
    pub fn render(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
        view: &Transform,
        source: &RgbaImage,
        mask: &MaskBuffer,
        background: BackgroundMode,
    ) -> RgbaImage {
        let mut frame = RgbaImage::new(viewport_width, viewport_height);
        if viewport_width == 0 || viewport_height == 0 {
            return frame;
        }

        let ghost_opacity = self.ghost_opacity;
        let masked = self.masked_composite(source, mask);
        let image_w = source.width().min(masked.width()) as f32;
        let image_h = source.height().min(masked.height()) as f32;
        let row_bytes = viewport_width as usize * 4;

        let dst: &mut [u8] = &mut frame;
        dst.par_chunks_exact_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as u32;
                for (x, out) in row.chunks_exact_mut(4).enumerate() {
                    let x = x as u32;
                    let mut px = background.color_at(x, y);

                    // Nearest-neighbour sample at the viewport pixel center
                    let p = view.screen_to_image(Point::new(x as f32 + 0.5, y as f32 + 0.5));
                    if p.x >= 0.0 && p.y >= 0.0 && p.x < image_w && p.y < image_h {
                        let (ix, iy) = (p.x as u32, p.y as u32);
                        px = blend_over(px, *source.get_pixel(ix, iy), ghost_opacity);
                        px = blend_over(px, *masked.get_pixel(ix, iy), 1.0);
                    }

                    out.copy_from_slice(&px.0);
                }
            });

        frame
    }
}

/// Straight-alpha source-over with an extra opacity multiplier on `top`.
fn blend_over(base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let ta = top[3] as f32 / 255.0 * opacity;
    if ta <= 0.0 {
        return base;
    }
    let ba = base[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let c = (top[i] as f32 * ta + base[i] as f32 * ba * (1.0 - ta)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
