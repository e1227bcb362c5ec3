use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::components::history::MaskSnapshot;
use crate::log_warn;

/// Smallest allowed view scale (10%).
pub const MIN_ZOOM: f32 = 0.1;
/// Largest allowed view scale (500%).
pub const MAX_ZOOM: f32 = 5.0;
/// Scale increment used by the wheel and the zoom buttons.
pub const ZOOM_STEP: f32 = 0.1;

/// Pixel written by the Erase tool ("destination-out").
pub const ERASED_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);
/// Pixel written by the Restore tool (opaque white, "source-over").
pub const RESTORED_PIXEL: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ============================================================================
// POINT
// ============================================================================

/// A 2D position, either in screen space or in image space depending on context.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

// ============================================================================
// TRANSFORM – screen ↔ image mapping with pan/zoom
// ============================================================================

/// Uniform scale plus translation from image space to screen space.
///
/// `screen = image * scale + offset` and `image = (screen - offset) / scale`.
/// The scale is kept inside `[MIN_ZOOM, MAX_ZOOM]` by every constructor and
/// mutator; the offset is unconstrained, so the image may be panned fully
/// out of view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

fn clamp_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return MIN_ZOOM;
    }
    scale.clamp(MIN_ZOOM, MAX_ZOOM)
}

impl Transform {
    pub fn new(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self {
            scale: clamp_scale(scale),
            offset_x,
            offset_y,
        }
    }

    /// Fit an image inside the viewport with `margin` pixels on every side and
    /// center it.  Never upscales past 100% on the initial fit.
    pub fn fit_to_viewport(
        image_width: u32,
        image_height: u32,
        viewport_width: f32,
        viewport_height: f32,
        margin: f32,
    ) -> Self {
        if image_width == 0 || image_height == 0 {
            return Self::default();
        }
        let iw = image_width as f32;
        let ih = image_height as f32;
        let scale_w = (viewport_width - 2.0 * margin) / iw;
        let scale_h = (viewport_height - 2.0 * margin) / ih;
        let scale = clamp_scale(scale_w.min(scale_h).min(1.0));

        Self {
            scale,
            offset_x: (viewport_width - iw * scale) / 2.0,
            offset_y: (viewport_height - ih * scale) / 2.0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> Point {
        Point::new(self.offset_x, self.offset_y)
    }

    /// Scale as a whole percentage, for status display.
    pub fn zoom_percent(&self) -> u32 {
        (self.scale * 100.0).round() as u32
    }

    pub fn screen_to_image(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.offset_x) / self.scale,
            (screen.y - self.offset_y) / self.scale,
        )
    }

    pub fn image_to_screen(&self, image: Point) -> Point {
        Point::new(
            image.x * self.scale + self.offset_x,
            image.y * self.scale + self.offset_y,
        )
    }

    /// Zoom while keeping the image point under `anchor` (screen space) fixed.
    /// Returns `false` when the scale is already saturated in that direction.
    pub fn zoom_at(&mut self, anchor: Point, delta: f32) -> bool {
        let new_scale = clamp_scale(self.scale + delta);
        if new_scale == self.scale {
            return false;
        }
        let image_point = self.screen_to_image(anchor);
        self.offset_x = anchor.x - image_point.x * new_scale;
        self.offset_y = anchor.y - image_point.y * new_scale;
        self.scale = new_scale;
        true
    }

    /// Zoom without an anchor: the offset stays where it is, so the image
    /// grows/shrinks from its top-left corner (toolbar buttons).
    pub fn zoom_by(&mut self, delta: f32) -> bool {
        let new_scale = clamp_scale(self.scale + delta);
        if new_scale == self.scale {
            return false;
        }
        self.scale = new_scale;
        true
    }

    /// Pan the view by a screen-space delta.
    pub fn pan_by(&mut self, dx: f32, dy: f32) -> bool {
        if dx == 0.0 && dy == 0.0 {
            return false;
        }
        self.offset_x += dx;
        self.offset_y += dy;
        true
    }
}

// ============================================================================
// MASK BUFFER
// ============================================================================

/// How a brush dab modifies the mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PaintMode {
    /// Clear alpha and color under the brush.
    #[default]
    Erase,
    /// Write opaque white under the brush.
    Restore,
}

impl PaintMode {
    pub fn fill(self) -> Rgba<u8> {
        match self {
            PaintMode::Erase => ERASED_PIXEL,
            PaintMode::Restore => RESTORED_PIXEL,
        }
    }

    pub fn stroke_description(self) -> &'static str {
        match self {
            PaintMode::Erase => "Erase Stroke",
            PaintMode::Restore => "Restore Stroke",
        }
    }
}

/// Image-sized RGBA mask.  Only the alpha channel decides which source pixels
/// survive compositing; color is carried so that a restored region is
/// distinguishable while editing.
///
/// Dimensions are fixed at construction and never change.
#[derive(Clone, Debug)]
pub struct MaskBuffer {
    pixels: RgbaImage,
    /// Bumped on every content change (paint that touched pixels, restore).
    generation: u64,
}

impl MaskBuffer {
    /// Wrap an externally produced mask image (e.g. a background-removal cutout).
    pub fn from_image(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            generation: 0,
        }
    }

    /// A mask where every pixel has been erased or restored.
    pub fn filled(width: u32, height: u32, mode: PaintMode) -> Self {
        Self::from_image(RgbaImage::from_pixel(width, height, mode.fill()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.width() && y < self.height() {
            Some(*self.pixels.get_pixel(x, y))
        } else {
            None
        }
    }

    /// Alpha at `(x, y)`; out-of-bounds reads as fully erased.
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.pixel(x, y).map_or(0, |p| p[3])
    }

    /// Number of pixels with non-zero alpha.
    pub fn visible_pixel_count(&self) -> usize {
        self.pixels
            .as_raw()
            .par_chunks_exact(4)
            .filter(|px| px[3] > 0)
            .count()
    }

    /// Paint a filled circle in image space.
    ///
    /// A pixel is covered when its center `(x + 0.5, y + 0.5)` lies within
    /// `radius` of `center`.  Pixels outside the buffer are clipped.  A
    /// non-positive radius paints nothing.  Returns the number of covered
    /// pixels.
    pub fn paint_circle(&mut self, center: Point, radius: f32, mode: PaintMode) -> usize {
        if radius.is_nan() || radius <= 0.0 || !center.x.is_finite() || !center.y.is_finite() {
            return 0;
        }
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 {
            return 0;
        }

        let min_x = (center.x - radius - 0.5).ceil().max(0.0);
        let min_y = (center.y - radius - 0.5).ceil().max(0.0);
        let max_x = (center.x + radius - 0.5).floor().min(w as f32 - 1.0);
        let max_y = (center.y + radius - 0.5).floor().min(h as f32 - 1.0);
        if min_x > max_x || min_y > max_y {
            return 0;
        }

        let r2 = radius * radius;
        let fill = mode.fill();
        let mut covered = 0;
        for y in min_y as u32..=max_y as u32 {
            let dy = y as f32 + 0.5 - center.y;
            for x in min_x as u32..=max_x as u32 {
                let dx = x as f32 + 0.5 - center.x;
                if dx * dx + dy * dy <= r2 {
                    self.pixels.put_pixel(x, y, fill);
                    covered += 1;
                }
            }
        }

        if covered > 0 {
            self.generation += 1;
        }
        covered
    }

    /// Keep the source color where the mask is opaque ("source-in").
    ///
    /// Output alpha is `source_alpha * mask_alpha / 255`; where the mask is
    /// fully erased the output is transparent black.  The result has the
    /// mask's dimensions.
    pub fn composite(&self, source: &RgbaImage) -> RgbaImage {
        let (w, h) = self.pixels.dimensions();
        let mut out = RgbaImage::new(w, h);
        {
            let dst: &mut [u8] = &mut out;
            dst.par_chunks_exact_mut(4)
                .zip(self.pixels.as_raw().par_chunks_exact(4))
                .zip(source.as_raw().par_chunks_exact(4))
                .for_each(|((d, m), s)| {
                    let mask_alpha = m[3];
                    if mask_alpha == 0 {
                        return;
                    }
                    d[0] = s[0];
                    d[1] = s[1];
                    d[2] = s[2];
                    d[3] = mul_div_255(s[3], mask_alpha);
                });
        }
        out
    }

    /// Deep copy of the current pixels for the history stack.
    pub fn snapshot(&self) -> MaskSnapshot {
        MaskSnapshot::capture(self)
    }

    /// Overwrite every pixel from a snapshot.  A snapshot of different
    /// dimensions is refused (logged, returns `false`).
    pub fn restore(&mut self, snapshot: &MaskSnapshot) -> bool {
        if snapshot.dimensions() != self.dimensions() {
            log_warn!(
                "MaskBuffer::restore: snapshot {:?} does not match mask {:?}",
                snapshot.dimensions(),
                self.dimensions()
            );
            return false;
        }
        let dst: &mut [u8] = &mut self.pixels;
        dst.copy_from_slice(snapshot.pixels());
        self.generation += 1;
        true
    }
}

/// `a * b / 255` rounded, for 8-bit alpha products.
pub(crate) fn mul_div_255(a: u8, b: u8) -> u8 {
    ((a as u16 * b as u16 + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS
    }

    #[test]
    fn screen_image_round_trip() {
        let transforms = [
            Transform::default(),
            Transform::new(0.37, 12.5, -80.0),
            Transform::new(4.2, -300.0, 41.0),
            Transform::new(0.1, 1000.0, 1000.0),
        ];
        let points = [
            Point::new(0.0, 0.0),
            Point::new(17.25, 903.5),
            Point::new(-40.0, 12.0),
            Point::new(4096.0, 2048.0),
        ];
        for t in &transforms {
            for &p in &points {
                let back = t.screen_to_image(t.image_to_screen(p));
                assert!(close(back, p), "{:?} -> {:?} via {:?}", p, back, t);
            }
        }
    }

    #[test]
    fn scale_is_clamped_on_construction() {
        assert_eq!(Transform::new(100.0, 0.0, 0.0).scale(), MAX_ZOOM);
        assert_eq!(Transform::new(0.0, 0.0, 0.0).scale(), MIN_ZOOM);
        assert_eq!(Transform::new(f32::NAN, 0.0, 0.0).scale(), MIN_ZOOM);
    }

    #[test]
    fn zoom_keeps_point_under_cursor() {
        let mut t = Transform::new(0.8, 35.0, -12.0);
        let anchor = Point::new(412.0, 233.0);
        for delta in [0.1, 0.5, -0.3, 1.7, -2.0] {
            let before = t.screen_to_image(anchor);
            t.zoom_at(anchor, delta);
            let after = t.screen_to_image(anchor);
            assert!(close(before, after), "{:?} != {:?}", before, after);
        }
    }

    #[test]
    fn repeated_zoom_saturates_at_max() {
        let mut t = Transform::default();
        let anchor = Point::new(50.0, 50.0);
        let mut changed = 0;
        for _ in 0..20 {
            if t.zoom_at(anchor, 0.5) {
                changed += 1;
            }
        }
        assert_eq!(t.scale(), MAX_ZOOM);
        assert_eq!(changed, 8);
        assert!(!t.zoom_at(anchor, 0.5));
        assert!(t.offset().x.is_finite() && t.offset().y.is_finite());
    }

    #[test]
    fn zoom_out_saturates_at_min() {
        let mut t = Transform::new(0.3, 0.0, 0.0);
        t.zoom_by(-0.1);
        t.zoom_by(-0.1);
        t.zoom_by(-0.1);
        assert!((t.scale() - MIN_ZOOM).abs() < 1e-6);
        assert!(!t.zoom_by(-0.1));
    }

    #[test]
    fn fit_centers_small_image_without_upscaling() {
        let t = Transform::fit_to_viewport(100, 50, 800.0, 600.0, 20.0);
        assert_eq!(t.scale(), 1.0);
        assert!(close(t.offset(), Point::new(350.0, 275.0)));
    }

    #[test]
    fn fit_shrinks_large_image() {
        let t = Transform::fit_to_viewport(2000, 1000, 840.0, 640.0, 20.0);
        // (840-40)/2000 = 0.4 wins over (640-40)/1000 = 0.6
        assert!((t.scale() - 0.4).abs() < 1e-6);
        assert!(close(t.offset(), Point::new(20.0, 120.0)));
    }

    #[test]
    fn fit_clamps_to_min_zoom() {
        let t = Transform::fit_to_viewport(100_000, 100_000, 800.0, 600.0, 20.0);
        assert_eq!(t.scale(), MIN_ZOOM);
    }

    #[test]
    fn pan_is_unconstrained() {
        let mut t = Transform::default();
        assert!(t.pan_by(-5000.0, 12.0));
        assert!(!t.pan_by(0.0, 0.0));
        assert!(close(t.offset(), Point::new(-5000.0, 12.0)));
    }

    #[test]
    fn zoom_percent_rounds() {
        assert_eq!(Transform::new(0.456, 0.0, 0.0).zoom_percent(), 46);
    }

    #[test]
    fn erase_circle_punches_hole() {
        let mut mask = MaskBuffer::filled(100, 100, PaintMode::Restore);
        let covered = mask.paint_circle(Point::new(50.0, 50.0), 10.0, PaintMode::Erase);
        assert!(covered > 300 && covered < 330, "covered {}", covered);
        assert_eq!(mask.alpha(50, 50), 0);
        assert_eq!(mask.alpha(50, 40), 0);
        assert_eq!(mask.alpha(50, 61), 255);
        assert_eq!(mask.alpha(0, 0), 255);
        assert_eq!(mask.visible_pixel_count(), 100 * 100 - covered);
    }

    #[test]
    fn restore_writes_opaque_white() {
        let mut mask = MaskBuffer::filled(20, 20, PaintMode::Erase);
        mask.paint_circle(Point::new(10.0, 10.0), 3.0, PaintMode::Restore);
        assert_eq!(mask.pixel(10, 10), Some(RESTORED_PIXEL));
        assert_eq!(mask.pixel(0, 0), Some(ERASED_PIXEL));
    }

    #[test]
    fn paint_is_idempotent() {
        let mut once = MaskBuffer::filled(40, 40, PaintMode::Restore);
        once.paint_circle(Point::new(13.3, 21.7), 6.5, PaintMode::Erase);
        let mut twice = once.clone();
        twice.paint_circle(Point::new(13.3, 21.7), 6.5, PaintMode::Erase);
        assert_eq!(once.as_image().as_raw(), twice.as_image().as_raw());
    }

    #[test]
    fn zero_radius_is_noop() {
        let mut mask = MaskBuffer::filled(10, 10, PaintMode::Restore);
        assert_eq!(mask.paint_circle(Point::new(5.0, 5.0), 0.0, PaintMode::Erase), 0);
        assert_eq!(mask.paint_circle(Point::new(5.0, 5.0), -3.0, PaintMode::Erase), 0);
        assert_eq!(mask.generation(), 0);
        assert_eq!(mask.visible_pixel_count(), 100);
    }

    #[test]
    fn paint_outside_is_clipped() {
        let mut mask = MaskBuffer::filled(10, 10, PaintMode::Restore);
        assert_eq!(mask.paint_circle(Point::new(-50.0, -50.0), 5.0, PaintMode::Erase), 0);
        assert_eq!(mask.paint_circle(Point::new(500.0, 5.0), 5.0, PaintMode::Erase), 0);
        // Straddling the corner only touches in-bounds pixels.
        let covered = mask.paint_circle(Point::new(0.0, 0.0), 3.0, PaintMode::Erase);
        assert!(covered > 0 && covered < 10);
        assert_eq!(mask.alpha(0, 0), 0);
        assert_eq!(mask.alpha(9, 9), 255);
    }

    #[test]
    fn composite_fully_erased_is_transparent() {
        let source = RgbaImage::from_fn(8, 8, |x, y| Rgba([x as u8 * 20, y as u8 * 20, 77, 255]));
        let mask = MaskBuffer::filled(8, 8, PaintMode::Erase);
        let out = mask.composite(&source);
        assert!(out.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn composite_fully_restored_is_source() {
        let source = RgbaImage::from_fn(8, 8, |x, y| Rgba([x as u8 * 20, y as u8 * 20, 77, 255]));
        let mask = MaskBuffer::filled(8, 8, PaintMode::Restore);
        let out = mask.composite(&source);
        assert_eq!(out.as_raw(), source.as_raw());
    }

    #[test]
    fn composite_weights_by_mask_alpha() {
        let source = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let mask = MaskBuffer::from_image(RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgba([0, 0, 0, 128]) } else { Rgba([1, 2, 3, 0]) }
        }));
        let out = mask.composite(&source);
        assert_eq!(*out.get_pixel(0, 0), Rgba([10, 20, 30, 128]));
        assert_eq!(*out.get_pixel(1, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut mask = MaskBuffer::filled(16, 16, PaintMode::Restore);
        let before = mask.snapshot();
        mask.paint_circle(Point::new(8.0, 8.0), 4.0, PaintMode::Erase);
        assert_ne!(mask.as_image().as_raw().as_slice(), before.pixels());
        assert!(mask.restore(&before));
        assert_eq!(mask.as_image().as_raw().as_slice(), before.pixels());
    }

    #[test]
    fn restore_rejects_foreign_dimensions() {
        let mut mask = MaskBuffer::filled(16, 16, PaintMode::Restore);
        let other = MaskBuffer::filled(8, 8, PaintMode::Erase).snapshot();
        assert!(!mask.restore(&other));
        assert_eq!(mask.visible_pixel_count(), 256);
    }
}
