use crate::canvas::{MaskBuffer, PaintMode, Point, Transform};

pub const MIN_BRUSH_SIZE: u32 = 5;
pub const MAX_BRUSH_SIZE: u32 = 150;
pub const BRUSH_SIZE_STEP: u32 = 5;
pub const DEFAULT_BRUSH_SIZE: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Erase,
    Restore,
    Pan,
}

impl Tool {
    /// The mask operation a primary-button drag performs, if any.
    pub fn paint_mode(self) -> Option<PaintMode> {
        match self {
            Tool::Erase => Some(PaintMode::Erase),
            Tool::Restore => Some(PaintMode::Restore),
            Tool::Pan => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tool::Erase => "Erase",
            Tool::Restore => "Restore",
            Tool::Pan => "Pan",
        }
    }

    pub fn config_name(self) -> &'static str {
        match self {
            Tool::Erase => "erase",
            Tool::Restore => "restore",
            Tool::Pan => "pan",
        }
    }

    pub fn from_config_name(name: &str) -> Option<Tool> {
        match name.trim().to_ascii_lowercase().as_str() {
            "erase" => Some(Tool::Erase),
            "restore" => Some(Tool::Restore),
            "pan" => Some(Tool::Pan),
            _ => None,
        }
    }

    pub fn all() -> &'static [Tool] {
        &[Tool::Pan, Tool::Erase, Tool::Restore]
    }
}

/// Which pointer button started an interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PointerButton {
    #[default]
    Primary,
    Middle,
    Secondary,
}

impl PointerButton {
    /// Middle and secondary drags always pan, whatever tool is selected.
    pub fn always_pans(self) -> bool {
        matches!(self, PointerButton::Middle | PointerButton::Secondary)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolProperties {
    /// Brush diameter in image pixels, within `[MIN_BRUSH_SIZE, MAX_BRUSH_SIZE]`.
    size: u32,
    /// Join consecutive pointer samples with intermediate dabs.
    pub interpolate: bool,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            size: DEFAULT_BRUSH_SIZE,
            interpolate: true,
        }
    }
}

impl ToolProperties {
    pub fn new(size: u32, interpolate: bool) -> Self {
        Self {
            size: size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE),
            interpolate,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn radius(&self) -> f32 {
        self.size as f32 / 2.0
    }

    /// Returns `true` when the (clamped) size actually changed.
    pub fn set_size(&mut self, size: u32) -> bool {
        let size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
        let changed = size != self.size;
        self.size = size;
        changed
    }

    pub fn increase_size(&mut self) -> bool {
        self.set_size(self.size.saturating_add(BRUSH_SIZE_STEP))
    }

    pub fn decrease_size(&mut self) -> bool {
        self.set_size(self.size.saturating_sub(BRUSH_SIZE_STEP))
    }
}

// ============================================================================
// STROKE SESSION
// ============================================================================

/// One erase/restore stroke, from pointer-down to pointer-up.
#[derive(Debug)]
pub struct StrokeSession {
    mode: PaintMode,
    radius: f32,
    interpolate: bool,
    /// Previous sample in image space.
    last_sample: Option<Point>,
    paint_calls: usize,
    pixels_touched: usize,
}

/// Emitted when a stroke that painted something ends; the owner turns it
/// into a history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeEvent {
    pub mode: PaintMode,
    pub description: String,
    pub paint_calls: usize,
    pub pixels_touched: usize,
}

impl StrokeSession {
    pub fn begin(mode: PaintMode, radius: f32, interpolate: bool) -> Self {
        Self {
            mode,
            radius,
            interpolate,
            last_sample: None,
            paint_calls: 0,
            pixels_touched: 0,
        }
    }

    pub fn mode(&self) -> PaintMode {
        self.mode
    }

    pub fn paint_calls(&self) -> usize {
        self.paint_calls
    }

    pub fn has_painted(&self) -> bool {
        self.paint_calls > 0
    }

    /// Feed one pointer sample (image space).  Paints a dab at the sample and,
    /// with interpolation on, along the segment from the previous sample with
    /// dabs at most `max(radius / 2, 1)` apart.  Returns `true` if any paint
    /// call was issued.
    pub fn add_sample(&mut self, mask: &mut MaskBuffer, at: Point) -> bool {
        let calls_before = self.paint_calls;
        match self.last_sample {
            Some(prev) if self.interpolate => {
                let spacing = (self.radius / 2.0).max(1.0);
                let reach = self.radius.max(0.0);
                let bounds = (
                    -reach,
                    -reach,
                    mask.width() as f32 + reach,
                    mask.height() as f32 + reach,
                );
                // Only the part of the segment a dab could reach is stepped
                let mut reached_end = false;
                if let Some((from, to, entered)) = clip_segment(prev, at, bounds) {
                    let steps = ((from.distance(to) / spacing).ceil() as usize).max(1);
                    let first = if entered { 0 } else { 1 };
                    for i in first..=steps {
                        self.dab(mask, from.lerp(to, i as f32 / steps as f32));
                    }
                    reached_end = to == at;
                }
                if !reached_end {
                    self.dab(mask, at);
                }
            }
            _ => self.dab(mask, at),
        }
        self.last_sample = Some(at);
        self.paint_calls > calls_before
    }

    fn dab(&mut self, mask: &mut MaskBuffer, at: Point) {
        if self.radius.is_nan() || self.radius <= 0.0 {
            return;
        }
        self.pixels_touched += mask.paint_circle(at, self.radius, self.mode);
        self.paint_calls += 1;
    }

    /// End the stroke.  `None` when nothing was painted, so no-op strokes never
    /// reach the history.
    pub fn finish(self) -> Option<StrokeEvent> {
        if !self.has_painted() {
            return None;
        }
        Some(StrokeEvent {
            mode: self.mode,
            description: self.mode.stroke_description().to_string(),
            paint_calls: self.paint_calls,
            pixels_touched: self.pixels_touched,
        })
    }
}

/// Liang-Barsky clip of `a -> b` against `(min_x, min_y, max_x, max_y)`.
/// Returns the inside part and whether it starts past `a`.
fn clip_segment(a: Point, b: Point, bounds: (f32, f32, f32, f32)) -> Option<(Point, Point, bool)> {
    if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
        return None;
    }
    let (min_x, min_y, max_x, max_y) = (
        bounds.0 as f64,
        bounds.1 as f64,
        bounds.2 as f64,
        bounds.3 as f64,
    );
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (dx, dy) = (b.x as f64 - ax, b.y as f64 - ay);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, ax - min_x),
        (dx, max_x - ax),
        (-dy, ay - min_y),
        (dy, max_y - ay),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    let at = |t: f64| Point::new(
        (ax + dx * t).clamp(min_x, max_x) as f32,
        (ay + dy * t).clamp(min_y, max_y) as f32,
    );
    let from = if t0 > 0.0 { at(t0) } else { a };
    let to = if t1 < 1.0 { at(t1) } else { b };
    Some((from, to, t0 > 0.0))
}

// ============================================================================
// POINTER INTERACTION STATE MACHINE
// ============================================================================

#[derive(Debug, Default)]
pub enum Interaction {
    #[default]
    Idle,
    Painting(StrokeSession),
    Panning {
        last_screen: Point,
    },
}

/// What a pointer event changed.
#[derive(Debug, Default, PartialEq)]
pub struct ToolResponse {
    /// The visible frame is stale.
    pub redraw: bool,
    /// A stroke just ended and must be committed to history.
    pub stroke: Option<StrokeEvent>,
}

impl ToolResponse {
    fn redraw(redraw: bool) -> Self {
        Self {
            redraw,
            stroke: None,
        }
    }
}

/// Selected tool, brush settings and the single active pointer interaction.
#[derive(Debug, Default)]
pub struct ToolState {
    pub active_tool: Tool,
    pub properties: ToolProperties,
    interaction: Interaction,
}

impl ToolState {
    pub fn new(active_tool: Tool, properties: ToolProperties) -> Self {
        Self {
            active_tool,
            properties,
            interaction: Interaction::Idle,
        }
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.interaction, Interaction::Idle)
    }

    pub fn is_painting(&self) -> bool {
        matches!(self.interaction, Interaction::Painting(_))
    }

    pub fn is_panning(&self) -> bool {
        matches!(self.interaction, Interaction::Panning { .. })
    }

    /// Start an interaction.  Ignored while another one is active.
    pub fn pointer_down(
        &mut self,
        button: PointerButton,
        screen: Point,
        view: &Transform,
        mask: &mut MaskBuffer,
    ) -> ToolResponse {
        if !self.is_idle() {
            return ToolResponse::default();
        }

        let paint_mode = if button.always_pans() {
            None
        } else {
            self.active_tool.paint_mode()
        };

        match paint_mode {
            Some(mode) => {
                let mut session =
                    StrokeSession::begin(mode, self.properties.radius(), self.properties.interpolate);
                // A tap without drag still paints
                let painted = session.add_sample(mask, view.screen_to_image(screen));
                self.interaction = Interaction::Painting(session);
                ToolResponse::redraw(painted)
            }
            None => {
                self.interaction = Interaction::Panning {
                    last_screen: screen,
                };
                ToolResponse::default()
            }
        }
    }

    pub fn pointer_move(
        &mut self,
        screen: Point,
        view: &mut Transform,
        mask: &mut MaskBuffer,
    ) -> ToolResponse {
        match &mut self.interaction {
            Interaction::Idle => ToolResponse::default(),
            Interaction::Panning { last_screen } => {
                let moved = view.pan_by(screen.x - last_screen.x, screen.y - last_screen.y);
                *last_screen = screen;
                ToolResponse::redraw(moved)
            }
            Interaction::Painting(session) => {
                ToolResponse::redraw(session.add_sample(mask, view.screen_to_image(screen)))
            }
        }
    }

    /// End the active interaction (pointer-up or pointer-leave).
    pub fn pointer_up(&mut self) -> ToolResponse {
        match std::mem::take(&mut self.interaction) {
            Interaction::Painting(session) => ToolResponse {
                redraw: false,
                stroke: session.finish(),
            },
            Interaction::Idle | Interaction::Panning { .. } => ToolResponse::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PaintMode;

    fn opaque_mask() -> MaskBuffer {
        MaskBuffer::filled(200, 100, PaintMode::Restore)
    }

    fn tools(tool: Tool, size: u32, interpolate: bool) -> ToolState {
        ToolState::new(tool, ToolProperties::new(size, interpolate))
    }

    #[test]
    fn brush_size_steps_and_clamps() {
        let mut props = ToolProperties::default();
        assert_eq!(props.size(), 20);
        assert!(props.increase_size());
        assert_eq!(props.size(), 25);
        assert!(props.set_size(1000));
        assert_eq!(props.size(), MAX_BRUSH_SIZE);
        assert!(!props.increase_size());
        props.set_size(0);
        assert_eq!(props.size(), MIN_BRUSH_SIZE);
        assert!(!props.decrease_size());
        assert_eq!(props.radius(), 2.5);
    }

    #[test]
    fn tool_names_round_trip() {
        for &tool in Tool::all() {
            assert_eq!(Tool::from_config_name(tool.config_name()), Some(tool));
        }
        assert_eq!(Tool::from_config_name(" Restore "), Some(Tool::Restore));
        assert_eq!(Tool::from_config_name("lasso"), None);
    }

    #[test]
    fn tap_paints_and_commits_once() {
        let mut mask = opaque_mask();
        let mut view = Transform::default();
        let mut state = tools(Tool::Erase, 20, true);

        let down = state.pointer_down(PointerButton::Primary, Point::new(50.0, 50.0), &view, &mut mask);
        assert!(down.redraw);
        assert!(state.is_painting());
        assert_eq!(mask.alpha(50, 50), 0);

        let up = state.pointer_up();
        let stroke = up.stroke.expect("tap should commit");
        assert_eq!(stroke.paint_calls, 1);
        assert_eq!(stroke.description, "Erase Stroke");
        assert!(state.is_idle());
        assert!(state.pointer_move(Point::new(60.0, 60.0), &mut view, &mut mask) == ToolResponse::default());
    }

    #[test]
    fn samples_map_through_transform() {
        let mut mask = opaque_mask();
        let view = Transform::new(2.0, 100.0, 10.0);
        let mut state = tools(Tool::Erase, 6, false);
        // screen (160, 70) -> image (30, 30)
        state.pointer_down(PointerButton::Primary, Point::new(160.0, 70.0), &view, &mut mask);
        assert_eq!(mask.alpha(30, 30), 0);
        assert_eq!(mask.alpha(80, 30), 255);
    }

    #[test]
    fn point_sampling_leaves_gaps_interpolation_does_not() {
        let view = Transform::default();
        for (interpolate, expect_gap) in [(false, true), (true, false)] {
            let mut view_mut = view;
            let mut mask = opaque_mask();
            let mut state = tools(Tool::Erase, 10, interpolate);
            state.pointer_down(PointerButton::Primary, Point::new(20.0, 50.0), &view, &mut mask);
            state.pointer_move(Point::new(120.0, 50.0), &mut view_mut, &mut mask);
            state.pointer_up();
            assert_eq!(mask.alpha(20, 49), 0);
            assert_eq!(mask.alpha(119, 49), 0);
            let gap = mask.alpha(70, 49) != 0;
            assert_eq!(gap, expect_gap, "interpolate = {}", interpolate);
        }
    }

    #[test]
    fn restore_tool_writes_white() {
        let mut mask = MaskBuffer::filled(50, 50, PaintMode::Erase);
        let view = Transform::default();
        let mut state = tools(Tool::Restore, 10, true);
        state.pointer_down(PointerButton::Primary, Point::new(25.0, 25.0), &view, &mut mask);
        let stroke = state.pointer_up().stroke;
        assert_eq!(stroke.map(|s| s.mode), Some(PaintMode::Restore));
        assert_eq!(mask.pixel(25, 25), Some(crate::canvas::RESTORED_PIXEL));
    }

    #[test]
    fn pan_tool_moves_view_not_mask() {
        let mut mask = opaque_mask();
        let mut view = Transform::default();
        let mut state = tools(Tool::Pan, 20, true);
        let before = mask.as_image().clone();

        state.pointer_down(PointerButton::Primary, Point::new(10.0, 10.0), &view, &mut mask);
        assert!(state.is_panning());
        let moved = state.pointer_move(Point::new(25.0, 4.0), &mut view, &mut mask);
        assert!(moved.redraw);
        state.pointer_move(Point::new(30.0, 4.0), &mut view, &mut mask);
        assert_eq!(view.offset(), Point::new(20.0, -6.0));
        assert!(state.pointer_up().stroke.is_none());
        assert_eq!(mask.as_image().as_raw(), before.as_raw());
    }

    #[test]
    fn middle_button_pans_with_paint_tool() {
        let mut mask = opaque_mask();
        let mut view = Transform::default();
        let mut state = tools(Tool::Erase, 20, true);
        state.pointer_down(PointerButton::Middle, Point::new(50.0, 50.0), &view, &mut mask);
        assert!(state.is_panning());
        assert_eq!(mask.visible_pixel_count(), 200 * 100);
        state.pointer_move(Point::new(40.0, 50.0), &mut view, &mut mask);
        assert_eq!(view.offset(), Point::new(-10.0, 0.0));
    }

    #[test]
    fn second_pointer_down_is_ignored() {
        let mut mask = opaque_mask();
        let view = Transform::default();
        let mut state = tools(Tool::Erase, 10, true);
        state.pointer_down(PointerButton::Primary, Point::new(20.0, 20.0), &view, &mut mask);
        let ignored =
            state.pointer_down(PointerButton::Middle, Point::new(150.0, 80.0), &view, &mut mask);
        assert_eq!(ignored, ToolResponse::default());
        assert!(state.is_painting());
        assert_eq!(mask.alpha(150, 80), 255);
    }

    #[test]
    fn stroke_without_paint_is_not_committed() {
        let session = StrokeSession::begin(PaintMode::Erase, 0.0, true);
        assert!(session.finish().is_none());

        let mut mask = opaque_mask();
        let mut session = StrokeSession::begin(PaintMode::Erase, 0.0, false);
        assert!(!session.add_sample(&mut mask, Point::new(5.0, 5.0)));
        assert!(session.finish().is_none());
    }

    #[test]
    fn far_sample_only_steps_across_the_image() {
        let mut mask = MaskBuffer::filled(100, 100, PaintMode::Restore);
        let mut session = StrokeSession::begin(PaintMode::Erase, 2.5, true);
        session.add_sample(&mut mask, Point::new(50.0, 50.0));
        let start = std::time::Instant::now();
        assert!(session.add_sample(&mut mask, Point::new(1e9, 50.0)));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        // 50..102.5 at 1.25 spacing, plus the off-image endpoint
        assert!(session.paint_calls() <= 50, "calls = {}", session.paint_calls());
        assert_eq!(mask.alpha(99, 50), 0);
        assert_eq!(mask.alpha(50, 40), 255);

        assert!(session.add_sample(&mut mask, Point::new(1e30, -1e30)));
        assert!(session.add_sample(&mut mask, Point::new(-1e30, 50.0)));
        assert!(session.add_sample(&mut mask, Point::new(10.0, 50.0)));
        assert!(session.paint_calls() < 200, "calls = {}", session.paint_calls());
        assert_eq!(mask.alpha(5, 50), 0);
    }

    #[test]
    fn segment_missing_the_image_paints_only_the_endpoint() {
        let mut mask = opaque_mask();
        let mut session = StrokeSession::begin(PaintMode::Erase, 5.0, true);
        session.add_sample(&mut mask, Point::new(-1e6, -50.0));
        session.add_sample(&mut mask, Point::new(1e6, -50.0));
        assert_eq!(session.paint_calls(), 2);
        assert_eq!(mask.visible_pixel_count(), 200 * 100);
    }

    #[test]
    fn painting_off_image_still_counts_as_a_call() {
        let mut mask = opaque_mask();
        let mut session = StrokeSession::begin(PaintMode::Erase, 5.0, false);
        assert!(session.add_sample(&mut mask, Point::new(-500.0, -500.0)));
        let event = session.finish().expect("paint call was issued");
        assert_eq!(event.pixels_touched, 0);
        assert_eq!(mask.visible_pixel_count(), 200 * 100);
    }
}
