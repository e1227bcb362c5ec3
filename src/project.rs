use std::path::Path;

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{MaskBuffer, Point, Transform, ZOOM_STEP};
use crate::components::history::HistoryManager;
use crate::components::tools::{PointerButton, StrokeEvent, Tool, ToolProperties, ToolResponse, ToolState};
use crate::compositor::{BackgroundMode, Compositor};
use crate::io::{self, ExportError, LoadedImages};
use crate::settings::EditorSettings;
use crate::{log_info, log_warn};

/// One loaded editing session: the source image, its mask, the undo log,
/// the view and the interaction state.
///
/// Every mutating method returns whether the visible frame changed and
/// raises the redraw flag when it did.  [`Project::frame`] renders at most
/// once per batch of changes.
pub struct Project {
    pub id: Uuid,
    /// Display name (derived from the source path, or "Untitled").
    pub name: String,
    source: RgbaImage,
    mask: MaskBuffer,
    pub history: HistoryManager,
    view: Transform,
    tools: ToolState,
    background: BackgroundMode,
    viewport_width: u32,
    viewport_height: u32,
    fit_margin: f32,
    compositor: Compositor,
    needs_redraw: bool,
    frame: Option<RgbaImage>,
    frames_rendered: u64,
    is_dirty: bool,
}

impl Project {
    /// Enter the interactive state for freshly loaded images.  The history
    /// is seeded with the mask as loaded and the view is fitted.
    pub fn new(
        name: impl Into<String>,
        images: LoadedImages,
        settings: &EditorSettings,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Self {
        let LoadedImages { source, mask } = images;
        let history = HistoryManager::new(mask.snapshot(), settings.max_history);
        let view = Transform::fit_to_viewport(
            source.width(),
            source.height(),
            viewport_width as f32,
            viewport_height as f32,
            settings.fit_margin,
        );
        let tools = ToolState::new(
            settings.tool,
            ToolProperties::new(settings.brush_size, settings.stroke_interpolation),
        );

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source,
            mask,
            history,
            view,
            tools,
            background: settings.background,
            viewport_width,
            viewport_height,
            fit_margin: settings.fit_margin,
            compositor: Compositor::new(),
            needs_redraw: true,
            frame: None,
            frames_rendered: 0,
            is_dirty: false,
        }
    }

    pub fn source(&self) -> &RgbaImage {
        &self.source
    }

    pub fn mask(&self) -> &MaskBuffer {
        &self.mask
    }

    pub fn view(&self) -> &Transform {
        &self.view
    }

    pub fn tools(&self) -> &ToolState {
        &self.tools
    }

    pub fn background(&self) -> BackgroundMode {
        self.background
    }

    pub fn viewport_size(&self) -> (u32, u32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn zoom_percent(&self) -> u32 {
        self.view.zoom_percent()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// True once a stroke has been committed since load or the last export.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    fn changed(&mut self, changed: bool) -> bool {
        if changed {
            self.needs_redraw = true;
        }
        changed
    }

    // ------------------------------------------------------------------
    // Pointer input
    // ------------------------------------------------------------------

    pub fn pointer_down(&mut self, button: PointerButton, screen: Point) -> bool {
        let response = self
            .tools
            .pointer_down(button, screen, &self.view, &mut self.mask);
        self.apply(response)
    }

    pub fn pointer_move(&mut self, screen: Point) -> bool {
        let response = self
            .tools
            .pointer_move(screen, &mut self.view, &mut self.mask);
        self.apply(response)
    }

    pub fn pointer_up(&mut self) -> bool {
        let response = self.tools.pointer_up();
        self.apply(response)
    }

    /// Leaving the canvas ends the interaction exactly like releasing.
    pub fn pointer_leave(&mut self) -> bool {
        self.pointer_up()
    }

    fn apply(&mut self, response: ToolResponse) -> bool {
        if let Some(stroke) = response.stroke {
            self.commit_stroke(stroke);
        }
        self.changed(response.redraw)
    }

    fn commit_stroke(&mut self, stroke: StrokeEvent) {
        self.history.push(stroke.description.as_str(), self.mask.snapshot());
        self.is_dirty = true;
        log_info!(
            "Committed {} ({} dabs, {} pixels), history {}/{}",
            stroke.description,
            stroke.paint_calls,
            stroke.pixels_touched,
            self.history.cursor() + 1,
            self.history.len()
        );
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Step back one stroke.  Ignored while a pointer interaction is active.
    pub fn undo(&mut self) -> bool {
        if !self.tools.is_idle() {
            log_warn!("Undo ignored: pointer interaction in progress");
            return false;
        }
        let restored = match self.history.undo() {
            Some(entry) => self.mask.restore(&entry.snapshot),
            None => {
                log_info!("Undo ignored: at oldest state");
                false
            }
        };
        self.changed(restored)
    }

    /// Re-apply the next stroke.  Ignored while a pointer interaction is active.
    pub fn redo(&mut self) -> bool {
        if !self.tools.is_idle() {
            log_warn!("Redo ignored: pointer interaction in progress");
            return false;
        }
        let restored = match self.history.redo() {
            Some(entry) => self.mask.restore(&entry.snapshot),
            None => {
                log_info!("Redo ignored: at newest state");
                false
            }
        };
        self.changed(restored)
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    /// Scroll-wheel zoom anchored at the cursor: up zooms in, down zooms out.
    pub fn wheel(&mut self, screen: Point, delta_y: f32) -> bool {
        if delta_y == 0.0 || delta_y.is_nan() {
            return false;
        }
        let delta = if delta_y < 0.0 { ZOOM_STEP } else { -ZOOM_STEP };
        let zoomed = self.view.zoom_at(screen, delta);
        self.changed(zoomed)
    }

    pub fn zoom_at(&mut self, anchor: Point, delta: f32) -> bool {
        let zoomed = self.view.zoom_at(anchor, delta);
        self.changed(zoomed)
    }

    /// Toolbar zoom: scale only, offset untouched.
    pub fn zoom_in(&mut self) -> bool {
        let zoomed = self.view.zoom_by(ZOOM_STEP);
        self.changed(zoomed)
    }

    pub fn zoom_out(&mut self) -> bool {
        let zoomed = self.view.zoom_by(-ZOOM_STEP);
        self.changed(zoomed)
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) -> bool {
        let moved = self.view.pan_by(dx, dy);
        self.changed(moved)
    }

    pub fn fit_to_viewport(&mut self) -> bool {
        let fitted = Transform::fit_to_viewport(
            self.source.width(),
            self.source.height(),
            self.viewport_width as f32,
            self.viewport_height as f32,
            self.fit_margin,
        );
        let changed = fitted != self.view;
        self.view = fitted;
        self.changed(changed)
    }

    /// The frame follows the new size; the transform is left alone.
    pub fn resize_viewport(&mut self, width: u32, height: u32) -> bool {
        let changed = (width, height) != (self.viewport_width, self.viewport_height);
        self.viewport_width = width;
        self.viewport_height = height;
        self.changed(changed)
    }

    // ------------------------------------------------------------------
    // Tool & appearance settings
    // ------------------------------------------------------------------

    pub fn active_tool(&self) -> Tool {
        self.tools.active_tool
    }

    /// Takes effect at the next pointer-down.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.tools.active_tool != tool {
            log_info!("Tool: {}", tool.label());
        }
        self.tools.active_tool = tool;
    }

    pub fn brush_size(&self) -> u32 {
        self.tools.properties.size()
    }

    pub fn set_brush_size(&mut self, size: u32) -> bool {
        self.tools.properties.set_size(size)
    }

    pub fn increase_brush_size(&mut self) -> bool {
        self.tools.properties.increase_size()
    }

    pub fn decrease_brush_size(&mut self) -> bool {
        self.tools.properties.decrease_size()
    }

    pub fn set_background(&mut self, background: BackgroundMode) -> bool {
        let changed = background != self.background;
        self.background = background;
        self.changed(changed)
    }

    pub fn cycle_background(&mut self) -> BackgroundMode {
        self.set_background(self.background.next());
        self.background
    }

    /// Copy the session's tool, brush and background into `settings`.
    pub fn store_preferences(&self, settings: &mut EditorSettings) {
        settings.tool = self.tools.active_tool;
        settings.brush_size = self.brush_size();
        settings.background = self.background;
        settings.stroke_interpolation = self.tools.properties.interpolate;
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw || self.frame.is_none()
    }

    /// Force the next [`Project::frame`] call to re-render.
    pub fn request_redraw(&mut self) {
        self.needs_redraw = true;
    }

    /// Number of frames actually rendered since load.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// The current viewport frame.  Any number of changes since the last
    /// call are folded into one render reflecting the latest state.
    pub fn frame(&mut self) -> &RgbaImage {
        if self.needs_redraw() {
            let rendered = self.compositor.render(
                self.viewport_width,
                self.viewport_height,
                &self.view,
                &self.source,
                &self.mask,
                self.background,
            );
            self.frames_rendered += 1;
            self.needs_redraw = false;
            self.frame = Some(rendered);
        }
        self.frame.get_or_insert_with(|| RgbaImage::new(0, 0))
    }

    /// Source masked by the current mask, at native image resolution.
    pub fn export(&mut self) -> RgbaImage {
        self.compositor
            .masked_composite(&self.source, &self.mask)
            .clone()
    }

    pub fn export_png(&mut self, path: &Path) -> Result<(), ExportError> {
        let image = self.export();
        io::write_png(&image, path)?;
        let generation = self.mask.generation();
        self.mark_exported(generation);
        Ok(())
    }

    /// Record a finished export of the mask at `generation`.  The project
    /// is clean only if the mask has not changed since.
    pub fn mark_exported(&mut self, generation: u64) -> bool {
        if generation != self.mask.generation() {
            return false;
        }
        self.is_dirty = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PaintMode;
    use image::Rgba;

    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn project(width: u32, height: u32) -> Project {
        let images = LoadedImages {
            source: RgbaImage::from_pixel(width, height, BLUE),
            mask: MaskBuffer::filled(width, height, PaintMode::Restore),
        };
        // Viewport large enough that the fit is exactly 100% and centered
        Project::new(
            "test",
            images,
            &EditorSettings::default(),
            width + 40,
            height + 40,
        )
    }

    fn screen_of(project: &Project, x: f32, y: f32) -> Point {
        project.view().image_to_screen(Point::new(x, y))
    }

    fn stroke(project: &mut Project, from: (f32, f32), to: (f32, f32)) {
        let a = screen_of(project, from.0, from.1);
        let b = screen_of(project, to.0, to.1);
        project.pointer_down(PointerButton::Primary, a);
        project.pointer_move(b);
        project.pointer_up();
    }

    #[test]
    fn load_fits_and_seeds_history() {
        let p = project(100, 50);
        assert_eq!(p.view().scale(), 1.0);
        assert_eq!(p.view().offset(), Point::new(20.0, 20.0));
        assert_eq!(p.history.len(), 1);
        assert!(!p.can_undo());
        assert!(p.needs_redraw());
    }

    #[test]
    fn export_of_an_older_mask_keeps_project_dirty() {
        let mut p = project(100, 100);
        stroke(&mut p, (20.0, 20.0), (80.0, 20.0));
        let exported = p.mask().generation();
        stroke(&mut p, (20.0, 60.0), (80.0, 60.0));
        assert!(!p.mark_exported(exported));
        assert!(p.is_dirty());
        let latest = p.mask().generation();
        assert!(p.mark_exported(latest));
        assert!(!p.is_dirty());
    }

    #[test]
    fn stroke_commits_one_entry() {
        let mut p = project(100, 100);
        stroke(&mut p, (20.0, 20.0), (80.0, 20.0));
        assert_eq!(p.history.len(), 2);
        assert_eq!(p.history.current().description, "Erase Stroke");
        assert_eq!(p.mask().alpha(50, 20), 0);
        assert!(p.is_dirty());
    }

    #[test]
    fn pan_and_zero_paint_strokes_leave_history_alone() {
        let mut p = project(100, 100);
        p.set_tool(Tool::Pan);
        stroke(&mut p, (10.0, 10.0), (30.0, 30.0));
        assert_eq!(p.history.len(), 1);

        // Middle-button drag pans even with a paint tool selected
        p.set_tool(Tool::Erase);
        p.pointer_down(PointerButton::Middle, Point::new(0.0, 0.0));
        p.pointer_up();
        assert_eq!(p.history.len(), 1);
    }

    #[test]
    fn undo_redo_restore_mask() {
        let mut p = project(100, 100);
        stroke(&mut p, (50.0, 50.0), (50.0, 50.0));
        let after = p.mask().snapshot();
        assert!(p.undo());
        assert_eq!(p.mask().alpha(50, 50), 255);
        assert!(p.can_redo());
        assert!(p.redo());
        assert_eq!(p.mask().snapshot(), after);
        assert!(!p.redo());
    }

    #[test]
    fn history_ops_ignored_mid_stroke() {
        let mut p = project(100, 100);
        stroke(&mut p, (50.0, 50.0), (50.0, 50.0));
        let at = screen_of(&p, 10.0, 10.0);
        p.pointer_down(PointerButton::Primary, at);
        assert!(!p.undo());
        p.pointer_leave();
        assert_eq!(p.history.len(), 3);
        assert!(p.undo());
    }

    #[test]
    fn restore_tool_writes_opaque() {
        let images = LoadedImages {
            source: RgbaImage::from_pixel(60, 60, BLUE),
            mask: MaskBuffer::filled(60, 60, PaintMode::Erase),
        };
        let mut p = Project::new("r", images, &EditorSettings::default(), 100, 100);
        p.set_tool(Tool::Restore);
        stroke(&mut p, (30.0, 30.0), (30.0, 30.0));
        assert_eq!(p.history.current().description, "Restore Stroke");
        assert_eq!(p.export().get_pixel(30, 30), &BLUE);
        assert_eq!(p.export().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn wheel_direction_and_anchor() {
        let mut p = project(100, 100);
        let anchor = Point::new(70.0, 40.0);
        let before = p.view().screen_to_image(anchor);
        assert!(p.wheel(anchor, -120.0));
        assert!((p.view().scale() - 1.1).abs() < 1e-5);
        let after = p.view().screen_to_image(anchor);
        assert!((before.x - after.x).abs() < 1e-3 && (before.y - after.y).abs() < 1e-3);
        assert!(p.wheel(anchor, 3.0));
        assert!((p.view().scale() - 1.0).abs() < 1e-5);
        assert!(!p.wheel(anchor, 0.0));
    }

    #[test]
    fn toolbar_zoom_keeps_offset() {
        let mut p = project(100, 100);
        let offset = p.view().offset();
        assert!(p.zoom_in());
        assert_eq!(p.view().offset(), offset);
        assert_eq!(p.zoom_percent(), 110);
        assert!(p.zoom_out());
        assert_eq!(p.zoom_percent(), 100);
    }

    #[test]
    fn redraws_are_coalesced() {
        let mut p = project(40, 40);
        p.frame();
        assert_eq!(p.frames_rendered(), 1);
        assert!(!p.needs_redraw());
        p.frame();
        assert_eq!(p.frames_rendered(), 1);

        for _ in 0..10 {
            p.pan_by(1.0, 0.0);
        }
        assert!(p.needs_redraw());
        p.frame();
        assert_eq!(p.frames_rendered(), 2);

        p.request_redraw();
        p.frame();
        assert_eq!(p.frames_rendered(), 3);
    }

    #[test]
    fn background_and_resize_trigger_redraw() {
        let mut p = project(40, 40);
        p.frame();
        assert_eq!(p.cycle_background(), BackgroundMode::WHITE);
        assert!(p.needs_redraw());
        p.frame();
        assert!(!p.set_background(BackgroundMode::WHITE));
        assert!(!p.needs_redraw());

        let view = *p.view();
        assert!(p.resize_viewport(200, 10));
        assert_eq!(*p.view(), view);
        assert_eq!(p.frame().dimensions(), (200, 10));
    }

    #[test]
    fn fit_restores_view() {
        let mut p = project(100, 100);
        p.pan_by(33.0, -7.0);
        p.zoom_in();
        assert!(p.fit_to_viewport());
        assert_eq!(p.view().scale(), 1.0);
        assert_eq!(p.view().offset(), Point::new(20.0, 20.0));
        assert!(!p.fit_to_viewport());
    }

    #[test]
    fn brush_size_steps() {
        let mut p = project(10, 10);
        assert_eq!(p.brush_size(), 20);
        assert!(p.increase_brush_size());
        assert_eq!(p.brush_size(), 25);
        p.set_brush_size(5);
        assert!(!p.decrease_brush_size());
    }

    #[test]
    fn preferences_round_trip_into_settings() {
        let mut p = project(10, 10);
        p.set_tool(Tool::Restore);
        p.set_brush_size(40);
        p.cycle_background();
        let mut settings = EditorSettings::default();
        p.store_preferences(&mut settings);
        assert_eq!(settings.tool, Tool::Restore);
        assert_eq!(settings.brush_size, 40);
        assert_eq!(settings.background, BackgroundMode::WHITE);
    }
}
