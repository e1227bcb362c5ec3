use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use uuid::Uuid;

use crate::canvas::Point;
use crate::components::tools::PointerButton;
use crate::io::{self, ExportError, ImageCrateDecoder, ImageDecoder, LoadError, LoadedImages};
use crate::ops::ai::BackgroundRemover;
use crate::project::Project;
use crate::settings::EditorSettings;
use crate::{log_err, log_info, log_warn};

pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);

// ============================================================================
// INPUT
// ============================================================================

/// A key with its modifiers.  `ctrl` also stands for Cmd on macOS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPress {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    /// Lowercase key text, e.g. `"z"` or `"["`.
    pub key: String,
}

impl KeyPress {
    pub fn new(key: &str) -> Self {
        Self {
            ctrl: false,
            shift: false,
            alt: false,
            key: key.to_lowercase(),
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Parse a shortcut such as `ctrl+shift+z`, `cmd+y` or `]`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts: Vec<&str> = s.trim().split('+').map(str::trim).collect();
        let key = parts.pop().filter(|k| !k.is_empty())?;
        let mut press = KeyPress::new(key);
        for part in parts {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "cmd" | "command" | "meta" => press.ctrl = true,
                "shift" => press.shift = true,
                "alt" | "option" => press.alt = true,
                _ => return None,
            }
        }
        Some(press)
    }
}

/// Editor commands reachable from the keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Undo,
    Redo,
    BrushSizeUp,
    BrushSizeDown,
}

impl KeyAction {
    /// Ctrl+Z undo, Ctrl+Y / Ctrl+Shift+Z redo, `[` / `]` brush size.
    pub fn from_key_press(press: &KeyPress) -> Option<Self> {
        if press.alt {
            return None;
        }
        match (press.ctrl, press.shift, press.key.as_str()) {
            (true, false, "z") => Some(KeyAction::Undo),
            (true, true, "z") | (true, false, "y") => Some(KeyAction::Redo),
            (false, false, "[") => Some(KeyAction::BrushSizeDown),
            (false, false, "]") => Some(KeyAction::BrushSizeUp),
            _ => None,
        }
    }
}

/// Raw input forwarded by the host event loop.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown { pos: Point, button: PointerButton },
    PointerMove { pos: Point },
    /// Release at `pos`; the position is delivered as a final move first.
    PointerUp { pos: Point },
    PointerLeave,
    Wheel { pos: Point, delta_y: f32 },
    Key(KeyPress),
}

// ============================================================================
// LOADING
// ============================================================================

/// Where a session's images come from.
pub enum LoadRequest {
    Files {
        source: PathBuf,
        mask: PathBuf,
    },
    Bytes {
        name: String,
        source: Vec<u8>,
        mask: Vec<u8>,
    },
    /// Submit the source to a background remover; its output is the mask.
    RemoveBackground {
        name: String,
        source: Vec<u8>,
        remover: Arc<dyn BackgroundRemover>,
    },
}

impl LoadRequest {
    pub fn name(&self) -> String {
        match self {
            LoadRequest::Files { source, .. } => display_name(source),
            LoadRequest::Bytes { name, .. } | LoadRequest::RemoveBackground { name, .. } => {
                name.clone()
            }
        }
    }

    /// Fetch and decode both images.  Runs on the load worker.
    pub fn run(self, decoder: &dyn ImageDecoder) -> Result<(String, LoadedImages), LoadError> {
        let name = self.name();
        let images = match self {
            LoadRequest::Files { source, mask } => {
                let source = io::read_image_bytes(&source)?;
                let mask = io::read_image_bytes(&mask)?;
                io::decode_pair(decoder, &source, &mask)?
            }
            LoadRequest::Bytes { source, mask, .. } => io::decode_pair(decoder, &source, &mask)?,
            LoadRequest::RemoveBackground {
                source, remover, ..
            } => {
                let processed = remover.remove_background(&source)?;
                io::decode_pair(decoder, &source, &processed)?
            }
        };
        Ok((name, images))
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Result delivered from a background IO job.  Loads carry the id of the
/// request that produced them; exports carry the project and mask
/// generation they were taken from.
pub enum IoResult {
    Loaded {
        load_id: u64,
        name: String,
        images: LoadedImages,
    },
    LoadFailed {
        load_id: u64,
        error: LoadError,
    },
    ExportComplete {
        path: PathBuf,
        project_id: Uuid,
        generation: u64,
    },
    ExportFailed {
        path: PathBuf,
        error: ExportError,
    },
}

/// Lifecycle of the editor.  Interaction only reaches a project in `Editing`.
pub enum AppState {
    Empty,
    Loading,
    Editing(Box<Project>),
}

// ============================================================================
// EDITOR APP
// ============================================================================

/// Owns at most one editing session and routes input to it.
pub struct EditorApp {
    state: AppState,
    pub settings: EditorSettings,
    decoder: Arc<dyn ImageDecoder>,
    viewport: (u32, u32),
    io_sender: mpsc::Sender<IoResult>,
    io_receiver: mpsc::Receiver<IoResult>,
    pending_io_ops: usize,
    /// Id of the load whose result may still become the session.
    current_load: u64,
    last_error: Option<String>,
}

impl EditorApp {
    pub fn new(settings: EditorSettings) -> Self {
        Self::with_decoder(settings, Arc::new(ImageCrateDecoder))
    }

    pub fn with_decoder(settings: EditorSettings, decoder: Arc<dyn ImageDecoder>) -> Self {
        let (io_sender, io_receiver) = mpsc::channel();
        Self {
            state: AppState::Empty,
            settings,
            decoder,
            viewport: DEFAULT_VIEWPORT,
            io_sender,
            io_receiver,
            pending_io_ops: 0,
            current_load: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, AppState::Loading)
    }

    pub fn project(&self) -> Option<&Project> {
        match &self.state {
            AppState::Editing(project) => Some(project.as_ref()),
            _ => None,
        }
    }

    pub fn project_mut(&mut self) -> Option<&mut Project> {
        match &mut self.state {
            AppState::Editing(project) => Some(project.as_mut()),
            _ => None,
        }
    }

    /// Reason the most recent load or export failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if let Some(project) = self.project_mut() {
            project.resize_viewport(width, height);
        }
    }

    /// Load on the calling thread.  On failure the app returns to `Empty`.
    /// Refused with [`LoadError::Busy`] while a background load is pending.
    pub fn open(&mut self, request: LoadRequest) -> Result<(), LoadError> {
        if self.is_loading() {
            log_warn!("Load of '{}' refused: another load is pending", request.name());
            return Err(LoadError::Busy);
        }
        log_info!("Loading session '{}'", request.name());
        self.current_load += 1;
        self.state = AppState::Loading;
        match request.run(self.decoder.as_ref()) {
            Ok((name, images)) => {
                self.enter_editing(name, images);
                Ok(())
            }
            Err(e) => {
                self.fail_load(&e);
                Err(e)
            }
        }
    }

    /// Start loading on a worker.  Returns `false` (and does nothing) when a
    /// load is already pending.  Poll with [`EditorApp::poll_io`].
    pub fn start_load(&mut self, request: LoadRequest) -> bool {
        if self.is_loading() {
            log_warn!("Load of '{}' ignored: another load is pending", request.name());
            return false;
        }
        log_info!("Loading session '{}' in background", request.name());
        self.current_load += 1;
        self.state = AppState::Loading;
        self.pending_io_ops += 1;

        let load_id = self.current_load;
        let sender = self.io_sender.clone();
        let decoder = Arc::clone(&self.decoder);
        rayon::spawn(move || {
            let result = match request.run(decoder.as_ref()) {
                Ok((name, images)) => IoResult::Loaded {
                    load_id,
                    name,
                    images,
                },
                Err(error) => IoResult::LoadFailed { load_id, error },
            };
            let _ = sender.send(result);
        });
        true
    }

    /// Abandon the pending background load and return to `Empty`.  Its
    /// result is discarded when it arrives.
    pub fn cancel_load(&mut self) -> bool {
        if !self.is_loading() {
            return false;
        }
        log_info!("Load cancelled");
        self.current_load += 1;
        self.state = AppState::Empty;
        true
    }

    /// Apply every finished background job.  Returns `true` if anything
    /// was applied.
    pub fn poll_io(&mut self) -> bool {
        let mut applied = false;
        while let Ok(result) = self.io_receiver.try_recv() {
            self.apply_io_result(result);
            applied = true;
        }
        applied
    }

    /// Block until every pending background job has reported back.
    pub fn wait_for_io(&mut self) {
        while self.pending_io_ops > 0 {
            match self.io_receiver.recv() {
                Ok(result) => self.apply_io_result(result),
                Err(_) => {
                    // Unreachable while `self` holds a sender; treat as aborted
                    self.pending_io_ops = 0;
                    if self.is_loading() {
                        self.fail_load(&LoadError::Aborted);
                    }
                }
            }
        }
    }

    fn apply_io_result(&mut self, result: IoResult) {
        self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
        match result {
            IoResult::Loaded {
                load_id,
                name,
                images,
            } => {
                if self.accepts_load(load_id) {
                    self.enter_editing(name, images);
                } else {
                    log_warn!("Discarded stale load result '{}'", name);
                }
            }
            IoResult::LoadFailed { load_id, error } => {
                if self.accepts_load(load_id) {
                    self.fail_load(&error);
                } else {
                    log_warn!("Discarded stale load failure: {}", error);
                }
            }
            IoResult::ExportComplete {
                path,
                project_id,
                generation,
            } => {
                log_info!("Export finished: {}", path.display());
                if let Some(project) = self.project_mut()
                    && project.id == project_id
                {
                    project.mark_exported(generation);
                }
            }
            IoResult::ExportFailed { path, error } => {
                log_err!("Export to {} failed: {}", path.display(), error);
                self.last_error = Some(error.to_string());
            }
        }
    }

    fn accepts_load(&self, load_id: u64) -> bool {
        self.is_loading() && load_id == self.current_load
    }

    fn enter_editing(&mut self, name: String, images: LoadedImages) {
        let (w, h) = images.source.dimensions();
        let project = Project::new(name, images, &self.settings, self.viewport.0, self.viewport.1);
        log_info!(
            "Session '{}' ready: {}x{}, zoom {}%",
            project.name,
            w,
            h,
            project.zoom_percent()
        );
        self.last_error = None;
        self.state = AppState::Editing(Box::new(project));
    }

    fn fail_load(&mut self, e: &LoadError) {
        log_err!("Load failed: {}", e);
        self.last_error = Some(e.to_string());
        self.state = AppState::Empty;
    }

    /// Route one input event.  Ignored unless a session is being edited.
    /// Returns whether the frame needs redrawing.
    pub fn handle_event(&mut self, event: InputEvent) -> bool {
        let Some(project) = self.project_mut() else { return false };
        match event {
            InputEvent::PointerDown { pos, button } => project.pointer_down(button, pos),
            InputEvent::PointerMove { pos } => project.pointer_move(pos),
            InputEvent::PointerUp { pos } => {
                let moved = project.pointer_move(pos);
                project.pointer_up() || moved
            }
            InputEvent::PointerLeave => project.pointer_leave(),
            InputEvent::Wheel { pos, delta_y } => project.wheel(pos, delta_y),
            InputEvent::Key(press) => match KeyAction::from_key_press(&press) {
                Some(KeyAction::Undo) => project.undo(),
                Some(KeyAction::Redo) => project.redo(),
                Some(KeyAction::BrushSizeUp) => {
                    project.increase_brush_size();
                    false
                }
                Some(KeyAction::BrushSizeDown) => {
                    project.decrease_brush_size();
                    false
                }
                None => false,
            },
        }
    }

    /// Export on a worker; completion arrives through [`EditorApp::poll_io`].
    pub fn start_export(&mut self, path: PathBuf) -> bool {
        let Some(project) = self.project_mut() else { return false };
        let image = project.export();
        let project_id = project.id;
        let generation = project.mask().generation();
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        rayon::spawn(move || {
            let result = match io::write_png(&image, &path) {
                Ok(()) => IoResult::ExportComplete {
                    path,
                    project_id,
                    generation,
                },
                Err(error) => IoResult::ExportFailed { path, error },
            };
            let _ = sender.send(result);
        });
        true
    }

    /// Fold the session's tool, brush and background back into the
    /// settings and persist them.
    pub fn save_preferences(&mut self) -> Result<(), crate::settings::SettingsError> {
        if let AppState::Editing(project) = &self.state {
            project.store_preferences(&mut self.settings);
        }
        self.settings.save()
    }
}
