// ============================================================================
// StickerFE CLI: headless mask editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   stickerfe --input photo.png --mask mask.png --output sticker.png
//   stickerfe -i photo.png -m mask.png --script edits.txt --frame frame.png
//   stickerfe -i product.jpg --key-tolerance 40          (no mask: color key)
//
// The edit script replays the same input events an interactive host would
// forward, one command per line:
//
//   tool erase|restore|pan        brush <size>
//   down <x> <y> [primary|middle|secondary]
//   move <x> <y>                  up <x> <y>            leave
//   wheel <x> <y> <delta_y>       key <shortcut>        (ctrl+z, ctrl+shift+z, [, ])
//   undo                          redo
//   zoom in|out                   pan <dx> <dy>         fit
//   background checkerboard|white|black|#rrggbb
//
// Blank lines and lines starting with `#` are ignored.  Coordinates are in
// viewport (screen) pixels.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use thiserror::Error;

use crate::app::{EditorApp, InputEvent, KeyPress, LoadRequest};
use crate::canvas::Point;
use crate::components::tools::{PointerButton, Tool};
use crate::compositor::BackgroundMode;
use crate::io::{self, DEFAULT_EXPORT_NAME};
use crate::ops::ai::{ColorKeyRemover, ColorKeySettings};
use crate::settings::EditorSettings;
use crate::{log_err, log_info, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// StickerFE headless mask editor.
#[derive(Parser, Debug)]
#[command(
    name = "stickerfe",
    about = "StickerFE headless sticker mask editor",
    long_about = "Load a photo and its background-removal mask, replay an edit script\n\
                  of erase/restore strokes, and export the cut-out as PNG.\n\n\
                  Example:\n  \
                  stickerfe --input photo.png --mask mask.png --script edits.txt"
)]
pub struct CliArgs {
    /// Source image (PNG, JPEG or WEBP).
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Processed image whose alpha channel is the initial mask.  When
    /// omitted, a border color key cuts out a flat backdrop instead.
    #[arg(short, long, value_name = "FILE")]
    pub mask: Option<PathBuf>,

    /// Edit script to replay after loading.
    #[arg(short, long, value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// Output PNG for the masked result.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_EXPORT_NAME)]
    pub output: PathBuf,

    /// Also write the final viewport frame (background, ghost, result).
    #[arg(long, value_name = "FILE")]
    pub frame: Option<PathBuf>,

    /// Viewport size used for fitting, script coordinates and --frame.
    #[arg(long, value_name = "WxH", default_value = "1280x720", value_parser = parse_viewport)]
    pub viewport: (u32, u32),

    /// History bound (overrides the saved setting).
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Color-key tolerance (0-255) used when no --mask is given.
    #[arg(long, value_name = "0-255", default_value_t = 24)]
    pub key_tolerance: u8,

    /// Persist the final tool, brush size and background as the new defaults.
    #[arg(long)]
    pub save_settings: bool,

    /// Mirror the session log to stderr and print a summary.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_viewport(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("bad height: {}", e))?;
    if w == 0 || h == 0 {
        return Err("viewport must be at least 1x1".to_string());
    }
    Ok((w, h))
}

// ============================================================================
// Edit scripts
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptCommand {
    Tool(Tool),
    Brush(u32),
    Input(InputEvent),
    Undo,
    Redo,
    ZoomIn,
    ZoomOut,
    Pan(f32, f32),
    Background(BackgroundMode),
    Fit,
}

#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

/// Parse a whole script.  The first malformed line aborts with its
/// (1-based) line number.
pub fn parse_script(source: &str) -> Result<Vec<ScriptCommand>, ScriptError> {
    let mut commands = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = parse_line(line).map_err(|message| ScriptError {
            line: idx + 1,
            message,
        })?;
        commands.push(command);
    }
    Ok(commands)
}

fn parse_line(line: &str) -> Result<ScriptCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let args = &words[1..];
    let command = match (words[0].to_ascii_lowercase().as_str(), args.len()) {
        ("tool", 1) => ScriptCommand::Tool(
            Tool::from_config_name(args[0]).ok_or_else(|| format!("unknown tool '{}'", args[0]))?,
        ),
        ("brush", 1) => ScriptCommand::Brush(
            args[0]
                .parse()
                .map_err(|_| format!("bad brush size '{}'", args[0]))?,
        ),
        ("down", 2) | ("down", 3) => ScriptCommand::Input(InputEvent::PointerDown {
            pos: point(args[0], args[1])?,
            button: match args.get(2) {
                Some(name) => button(name)?,
                None => PointerButton::Primary,
            },
        }),
        ("move", 2) => ScriptCommand::Input(InputEvent::PointerMove {
            pos: point(args[0], args[1])?,
        }),
        ("up", 2) => ScriptCommand::Input(InputEvent::PointerUp {
            pos: point(args[0], args[1])?,
        }),
        ("leave", 0) => ScriptCommand::Input(InputEvent::PointerLeave),
        ("wheel", 3) => ScriptCommand::Input(InputEvent::Wheel {
            pos: point(args[0], args[1])?,
            delta_y: number(args[2])?,
        }),
        ("key", 1) => ScriptCommand::Input(InputEvent::Key(
            KeyPress::parse(args[0]).ok_or_else(|| format!("bad shortcut '{}'", args[0]))?,
        )),
        ("undo", 0) => ScriptCommand::Undo,
        ("redo", 0) => ScriptCommand::Redo,
        ("zoom", 1) => match args[0] {
            "in" => ScriptCommand::ZoomIn,
            "out" => ScriptCommand::ZoomOut,
            other => return Err(format!("zoom expects 'in' or 'out', got '{}'", other)),
        },
        ("pan", 2) => ScriptCommand::Pan(number(args[0])?, number(args[1])?),
        ("background", 1) => ScriptCommand::Background(
            BackgroundMode::from_config_name(args[0])
                .ok_or_else(|| format!("unknown background '{}'", args[0]))?,
        ),
        ("fit", 0) => ScriptCommand::Fit,
        (name, n) => return Err(format!("unknown command '{}' with {} argument(s)", name, n)),
    };
    Ok(command)
}

fn number(s: &str) -> Result<f32, String> {
    match s.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("bad number '{}'", s)),
    }
}

fn point(x: &str, y: &str) -> Result<Point, String> {
    Ok(Point::new(number(x)?, number(y)?))
}

fn button(name: &str) -> Result<PointerButton, String> {
    match name.to_ascii_lowercase().as_str() {
        "primary" | "left" => Ok(PointerButton::Primary),
        "middle" => Ok(PointerButton::Middle),
        "secondary" | "right" => Ok(PointerButton::Secondary),
        other => Err(format!("unknown button '{}'", other)),
    }
}

/// Apply one command to the open session.
pub fn apply_command(app: &mut EditorApp, command: &ScriptCommand) -> Result<(), String> {
    if let ScriptCommand::Input(event) = command {
        app.handle_event(event.clone());
        return Ok(());
    }
    let project = app
        .project_mut()
        .ok_or_else(|| "no session is open".to_string())?;
    match command {
        ScriptCommand::Tool(tool) => project.set_tool(*tool),
        ScriptCommand::Brush(size) => {
            project.set_brush_size(*size);
        }
        ScriptCommand::Undo => {
            project.undo();
        }
        ScriptCommand::Redo => {
            project.redo();
        }
        ScriptCommand::ZoomIn => {
            project.zoom_in();
        }
        ScriptCommand::ZoomOut => {
            project.zoom_out();
        }
        ScriptCommand::Pan(dx, dy) => {
            project.pan_by(*dx, *dy);
        }
        ScriptCommand::Background(bg) => {
            project.set_background(*bg);
        }
        ScriptCommand::Fit => {
            project.fit_to_viewport();
        }
        ScriptCommand::Input(_) => {}
    }
    Ok(())
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the headless session and return an OS exit code.
/// `0` = export written, `1` = any failure.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match run_session(&args) {
        Ok(summary) => {
            if args.verbose {
                println!(
                    "  → {} ({}; {:.0}ms)",
                    args.output.display(),
                    summary,
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_err!("CLI session failed: {}", e);
            eprintln!("error: {}", e);
            if let Some(path) = logger::log_path() {
                eprintln!("  see {}", path.display());
            }
            ExitCode::FAILURE
        }
    }
}

/// Load, replay and export for one set of arguments.  Returns a short
/// summary, or the message [`run`] prints on failure.
pub fn run_session(args: &CliArgs) -> Result<String, String> {
    // -- Step 1: Settings & script ---------------------------------------
    let mut settings = EditorSettings::load();
    if let Some(n) = args.history {
        settings.max_history = n.max(1);
    }

    let commands = match &args.script {
        Some(path) => {
            let src = std::fs::read_to_string(path)
                .map_err(|e| format!("could not read script '{}': {}", path.display(), e))?;
            parse_script(&src).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => Vec::new(),
    };

    // -- Step 2: Load ----------------------------------------------------
    let mut app = EditorApp::new(settings);
    app.resize_viewport(args.viewport.0, args.viewport.1);

    let request = match &args.mask {
        Some(mask) => LoadRequest::Files {
            source: args.input.clone(),
            mask: mask.clone(),
        },
        None => {
            let source = io::read_image_bytes(&args.input)
                .map_err(|e| format!("load failed: {}", e))?;
            LoadRequest::RemoveBackground {
                name: args.input.display().to_string(),
                source,
                remover: Arc::new(ColorKeyRemover::new(ColorKeySettings {
                    tolerance: args.key_tolerance,
                    key: None,
                })),
            }
        }
    };
    app.start_load(request);
    app.wait_for_io();
    if app.project().is_none() {
        return Err(format!(
            "load failed: {}",
            app.last_error().unwrap_or("unknown error")
        ));
    }

    // -- Step 3: Replay --------------------------------------------------
    for command in &commands {
        apply_command(&mut app, command)?;
    }
    log_info!("Replayed {} script command(s)", commands.len());

    // -- Step 4: Export --------------------------------------------------
    let project = app
        .project_mut()
        .ok_or_else(|| "session closed unexpectedly".to_string())?;
    project
        .export_png(&args.output)
        .map_err(|e| format!("export failed: {}", e))?;
    if let Some(frame_path) = &args.frame {
        io::write_png(project.frame(), frame_path)
            .map_err(|e| format!("frame export failed: {}", e))?;
    }
    let summary = format!(
        "{} history entries, zoom {}%",
        project.history.len(),
        project.zoom_percent()
    );

    if args.save_settings {
        app.save_preferences()
            .map_err(|e| format!("could not save settings: {}", e))?;
    }

    Ok(summary)
}
