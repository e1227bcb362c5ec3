//! StickerFE: an interactive mask editor for cutting stickers out of photos.
//!
//! A session pairs a source image with an alpha mask produced by a
//! background remover.  Erase/restore strokes paint into the mask, the view
//! pans and zooms with a pointer-anchored transform, and every stroke lands
//! in a bounded undo history.  The crate has no windowing code: a host
//! forwards pointer, wheel and key events to [`app::EditorApp`] and displays
//! the frames [`project::Project::frame`] renders.

pub mod logger;

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;
