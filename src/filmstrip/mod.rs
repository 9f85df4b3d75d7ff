//! Filmstrip preview engine: thumbnail acquisition, caching and
//! compositing for video clips on the timeline. The host only ever talks
//! to the [`ClipItem`] controller through the [`TimelineItem`] trait;
//! everything else here is internal machinery.

mod compositor;
mod controller;
mod fallback;
mod layout;
mod loader;
mod store;

pub use compositor::*;
pub use controller::*;
pub use fallback::*;
pub use layout::*;
pub use loader::*;
pub use store::*;

use eframe::egui;

/// Identity of a cached thumbnail: the timestamp it represents rounded
/// to whole seconds, or the fallback tile that survives cache clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbKey {
    Second(i64),
    Fallback,
}

impl ThumbKey {
    /// The one rounding rule shared by loader and compositor: millisecond
    /// timestamp divided by 1000 and rounded to the nearest second.
    pub fn from_ms(ms: f64) -> Self {
        ThumbKey::Second((ms / 1000.0).round() as i64)
    }
}

/// One generation of a requested/rendered thumbnail strip.
///
/// Three live instances exist per clip: `current` (composited now),
/// `next` (what the latest scroll/zoom wants) and `loading` (in flight).
/// `loading` is a snapshot of `next` taken when a fetch starts and is
/// never mutated mid-fetch; `current` is overwritten with `loading` only
/// after that fetch's results have all been merged into the store.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilmstripWindow {
    /// Index of the leftmost segment this window was derived for
    pub segment_index: usize,
    /// Left edge of the strip in item-local pixels (backlog included)
    pub offset: f32,
    /// Clip time at `offset`, before the trim offset is applied
    pub start_time_ms: f64,
    /// Number of thumbnail slots covering the window
    pub thumb_count: usize,
    /// Width of the viewport this window was derived for
    pub width_on_screen: f32,
}

/// Shared mutable state of one clip's filmstrip. Mutated only by the
/// controller and the loader task it spawns; the compositor reads it.
pub struct StripState {
    pub store: ThumbStore,
    pub current: FilmstripWindow,
    pub next: FilmstripWindow,
    pub loading: FilmstripWindow,
    /// True when the store or a window changed since the last composite
    pub dirty: bool,
    /// Item-local x where the fallback pattern starts tiling
    pub fallback_origin: f32,
    /// Aspect ratio reported by the poster tier, to be picked up by the
    /// controller on the next render pass
    pub pending_aspect: Option<f32>,
    /// Bumped on source/scale changes so stale fetches are not merged
    pub generation: u64,
}

impl StripState {
    pub fn new() -> Self {
        Self {
            store: ThumbStore::new(),
            current: FilmstripWindow::default(),
            next: FilmstripWindow::default(),
            loading: FilmstripWindow::default(),
            dirty: true,
            fallback_origin: 0.0,
            pending_aspect: None,
            generation: 0,
        }
    }

    /// Forget all three windows, e.g. after a zoom change invalidated the
    /// pixel-to-time mapping. Cached images stay valid (keyed by time).
    pub fn reset_windows(&mut self) {
        self.current = FilmstripWindow::default();
        self.next = FilmstripWindow::default();
        self.loading = FilmstripWindow::default();
        self.generation += 1;
        self.dirty = true;
    }
}

impl Default for StripState {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability interface the host timeline drives. Items are used under
/// composition: the host owns layout and input and calls these hooks.
pub trait TimelineItem {
    /// Per-frame render hook. `rect` is the item's full on-screen rect
    /// (possibly extending past the viewport; the ui clip rect bounds it).
    fn render(&mut self, ui: &mut egui::Ui, rect: egui::Rect, selected: bool);

    /// Viewport scrolled. `scroll_left` is the viewport's left edge in
    /// source-local pixels (item-local plus the trim offset).
    fn on_scroll_change(&mut self, scroll_left: f32, force: bool);

    /// Pixel-to-time scale changed (zoom)
    fn on_scale(&mut self, ms_per_px: f64);

    /// Item geometry changed; forces a recomposite on the next render
    fn on_resize(&mut self);

    /// Swap the clip's media source, keeping the visual fallback alive
    fn set_src(&mut self, src: &str);

    /// Width of the (trimmed) item in timeline pixels
    fn width_px(&self) -> f32;
}
