//! Timeline clip controller: owns the strip state, schedules fetches and
//! composites, and is the only filmstrip component the host timeline
//! talks to (through the [`TimelineItem`] trait).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use eframe::egui;
use image::DynamicImage;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use super::fallback;
use super::layout::{self, SegmentLayout, DEFAULT_THUMB_ASPECT};
use super::loader::{FilmstripLoader, LoaderEvent, SharedSource};
use super::{Compositor, StripState, ThumbKey, TimelineItem};
use crate::ffmpeg::{extract_poster, resolve_source, FfmpegFrameSource, FrameSource};

/// Bound on decode-resource initialization (probe + setup)
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the poster-tier fetch
const POSTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum interval between composites; bursts of scroll and load events
/// within one refresh interval coalesce into a single redraw.
const COMPOSITE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitPhase {
    Initializing,
    Ready,
    /// Decode resource failed or timed out; fallback tier only
    Unavailable,
}

/// Everything the host hands over when a clip lands on the timeline.
#[derive(Debug, Clone)]
pub struct ClipItemParams {
    pub name: String,
    pub src: String,
    /// Optional out-of-band preview image; when absent the poster frame
    /// is pulled from the clip itself.
    pub poster_src: Option<String>,
    pub duration_ms: f64,
    pub trim_start_ms: f64,
    pub trim_end_ms: f64,
    pub ms_per_px: f64,
    pub rate: f64,
    pub corner_radius: f32,
}

pub struct ClipItem {
    params: ClipItemParams,

    rt: Handle,
    ctx: egui::Context,

    state: Arc<Mutex<StripState>>,
    source_slot: SharedSource,
    phase: Arc<Mutex<InitPhase>>,
    loader: FilmstripLoader,
    events_rx: Receiver<LoaderEvent>,
    compositor: Compositor,
    layout: SegmentLayout,

    /// Viewport left edge in source-local pixels
    scroll_left: f32,
    visible_px: f32,
    force_composite: bool,
    last_composite: Instant,
}

impl ClipItem {
    pub fn new(rt: Handle, ctx: egui::Context, params: ClipItemParams) -> Self {
        let item = Self::with_slot(rt, ctx, params, Arc::new(RwLock::new(None)));
        item.spawn_init();
        item.spawn_poster_fetch();
        item
    }

    fn with_slot(
        rt: Handle,
        ctx: egui::Context,
        params: ClipItemParams,
        source_slot: SharedSource,
    ) -> Self {
        let mut state = StripState::new();
        // Immediate fallback tier: drawable before any I/O completes
        state
            .store
            .set(ThumbKey::Fallback, fallback::placeholder_tile(DEFAULT_THUMB_ASPECT));
        let state = Arc::new(Mutex::new(state));

        let (events_tx, events_rx) = unbounded();
        let loader = FilmstripLoader::new(Arc::clone(&source_slot), events_tx);
        let texture_name = format!("filmstrip:{}", params.name);
        let corner_radius = params.corner_radius;

        Self {
            params,
            rt,
            ctx,
            state,
            source_slot,
            phase: Arc::new(Mutex::new(InitPhase::Initializing)),
            loader,
            events_rx,
            compositor: Compositor::new(texture_name, corner_radius),
            layout: SegmentLayout::new(DEFAULT_THUMB_ASPECT),
            scroll_left: 0.0,
            visible_px: 0.0,
            force_composite: false,
            last_composite: Instant::now() - COMPOSITE_INTERVAL,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.params.duration_ms
    }

    /// Pixels of the source hidden to the left by the trim-in point
    pub fn trim_offset_px(&self) -> f32 {
        (self.params.trim_start_ms / (self.params.ms_per_px * self.params.rate)) as f32
    }

    /// Last source timestamp the loader may request
    fn max_time_ms(&self) -> f64 {
        self.params.trim_end_ms.min(self.params.duration_ms)
    }

    /// Resolve and probe the source off the render loop. On success the
    /// decode resource lands in the shared slot and a fresh fetch cycle
    /// starts; on failure the item stays on the fallback tier.
    fn spawn_init(&self) {
        let src = self.params.src.clone();
        let slot = Arc::clone(&self.source_slot);
        let phase = Arc::clone(&self.phase);
        let state = Arc::clone(&self.state);
        let ctx = self.ctx.clone();

        self.rt.spawn(async move {
            let init = async {
                let path = resolve_source(&src)?;
                FfmpegFrameSource::init(path).await
            };
            match tokio::time::timeout(INIT_TIMEOUT, init).await {
                Ok(Ok(fs)) => {
                    debug!("decode resource ready for {}", src);
                    let aspect = fs.aspect();
                    *slot.write() = Some(Arc::new(fs) as Arc<dyn FrameSource>);
                    *phase.lock() = InitPhase::Ready;
                    // Forget the pre-init windows so the next render pass
                    // re-derives and fetches real thumbnails
                    let mut s = state.lock();
                    s.pending_aspect = Some(aspect);
                    s.reset_windows();
                }
                Ok(Err(e)) => {
                    warn!("decode resource unavailable for {}: {}", src, e);
                    *phase.lock() = InitPhase::Unavailable;
                }
                Err(_) => {
                    warn!("decode resource init timed out for {}", src);
                    *phase.lock() = InitPhase::Unavailable;
                }
            }
            ctx.request_repaint();
        });
    }

    /// Fetch the poster tier in the background. On success it replaces
    /// the generic placeholder under the fallback key and reports the
    /// clip's real aspect ratio; on failure the immediate tier stays.
    fn spawn_poster_fetch(&self) {
        let src = self.params.src.clone();
        let poster_src = self.params.poster_src.clone();
        let state = Arc::clone(&self.state);
        let phase = Arc::clone(&self.phase);
        let ctx = self.ctx.clone();

        self.rt.spawn(async move {
            let fetch =
                tokio::task::spawn_blocking(move || fetch_poster(poster_src.as_deref(), &src));
            match tokio::time::timeout(POSTER_TIMEOUT, fetch).await {
                Ok(Ok(Ok(poster))) => {
                    let (tile, aspect) = fallback::poster_tile(&poster);
                    let mut s = state.lock();
                    s.store.set(ThumbKey::Fallback, tile);
                    s.pending_aspect = Some(aspect);
                    s.dirty = true;
                }
                Ok(Ok(Err(e))) => warn!("poster fetch failed: {}", e),
                Ok(Err(e)) => warn!("poster fetch task aborted: {}", e),
                Err(_) => warn!("poster fetch timed out after {:?}", POSTER_TIMEOUT),
            }
            // Poster settled either way; stop showing the loading label
            // even if the decode resource is still probing.
            let mut p = phase.lock();
            if *p == InitPhase::Initializing {
                *p = InitPhase::Unavailable;
            }
            drop(p);
            ctx.request_repaint();
        });
    }

    fn request_fetch(&self) {
        let ms_per_thumb = self.layout.ms_per_thumb(self.params.ms_per_px, self.params.rate);
        self.loader.request(
            &self.rt,
            &self.ctx,
            &self.state,
            ms_per_thumb,
            self.params.trim_start_ms,
            self.max_time_ms(),
        );
    }

    /// Re-derive `next` for the segment under `scroll_left` and kick the
    /// loader. Shared by scroll, scale, resize and source changes.
    fn derive_window(&mut self) {
        let width = self.width_px();
        let seg = layout::offscreen_segments(
            self.scroll_left,
            self.trim_offset_px(),
            self.layout.segment_px,
        );
        let win = layout::window_for_segment(
            &self.layout,
            seg,
            self.visible_px,
            width,
            self.params.ms_per_px,
            self.params.rate,
        );

        {
            let mut s = self.state.lock();
            s.next = win;
            // Slide the fallback pattern with the scroll so the
            // placeholder tracks the viewport before any fetch lands
            s.fallback_origin = fallback::pattern_origin(win.offset, self.visible_px, width);
            s.dirty = true;
        }

        if win.thumb_count > 0 {
            self.request_fetch();
        }
    }

    /// Pick up aspect-ratio updates reported by the poster tier: they
    /// change the thumbnail width, which invalidates the segment layout
    /// and every window derived from it.
    fn apply_pending_aspect(&mut self) {
        let pending = self.state.lock().pending_aspect.take();
        if let Some(aspect) = pending {
            let layout = SegmentLayout::new(aspect);
            if layout != self.layout {
                self.layout = layout;
                self.state.lock().reset_windows();
                self.derive_window();
            }
        }
    }

    /// Re-trigger the loader whenever the promoted window lags behind
    /// `next`: the viewport moved on mid-fetch, or the previous fetch
    /// failed and is due for a retry. Checked every frame rather than
    /// only on completion events, so a request swallowed by the failure
    /// backoff is re-issued on a later frame instead of getting lost.
    fn reconcile_loader(&mut self) {
        while self.events_rx.try_recv().is_ok() {}
        if self.loader.is_fetching() {
            return;
        }
        let stale = {
            let s = self.state.lock();
            s.next != s.current && s.next.thumb_count > 0
        };
        if stale {
            self.request_fetch();
        }
    }

    fn composite(&mut self, force: bool) {
        let width = self.width_px();
        let ms_per_thumb = self.layout.ms_per_thumb(self.params.ms_per_px, self.params.rate);
        let mut s = self.state.lock();
        self.compositor.draw(
            &self.ctx,
            &mut s,
            &self.layout,
            width,
            self.params.trim_start_ms,
            ms_per_thumb,
            force,
        );
    }

    fn draw_loading(&self, ui: &mut egui::Ui, rect: egui::Rect) {
        let painter = ui.painter_at(rect);
        painter.rect_filled(
            rect,
            egui::Rounding::same(self.params.corner_radius),
            egui::Color32::from_gray(40),
        );
        painter.text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            "Loading…",
            egui::FontId::proportional(12.0),
            egui::Color32::from_gray(160),
        );
    }

    fn draw_strip(&self, ui: &mut egui::Ui, rect: egui::Rect, selected: bool) {
        let painter = ui.painter_at(rect.intersect(ui.clip_rect()));

        if let Some(texture) = self.compositor.texture() {
            let dest = egui::Rect::from_min_size(
                egui::pos2(rect.left() + self.compositor.origin_x(), rect.top()),
                egui::vec2(self.compositor.surface_width(), rect.height()),
            );
            painter.image(
                texture.id(),
                dest,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }

        painter.text(
            rect.left_top() + egui::vec2(6.0, 4.0),
            egui::Align2::LEFT_TOP,
            &self.params.name,
            egui::FontId::proportional(11.0),
            egui::Color32::from_gray(230),
        );

        if selected {
            painter.rect_stroke(
                rect,
                egui::Rounding::same(self.params.corner_radius),
                egui::Stroke::new(2.0, egui::Color32::from_rgb(255, 150, 50)),
            );
        }
    }
}

impl TimelineItem for ClipItem {
    fn render(&mut self, ui: &mut egui::Ui, rect: egui::Rect, selected: bool) {
        let visible = ui.clip_rect().intersect(rect).width().max(0.0);
        if (visible - self.visible_px).abs() > 1.0 {
            self.visible_px = visible;
            self.derive_window();
        }

        self.reconcile_loader();
        self.apply_pending_aspect();

        // First pass with a real width: windows have never been derived
        if self.width_px() > 0.0 && self.state.lock().next.thumb_count == 0 {
            self.derive_window();
        }

        if *self.phase.lock() == InitPhase::Initializing {
            self.draw_loading(ui, rect);
            return;
        }

        // Debounced composite: within the refresh interval a dirty state
        // only schedules a later repaint instead of redrawing now.
        let due = self.last_composite.elapsed() >= COMPOSITE_INTERVAL;
        let dirty = self.state.lock().dirty;
        if (dirty || self.force_composite) && due {
            let force = self.force_composite;
            self.force_composite = false;
            self.last_composite = Instant::now();
            self.composite(force);
        } else if dirty {
            self.ctx.request_repaint_after(
                COMPOSITE_INTERVAL.saturating_sub(self.last_composite.elapsed()),
            );
        }

        self.draw_strip(ui, rect, selected);
    }

    fn on_scroll_change(&mut self, scroll_left: f32, force: bool) {
        let seg = layout::offscreen_segments(
            scroll_left,
            self.trim_offset_px(),
            self.layout.segment_px,
        );
        self.scroll_left = scroll_left;

        let unchanged = {
            let s = self.state.lock();
            s.next.segment_index == seg && s.next.thumb_count > 0
        };
        if unchanged && !force {
            return;
        }
        self.derive_window();
    }

    fn on_scale(&mut self, ms_per_px: f64) {
        if ms_per_px <= 0.0 || !ms_per_px.is_finite() {
            return;
        }
        // Keep the same source pixel under the viewport's left edge
        self.scroll_left =
            (self.scroll_left as f64 * self.params.ms_per_px / ms_per_px) as f32;
        self.params.ms_per_px = ms_per_px;
        // Zoom invalidates the pixel-to-time mapping of every window;
        // cached images stay valid since they are keyed by time.
        self.state.lock().reset_windows();
        self.derive_window();
    }

    fn on_resize(&mut self) {
        self.force_composite = true;
        self.state.lock().dirty = true;
    }

    fn set_src(&mut self, src: &str) {
        self.params.src = src.to_string();
        // Drop the decode resource first so an in-flight fetch cannot be
        // followed by another against the old source
        *self.source_slot.write() = None;
        {
            let mut s = self.state.lock();
            s.store.clear_except_fallback();
            s.reset_windows();
        }
        self.spawn_init();
        self.spawn_poster_fetch();
        self.derive_window();
    }

    fn width_px(&self) -> f32 {
        let span_ms = (self.params.trim_end_ms - self.params.trim_start_ms).max(0.0);
        (span_ms / (self.params.ms_per_px * self.params.rate)) as f32
    }
}

/// Load the poster image: a sibling preview file when one was supplied,
/// otherwise the clip's own first frame.
fn fetch_poster(poster_src: Option<&str>, src: &str) -> anyhow::Result<DynamicImage> {
    match poster_src {
        Some(p) => {
            let path = resolve_source(p)?;
            Ok(image::open(path)?)
        }
        None => {
            let path = resolve_source(src)?;
            Ok(DynamicImage::ImageRgba8(extract_poster(&path, 0.0)?))
        }
    }
}
