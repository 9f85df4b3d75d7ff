//! Segment layout math: pure functions deciding which slice of the clip
//! needs thumbnails for the current scroll position. Fetches are batched
//! per fixed-width segment so a scroll of a few pixels never triggers a
//! new decode.

use super::FilmstripWindow;

/// Fetch-batch unit: wide enough to amortize one decode call over a
/// couple dozen thumbnails, small enough to load fast.
pub const SEGMENT_WIDTH_PX: f32 = 480.0;

/// Fixed height of every thumbnail in the strip
pub const THUMB_HEIGHT_PX: u32 = 56;

/// Aspect ratio assumed until the poster frame reports the real one
pub const DEFAULT_THUMB_ASPECT: f32 = 16.0 / 9.0;

/// Derived per-clip layout constants; stable until the thumbnail aspect
/// ratio changes (first real poster frame).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentLayout {
    pub thumb_width: f32,
    pub segment_px: f32,
    pub thumbs_per_segment: usize,
}

impl SegmentLayout {
    pub fn new(aspect: f32) -> Self {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            DEFAULT_THUMB_ASPECT
        };
        let thumb_width = (THUMB_HEIGHT_PX as f32 * aspect).max(8.0);
        let thumbs_per_segment = ((SEGMENT_WIDTH_PX / thumb_width).floor() as usize).max(1);
        Self {
            thumb_width,
            segment_px: SEGMENT_WIDTH_PX,
            thumbs_per_segment,
        }
    }

    /// Clip time covered by one thumbnail slot
    pub fn ms_per_thumb(&self, ms_per_px: f64, rate: f64) -> f64 {
        self.thumb_width as f64 * ms_per_px * rate
    }
}

/// Index of the leftmost segment still needed given how many pixels of
/// the source have scrolled past the viewport's left edge.
pub fn offscreen_segments(offscreen_px: f32, trim_offset_px: f32, segment_px: f32) -> usize {
    if segment_px <= 0.0 {
        return 0;
    }
    let adjusted = (offscreen_px - trim_offset_px).max(0.0);
    (adjusted / segment_px).floor() as usize
}

/// Derive the filmstrip window for a target segment: the strip covers
/// the viewport plus one backlog segment on each side (clamped to the
/// item) so small scroll deltas stay within the already-fetched range.
pub fn window_for_segment(
    layout: &SegmentLayout,
    segment_index: usize,
    visible_px: f32,
    item_width_px: f32,
    ms_per_px: f64,
    rate: f64,
) -> FilmstripWindow {
    let mut win = FilmstripWindow {
        segment_index,
        ..Default::default()
    };

    if !item_width_px.is_finite() || !visible_px.is_finite() {
        return win;
    }
    if item_width_px <= 0.0 || visible_px <= 0.0 {
        return win;
    }

    let seg_left = (segment_index as f32 * layout.segment_px).min(item_width_px);
    let left_backlog = seg_left.min(layout.segment_px);
    let offset = seg_left - left_backlog;
    let right_edge = (seg_left + visible_px + layout.segment_px).min(item_width_px);
    let covered = right_edge - offset;
    if covered <= 0.0 {
        return win;
    }

    win.offset = offset;
    win.start_time_ms = offset as f64 * ms_per_px * rate;
    win.thumb_count = 1 + (covered / layout.thumb_width).round() as usize;
    win.width_on_screen = visible_px.min(item_width_px);
    win
}
