//! Offscreen compositor: owns a CPU surface spanning a bounded sliding
//! window of the item, fills it with the fallback pattern, blits cached
//! thumbnails over it and uploads the result as an egui texture. The
//! per-frame render only ever copies this texture to screen.

use eframe::egui;
use image::RgbaImage;

use super::fallback::MAX_PATTERN_WIDTH_PX;
use super::layout::{SegmentLayout, THUMB_HEIGHT_PX};
use super::{StripState, ThumbKey};

pub struct Compositor {
    surface: RgbaImage,
    /// Item-local x of the surface's left edge
    origin_x: f32,
    texture: Option<egui::TextureHandle>,
    texture_name: String,
    corner_radius: f32,
}

impl Compositor {
    pub fn new(texture_name: String, corner_radius: f32) -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            origin_x: 0.0,
            texture: None,
            texture_name,
            corner_radius,
        }
    }

    /// Composite the current window onto the surface and upload it.
    /// No-op unless the state is dirty or `force` is set.
    pub fn draw(
        &mut self,
        ctx: &egui::Context,
        state: &mut StripState,
        layout: &SegmentLayout,
        item_width_px: f32,
        trim_start_ms: f64,
        ms_per_thumb: f64,
        force: bool,
    ) {
        if !self.compose(state, layout, item_width_px, trim_start_ms, ms_per_thumb, force) {
            return;
        }

        let size = [self.surface.width() as usize, self.surface.height() as usize];
        let color = egui::ColorImage::from_rgba_unmultiplied(size, self.surface.as_raw());
        let options = egui::TextureOptions::LINEAR;
        match &mut self.texture {
            Some(handle) => handle.set(color, options),
            None => self.texture = Some(ctx.load_texture(&self.texture_name, color, options)),
        }
    }

    /// CPU part of `draw`, separated so it can run without a GPU context.
    /// Returns true when a new composite was produced.
    fn compose(
        &mut self,
        state: &mut StripState,
        layout: &SegmentLayout,
        item_width_px: f32,
        trim_start_ms: f64,
        ms_per_thumb: f64,
        force: bool,
    ) -> bool {
        if !state.dirty && !force {
            return false;
        }

        // Layout-invalid: skip the pass, keep dirty so the next one retries
        if !item_width_px.is_finite() || item_width_px < 1.0 {
            return false;
        }

        let surf_w = item_width_px.min(MAX_PATTERN_WIDTH_PX).floor() as u32;
        let win = state.current;
        self.origin_x = if item_width_px <= surf_w as f32 {
            0.0
        } else {
            (win.offset + win.width_on_screen * 0.5 - surf_w as f32 * 0.5)
                .clamp(0.0, item_width_px - surf_w as f32)
        };

        if self.surface.width() != surf_w || self.surface.height() != THUMB_HEIGHT_PX {
            self.surface = RgbaImage::new(surf_w, THUMB_HEIGHT_PX);
        }

        // Fallback pattern first: every pixel gets a non-blank fill even
        // when no real thumbnail is cached yet.
        if let Some(tile) = state.store.get(ThumbKey::Fallback) {
            fill_pattern(&mut self.surface, tile, state.fallback_origin - self.origin_x);
        }

        // Thumbnail slots. The timestamp cursor advances only for slots
        // that were actually drawable; a missing image is retried on the
        // next draw while the fallback fill covers its slot.
        let mut cursor_ms = win.start_time_ms + trim_start_ms;
        for slot in 0..win.thumb_count {
            let x = win.offset + slot as f32 * layout.thumb_width - self.origin_x;
            if let Some(img) = state.store.get(ThumbKey::from_ms(cursor_ms)) {
                blit(&mut self.surface, img, x);
                cursor_ms += ms_per_thumb;
            }
        }

        round_corners(&mut self.surface, self.corner_radius);

        // Cleared regardless of how many slots resolved; the next loader
        // completion re-marks dirty.
        state.dirty = false;
        true
    }

    pub fn texture(&self) -> Option<&egui::TextureHandle> {
        self.texture.as_ref()
    }

    /// Item-local x of the uploaded surface's left edge
    pub fn origin_x(&self) -> f32 {
        self.origin_x
    }

    pub fn surface_width(&self) -> f32 {
        self.surface.width() as f32
    }

    #[cfg(test)]
    fn surface(&self) -> &RgbaImage {
        &self.surface
    }
}

/// Tile `src` across the full surface width. `phase_x` is where the
/// pattern origin sits relative to the surface's left edge.
fn fill_pattern(dst: &mut RgbaImage, src: &RgbaImage, phase_x: f32) {
    let tile_w = src.width() as f32;
    if tile_w < 1.0 {
        return;
    }
    let mut x = phase_x % tile_w;
    if x > 0.0 {
        x -= tile_w;
    }
    while x < dst.width() as f32 {
        blit(dst, src, x);
        x += tile_w;
    }
}

/// Copy `src` into `dst` at horizontal offset `x`, clipped to bounds
fn blit(dst: &mut RgbaImage, src: &RgbaImage, x: f32) {
    let x0 = x.round() as i64;
    let rows = dst.height().min(src.height());
    for sy in 0..rows {
        for sx in 0..src.width() {
            let dx = x0 + sx as i64;
            if dx < 0 || dx >= dst.width() as i64 {
                continue;
            }
            dst.put_pixel(dx as u32, sy, *src.get_pixel(sx, sy));
        }
    }
}

/// Punch transparent rounded corners into the surface
fn round_corners(img: &mut RgbaImage, radius: f32) {
    let r = radius.floor() as i64;
    if r <= 0 {
        return;
    }
    let (w, h) = (img.width() as i64, img.height() as i64);
    let r = r.min(w / 2).min(h / 2);
    let centers = [(r, r), (w - 1 - r, r), (r, h - 1 - r), (w - 1 - r, h - 1 - r)];
    for (cx, cy) in centers {
        let x_range = if cx <= r { 0..r } else { (w - r)..w };
        let y_range = if cy <= r { 0..r } else { (h - r)..h };
        for y in y_range {
            for x in x_range.clone() {
                let dx = x - cx;
                let dy = y - cy;
                if ((dx * dx + dy * dy) as f32).sqrt() > r as f32 {
                    img.get_pixel_mut(x as u32, y as u32).0[3] = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filmstrip::{fallback, layout};
    use image::Rgba;

    fn solid(w: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, THUMB_HEIGHT_PX, Rgba(color))
    }

    fn test_state(layout: &SegmentLayout, item_w: f32, visible: f32) -> StripState {
        let mut state = StripState::new();
        state
            .store
            .set(ThumbKey::Fallback, fallback::placeholder_tile(16.0 / 9.0));
        state.current =
            layout::window_for_segment(layout, 0, visible, item_w, 10.0, 1.0);
        state
    }

    #[test]
    fn test_noop_when_clean_and_not_forced() {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let mut state = test_state(&layout, 2000.0, 800.0);
        let mut comp = Compositor::new("t".into(), 0.0);

        assert!(comp.compose(&mut state, &layout, 2000.0, 0.0, 1000.0, false));
        assert!(!state.dirty);
        assert!(!comp.compose(&mut state, &layout, 2000.0, 0.0, 1000.0, false));
        assert!(comp.compose(&mut state, &layout, 2000.0, 0.0, 1000.0, true));
    }

    #[test]
    fn test_zero_width_is_noop_and_keeps_dirty() {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let mut state = test_state(&layout, 0.0, 800.0);
        let mut comp = Compositor::new("t".into(), 0.0);

        assert!(!comp.compose(&mut state, &layout, 0.0, 0.0, 1000.0, false));
        assert!(state.dirty);
    }

    #[test]
    fn test_fallback_never_empty() {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let mut state = test_state(&layout, 3000.0, 800.0);
        let mut comp = Compositor::new("t".into(), 0.0);

        // No real thumbnails cached at all
        assert!(comp.compose(&mut state, &layout, 3000.0, 0.0, 1000.0, false));
        let surface = comp.surface();
        let mid = THUMB_HEIGHT_PX / 2;
        for x in 0..surface.width() {
            assert_eq!(surface.get_pixel(x, mid).0[3], 255, "blank pixel at x={}", x);
        }
    }

    #[test]
    fn test_cached_slots_are_drawn_at_their_offsets() {
        let layout = SegmentLayout::new(1.0); // square thumbs, width == height
        let mut state = test_state(&layout, 1000.0, 500.0);
        let ms_per_thumb = layout.thumb_width as f64 * 10.0;

        // Cache thumbnails for the first two slots
        let red = solid(layout.thumb_width as u32, [200, 0, 0, 255]);
        let green = solid(layout.thumb_width as u32, [0, 200, 0, 255]);
        state.store.set(ThumbKey::from_ms(0.0), red);
        state.store.set(ThumbKey::from_ms(ms_per_thumb), green);

        let mut comp = Compositor::new("t".into(), 0.0);
        assert!(comp.compose(&mut state, &layout, 1000.0, 0.0, ms_per_thumb, false));

        let surface = comp.surface();
        let mid = THUMB_HEIGHT_PX / 2;
        assert_eq!(surface.get_pixel(2, mid).0, [200, 0, 0, 255]);
        let second_slot_x = layout.thumb_width as u32 + 2;
        assert_eq!(surface.get_pixel(second_slot_x, mid).0, [0, 200, 0, 255]);
    }

    #[test]
    fn test_missing_slot_shows_fallback_and_cursor_waits() {
        let layout = SegmentLayout::new(1.0);
        let mut state = test_state(&layout, 1000.0, 500.0);
        let ms_per_thumb = layout.thumb_width as f64 * 10.0;

        // Only the first slot's timestamp is cached; slot 1 is missing,
        // so the cursor must not advance past it and slot 1 keeps the
        // fallback fill until the next loader completion.
        let red = solid(layout.thumb_width as u32, [200, 0, 0, 255]);
        state.store.set(ThumbKey::from_ms(0.0), red);

        let mut comp = Compositor::new("t".into(), 0.0);
        assert!(comp.compose(&mut state, &layout, 1000.0, 0.0, ms_per_thumb, false));

        let surface = comp.surface();
        let mid = THUMB_HEIGHT_PX / 2;
        let second_slot_x = layout.thumb_width as u32 + 2;
        // Slot 1 is covered by the fallback pattern, not blank
        assert_eq!(surface.get_pixel(second_slot_x, mid).0[3], 255);
        assert_ne!(surface.get_pixel(second_slot_x, mid).0, [200, 0, 0, 255]);
    }

    #[test]
    fn test_rounded_corners_are_transparent() {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let mut state = test_state(&layout, 2000.0, 800.0);
        let mut comp = Compositor::new("t".into(), 6.0);

        assert!(comp.compose(&mut state, &layout, 2000.0, 0.0, 1000.0, false));
        let surface = comp.surface();
        assert_eq!(surface.get_pixel(0, 0).0[3], 0);
        assert_eq!(surface.get_pixel(surface.width() - 1, 0).0[3], 0);
        // Center edge pixels stay opaque
        assert_eq!(surface.get_pixel(surface.width() / 2, 0).0[3], 255);
    }

    #[test]
    fn test_surface_width_bounded_for_huge_items() {
        let layout = SegmentLayout::new(16.0 / 9.0);
        let item_w = 200_000.0;
        let mut state = test_state(&layout, item_w, 800.0);
        state.current = layout::window_for_segment(&layout, 100, 800.0, item_w, 10.0, 1.0);
        state.fallback_origin = fallback::pattern_origin(state.current.offset, 800.0, item_w);

        let mut comp = Compositor::new("t".into(), 0.0);
        assert!(comp.compose(&mut state, &layout, item_w, 0.0, 1000.0, false));
        assert!(comp.surface_width() <= MAX_PATTERN_WIDTH_PX);
        // Surface slid to keep the current window covered
        let win = state.current;
        assert!(comp.origin_x() <= win.offset);
        assert!(win.offset + win.width_on_screen <= comp.origin_x() + comp.surface_width());
    }
}
