//! Fallback tiles shown wherever a real thumbnail is not cached yet.
//! Two tiers: a synthesized placeholder available with zero I/O at
//! construction time, and a poster-derived tile that replaces it once
//! the clip's preview frame has been fetched. Both are tileable so they
//! stay correct across the item's full width during trim and resize.

use image::{imageops, DynamicImage, Rgba, RgbaImage};

use super::layout::THUMB_HEIGHT_PX;

/// Cap on how many item pixels the offscreen surface / fallback pattern
/// spans at once; bounds memory regardless of clip length.
pub const MAX_PATTERN_WIDTH_PX: f32 = 24_000.0;

/// Synthesized placeholder tile: neutral vertical gradient, film
/// sprocket holes along the edges, a faint play glyph in the middle.
pub fn placeholder_tile(aspect: f32) -> RgbaImage {
    let h = THUMB_HEIGHT_PX;
    let w = ((h as f32 * aspect).round() as u32).max(8);
    let mut img = RgbaImage::new(w, h);

    for y in 0..h {
        let t = y as f32 / h as f32;
        let base = (50.0 - 18.0 * t) as u8;
        for x in 0..w {
            img.put_pixel(x, y, Rgba([base, base, base + 4, 255]));
        }
    }

    // Sprocket hole rows top and bottom
    let hole = Rgba([18u8, 18, 20, 255]);
    for y in (4..9).chain(h.saturating_sub(9)..h.saturating_sub(4)) {
        for x in 0..w {
            if (x / 6) % 2 == 0 {
                img.put_pixel(x, y, hole);
            }
        }
    }

    // Play glyph: a small triangle pointing right
    let cx = w as f32 * 0.44;
    let span = w as f32 * 0.16;
    let cy = h as f32 * 0.5;
    for y in 0..h {
        for x in 0..w {
            let gx = (x as f32 - cx) / span;
            if (0.0..=1.0).contains(&gx) {
                let half = (1.0 - gx) * h as f32 * 0.18;
                if (y as f32 - cy).abs() <= half {
                    img.put_pixel(x, y, Rgba([86, 86, 92, 255]));
                }
            }
        }
    }

    img
}

/// Downscale the poster frame to thumbnail height; returns the tile and
/// the poster's aspect ratio, which supersedes the default assumption.
pub fn poster_tile(poster: &DynamicImage) -> (RgbaImage, f32) {
    let src = poster.to_rgba8();
    let (pw, ph) = (src.width().max(1), src.height().max(1));
    let aspect = pw as f32 / ph as f32;

    let h = THUMB_HEIGHT_PX;
    let w = ((h as f32 * aspect).round() as u32).max(2);
    let tile = if (pw, ph) == (w, h) {
        src
    } else {
        imageops::resize(&src, w, h, imageops::FilterType::Triangle)
    };

    (tile, aspect)
}

/// Item-local x where the fallback pattern starts tiling. For items
/// wider than the pattern cap the origin slides with the strip window so
/// the visible range is always covered without a fetch.
pub fn pattern_origin(window_offset: f32, visible_px: f32, item_width_px: f32) -> f32 {
    if item_width_px <= MAX_PATTERN_WIDTH_PX {
        return 0.0;
    }
    let centered = window_offset + visible_px * 0.5 - MAX_PATTERN_WIDTH_PX * 0.5;
    centered.clamp(0.0, item_width_px - MAX_PATTERN_WIDTH_PX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_fully_opaque() {
        let tile = placeholder_tile(16.0 / 9.0);
        assert_eq!(tile.height(), THUMB_HEIGHT_PX);
        assert!(tile.width() >= 8);
        assert!(tile.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn test_poster_tile_records_aspect() {
        let poster = DynamicImage::new_rgba8(1920, 1080);
        let (tile, aspect) = poster_tile(&poster);
        assert_eq!(tile.height(), THUMB_HEIGHT_PX);
        assert!((aspect - 16.0 / 9.0).abs() < 1e-3);
        assert_eq!(tile.width(), (THUMB_HEIGHT_PX as f32 * aspect).round() as u32);
    }

    #[test]
    fn test_pattern_origin_small_item() {
        assert_eq!(pattern_origin(900.0, 800.0, 5_000.0), 0.0);
    }

    #[test]
    fn test_pattern_origin_tracks_scroll() {
        let item = 100_000.0;
        let near_start = pattern_origin(0.0, 800.0, item);
        let mid = pattern_origin(50_000.0, 800.0, item);
        let near_end = pattern_origin(item - 800.0, 800.0, item);

        assert_eq!(near_start, 0.0);
        assert!(mid > 0.0 && mid < item - MAX_PATTERN_WIDTH_PX + 1.0);
        assert_eq!(near_end, item - MAX_PATTERN_WIDTH_PX);
        // Visible window always inside the pattern span
        assert!(mid <= 50_000.0 && 50_000.0 + 800.0 <= mid + MAX_PATTERN_WIDTH_PX);
    }
}
