//! Timeline panel: ruler, horizontal scroll/zoom input and the track the
//! clip items render into. The panel owns layout and input; each item
//! only paints inside the rect it is given.

use eframe::egui;

use crate::filmstrip::{ClipItem, TimelineItem, THUMB_HEIGHT_PX};
use crate::utils::format_tick;

const RULER_HEIGHT: f32 = 24.0;
const TRACK_PADDING: f32 = 6.0;
const ITEM_GAP: f32 = 2.0;

const MIN_MS_PER_PX: f64 = 0.5;
const MAX_MS_PER_PX: f64 = 2000.0;

pub struct TimelinePanel {
    pub ms_per_px: f64,
    pub scroll_x: f32,
    pub selected: Option<usize>,
    last_width: f32,
}

impl Default for TimelinePanel {
    fn default() -> Self {
        Self {
            ms_per_px: 50.0,
            scroll_x: 0.0,
            selected: None,
            last_width: 0.0,
        }
    }
}

impl TimelinePanel {
    pub fn show(&mut self, ui: &mut egui::Ui, items: &mut [ClipItem]) {
        let width = ui.available_width();
        let height = RULER_HEIGHT + TRACK_PADDING * 2.0 + THUMB_HEIGHT_PX as f32;
        let (rect, response) =
            ui.allocate_exact_size(egui::vec2(width, height), egui::Sense::click_and_drag());

        if (width - self.last_width).abs() > 0.5 {
            self.last_width = width;
            for item in items.iter_mut() {
                item.on_resize();
            }
            self.notify_scroll(items, true);
        }

        self.handle_input(ui, &response, rect, items);

        let total_ms: f64 = items.iter().map(|i| i.duration_ms()).sum();
        draw_ruler(ui, rect, self.scroll_x, self.ms_per_px, total_ms);

        let track_rect = egui::Rect::from_min_max(
            egui::pos2(rect.left(), rect.top() + RULER_HEIGHT + TRACK_PADDING),
            egui::pos2(rect.right(), rect.bottom() - TRACK_PADDING),
        );
        ui.painter()
            .rect_filled(track_rect, 4.0, egui::Color32::from_gray(28));

        // Items laid end to end; each gets its full (possibly clipped)
        // rect and handles its own visibility internally.
        let mut x = track_rect.left() - self.scroll_x;
        let mut clicked_item = None;
        for (idx, item) in items.iter_mut().enumerate() {
            let item_w = item.width_px();
            let item_rect = egui::Rect::from_min_size(
                egui::pos2(x, track_rect.top()),
                egui::vec2(item_w, track_rect.height()),
            );

            if item_rect.right() >= track_rect.left() && item_rect.left() <= track_rect.right() {
                let mut child = ui.child_ui(
                    item_rect.intersect(track_rect),
                    egui::Layout::left_to_right(egui::Align::TOP),
                    None,
                );
                item.render(&mut child, item_rect, self.selected == Some(idx));
            }

            if response.clicked() {
                if let Some(pos) = response.interact_pointer_pos() {
                    if item_rect.contains(pos) {
                        clicked_item = Some(idx);
                    }
                }
            }

            x += item_w + ITEM_GAP;
        }

        if response.clicked() {
            self.selected = clicked_item;
        }
    }

    /// Wheel scrolls, ctrl+wheel zooms around the cursor. Items get the
    /// scroll/scale notifications that drive their fetch scheduling.
    fn handle_input(
        &mut self,
        ui: &mut egui::Ui,
        response: &egui::Response,
        rect: egui::Rect,
        items: &mut [ClipItem],
    ) {
        if !response.hovered() {
            return;
        }

        let (scroll_delta, zoom_delta) = ui.input(|i| {
            let scroll = i.raw_scroll_delta.x + i.raw_scroll_delta.y;
            let zoom = if i.modifiers.ctrl { i.raw_scroll_delta.y } else { 0.0 };
            (if i.modifiers.ctrl { 0.0 } else { scroll }, zoom)
        });

        if zoom_delta != 0.0 {
            let factor = (-zoom_delta as f64 / 200.0).exp();
            let new_scale = (self.ms_per_px * factor).clamp(MIN_MS_PER_PX, MAX_MS_PER_PX);
            if new_scale != self.ms_per_px {
                // Keep the time under the cursor fixed while zooming
                let cursor_x = response
                    .hover_pos()
                    .map(|p| p.x - rect.left())
                    .unwrap_or(0.0);
                let anchor_ms = (self.scroll_x + cursor_x) as f64 * self.ms_per_px;
                self.ms_per_px = new_scale;
                self.scroll_x = ((anchor_ms / new_scale) as f32 - cursor_x).max(0.0);
                for item in items.iter_mut() {
                    item.on_scale(new_scale);
                }
                self.notify_scroll(items, false);
            }
            return;
        }

        if scroll_delta != 0.0 {
            self.scroll_x = (self.scroll_x - scroll_delta).max(0.0);
            self.notify_scroll(items, false);
        }

        if response.drag_delta().x != 0.0 {
            self.scroll_x = (self.scroll_x - response.drag_delta().x).max(0.0);
            self.notify_scroll(items, false);
        }
    }

    /// Tell every item how far the viewport's left edge sits into its
    /// source, in source-local pixels.
    fn notify_scroll(&self, items: &mut [ClipItem], force: bool) {
        let mut item_left = 0.0f32;
        for item in items.iter_mut() {
            let local = (self.scroll_x - item_left).max(0.0);
            item.on_scroll_change(local + item.trim_offset_px(), force);
            item_left += item.width_px() + ITEM_GAP;
        }
    }
}

/// Tick marks and time labels along the top edge
fn draw_ruler(ui: &egui::Ui, rect: egui::Rect, scroll_x: f32, ms_per_px: f64, total_ms: f64) {
    let painter = ui.painter_at(rect);
    let ruler_rect = egui::Rect::from_min_size(rect.min, egui::vec2(rect.width(), RULER_HEIGHT));
    painter.rect_filled(ruler_rect, 0.0, egui::Color32::from_gray(22));

    let step_ms = tick_step_ms(ms_per_px);
    let first_tick = ((scroll_x as f64 * ms_per_px) / step_ms).floor() * step_ms;
    let end_ms = total_ms.max((scroll_x + rect.width()) as f64 * ms_per_px);

    let mut t = first_tick;
    while t <= end_ms {
        let x = rect.left() + (t / ms_per_px) as f32 - scroll_x;
        if x > rect.right() {
            break;
        }
        if x >= rect.left() {
            painter.line_segment(
                [
                    egui::pos2(x, ruler_rect.top()),
                    egui::pos2(x, ruler_rect.top() + 8.0),
                ],
                egui::Stroke::new(1.0, egui::Color32::GRAY),
            );
            painter.text(
                egui::pos2(x + 3.0, ruler_rect.top() + 9.0),
                egui::Align2::LEFT_TOP,
                format_tick(t),
                egui::FontId::proportional(10.0),
                egui::Color32::GRAY,
            );
        }
        t += step_ms;
    }
}

/// Smallest label step that keeps at least ~70 px between labels
fn tick_step_ms(ms_per_px: f64) -> f64 {
    const MIN_LABEL_GAP_PX: f64 = 70.0;
    let steps = [
        100.0, 250.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 300_000.0,
        600_000.0,
    ];
    for step in steps {
        if step / ms_per_px >= MIN_LABEL_GAP_PX {
            return step;
        }
    }
    600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_step_grows_with_scale() {
        // Zoomed in: fine ticks; zoomed out: coarse ticks
        assert!(tick_step_ms(1.0) <= 1_000.0);
        assert!(tick_step_ms(100.0) >= 10_000.0);
        for ms_per_px in [0.5, 5.0, 50.0, 500.0, 2000.0] {
            assert!(tick_step_ms(ms_per_px) / ms_per_px >= 70.0 || tick_step_ms(ms_per_px) == 600_000.0);
        }
    }
}
