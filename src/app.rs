use eframe::egui;
use log::warn;
use tokio::runtime::Runtime;

use crate::ffmpeg::probe_file;
use crate::filmstrip::{ClipItem, ClipItemParams};
use crate::ui::TimelinePanel;
use crate::utils::format_time;

pub struct FilmstripApp {
    pub runtime: Runtime,
    pub clips: Vec<ClipItem>,
    pub timeline: TimelinePanel,
    pub status_message: String,
}

impl FilmstripApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        Self {
            runtime: Runtime::new().expect("Failed to create Tokio runtime"),
            clips: Vec::new(),
            timeline: TimelinePanel::default(),
            status_message: "Add a video file to get started".to_string(),
        }
    }

    fn add_file(&mut self, ctx: &egui::Context, path: std::path::PathBuf) {
        // Probe synchronously for the duration; everything slower
        // (poster, decode init) runs in the background per clip.
        let duration_ms = match probe_file(&path) {
            Ok(info) => info.duration * 1000.0,
            Err(e) => {
                warn!("could not probe {:?}: {}", path, e);
                self.status_message = format!("Could not open {:?}: {}", path.file_name(), e);
                return;
            }
        };

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let src = path.to_string_lossy().into_owned();

        self.clips.push(ClipItem::new(
            self.runtime.handle().clone(),
            ctx.clone(),
            ClipItemParams {
                name: name.clone(),
                src,
                poster_src: None,
                duration_ms,
                trim_start_ms: 0.0,
                trim_end_ms: duration_ms,
                ms_per_px: self.timeline.ms_per_px,
                rate: 1.0,
                corner_radius: 4.0,
            },
        ));
        self.status_message = format!("Added {} ({})", name, format_time(duration_ms / 1000.0));
    }

    fn open_file_dialog(&mut self, ctx: &egui::Context) {
        let picked = rfd::FileDialog::new()
            .add_filter(
                "Video files",
                &["mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "ts"],
            )
            .pick_files();

        if let Some(paths) = picked {
            for path in paths {
                self.add_file(ctx, path);
            }
        }
    }
}

impl eframe::App for FilmstripApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("📁 Add Video").clicked() {
                    self.open_file_dialog(ctx);
                }
                if ui.button("🗑 Remove Selected").clicked() {
                    if let Some(idx) = self.timeline.selected.take() {
                        if idx < self.clips.len() {
                            self.clips.remove(idx);
                        }
                    }
                }
                ui.separator();
                ui.label(format!("Zoom: {:.1} ms/px", self.timeline.ms_per_px));
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(&self.status_message);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.clips.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label("Drop a video on the timeline with \"Add Video\"");
                });
            } else {
                self.timeline.show(ui, &mut self.clips);
            }
        });

        // Drag-and-drop onto the window adds clips too
        let dropped: Vec<_> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });
        for path in dropped {
            self.add_file(ctx, path);
        }
    }
}
