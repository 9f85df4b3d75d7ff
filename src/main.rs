#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod ffmpeg;
mod filmstrip;
mod ui;
mod utils;

use app::FilmstripApp;
use eframe::egui;

fn main() -> eframe::Result<()> {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("Filmstrip"),
        ..Default::default()
    };

    eframe::run_native(
        "Filmstrip",
        options,
        Box::new(|cc| Ok(Box::new(FilmstripApp::new(cc)))),
    )
}
