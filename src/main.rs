mod app;
mod dependencies;
mod download;
mod extractor;
mod file_utils;
mod formats;
mod history;
mod localizations;
mod models;
mod settings;
mod theme;
mod ui;

use eframe::egui;
use log::{info, warn};
use std::sync::Arc;

use app::YtdlApp;
use dependencies::DependencyLocator;
use extractor::{Extractor, YtDlp};
use history::DownloadHistory;
use settings::{AppSettings, SettingsStore};

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = SettingsStore::open(AppSettings::default_path());
    let history = DownloadHistory::open(DownloadHistory::default_path());
    info!("Loaded {} history entries", history.len());

    let extractor: Option<Arc<dyn Extractor>> = match YtDlp::locate() {
        Ok(ytdlp) => {
            info!("Using yt-dlp at {}", ytdlp.program().display());
            Some(Arc::new(ytdlp))
        }
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    };

    let app = YtdlApp::new(settings, history, extractor, DependencyLocator::app_local());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([760.0, 620.0])
            .with_min_inner_size([600.0, 480.0])
            .with_title("YouTube Downloader"),
        ..Default::default()
    };

    eframe::run_native(
        "YouTube Downloader",
        options,
        Box::new(|cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::light());
            Box::new(app)
        }),
    )
}
