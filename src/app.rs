use eframe::egui;
use log::{info, warn};
use reqwest::Url;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use crate::dependencies::DependencyLocator;
use crate::download::{DownloadObserver, Downloader};
use crate::extractor::Extractor;
use crate::file_utils::{default_download_dir, open_file_in_explorer, open_folder, validate_directory};
use crate::history::DownloadHistory;
use crate::localizations::Localizations;
use crate::models::{
    AppState, Busy, DownloadProgress, DownloadRequest, DownloadResult, OverwriteChoice, PendingOverwrite,
    ProgressStatus, VideoFormat,
};
use crate::settings::SettingsStore;
use crate::theme::*;
use crate::ui::{self, HistoryAction};

/// Results coming back from worker threads.
enum AppMessage {
    Progress(DownloadProgress),
    ItemComplete {
        title: String,
        url: String,
        file_path: PathBuf,
    },
    Checked {
        job: u64,
        url: String,
        title: String,
        existing: Option<PathBuf>,
    },
    Formats(Vec<VideoFormat>),
    Finished(DownloadResult),
    UpdateDone(Result<String, String>),
    InstallProgress(String, f32),
    InstallDone(bool),
}

/// Forwards worker events to the UI thread and wakes it up.
#[derive(Clone)]
struct ChannelObserver {
    tx: Sender<AppMessage>,
    ctx: egui::Context,
}

impl ChannelObserver {
    fn send(&self, message: AppMessage) {
        // Only fails once the window is gone.
        let _ = self.tx.send(message);
        self.ctx.request_repaint();
    }
}

impl DownloadObserver for ChannelObserver {
    fn on_progress(&self, progress: &DownloadProgress) {
        self.send(AppMessage::Progress(progress.clone()));
    }

    fn on_item_complete(&self, title: &str, url: &str, file_path: &Path) {
        self.send(AppMessage::ItemComplete {
            title: title.to_string(),
            url: url.to_string(),
            file_path: file_path.to_path_buf(),
        });
    }
}

/// Checks that `url` is an absolute http(s) address. The error is a
/// localization key.
fn validate_url(url: &str) -> Result<(), &'static str> {
    if url.is_empty() {
        return Err("error-no-url");
    }
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => Ok(()),
        _ => Err("error-invalid-url"),
    }
}

pub struct YtdlApp {
    pub state: AppState,
    localizer: Localizations,
    settings: SettingsStore,
    history: DownloadHistory,
    extractor: Option<Arc<dyn Extractor>>,
    ffmpeg: DependencyLocator,
    ffmpeg_path: Option<PathBuf>,
    downloader: Option<Arc<Downloader>>,
    active_url: String,
    job: u64,
    sender: Sender<AppMessage>,
    receiver: Receiver<AppMessage>,
}

impl YtdlApp {
    pub fn new(
        settings: SettingsStore,
        history: DownloadHistory,
        extractor: Option<Arc<dyn Extractor>>,
        ffmpeg: DependencyLocator,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let localizer = Localizations::new();

        let mut state = AppState::default();
        state.status = localizer.tr("status-ready");
        state.formats = vec![VideoFormat::best(), VideoFormat::audio_only()];
        state.url = settings.get().last_url.clone();
        state.download_dir = if settings.get().download_dir.is_empty() {
            default_download_dir().to_string_lossy().to_string()
        } else {
            settings.get().download_dir.clone()
        };
        if extractor.is_none() {
            state.last_error = Some(localizer.tr("error-ytdlp-missing"));
        }

        let ffmpeg_path = ffmpeg.find_working();
        match &ffmpeg_path {
            Some(path) => info!("Using ffmpeg at {}", path.display()),
            None => {
                warn!("ffmpeg is missing or does not run");
                state.ffmpeg_prompt = true;
            }
        }

        Self {
            state,
            localizer,
            settings,
            history,
            extractor,
            ffmpeg,
            ffmpeg_path,
            downloader: None,
            active_url: String::new(),
            job: 0,
            sender,
            receiver,
        }
    }

    fn notifier(&self, ctx: &egui::Context) -> ChannelObserver {
        ChannelObserver {
            tx: self.sender.clone(),
            ctx: ctx.clone(),
        }
    }

    fn fail(&mut self, key: &str) {
        self.state.last_error = Some(self.localizer.tr(key));
    }

    /// Validated URL and extractor, or the error shown to the user.
    fn ready_to_fetch(&mut self) -> Option<(String, Arc<dyn Extractor>)> {
        let url = self.state.url.trim().to_string();
        if let Err(key) = validate_url(&url) {
            self.fail(key);
            return None;
        }
        match self.extractor.clone() {
            Some(extractor) => Some((url, extractor)),
            None => {
                self.fail("error-ytdlp-missing");
                None
            }
        }
    }

    pub fn start_download(&mut self, ctx: &egui::Context) {
        if self.state.is_busy() {
            return;
        }
        self.state.output_path = None;

        let Some((url, extractor)) = self.ready_to_fetch() else {
            return;
        };
        let dir = PathBuf::from(self.state.download_dir.trim());
        if !validate_directory(&dir) {
            self.fail("error-invalid-dir");
            return;
        }

        let download_dir = dir.to_string_lossy().to_string();
        self.settings.update(|s| {
            s.last_url = url.clone();
            s.download_dir = download_dir;
        });
        self.state.last_error = None;
        self.job += 1;

        let downloader = Arc::new(Downloader::new(&dir, extractor).with_ffmpeg_location(self.ffmpeg_path.clone()));
        self.downloader = Some(Arc::clone(&downloader));

        // Playlist items are named individually, nothing to compare against.
        if self.state.playlist {
            self.proceed_download(ctx, url, false);
            return;
        }

        self.state.busy = Busy::CheckingVideo;
        self.state.status = self.localizer.tr("status-checking");

        let notifier = self.notifier(ctx);
        let job = self.job;
        thread::spawn(move || {
            let video = downloader.get_video_info(&url);
            if let Some(video) = &video {
                info!(
                    "Checking '{}' by {} ({:.0}s)",
                    video.title,
                    if video.uploader.is_empty() { "unknown" } else { video.uploader.as_str() },
                    video.duration
                );
            }
            let title = video.map(|video| video.title);
            let existing = title.as_deref().and_then(|t| downloader.check_file_exists(t));
            notifier.send(AppMessage::Checked {
                job,
                url,
                title: title.unwrap_or_default(),
                existing,
            });
        });
        ctx.request_repaint();
    }

    fn proceed_download(&mut self, ctx: &egui::Context, url: String, overwrite: bool) {
        let Some(downloader) = self.downloader.clone() else {
            return;
        };

        let request = DownloadRequest::new(url.clone(), downloader.output_dir())
            .with_format(&self.state.selected_format())
            .with_playlist(self.state.playlist)
            .with_overwrite(overwrite);

        self.active_url = url;
        self.state.busy = Busy::Downloading;
        self.state.progress = 0.0;
        self.state.download_speed.clear();
        self.state.eta.clear();
        self.state.status = self.localizer.tr("status-starting");

        let notifier = self.notifier(ctx);
        thread::spawn(move || {
            let result = downloader.download(&request, &notifier);
            notifier.send(AppMessage::Finished(result));
        });
        ctx.request_repaint();
    }

    fn resolve_overwrite(&mut self, ctx: &egui::Context, choice: OverwriteChoice) {
        let Some(pending) = self.state.pending_overwrite.take() else {
            return;
        };

        match choice {
            OverwriteChoice::Overwrite => self.proceed_download(ctx, pending.url, true),
            OverwriteChoice::OpenExisting => {
                self.downloader = None;
                if open_file_in_explorer(&pending.existing) {
                    self.state.status = self.localizer.tr("status-opening-existing");
                    self.state.output_path = Some(pending.existing);
                } else {
                    self.fail("error-open-folder");
                }
            }
            OverwriteChoice::Cancel => {
                self.downloader = None;
                self.state.status = self.localizer.tr("status-cancelled");
            }
        }
    }

    pub fn cancel_download(&mut self) {
        match self.state.busy {
            Busy::Downloading => {
                if let Some(downloader) = &self.downloader {
                    downloader.cancel();
                    self.state.status = self.localizer.tr("status-cancelling");
                }
            }
            Busy::CheckingVideo => {
                // Any late check result belongs to an older job and is dropped.
                self.job += 1;
                self.downloader = None;
                self.state.busy = Busy::Idle;
                self.state.status = self.localizer.tr("status-cancelled");
            }
            _ => {}
        }
    }

    pub fn load_formats(&mut self, ctx: &egui::Context) {
        if self.state.is_busy() {
            return;
        }
        let Some((url, extractor)) = self.ready_to_fetch() else {
            return;
        };

        self.state.busy = Busy::LoadingFormats;
        self.state.last_error = None;
        self.state.status = self.localizer.tr("status-loading-formats");

        let downloader = Downloader::new(self.state.download_dir.trim(), extractor);
        let notifier = self.notifier(ctx);
        thread::spawn(move || {
            notifier.send(AppMessage::Formats(downloader.get_available_formats(&url)));
        });
    }

    pub fn update_ytdlp(&mut self, ctx: &egui::Context) {
        if self.state.is_busy() {
            return;
        }
        let Some(extractor) = self.extractor.clone() else {
            self.fail("error-ytdlp-missing");
            return;
        };

        self.state.busy = Busy::Updating;
        self.state.last_error = None;
        self.state.status = self.localizer.tr("status-updating");

        let notifier = self.notifier(ctx);
        thread::spawn(move || {
            let outcome = extractor.update().map_err(|e| format!("{:#}", e));
            notifier.send(AppMessage::UpdateDone(outcome));
        });
    }

    pub fn install_ffmpeg(&mut self, ctx: &egui::Context) {
        self.state.ffmpeg_prompt = false;
        self.state.busy = Busy::InstallingFfmpeg;
        self.state.progress = 0.0;
        self.state.install_status = self.localizer.tr("ffmpeg-installing");

        let locator = self.ffmpeg.clone();
        let notifier = self.notifier(ctx);
        thread::spawn(move || {
            let installed = locator.ensure(&mut |message, percent| {
                notifier.send(AppMessage::InstallProgress(message.to_string(), percent));
            });
            notifier.send(AppMessage::InstallDone(installed));
        });
    }

    fn process_messages(&mut self, ctx: &egui::Context) {
        let messages: Vec<AppMessage> = self.receiver.try_iter().collect();
        for message in messages {
            self.handle_message(ctx, message);
        }
    }

    fn handle_message(&mut self, ctx: &egui::Context, message: AppMessage) {
        match message {
            AppMessage::Progress(progress) => {
                if self.state.busy != Busy::Downloading {
                    return;
                }
                self.state.progress = progress.percentage;
                self.state.download_speed = progress.speed.unwrap_or_default();
                self.state.eta = progress.eta.unwrap_or_default();
                self.state.status = match progress.status {
                    ProgressStatus::Finished => self.localizer.tr("status-processing"),
                    ProgressStatus::Downloading => {
                        let percent = format!("{:.1}", progress.percentage);
                        self.localizer
                            .tr_args("status-downloading", &[("percent", percent.as_str())])
                    }
                };
            }
            AppMessage::ItemComplete { title, url, file_path } => {
                self.record_download(&title, &url, &file_path);
            }
            AppMessage::Checked {
                job,
                url,
                title,
                existing,
            } => {
                if job != self.job || self.state.busy != Busy::CheckingVideo {
                    return;
                }
                match existing {
                    Some(existing) => {
                        self.state.busy = Busy::Idle;
                        self.state.pending_overwrite = Some(PendingOverwrite { url, title, existing });
                    }
                    None => self.proceed_download(ctx, url, false),
                }
            }
            AppMessage::Formats(formats) => {
                let count = formats.len().to_string();
                self.state.formats = formats;
                self.state.selected_format = 0;
                self.state.busy = Busy::Idle;
                self.state.status = self
                    .localizer
                    .tr_args("status-formats-loaded", &[("count", count.as_str())]);
            }
            AppMessage::Finished(result) => self.finish_download(result),
            AppMessage::UpdateDone(outcome) => {
                self.state.busy = Busy::Idle;
                match outcome {
                    Ok(report) => {
                        self.state.status = report
                            .lines()
                            .last()
                            .map(str::to_string)
                            .unwrap_or_else(|| self.localizer.tr("status-ready"));
                    }
                    Err(e) => self.state.last_error = Some(e),
                }
            }
            AppMessage::InstallProgress(message, percent) => {
                self.state.install_status = message;
                self.state.progress = percent;
            }
            AppMessage::InstallDone(installed) => {
                self.state.busy = Busy::Idle;
                self.state.progress = 0.0;
                self.ffmpeg_path = self.ffmpeg.find_working();
                if installed {
                    self.state.status = self.localizer.tr("ffmpeg-installed");
                } else {
                    let mut message = self.localizer.tr("ffmpeg-failed");
                    if !self.state.install_status.is_empty() {
                        message = format!("{} ({})", message, self.state.install_status);
                    }
                    self.state.last_error = Some(message);
                }
            }
        }
    }

    fn finish_download(&mut self, result: DownloadResult) {
        self.state.busy = Busy::Idle;
        self.state.download_speed.clear();
        self.state.eta.clear();
        self.downloader = None;

        if result.success {
            let title = result.title.unwrap_or_default();
            if let Some(path) = &result.file_path {
                let url = self.active_url.clone();
                self.record_download(&title, &url, path);
            }
            self.state.progress = 100.0;
            self.state.output_path = result.file_path;
            self.state.status = self
                .localizer
                .tr_args("status-complete", &[("title", title.as_str())]);
        } else if result.cancelled {
            self.state.progress = 0.0;
            self.state.status = self.localizer.tr("status-cancelled");
        } else {
            self.state.progress = 0.0;
            self.state.last_error = result.error_message;
        }
    }

    fn record_download(&mut self, title: &str, url: &str, file_path: &Path) {
        let size = fs::metadata(file_path).ok().map(|m| m.len());
        self.history
            .add_entry(title, url, &file_path.to_string_lossy(), size);
    }

    fn remember_download_dir(&mut self) {
        let dir = self.state.download_dir.trim().to_string();
        if !validate_directory(Path::new(&dir)) {
            self.fail("error-invalid-dir");
            return;
        }
        self.state.last_error = None;
        self.settings.update(|s| s.download_dir = dir);
    }

    fn handle_history_action(&mut self, action: HistoryAction) {
        match action {
            HistoryAction::Locate(path) => {
                if !open_file_in_explorer(&path) {
                    self.fail("error-open-folder");
                }
            }
            HistoryAction::OpenFolder(folder) => {
                if !open_folder(&folder) {
                    self.fail("error-open-folder");
                }
            }
            HistoryAction::Delete(file_path) => self.state.pending_delete = Some(file_path),
            HistoryAction::Refresh => {
                let removed = self.history.validate_entries();
                if removed > 0 {
                    info!("Dropped {} history entries with missing files", removed);
                }
            }
            HistoryAction::Clear => self.history.clear(),
        }
    }

    /// Removes the file from disk and its entry from the history.
    fn delete_download(&mut self, file_path: &str) {
        let path = Path::new(file_path);
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not delete {}: {}", path.display(), e);
                self.state.last_error = Some(e.to_string());
            }
        }
        // The entry goes even when the file couldn't.
        self.history.remove_entry(file_path);
        if self.state.output_path.as_deref() == Some(path) {
            self.state.output_path = None;
        }
    }

    /// This session's download, else the newest one from history that is
    /// still on disk.
    fn last_output(&self) -> Option<PathBuf> {
        self.state.output_path.clone().or_else(|| {
            self.history
                .last_file_path()
                .map(PathBuf::from)
                .filter(|path| path.exists())
        })
    }

    fn modal_open(&self) -> bool {
        self.state.pending_overwrite.is_some()
            || self.state.pending_delete.is_some()
            || self.state.ffmpeg_prompt
            || self.state.busy == Busy::InstallingFfmpeg
    }

    pub fn update_ui(&mut self, ctx: &egui::Context) {
        self.process_messages(ctx);
        let modal = self.modal_open();

        if self.state.history_open {
            let mut action = None;
            egui::SidePanel::right("history-panel")
                .default_width(HISTORY_PANEL_WIDTH)
                .show(ctx, |ui| {
                    ui.add_enabled_ui(!modal, |ui| {
                        action = ui::render_history_panel(ui, &self.history, &self.localizer);
                    });
                });
            if let Some(action) = action {
                self.handle_history_action(action);
            }
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_enabled_ui(!modal, |ui| self.render_main(ui, ctx));
        });

        self.render_dialogs(ctx);
    }

    fn render_main(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            ui.vertical(|ui| ui::render_header(ui, &self.localizer));
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.toggle_value(&mut self.state.history_open, self.localizer.tr("history-title"));
            });
        });

        ui.add_space(20.0);

        let idle = !self.state.is_busy();
        let url_response = ui
            .add_enabled_ui(idle, |ui| ui::render_url_input(ui, &mut self.state, &self.localizer))
            .inner;
        if url_response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            self.start_download(ctx);
        }

        ui.add_space(10.0);
        let load_requested = ui
            .add_enabled_ui(idle, |ui| ui::render_format_selector(ui, &mut self.state, &self.localizer))
            .inner;
        if load_requested {
            self.load_formats(ctx);
        }

        ui.add_space(20.0);
        let dir_changed = ui
            .add_enabled_ui(idle, |ui| {
                ui::render_download_dir_selector(ui, &mut self.state, &self.localizer)
            })
            .inner;
        if dir_changed {
            self.remember_download_dir();
        }

        ui.add_space(20.0);
        ui::render_status(ui, &self.state, &self.localizer);
        ui.add_space(20.0);

        self.render_buttons(ui, ctx);
    }

    fn render_buttons(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            let idle = !self.state.is_busy();

            if matches!(self.state.busy, Busy::Downloading | Busy::CheckingVideo) {
                if ui.add(danger_button(self.localizer.tr("cancel-button"))).clicked() {
                    self.cancel_download();
                }
            } else if ui
                .add_enabled(idle, primary_button(self.localizer.tr("download-button")))
                .clicked()
            {
                self.start_download(ctx);
            }

            if ui
                .add_enabled(idle, secondary_button(self.localizer.tr("update-button")))
                .clicked()
            {
                self.update_ytdlp(ctx);
            }

            if let Some(path) = self.last_output() {
                if idle
                    && ui
                        .add(secondary_button(self.localizer.tr("open-folder-button")))
                        .clicked()
                    && !open_folder(&path)
                {
                    self.fail("error-open-folder");
                }
            }
        });
    }

    fn render_dialogs(&mut self, ctx: &egui::Context) {
        if let Some(pending) = self.state.pending_overwrite.clone() {
            if let Some(choice) = ui::render_overwrite_dialog(ctx, &pending, &self.localizer) {
                self.resolve_overwrite(ctx, choice);
            }
        }

        if let Some(file_path) = self.state.pending_delete.clone() {
            match ui::render_delete_dialog(ctx, &file_path, &self.localizer) {
                Some(true) => {
                    self.state.pending_delete = None;
                    self.delete_download(&file_path);
                }
                Some(false) => self.state.pending_delete = None,
                None => {}
            }
        }

        if self.state.ffmpeg_prompt {
            match ui::render_ffmpeg_prompt(ctx, &self.localizer) {
                Some(true) => self.install_ffmpeg(ctx),
                Some(false) => {
                    self.state.ffmpeg_prompt = false;
                    self.state.status = self.localizer.tr("ffmpeg-skipped");
                }
                None => {}
            }
        }

        if self.state.busy == Busy::InstallingFfmpeg {
            ui::render_install_progress(ctx, &self.state, &self.localizer);
        }
    }
}

impl eframe::App for YtdlApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_ui(ctx);
    }
}
