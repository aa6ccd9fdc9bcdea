use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::extractor::{DownloadRecord, Extractor, ExtractorEvent, ExtractorOptions, RawProgress};
use crate::file_utils::{find_most_recent_file, sanitize_filename};
use crate::formats::{build_format_list, fallback_formats};
use crate::models::{
    DownloadProgress, DownloadRequest, DownloadResult, ProgressStatus, VideoFormat, VideoInfo,
};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());

static TEMP_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.part|\.ytdl|\.temp|\.part-frag\d*|\.f\d+\.[a-z0-9]+)$").unwrap()
});

/// Receives what happens during a download. Implemented by the UI adapter.
pub trait DownloadObserver {
    fn on_progress(&self, progress: &DownloadProgress);

    /// One playlist item (or the single video) finished post-processing.
    fn on_item_complete(&self, title: &str, url: &str, file_path: &Path);
}

/// Removes terminal control sequences from a progress string.
pub fn strip_ansi_codes(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Normalises a raw progress record. `None` for statuses the UI doesn't show.
pub fn normalize_progress(raw: &RawProgress) -> Option<DownloadProgress> {
    match raw.status.as_str() {
        "downloading" => {
            let downloaded = raw.downloaded_bytes.unwrap_or(0.0).max(0.0);
            let total = raw
                .total_bytes
                .filter(|t| *t > 0.0)
                .or(raw.total_bytes_estimate)
                .unwrap_or(0.0)
                .max(0.0);
            let percentage = if total > 0.0 {
                ((downloaded / total) * 100.0).clamp(0.0, 100.0) as f32
            } else {
                0.0
            };
            Some(DownloadProgress {
                status: ProgressStatus::Downloading,
                percentage,
                downloaded_bytes: downloaded as u64,
                total_bytes: total as u64,
                speed: raw.speed_str.as_deref().map(strip_ansi_codes),
                eta: raw.eta_str.as_deref().map(strip_ansi_codes),
            })
        }
        "finished" => Some(DownloadProgress {
            status: ProgressStatus::Finished,
            percentage: 100.0,
            downloaded_bytes: raw.downloaded_bytes.unwrap_or(0.0).max(0.0) as u64,
            total_bytes: raw.total_bytes.unwrap_or(0.0).max(0.0) as u64,
            speed: None,
            eta: None,
        }),
        _ => None,
    }
}

/// Runs one download attempt against an extractor. Create one per attempt and
/// share it through an `Arc` so another thread can call [`Downloader::cancel`].
pub struct Downloader {
    output_dir: PathBuf,
    extractor: Arc<dyn Extractor>,
    ffmpeg_location: Option<PathBuf>,
    cancelled: AtomicBool,
    temp_files: Mutex<Vec<PathBuf>>,
    current_title: Mutex<Option<String>>,
}

impl Downloader {
    pub fn new(output_dir: impl Into<PathBuf>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extractor,
            ffmpeg_location: None,
            cancelled: AtomicBool::new(false),
            temp_files: Mutex::new(Vec::new()),
            current_title: Mutex::new(None),
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn current_title(&self) -> Option<String> {
        lock(&self.current_title).clone()
    }

    /// Title, duration and uploader of a single video, or `None` on any error.
    pub fn get_video_info(&self, url: &str) -> Option<VideoInfo> {
        match self.extractor.extract_info(url, false) {
            Ok(info) => Some(VideoInfo {
                title: info
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("video")
                    .to_string(),
                duration: info.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
                uploader: info
                    .get("uploader")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            Err(e) => {
                debug!("No video info for {}: {:#}", url, e);
                None
            }
        }
    }

    /// Path of an earlier output named after `title`, if there is one. Both
    /// the raw title and the name yt-dlp would have written are tried.
    pub fn check_file_exists(&self, title: &str) -> Option<PathBuf> {
        let sanitized = sanitize_filename(title);
        let mut names = vec![title];
        if sanitized != title {
            names.push(&sanitized);
        }
        ["mp4", "mp3"]
            .iter()
            .flat_map(|ext| names.iter().map(move |name| format!("{name}.{ext}")))
            .map(|file_name| self.output_dir.join(file_name))
            .find(|path| path.exists())
    }

    pub fn get_available_formats(&self, url: &str) -> Vec<VideoFormat> {
        match self.extractor.extract_info(url, false) {
            Ok(info) => build_format_list(&info),
            Err(e) => {
                debug!("Format listing failed for {}: {:#}", url, e);
                fallback_formats()
            }
        }
    }

    pub fn download(&self, request: &DownloadRequest, observer: &dyn DownloadObserver) -> DownloadResult {
        self.cancelled.store(false, Ordering::SeqCst);
        lock(&self.temp_files).clear();
        *lock(&self.current_title) = None;

        if let Err(e) = fs::create_dir_all(&request.output_dir) {
            return DownloadResult::failed(e.to_string());
        }

        let options = ExtractorOptions {
            format: request.format_id.clone(),
            output_template: request.output_dir.join("%(title)s.%(ext)s"),
            audio_only: request.audio_only,
            playlist: request.playlist,
            overwrite: request.overwrite,
            ffmpeg_location: self.ffmpeg_location.clone(),
        };

        // Capture the title before any bytes flow.
        match self.extractor.extract_info(&request.url, request.playlist) {
            Ok(info) => {
                let title = info.get("title").and_then(Value::as_str).map(str::to_string);
                *lock(&self.current_title) = title;
            }
            Err(e) => return self.failure(e),
        }
        if self.is_cancelled() {
            return self.finish_cancelled();
        }

        info!("Starting download of {} into {}", request.url, request.output_dir.display());
        let mut hook = |event: ExtractorEvent| self.on_event(event, observer);
        let outcome = self.extractor.download(&request.url, &options, &mut hook);

        if self.is_cancelled() {
            return self.finish_cancelled();
        }

        let DownloadRecord { title, ext, file_path } = match outcome {
            Ok(record) => record,
            Err(e) => return self.failure(e),
        };

        let title = title
            .or_else(|| self.current_title())
            .unwrap_or_else(|| "video".to_string());
        let ext = ext.unwrap_or_else(|| options.output_ext().to_string());

        let file_path = file_path
            .filter(|p| p.exists())
            .or_else(|| {
                let guess = request
                    .output_dir
                    .join(format!("{}.{ext}", sanitize_filename(&title)));
                guess.exists().then_some(guess)
            })
            .or_else(|| find_most_recent_file(&request.output_dir, &ext));

        match file_path {
            Some(path) => {
                info!("Downloaded {} to {}", title, path.display());
                DownloadResult::succeeded(path, title)
            }
            None => DownloadResult::failed("Download finished but the output file was not found"),
        }
    }

    /// Asks the running download to stop and removes its temporary files.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
        self.cleanup_temp_files();
    }

    fn on_event(&self, event: ExtractorEvent, observer: &dyn DownloadObserver) -> ControlFlow<()> {
        if self.is_cancelled() {
            return ControlFlow::Break(());
        }
        match event {
            ExtractorEvent::Progress(raw) => {
                self.track_temp_file(&raw);
                if let Some(progress) = normalize_progress(&raw) {
                    observer.on_progress(&progress);
                }
            }
            ExtractorEvent::ItemComplete(item) => {
                observer.on_item_complete(&item.title, item.url(), &item.filepath);
            }
            ExtractorEvent::Heartbeat => {}
        }
        ControlFlow::Continue(())
    }

    fn track_temp_file(&self, raw: &RawProgress) {
        let Some(tmp) = raw.tmpfilename.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };
        let tmp = PathBuf::from(tmp);
        let mut files = lock(&self.temp_files);
        if !files.contains(&tmp) {
            files.push(tmp);
        }
    }

    fn cleanup_temp_files(&self) {
        let tracked: Vec<PathBuf> = lock(&self.temp_files).drain(..).collect();
        for path in tracked {
            remove_quietly(&path);
        }

        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .map(|name| is_temp_artifact(&name.to_string_lossy()))
                .unwrap_or(false);
            if is_temp && path.is_file() {
                remove_quietly(&path);
            }
        }
    }

    fn finish_cancelled(&self) -> DownloadResult {
        // The extractor may have written more temp data after cancel() ran.
        self.cleanup_temp_files();
        DownloadResult::cancelled()
    }

    fn failure(&self, error: anyhow::Error) -> DownloadResult {
        if self.is_cancelled() {
            return self.finish_cancelled();
        }
        warn!("Download failed: {:#}", error);
        DownloadResult::failed(error.to_string())
    }
}

/// True for partial downloads and per-format intermediates.
pub fn is_temp_artifact(file_name: &str) -> bool {
    TEMP_ARTIFACT.is_match(file_name)
}

fn remove_quietly(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
