use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::file_utils::format_size;

/// What the user asked for when pressing Download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub format_id: String,
    pub audio_only: bool,
    pub playlist: bool,
    /// Replace an existing output instead of letting the extractor skip it.
    pub overwrite: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            format_id: VideoFormat::best().format_id,
            audio_only: false,
            playlist: false,
            overwrite: false,
        }
    }

    pub fn with_format(mut self, format: &VideoFormat) -> Self {
        self.format_id = format.format_id.clone();
        self.audio_only = format.is_audio_only();
        self
    }

    pub fn with_playlist(mut self, playlist: bool) -> Self {
        self.playlist = playlist;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Downloading,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub status: ProgressStatus,
    pub percentage: f32,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResult {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub title: Option<String>,
    pub error_message: Option<String>,
    pub cancelled: bool,
}

pub const CANCELLED_MESSAGE: &str = "Download cancelled";

impl DownloadResult {
    pub fn succeeded(file_path: PathBuf, title: String) -> Self {
        Self {
            success: true,
            file_path: Some(file_path),
            title: Some(title),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            error_message: Some(CANCELLED_MESSAGE.to_string()),
            cancelled: true,
            ..Default::default()
        }
    }
}

/// Metadata returned by a non-downloading lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub duration: f64,
    pub uploader: String,
}

/// One entry of the resolution picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub format_id: String,
    pub resolution: String,
    pub ext: String,
    pub filesize: Option<u64>,
    pub has_audio: bool,
    pub has_video: bool,
    pub description: String,
}

impl VideoFormat {
    pub const BEST_RESOLUTION: &'static str = "best";
    pub const AUDIO_RESOLUTION: &'static str = "audio";

    pub fn best() -> Self {
        Self {
            format_id: "bestvideo+bestaudio/best".to_string(),
            resolution: Self::BEST_RESOLUTION.to_string(),
            ext: "mp4".to_string(),
            filesize: None,
            has_audio: true,
            has_video: true,
            description: "Best available".to_string(),
        }
    }

    pub fn audio_only() -> Self {
        Self {
            format_id: "bestaudio/best".to_string(),
            resolution: Self::AUDIO_RESOLUTION.to_string(),
            ext: "mp3".to_string(),
            filesize: None,
            has_audio: true,
            has_video: false,
            description: "Audio only (MP3)".to_string(),
        }
    }

    pub fn for_height(height: u32, filesize: Option<u64>) -> Self {
        Self {
            format_id: format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]"),
            resolution: format!("{height}p"),
            ext: "mp4".to_string(),
            filesize,
            has_audio: true,
            has_video: true,
            description: format!("{height}p"),
        }
    }

    pub fn is_audio_only(&self) -> bool {
        !self.has_video
    }

    /// Vertical resolution for real video entries, `None` for the sentinels.
    pub fn height(&self) -> Option<u32> {
        self.resolution.strip_suffix('p')?.parse().ok()
    }

    pub fn size_str(&self) -> String {
        self.filesize
            .filter(|s| *s > 0)
            .map(format_size)
            .unwrap_or_default()
    }

    pub fn label(&self) -> String {
        let size = self.size_str();
        if size.is_empty() {
            self.description.clone()
        } else {
            format!("{} (~{})", self.description, size)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub title: String,
    pub url: String,
    pub file_path: String,
    pub download_date: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    Idle,
    CheckingVideo,
    LoadingFormats,
    Downloading,
    Updating,
    InstallingFfmpeg,
}

impl Default for Busy {
    fn default() -> Self {
        Self::Idle
    }
}

/// Answer to "this video already exists in the folder".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteChoice {
    Overwrite,
    OpenExisting,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct PendingOverwrite {
    pub url: String,
    pub title: String,
    pub existing: PathBuf,
}

#[derive(Default)]
pub struct AppState {
    pub url: String,
    pub busy: Busy,
    pub formats: Vec<VideoFormat>,
    pub selected_format: usize,
    pub playlist: bool,
    pub progress: f32,
    pub status: String,
    pub last_error: Option<String>,
    pub download_speed: String,
    pub eta: String,
    pub output_path: Option<PathBuf>,
    pub download_dir: String,
    pub pending_overwrite: Option<PendingOverwrite>,
    pub pending_delete: Option<String>,
    pub ffmpeg_prompt: bool,
    pub install_status: String,
    pub history_open: bool,
}

impl AppState {
    pub fn is_busy(&self) -> bool {
        self.busy != Busy::Idle
    }

    pub fn selected_format(&self) -> VideoFormat {
        self.formats
            .get(self.selected_format)
            .cloned()
            .unwrap_or_else(VideoFormat::best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_str_scales_units() {
        let mut format = VideoFormat::for_height(720, Some(512));
        assert_eq!(format.size_str(), "512.0 B");
        format.filesize = Some(5 * 1024 * 1024);
        assert_eq!(format.size_str(), "5.0 MB");
        format.filesize = None;
        assert_eq!(format.size_str(), "");
        assert_eq!(format.label(), "720p");
    }

    #[test]
    fn sentinels_have_no_height() {
        assert_eq!(VideoFormat::best().height(), None);
        assert_eq!(VideoFormat::audio_only().height(), None);
        assert_eq!(VideoFormat::for_height(1080, None).height(), Some(1080));
    }

    #[test]
    fn request_takes_audio_flag_from_format() {
        let request = DownloadRequest::new("https://example.com/v", "/tmp")
            .with_format(&VideoFormat::audio_only());
        assert!(request.audio_only);
        assert_eq!(request.format_id, "bestaudio/best");
    }

    #[test]
    fn cancelled_result_is_not_success() {
        let result = DownloadResult::cancelled();
        assert!(!result.success);
        assert!(result.cancelled);
        assert_eq!(result.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }
}
