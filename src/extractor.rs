use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::file_utils::app_bin_dir;

const PROGRESS_MARKER: &str = "YTDL_GUI_PROGRESS ";
const ITEM_MARKER: &str = "YTDL_GUI_ITEM ";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A raw progress record as the extractor reports it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawProgress {
    pub status: String,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub total_bytes_estimate: Option<f64>,
    #[serde(rename = "_speed_str")]
    pub speed_str: Option<String>,
    #[serde(rename = "_eta_str")]
    pub eta_str: Option<String>,
    pub tmpfilename: Option<String>,
}

/// One item whose post-processing has finished.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletedItem {
    pub title: String,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub filepath: PathBuf,
}

impl CompletedItem {
    pub fn url(&self) -> &str {
        self.webpage_url
            .as_deref()
            .or(self.original_url.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorEvent {
    Progress(RawProgress),
    ItemComplete(CompletedItem),
    /// Emitted while the extractor is quiet so callers can still abort.
    Heartbeat,
}

/// What the extractor reports once a download call returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadRecord {
    pub title: Option<String>,
    pub ext: Option<String>,
    pub file_path: Option<PathBuf>,
}

impl DownloadRecord {
    pub fn from_info(info: &Value) -> Self {
        let file_path = info
            .get("requested_downloads")
            .and_then(Value::as_array)
            .and_then(|downloads| downloads.first())
            .and_then(|d| d.get("filepath"))
            .or_else(|| info.get("filepath"))
            .or_else(|| info.get("_filename"))
            .and_then(Value::as_str)
            .map(PathBuf::from);
        Self {
            title: info.get("title").and_then(Value::as_str).map(str::to_string),
            ext: info.get("ext").and_then(Value::as_str).map(str::to_string),
            file_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub format: String,
    pub output_template: PathBuf,
    pub audio_only: bool,
    pub playlist: bool,
    pub overwrite: bool,
    pub ffmpeg_location: Option<PathBuf>,
}

pub const AUDIO_FORMAT: &str = "mp3";
pub const AUDIO_QUALITY: &str = "192K";
pub const VIDEO_CONTAINER: &str = "mp4";

impl ExtractorOptions {
    pub fn output_ext(&self) -> &'static str {
        if self.audio_only {
            AUDIO_FORMAT
        } else {
            VIDEO_CONTAINER
        }
    }
}

/// The video extraction tool, treated as a black box.
pub trait Extractor: Send + Sync {
    /// Metadata only. With `playlist` false, playlist URLs resolve to the single video.
    fn extract_info(&self, url: &str, playlist: bool) -> Result<Value>;

    /// Fetch and download. The hook sees every event and may break to abort.
    fn download(
        &self,
        url: &str,
        options: &ExtractorOptions,
        hook: &mut dyn FnMut(ExtractorEvent) -> ControlFlow<()>,
    ) -> Result<DownloadRecord>;

    /// Upgrades the extractor in place and returns its report.
    fn update(&self) -> Result<String>;
}

/// `yt-dlp` driven as a subprocess.
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Looks in the app-local bin directory, then on PATH.
    pub fn locate() -> Result<Self> {
        let exe = if cfg!(target_os = "windows") {
            "yt-dlp.exe"
        } else {
            "yt-dlp"
        };
        let local = app_bin_dir().join(exe);
        if local.is_file() {
            return Ok(Self::new(local));
        }
        let found = which::which("yt-dlp").context("yt-dlp not found on PATH")?;
        Ok(Self::new(found))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = hidden_command(&self.program);
        command
            .env("PYTHONIOENCODING", "UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Runs in a process group of its own so [`kill_tree`] reaches the helpers
    /// yt-dlp starts.
    fn download_command(&self) -> Command {
        #[allow(unused_mut)]
        let mut command = self.command();
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }

    pub fn info_args(url: &str, playlist: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--dump-single-json".into(),
            "--no-warnings".into(),
            "--skip-download".into(),
        ];
        if playlist {
            args.push("--flat-playlist".into());
        } else {
            args.push("--no-playlist".into());
        }
        args.push("--".into());
        args.push(url.into());
        args
    }

    pub fn download_args(url: &str, options: &ExtractorOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--newline".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!("download:{PROGRESS_MARKER}%(progress)j").into(),
            "--print".into(),
            format!("after_move:{ITEM_MARKER}%(.{{title,webpage_url,original_url,filepath}})j")
                .into(),
            "--dump-single-json".into(),
            "--no-simulate".into(),
            "-f".into(),
            options.format.clone().into(),
            "-o".into(),
            options.output_template.clone().into_os_string(),
        ];

        args.push(if options.playlist {
            "--yes-playlist".into()
        } else {
            "--no-playlist".into()
        });

        if options.audio_only {
            args.extend(
                [
                    "-x",
                    "--audio-format",
                    AUDIO_FORMAT,
                    "--audio-quality",
                    AUDIO_QUALITY,
                ]
                .map(OsString::from),
            );
        } else {
            args.extend(
                [
                    "--merge-output-format",
                    VIDEO_CONTAINER,
                    "--remux-video",
                    VIDEO_CONTAINER,
                ]
                .map(OsString::from),
            );
        }

        if options.overwrite {
            args.push("--force-overwrites".into());
        }

        if let Some(location) = &options.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(location.clone().into_os_string());
        }

        args.push("--".into());
        args.push(url.into());
        args
    }
}

impl Extractor for YtDlp {
    fn extract_info(&self, url: &str, playlist: bool) -> Result<Value> {
        let output = self
            .command()
            .args(Self::info_args(url, playlist))
            .output()
            .context("failed to run yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", last_error_line(&stderr).unwrap_or("yt-dlp failed"));
        }
        serde_json::from_slice(&output.stdout).context("yt-dlp returned malformed JSON")
    }

    fn download(
        &self,
        url: &str,
        options: &ExtractorOptions,
        hook: &mut dyn FnMut(ExtractorEvent) -> ControlFlow<()>,
    ) -> Result<DownloadRecord> {
        let mut command = self.download_command();
        command.args(Self::download_args(url, options));
        debug!("Command: {:?}", command);

        let mut child = command.spawn().context("failed to start yt-dlp")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stderr"))?;

        // Both streams feed one channel so the hook runs on this thread only.
        let (tx, rx) = mpsc::channel::<(Stream, String)>();
        let tx_err = tx.clone();
        let out_reader = thread::spawn(move || {
            read_lines_lossy(stdout, |line| tx.send((Stream::Out, line)).is_ok())
        });
        let err_reader = thread::spawn(move || {
            read_lines_lossy(stderr, |line| tx_err.send((Stream::Err, line)).is_ok())
        });

        let mut record_line: Option<String> = None;
        let mut last_error: Option<String> = None;
        let mut aborted = false;

        loop {
            let flow = match rx.recv_timeout(POLL_INTERVAL) {
                Ok((stream, line)) => match parse_event_line(&line) {
                    Some(event) => hook(event),
                    None => {
                        let trimmed = line.trim();
                        if stream == Stream::Out && trimmed.starts_with('{') {
                            record_line = Some(trimmed.to_string());
                        } else if trimmed.starts_with("ERROR") {
                            last_error = Some(trimmed.to_string());
                        } else if !trimmed.is_empty() {
                            debug!("yt-dlp: {}", trimmed);
                        }
                        ControlFlow::Continue(())
                    }
                },
                Err(RecvTimeoutError::Timeout) => hook(ExtractorEvent::Heartbeat),
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if flow.is_break() {
                aborted = true;
                break;
            }
        }

        if aborted {
            info!("Aborting yt-dlp at caller's request");
            kill_tree(&mut child);
            // The readers stop by themselves once the last pipe writer is gone.
            bail!("download aborted");
        }

        let _ = out_reader.join();
        let _ = err_reader.join();
        let status = child.wait().context("failed to wait for yt-dlp")?;
        if !status.success() {
            match last_error {
                Some(message) => bail!(message),
                None => bail!("yt-dlp exited with {}", status),
            }
        }

        let record = record_line
            .and_then(|line| serde_json::from_str::<Value>(&line).ok())
            .map(|info| DownloadRecord::from_info(&info))
            .unwrap_or_default();
        Ok(record)
    }

    fn update(&self) -> Result<String> {
        let output = self
            .command()
            .arg("-U")
            .output()
            .context("failed to run yt-dlp")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", stderr.trim())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Out,
    Err,
}

/// A `Command` that never flashes a console window on Windows.
pub fn hidden_command(program: impl AsRef<OsStr>) -> Command {
    #[allow(unused_mut)]
    let mut command = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

/// Kills `child` and everything it started, then reaps it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own group, see `YtDlp::download_command`.
        let group = -(child.id() as libc::pid_t);
        if unsafe { libc::kill(group, libc::SIGKILL) } != 0 {
            warn!(
                "Failed to kill yt-dlp process group: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        if let Err(e) = hidden_command("taskkill")
            .args(["/PID", pid.as_str(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            warn!("Failed to run taskkill: {}", e);
        }
    }
    if let Err(e) = child.kill() {
        debug!("yt-dlp already exited: {}", e);
    }
    let _ = child.wait();
}

/// Decodes one line of yt-dlp output into an event, if it is one of ours.
pub fn parse_event_line(line: &str) -> Option<ExtractorEvent> {
    let line = line.trim_start();
    if let Some(json) = line.strip_prefix(PROGRESS_MARKER) {
        return match serde_json::from_str::<RawProgress>(json) {
            Ok(progress) => Some(ExtractorEvent::Progress(progress)),
            Err(e) => {
                debug!("Unreadable progress line: {}", e);
                None
            }
        };
    }
    if let Some(json) = line.strip_prefix(ITEM_MARKER) {
        return match serde_json::from_str::<CompletedItem>(json) {
            Ok(item) => Some(ExtractorEvent::ItemComplete(item)),
            Err(e) => {
                debug!("Unreadable item line: {}", e);
                None
            }
        };
    }
    None
}

fn last_error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()))
}

fn read_lines_lossy(reader: impl Read, mut emit: impl FnMut(String) -> bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if !emit(line) {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read yt-dlp output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(audio_only: bool) -> ExtractorOptions {
        ExtractorOptions {
            format: "bestvideo+bestaudio/best".to_string(),
            output_template: PathBuf::from("/out/%(title)s.%(ext)s"),
            audio_only,
            playlist: false,
            overwrite: false,
            ffmpeg_location: Some(PathBuf::from("/opt/ffmpeg/ffmpeg")),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn parses_progress_lines() {
        let line = r#"YTDL_GUI_PROGRESS {"status": "downloading", "downloaded_bytes": 512, "total_bytes": null, "total_bytes_estimate": 2048.5, "_speed_str": "1.00MiB/s", "_eta_str": "00:03", "tmpfilename": "/out/a.mp4.part"}"#;
        let Some(ExtractorEvent::Progress(progress)) = parse_event_line(line) else {
            panic!("expected a progress event");
        };
        assert_eq!(progress.status, "downloading");
        assert_eq!(progress.downloaded_bytes, Some(512.0));
        assert_eq!(progress.total_bytes, None);
        assert_eq!(progress.total_bytes_estimate, Some(2048.5));
        assert_eq!(progress.speed_str.as_deref(), Some("1.00MiB/s"));
        assert_eq!(progress.tmpfilename.as_deref(), Some("/out/a.mp4.part"));
    }

    #[test]
    fn parses_item_lines() {
        let line = r#"YTDL_GUI_ITEM {"title": "Clip", "webpage_url": "https://v/1", "filepath": "/out/Clip.mp4"}"#;
        let Some(ExtractorEvent::ItemComplete(item)) = parse_event_line(line) else {
            panic!("expected an item event");
        };
        assert_eq!(item.title, "Clip");
        assert_eq!(item.url(), "https://v/1");
        assert_eq!(item.filepath, PathBuf::from("/out/Clip.mp4"));
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse_event_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_event_line("YTDL_GUI_PROGRESS not-json"), None);
    }

    #[test]
    fn record_prefers_requested_downloads() {
        let info: Value = serde_json::json!({
            "title": "Clip",
            "ext": "webm",
            "_filename": "/out/Clip.webm",
            "requested_downloads": [{"filepath": "/out/Clip.mp4"}]
        });
        let record = DownloadRecord::from_info(&info);
        assert_eq!(record.title.as_deref(), Some("Clip"));
        assert_eq!(record.file_path, Some(PathBuf::from("/out/Clip.mp4")));

        let bare: Value = serde_json::json!({"title": "Playlist"});
        assert_eq!(DownloadRecord::from_info(&bare).file_path, None);
    }

    #[test]
    fn video_args_merge_to_mp4() {
        let args = strings(YtDlp::download_args("https://v/1", &options(false)));
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/opt/ffmpeg/ffmpeg"]));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.contains(&"-x".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://v/1"));
    }

    #[test]
    fn audio_args_extract_mp3_at_fixed_quality() {
        let args = strings(YtDlp::download_args("https://v/1", &options(true)));
        assert!(args.contains(&"-x".to_string()));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| w == ["--audio-quality", AUDIO_QUALITY]));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn info_args_suppress_playlists() {
        let args = strings(YtDlp::info_args("https://v/1", false));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--skip-download".to_string()));
    }

    #[test]
    fn error_line_picks_last_error() {
        let stderr = "WARNING: slow\nERROR: first\nERROR: Video unavailable\n";
        assert_eq!(last_error_line(stderr), Some("ERROR: Video unavailable"));
        assert_eq!(last_error_line("boom\n"), Some("boom"));
    }

    #[test]
    fn lossy_reader_splits_lines() {
        let mut lines = Vec::new();
        read_lines_lossy(&b"one\r\ntwo\n\xffthree"[..], |l| {
            lines.push(l);
            true
        });
        assert_eq!(lines, ["one", "two", "\u{fffd}three"]);
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        const PROGRESS_LINE: &str = r#"YTDL_GUI_PROGRESS {"status": "downloading", "downloaded_bytes": 5, "total_bytes": 10}"#;

        /// A `yt-dlp` that ignores its arguments and runs `body` instead.
        fn fake_ytdlp(dir: &Path, body: &str) -> YtDlp {
            let path = dir.join("yt-dlp");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            YtDlp::new(path)
        }

        fn run(ytdlp: &YtDlp, hook: &mut dyn FnMut(ExtractorEvent) -> ControlFlow<()>) -> Result<DownloadRecord> {
            ytdlp.download("https://v/1", &options(false), hook)
        }

        #[test]
        fn download_streams_events_and_reads_the_final_record() {
            let dir = tempfile::tempdir().unwrap();
            let ytdlp = fake_ytdlp(
                dir.path(),
                &format!(
                    "echo '{PROGRESS_LINE}'\n\
                     echo '[download] Destination: /out/Clip.mp4' >&2\n\
                     echo 'YTDL_GUI_ITEM {{\"title\": \"Clip\", \"webpage_url\": \"https://v/1\", \"filepath\": \"/out/Clip.mp4\"}}'\n\
                     echo '{{\"title\": \"Clip\", \"ext\": \"mp4\", \"requested_downloads\": [{{\"filepath\": \"/out/Clip.mp4\"}}]}}'"
                ),
            );

            let mut events = Vec::new();
            let record = run(&ytdlp, &mut |event| {
                if event != ExtractorEvent::Heartbeat {
                    events.push(event);
                }
                ControlFlow::Continue(())
            })
            .unwrap();

            assert_eq!(events.len(), 2, "{events:?}");
            let ExtractorEvent::Progress(progress) = &events[0] else {
                panic!("expected progress first, got {:?}", events[0]);
            };
            assert_eq!(progress.downloaded_bytes, Some(5.0));
            let ExtractorEvent::ItemComplete(item) = &events[1] else {
                panic!("expected an item, got {:?}", events[1]);
            };
            assert_eq!(item.title, "Clip");
            assert_eq!(record.title.as_deref(), Some("Clip"));
            assert_eq!(record.ext.as_deref(), Some("mp4"));
            assert_eq!(record.file_path, Some(PathBuf::from("/out/Clip.mp4")));
        }

        #[test]
        fn failed_download_reports_last_error_line() {
            let dir = tempfile::tempdir().unwrap();
            let ytdlp = fake_ytdlp(
                dir.path(),
                "echo 'WARNING: slow' >&2\necho 'ERROR: x' >&2\nexit 1",
            );

            let err = run(&ytdlp, &mut |_| ControlFlow::Continue(())).unwrap_err();
            assert_eq!(err.to_string(), "ERROR: x");
        }

        #[test]
        fn heartbeat_lets_a_quiet_download_be_aborted() {
            let dir = tempfile::tempdir().unwrap();
            let ytdlp = fake_ytdlp(dir.path(), "sleep 8");

            let started = Instant::now();
            let result = run(&ytdlp, &mut |event| match event {
                ExtractorEvent::Heartbeat => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            });

            assert!(result.is_err());
            assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        }

        #[test]
        fn abort_kills_helpers_holding_the_pipes() {
            let dir = tempfile::tempdir().unwrap();
            let late = dir.path().join("late");
            let ytdlp = fake_ytdlp(
                dir.path(),
                &format!(
                    "echo '{PROGRESS_LINE}'\n(sleep 1; touch '{}') &\nsleep 8",
                    late.display()
                ),
            );

            let started = Instant::now();
            let result = run(&ytdlp, &mut |event| match event {
                ExtractorEvent::Progress(_) => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            });

            assert_eq!(result.unwrap_err().to_string(), "download aborted");
            assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
            thread::sleep(Duration::from_millis(1500));
            assert!(!late.exists(), "a helper outlived the abort");
        }

        #[test]
        fn extract_info_parses_json_or_reports_error() {
            let dir = tempfile::tempdir().unwrap();
            let ytdlp = fake_ytdlp(dir.path(), r#"echo '{"title": "Clip", "duration": 3}'"#);
            let info = ytdlp.extract_info("https://v/1", false).unwrap();
            assert_eq!(info["title"], "Clip");

            let broken = tempfile::tempdir().unwrap();
            let ytdlp = fake_ytdlp(broken.path(), "echo 'ERROR: Video unavailable' >&2\nexit 1");
            let err = ytdlp.extract_info("https://v/1", false).unwrap_err();
            assert_eq!(err.to_string(), "ERROR: Video unavailable");
        }
    }
}
