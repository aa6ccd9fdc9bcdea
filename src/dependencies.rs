use anyhow::{anyhow, Context, Result};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use crate::extractor::hidden_command;
use crate::file_utils::app_bin_dir;

pub const FFMPEG_ARCHIVE_URL: &str =
    "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip";

/// Slow machines can take a while to answer `-version` on first launch.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(600);

/// Finds, checks and (on Windows) installs the ffmpeg transcoder.
#[derive(Debug, Clone)]
pub struct DependencyLocator {
    bin_dir: PathBuf,
}

impl DependencyLocator {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
        }
    }

    pub fn app_local() -> Self {
        Self::new(app_bin_dir())
    }

    /// App bin directory, then PATH, then the usual install locations.
    pub fn find(&self) -> Option<PathBuf> {
        let local = self.bin_dir.join(exe_name("ffmpeg"));
        if local.is_file() {
            return Some(local);
        }

        if let Ok(found) = which::which("ffmpeg") {
            return Some(found);
        }

        // PATH can differ when launched from a desktop shortcut.
        common_install_paths().into_iter().find(|p| p.is_file())
    }

    /// The binary [`find`](Self::find) picks, provided it answers `-version`.
    pub fn find_working(&self) -> Option<PathBuf> {
        self.find()
            .filter(|path| probe_version(path, VERSION_PROBE_TIMEOUT))
    }

    pub fn is_installed(&self) -> bool {
        self.find_working().is_some()
    }

    /// Makes sure ffmpeg is usable, installing it where that's supported.
    /// `progress` receives a status line and a 0-100 percentage.
    pub fn ensure(&self, progress: &mut dyn FnMut(&str, f32)) -> bool {
        if self.is_installed() {
            return true;
        }

        progress("Checking FFmpeg...", 0.0);
        match self.acquire(progress) {
            Ok(installed) => installed,
            Err(e) => {
                warn!("FFmpeg installation failed: {:#}", e);
                progress(&format!("Error: {:#}", e), 0.0);
                false
            }
        }
    }

    fn acquire(&self, progress: &mut dyn FnMut(&str, f32)) -> Result<bool> {
        if cfg!(target_os = "windows") {
            progress("Downloading FFmpeg...", 10.0);
            let archive = fetch_archive(FFMPEG_ARCHIVE_URL, progress)?;

            progress("Extracting FFmpeg...", 85.0);
            let installed =
                install_from_archive(Cursor::new(archive), &self.bin_dir, "ffmpeg.exe", "ffprobe.exe")?;
            progress("Installing FFmpeg...", 95.0);

            if !probe_version(&installed, VERSION_PROBE_TIMEOUT) {
                return Err(anyhow!("installed ffmpeg does not run"));
            }
            progress("FFmpeg installed!", 100.0);
            info!("FFmpeg installed to {}", installed.display());
            Ok(true)
        } else if cfg!(target_os = "macos") {
            progress("On macOS, install it with: brew install ffmpeg", 0.0);
            Ok(false)
        } else {
            progress("On Linux, install it with: sudo apt install ffmpeg", 0.0);
            Ok(false)
        }
    }
}

fn exe_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn common_install_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        let env_dir = |key: &str, default: &str| {
            std::env::var_os(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };
        let mut paths = vec![
            env_dir("ProgramFiles", r"C:\Program Files").join(r"ffmpeg\bin\ffmpeg.exe"),
            env_dir("ProgramFiles(x86)", r"C:\Program Files (x86)").join(r"ffmpeg\bin\ffmpeg.exe"),
            PathBuf::from(r"C:\ffmpeg\bin\ffmpeg.exe"),
        ];
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            paths.push(PathBuf::from(local).join(r"Programs\ffmpeg\bin\ffmpeg.exe"));
        }
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            paths.push(PathBuf::from(profile).join(r"scoop\apps\ffmpeg\current\bin\ffmpeg.exe"));
        }
        paths
    } else {
        [
            "/usr/bin/ffmpeg",
            "/usr/local/bin/ffmpeg",
            "/snap/bin/ffmpeg",
            "/opt/homebrew/bin/ffmpeg",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect()
    }
}

/// Runs `<path> -version` and waits at most `timeout` for a zero exit.
pub fn probe_version(path: &Path, timeout: Duration) -> bool {
    let mut child = match hidden_command(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Could not run {}: {}", path.display(), e);
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) if Instant::now() >= deadline => {
                warn!("{} -version timed out", path.display());
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
            Ok(None) => thread::sleep(Duration::from_millis(100)),
            Err(e) => {
                debug!("Waiting on {} failed: {}", path.display(), e);
                return false;
            }
        }
    }
}

fn fetch_archive(url: &str, progress: &mut dyn FnMut(&str, f32)) -> Result<Bytes> {
    let client = reqwest::blocking::Client::builder()
        .timeout(ARCHIVE_TIMEOUT)
        .build()?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("downloading {url}"))?;

    let total = response.content_length().unwrap_or(0);
    let mut buf = BytesMut::with_capacity(total as usize);
    let mut chunk = vec![0u8; 64 * 1024];
    let mut last_reported = -1i32;

    loop {
        let n = response.read(&mut chunk).context("reading FFmpeg archive")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if total > 0 {
            let percent = (10.0 + buf.len() as f32 / total as f32 * 70.0).min(80.0);
            if percent as i32 != last_reported {
                last_reported = percent as i32;
                progress(&format!("Downloading FFmpeg... {percent:.0}%"), percent);
            }
        }
    }

    debug!("Fetched {} bytes from {}", buf.len(), url);
    Ok(buf.freeze())
}

/// Copies `ffmpeg_name` (and `ffprobe_name` from the same folder, when the
/// archive has it) into `bin_dir`. Returns the installed ffmpeg path.
pub fn install_from_archive(
    reader: impl Read + Seek,
    bin_dir: &Path,
    ffmpeg_name: &str,
    ffprobe_name: &str,
) -> Result<PathBuf> {
    let mut archive = zip::ZipArchive::new(reader).context("reading FFmpeg archive")?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let base_name = |name: &str| {
        name.rsplit(['/', '\\'])
            .next()
            .unwrap_or(name)
            .to_string()
    };
    let ffmpeg_entry = names
        .iter()
        .find(|name| base_name(name).eq_ignore_ascii_case(ffmpeg_name))
        .ok_or_else(|| anyhow!("{} not found in archive", ffmpeg_name))?
        .clone();
    let folder = &ffmpeg_entry[..ffmpeg_entry.len() - base_name(&ffmpeg_entry).len()];
    let ffprobe_entry = names
        .iter()
        .find(|name| {
            name.starts_with(folder) && base_name(name).eq_ignore_ascii_case(ffprobe_name)
        })
        .cloned();

    fs::create_dir_all(bin_dir)?;
    let ffmpeg_path = bin_dir.join(ffmpeg_name);
    extract_entry(&mut archive, &ffmpeg_entry, &ffmpeg_path)?;
    if let Some(entry) = ffprobe_entry {
        extract_entry(&mut archive, &entry, &bin_dir.join(ffprobe_name))?;
    }
    Ok(ffmpeg_path)
}

fn extract_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    target: &Path,
) -> Result<()> {
    let mut entry = archive.by_name(name)?;
    let partial = target.with_extension("tmp");
    let mut out = fs::File::create(&partial)
        .with_context(|| format!("creating {}", partial.display()))?;
    std::io::copy(&mut entry, &mut out)?;
    drop(out);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&partial, fs::Permissions::from_mode(0o755))?;
    }

    fs::rename(&partial, target).with_context(|| format!("installing {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn archive(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn installs_ffmpeg_and_ffprobe_from_archive() {
        let bin = tempfile::tempdir().unwrap();
        let zip = archive(&[
            ("ffmpeg-master-latest-win64-gpl/LICENSE.txt", &b"gpl"[..]),
            ("ffmpeg-master-latest-win64-gpl/bin/ffmpeg.exe", &b"ffmpeg-bytes"[..]),
            ("ffmpeg-master-latest-win64-gpl/bin/ffprobe.exe", &b"ffprobe-bytes"[..]),
        ]);

        let installed = install_from_archive(zip, bin.path(), "ffmpeg.exe", "ffprobe.exe").unwrap();

        assert_eq!(installed, bin.path().join("ffmpeg.exe"));
        assert_eq!(fs::read(&installed).unwrap(), b"ffmpeg-bytes");
        assert_eq!(fs::read(bin.path().join("ffprobe.exe")).unwrap(), b"ffprobe-bytes");
        assert!(!bin.path().join("LICENSE.txt").exists());
    }

    #[test]
    fn ffprobe_is_optional() {
        let bin = tempfile::tempdir().unwrap();
        let zip = archive(&[("build/bin/ffmpeg.exe", &b"x"[..])]);
        install_from_archive(zip, bin.path(), "ffmpeg.exe", "ffprobe.exe").unwrap();
        assert!(bin.path().join("ffmpeg.exe").exists());
        assert!(!bin.path().join("ffprobe.exe").exists());
    }

    #[test]
    fn archive_without_ffmpeg_is_an_error() {
        let bin = tempfile::tempdir().unwrap();
        let zip = archive(&[("readme.txt", &b"nothing here"[..])]);
        let err = install_from_archive(zip, bin.path(), "ffmpeg.exe", "ffprobe.exe").unwrap_err();
        assert!(err.to_string().contains("ffmpeg.exe not found"));
    }

    #[test]
    fn find_prefers_app_bin_dir() {
        let bin = tempfile::tempdir().unwrap();
        let local = bin.path().join(exe_name("ffmpeg"));
        fs::write(&local, b"").unwrap();
        assert_eq!(DependencyLocator::new(bin.path()).find(), Some(local));
    }

    #[cfg(unix)]
    #[test]
    fn broken_binary_is_not_installed() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let local = bin.path().join(exe_name("ffmpeg"));
        fs::write(&local, "#!/bin/sh\nexit 1\n").unwrap();
        fs::set_permissions(&local, fs::Permissions::from_mode(0o755)).unwrap();

        let locator = DependencyLocator::new(bin.path());
        assert_eq!(locator.find(), Some(local));
        assert_eq!(locator.find_working(), None);
        assert!(!locator.is_installed());
    }

    #[test]
    fn probe_fails_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!probe_version(&dir.path().join("nope"), Duration::from_secs(1)));
    }

    #[cfg(unix)]
    #[test]
    fn probe_reports_exit_status() {
        for (program, expected) in [("/bin/true", true), ("/bin/false", false)] {
            if Path::new(program).exists() {
                assert_eq!(probe_version(Path::new(program), Duration::from_secs(5)), expected);
            }
        }
    }
}
