use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

/// Overrides the directory holding `settings.json` and `history.json`.
pub const DATA_DIR_ENV: &str = "YTDL_GUI_DATA_DIR";

static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// The file name yt-dlp derives from `title`. Characters that can't appear in
/// a path become their full-width look-alikes and control characters go away.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .filter_map(|c| match c {
            '/' => Some('\u{29F8}'),
            '\\' => Some('\u{29F9}'),
            '"' | '*' | ':' | '<' | '>' | '?' | '|' => char::from_u32(c as u32 + 0xFEE0),
            '\n' => Some(' '),
            c if (c as u32) < 32 || c == '\x7f' => None,
            c => Some(c),
        })
        .collect();

    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    let mut name = collapsed.trim_matches('_').to_string();
    if let Some(rest) = name.strip_prefix('-') {
        name = format!("_{rest}");
    }
    let name = name.trim_start_matches('.');
    if name.is_empty() {
        "_".to_string()
    } else {
        name.to_string()
    }
}

/// Directory the executable lives in; falls back to the working directory.
pub fn app_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
}

pub fn app_bin_dir() -> PathBuf {
    ensure_dir(app_root().join("bin"))
}

pub fn app_data_dir() -> PathBuf {
    let dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| app_root().join("data"));
    ensure_dir(dir)
}

fn ensure_dir(dir: PathBuf) -> PathBuf {
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!("Could not create {}: {}", dir.display(), e);
    }
    dir
}

/// The user's Downloads folder, or their home directory when there is none.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .filter(|dir| dir.is_dir())
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
}

/// True when `path` is a directory or could be created as one.
pub fn validate_directory(path: &Path) -> bool {
    path.is_dir() || fs::create_dir_all(path).is_ok()
}

pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Newest file in `dir` whose extension is `ext` (case-insensitive).
pub fn find_most_recent_file(dir: &Path, ext: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map_or(false, |e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (path, modified)
        })
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// Opens `path` (or the folder containing it) in the system file manager.
pub fn open_folder(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let folder = if path.is_file() {
        match path.parent() {
            Some(parent) => parent,
            None => return false,
        }
    } else {
        path
    };

    let status = if cfg!(target_os = "windows") {
        // explorer exits non-zero even when it worked
        return Command::new("explorer").arg(folder).spawn().is_ok();
    } else if cfg!(target_os = "macos") {
        Command::new("open").arg(folder).status()
    } else {
        Command::new("xdg-open").arg(folder).status()
    };

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Failed to open {}: {}", folder.display(), e);
            false
        }
    }
}

/// Reveals `file_path` in the file manager, selecting it where supported.
pub fn open_file_in_explorer(file_path: &Path) -> bool {
    if file_path.as_os_str().is_empty() {
        return false;
    }

    if !file_path.exists() {
        return match file_path.parent() {
            Some(folder) if folder.exists() => open_folder(folder),
            _ => false,
        };
    }

    if cfg!(target_os = "windows") {
        let mut select = std::ffi::OsString::from("/select,");
        select.push(file_path.as_os_str());
        return Command::new("explorer").arg(select).spawn().is_ok();
    }

    if cfg!(target_os = "macos") {
        return Command::new("open")
            .arg("-R")
            .arg(file_path)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
    }

    // Most Linux file managers can't select a file, so open its folder.
    open_folder(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sanitize_filename_matches_ytdlp_names() {
        assert_eq!(sanitize_filename("Q&A: part 1/2?"), "Q&A\u{FF1A} part 1\u{29F8}2\u{FF1F}");
        assert_eq!(sanitize_filename("say \"hi\" | bye"), "say \u{FF02}hi\u{FF02} \u{FF5C} bye");
        assert_eq!(sanitize_filename("a__b\tc"), "a_bc");
        assert_eq!(sanitize_filename("-rf"), "_rf");
        assert_eq!(sanitize_filename("..."), "_");
        assert_eq!(sanitize_filename("Ação, Olé!"), "Ação, Olé!");
    }

    #[test]
    fn most_recent_file_matches_extension() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        fs::write(&old, b"a").unwrap();
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        fs::write(dir.path().join("new.MP4"), b"b").unwrap();
        fs::write(dir.path().join("newest.txt"), b"c").unwrap();

        let found = find_most_recent_file(dir.path(), "mp4").unwrap();
        assert_eq!(found.file_name().unwrap(), "new.MP4");
        assert!(find_most_recent_file(dir.path(), "mp3").is_none());
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn validate_directory_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert!(validate_directory(&nested));
        assert!(nested.is_dir());
    }

    #[test]
    fn open_folder_rejects_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!open_folder(&dir.path().join("missing")));
        assert!(!open_file_in_explorer(Path::new("")));
    }
}
