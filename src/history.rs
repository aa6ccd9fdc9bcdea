use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::file_utils::app_data_dir;
use crate::models::DownloadEntry;

pub const HISTORY_FILE: &str = "history.json";
pub const MAX_ENTRIES: usize = 100;

/// Newest-first record of finished downloads, one entry per output file.
pub struct DownloadHistory {
    path: PathBuf,
    entries: Vec<DownloadEntry>,
}

impl DownloadHistory {
    pub fn default_path() -> PathBuf {
        app_data_dir().join(HISTORY_FILE)
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Starting with empty history: {:#}", e);
                Vec::new()
            }
        };
        let mut history = Self { path, entries };
        history.remove_duplicates();
        history
    }

    // Keeps the first (newest) entry for each path. Two downloads that ended
    // up at the same path collapse into one here.
    fn remove_duplicates(&mut self) {
        let mut seen = HashSet::new();
        let before = self.entries.len();
        self.entries.retain(|e| seen.insert(e.file_path.clone()));
        if self.entries.len() != before {
            info!(
                "Dropped {} duplicate history entries",
                before - self.entries.len()
            );
            self.save();
        }
    }

    fn save(&self) {
        if let Err(e) = store(&self.path, &self.entries) {
            warn!("Failed to save history: {:#}", e);
        }
    }

    pub fn add_entry(&mut self, title: &str, url: &str, file_path: &str, file_size: Option<u64>) {
        self.entries.retain(|e| e.file_path != file_path);
        self.entries.insert(
            0,
            DownloadEntry {
                title: title.to_string(),
                url: url.to_string(),
                file_path: file_path.to_string(),
                download_date: now_iso8601(),
                file_size,
            },
        );
        self.entries.truncate(MAX_ENTRIES);
        debug!("History entry added for {}", file_path);
        self.save();
    }

    pub fn entries(&self) -> &[DownloadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_file_path(&self) -> Option<&str> {
        self.entries.first().map(|e| e.file_path.as_str())
    }

    pub fn remove_entry(&mut self, file_path: &str) {
        self.entries.retain(|e| e.file_path != file_path);
        self.save();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    /// Drops entries whose file is gone. Returns how many were removed.
    pub fn validate_entries(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| Path::new(&e.file_path).exists());
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save();
        }
        removed
    }

    /// Entries grouped by containing folder, in first-seen order.
    pub fn grouped_by_folder(&self) -> Vec<(PathBuf, Vec<&DownloadEntry>)> {
        let mut groups: Vec<(PathBuf, Vec<&DownloadEntry>)> = Vec::new();
        for entry in &self.entries {
            let folder = Path::new(&entry.file_path)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            match groups.iter_mut().find(|(f, _)| *f == folder) {
                Some((_, list)) => list.push(entry),
                None => groups.push((folder, vec![entry])),
            }
        }
        groups
    }
}

fn now_iso8601() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn load(path: &Path) -> Result<Vec<DownloadEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn store(path: &Path, entries: &[DownloadEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn scratch() -> (tempfile::TempDir, DownloadHistory) {
        let dir = tempfile::tempdir().unwrap();
        let history = DownloadHistory::open(dir.path().join(HISTORY_FILE));
        (dir, history)
    }

    #[test]
    fn re_adding_a_path_keeps_one_entry_with_new_metadata() {
        let (_dir, mut history) = scratch();
        history.add_entry("First", "https://a", "/videos/clip.mp4", None);
        history.add_entry("Other", "https://b", "/videos/other.mp4", None);
        history.add_entry("Second", "https://c", "/videos/clip.mp4", Some(42));

        let matching: Vec<_> = history
            .entries()
            .iter()
            .filter(|e| e.file_path == "/videos/clip.mp4")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].title, "Second");
        assert_eq!(matching[0].url, "https://c");
        assert_eq!(matching[0].file_size, Some(42));
        assert_eq!(history.last_file_path(), Some("/videos/clip.mp4"));
    }

    #[test]
    fn never_exceeds_cap() {
        let (_dir, mut history) = scratch();
        for i in 0..(MAX_ENTRIES + 25) {
            history.add_entry(&format!("v{i}"), "u", &format!("/v/{i}.mp4"), None);
            assert!(history.len() <= MAX_ENTRIES);
        }
        assert_eq!(history.len(), MAX_ENTRIES);
        assert_eq!(history.entries()[0].title, format!("v{}", MAX_ENTRIES + 24));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        {
            let mut history = DownloadHistory::open(&path);
            history.add_entry("A", "https://a", "/x/a.mp4", Some(10));
            history.add_entry("B", "https://b", "/x/b.mp4", None);
        }
        let history = DownloadHistory::open(&path);
        let titles: Vec<_> = history.entries().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["B", "A"]);
    }

    #[test]
    fn duplicates_in_file_are_collapsed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        let entry = |title: &str| DownloadEntry {
            title: title.to_string(),
            url: "u".to_string(),
            file_path: "/x/same.mp4".to_string(),
            download_date: "2024-01-01T00:00:00".to_string(),
            file_size: None,
        };
        store(&path, &[entry("newer"), entry("older")]).unwrap();

        let history = DownloadHistory::open(&path);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].title, "newer");
        assert_eq!(load(&path).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        fs::write(&path, "[{]").unwrap();
        assert!(DownloadHistory::open(&path).is_empty());
    }

    #[test]
    fn validate_drops_missing_files() {
        let (dir, mut history) = scratch();
        let kept = dir.path().join("kept.mp4");
        fs::write(&kept, b"x").unwrap();
        history.add_entry("gone", "u", &dir.path().join("gone.mp4").to_string_lossy(), None);
        history.add_entry("kept", "u", &kept.to_string_lossy(), None);

        assert_eq!(history.validate_entries(), 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].title, "kept");
    }

    #[test]
    fn remove_and_clear() {
        let (_dir, mut history) = scratch();
        history.add_entry("a", "u", "/x/a.mp4", None);
        history.add_entry("b", "u", "/x/b.mp4", None);
        history.remove_entry("/x/a.mp4");
        assert_eq!(history.len(), 1);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.last_file_path(), None);
    }

    #[test]
    fn groups_by_parent_folder() {
        let (_dir, mut history) = scratch();
        history.add_entry("a", "u", "/one/a.mp4", None);
        history.add_entry("b", "u", "/two/b.mp4", None);
        history.add_entry("c", "u", "/one/c.mp4", None);

        let groups = history.grouped_by_folder();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, PathBuf::from("/one"));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1[0].title, "b");
    }

    #[test]
    fn download_date_is_iso8601_now() {
        let (_dir, mut history) = scratch();
        history.add_entry("a", "u", "/x/a.mp4", None);
        let stamp = &history.entries()[0].download_date;
        let parsed = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        let delta = Local::now().naive_local() - parsed;
        assert!(delta.num_seconds().abs() < 5);
    }
}
