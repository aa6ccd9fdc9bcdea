use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::VideoFormat;

/// Resolutions offered in the picker; anything else is ignored.
pub const COMMON_HEIGHTS: [u32; 8] = [2160, 1440, 1080, 720, 480, 360, 240, 144];

/// Builds the picker list from extractor metadata: "best" first, one entry per
/// allowed height in descending order, "audio only" last.
pub fn build_format_list(info: &Value) -> Vec<VideoFormat> {
    let mut by_height: BTreeMap<u32, Option<u64>> = BTreeMap::new();

    let formats = info
        .get("formats")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for format in formats {
        let has_video = format
            .get("vcodec")
            .and_then(Value::as_str)
            .map_or(true, |codec| codec != "none");
        if !has_video {
            continue;
        }
        let Some(height) = format
            .get("height")
            .and_then(Value::as_u64)
            .and_then(|h| u32::try_from(h).ok())
        else {
            continue;
        };
        if !COMMON_HEIGHTS.contains(&height) {
            continue;
        }

        let size = format
            .get("filesize")
            .and_then(Value::as_u64)
            .or_else(|| format.get("filesize_approx").and_then(as_size));
        let slot = by_height.entry(height).or_insert(None);
        if size > *slot {
            *slot = size;
        }
    }

    let mut list = Vec::with_capacity(by_height.len() + 2);
    list.push(VideoFormat::best());
    list.extend(
        by_height
            .into_iter()
            .rev()
            .map(|(height, size)| VideoFormat::for_height(height, size)),
    );
    list.push(VideoFormat::audio_only());
    list
}

/// What the picker shows when metadata could not be fetched.
pub fn fallback_formats() -> Vec<VideoFormat> {
    vec![VideoFormat::best()]
}

fn as_size(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
}
