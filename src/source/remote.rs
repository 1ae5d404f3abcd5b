use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use crate::error::{AppError, Result};

/// Quality the remote adapter asks for. There is no fallback to other qualities.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamPreference {
    /// Required frame height in pixels
    pub height: u32,

    /// Required container extension
    pub ext: String,
}

impl Default for StreamPreference {
    fn default() -> Self {
        Self {
            height: 720,
            ext: "mp4".to_string(),
        }
    }
}

/// One entry of yt-dlp's `formats` list.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub ext: String,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
}

impl FormatInfo {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

/// First format with the preferred container and height that carries video.
pub fn select_format<'f>(
    formats: &'f [FormatInfo],
    preference: &StreamPreference,
) -> Option<&'f FormatInfo> {
    formats.iter().find(|f| {
        f.ext.eq_ignore_ascii_case(&preference.ext)
            && f.height == Some(preference.height)
            && f.has_video()
            && f.url.is_some()
    })
}

/// Turns a user supplied video link into a directly playable media URL.
pub struct RemoteResolver<'a> {
    ytdlp: &'a Path,
    preference: &'a StreamPreference,
}

impl<'a> RemoteResolver<'a> {
    pub fn new(ytdlp: &'a Path, preference: &'a StreamPreference) -> Self {
        Self { ytdlp, preference }
    }

    pub fn resolve(&self, link: &str) -> Result<String> {
        let link = link.trim();
        if !(link.starts_with("https://") || link.starts_with("http://")) {
            return Err(AppError::SourceResolution(format!(
                "not a video link: {link:?}"
            )));
        }

        let output = Command::new(self.ytdlp)
            .arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(link)
            .output()
            .map_err(|e| {
                AppError::SourceResolution(format!("failed to run {:?}: {e}", self.ytdlp))
            })?;
        if !output.status.success() {
            return Err(AppError::SourceResolution(format!(
                "cannot resolve {link}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.resolve_from_info(link, &String::from_utf8_lossy(&output.stdout))
    }

    /// Pick the stream URL out of yt-dlp's JSON description of `link`.
    pub fn resolve_from_info(&self, link: &str, info_json: &str) -> Result<String> {
        let info: VideoInfo = serde_json::from_str(info_json)
            .map_err(|e| AppError::SourceResolution(format!("bad metadata for {link}: {e}")))?;

        let format = select_format(&info.formats, self.preference).ok_or_else(|| {
            AppError::SourceResolution(format!(
                "no {} stream at {}p for {}",
                self.preference.ext, self.preference.height, link
            ))
        })?;

        tracing::info!(
            "Resolved {:?} to format {} ({}p {})",
            info.title.as_deref().unwrap_or(link),
            format.format_id,
            self.preference.height,
            format.ext
        );
        // select_format only returns formats with a url
        format
            .url
            .clone()
            .ok_or_else(|| AppError::SourceResolution(format!("format without url for {link}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const INFO: &str = r#"{
        "title": "Rooftop array",
        "formats": [
            {"format_id": "140", "ext": "m4a", "height": null, "vcodec": "none", "url": "https://cdn/audio"},
            {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1", "url": "https://cdn/360"},
            {"format_id": "247", "ext": "webm", "height": 720, "vcodec": "vp9", "url": "https://cdn/720webm"},
            {"format_id": "136", "ext": "mp4", "height": 720, "vcodec": "avc1", "url": "https://cdn/720mp4"},
            {"format_id": "22", "ext": "mp4", "height": 720, "vcodec": "avc1", "url": "https://cdn/720mp4-b"}
        ]
    }"#;

    #[test]
    fn test_resolve_picks_first_matching_format() {
        let ytdlp = PathBuf::from("yt-dlp");
        let pref = StreamPreference::default();
        let resolver = RemoteResolver::new(&ytdlp, &pref);

        let url = resolver
            .resolve_from_info("https://video.example/watch?v=1", INFO)
            .unwrap();
        assert_eq!(url, "https://cdn/720mp4");
    }

    #[test]
    fn test_no_matching_quality_is_an_error_without_fallback() {
        let ytdlp = PathBuf::from("yt-dlp");
        let pref = StreamPreference {
            height: 1080,
            ..Default::default()
        };
        let resolver = RemoteResolver::new(&ytdlp, &pref);

        match resolver.resolve_from_info("https://video.example/watch?v=1", INFO) {
            Err(AppError::SourceResolution(msg)) => assert!(msg.contains("1080p")),
            other => panic!("expected SourceResolution, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_non_http_links() {
        let ytdlp = PathBuf::from("/nonexistent/yt-dlp");
        let pref = StreamPreference::default();
        let resolver = RemoteResolver::new(&ytdlp, &pref);
        assert!(matches!(
            resolver.resolve("file:///etc/passwd"),
            Err(AppError::SourceResolution(_))
        ));
    }

    #[test]
    fn test_audio_only_formats_are_skipped() {
        let formats = vec![FormatInfo {
            format_id: "x".to_string(),
            url: Some("https://cdn/a".to_string()),
            ext: "mp4".to_string(),
            height: Some(720),
            vcodec: Some("none".to_string()),
        }];
        assert!(select_format(&formats, &StreamPreference::default()).is_none());
    }
}
