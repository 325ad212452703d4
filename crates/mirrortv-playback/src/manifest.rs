//! HLS media playlists and where to read them from.

use std::fs;
use std::path::PathBuf;

use crate::{PlaybackResult, ReadinessError};

/// Somewhere a session's manifest can be fetched from.
pub trait ManifestSource: Send + Sync {
    /// Fetch the current manifest text.
    fn fetch(&self) -> PlaybackResult<String>;
}

/// Reads the manifest from the encoder's output directory.
#[derive(Debug, Clone)]
pub struct FileManifestSource {
    path: PathBuf,
}

impl FileManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ManifestSource for FileManifestSource {
    fn fetch(&self) -> PlaybackResult<String> {
        fs::read_to_string(&self.path).map_err(|source| ReadinessError::ManifestUnavailable {
            path: self.path.clone(),
            source,
        })
    }
}

/// The parts of a media playlist readiness cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    /// `#EXTINF` durations in seconds, in playlist order.
    pub segments: Vec<f64>,

    /// `#EXT-X-TARGETDURATION`, if present.
    pub target_duration: Option<u32>,

    /// Whether `#EXT-X-ENDLIST` was seen.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Parse playlist text. Only the `#EXTM3U` header is mandatory; unknown
    /// tags are skipped and unparsable durations count as zero.
    pub fn parse(text: &str) -> PlaybackResult<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        if lines.next() != Some("#EXTM3U") {
            return Err(ReadinessError::InvalidManifest(
                "missing #EXTM3U header".to_string(),
            ));
        }

        let mut playlist = Self::default();
        for line in lines {
            if let Some(rest) = line.strip_prefix("#EXTINF:") {
                let duration = rest.split(',').next().unwrap_or_default().trim();
                playlist.segments.push(duration.parse().unwrap_or(0.0));
            } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = rest.trim().parse().ok();
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            }
        }

        Ok(playlist)
    }

    /// Seconds of media listed.
    pub fn buffered_secs(&self) -> f64 {
        self.segments.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_PLAYLIST: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:1\n\
        #EXT-X-MEDIA-SEQUENCE:4\n\
        #EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000+0000\n\
        #EXTINF:1.000000,\n\
        segment_004.ts\n\
        #EXTINF:0.966667,\n\
        segment_005.ts\n\
        #EXTINF:1.033333,\n\
        segment_006.ts\n";

    #[test]
    fn test_sums_extinf_durations() {
        let playlist = MediaPlaylist::parse(FFMPEG_PLAYLIST).unwrap();
        assert_eq!(playlist.segments.len(), 3);
        assert!((playlist.buffered_secs() - 3.0).abs() < 1e-6);
        assert_eq!(playlist.target_duration, Some(1));
        assert!(!playlist.ended);
    }

    #[test]
    fn test_header_only_playlist_is_empty() {
        let playlist = MediaPlaylist::parse("#EXTM3U\n#EXT-X-VERSION:3\n").unwrap();
        assert_eq!(playlist.buffered_secs(), 0.0);
    }

    #[test]
    fn test_rejects_non_playlist() {
        assert!(matches!(
            MediaPlaylist::parse("<html></html>"),
            Err(ReadinessError::InvalidManifest(_))
        ));
        assert!(MediaPlaylist::parse("").is_err());
    }

    #[test]
    fn test_file_source_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        let source = FileManifestSource::new(&path);
        assert!(matches!(
            source.fetch(),
            Err(ReadinessError::ManifestUnavailable { .. })
        ));

        fs::write(&path, FFMPEG_PLAYLIST).unwrap();
        assert_eq!(source.fetch().unwrap(), FFMPEG_PLAYLIST);
    }
}
