//! Encoder invocation settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{DEFAULT_KILL_GRACE, DEFAULT_PLAYLIST_NAME, DEFAULT_SEGMENT_PATTERN};

/// How to launch the encoder for one session.
///
/// `args` is a template. These placeholders are substituted per session:
/// `{title}`, `{window_id}`, `{output_dir}`, `{playlist}` and
/// `{segment_pattern}` (the last two as full paths inside the output dir).
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Executable to run.
    pub program: PathBuf,

    /// Argument template.
    pub args: Vec<String>,

    /// Manifest file name inside the session directory.
    pub playlist_name: String,

    /// Segment file pattern inside the session directory.
    pub segment_pattern: String,

    /// Time allowed between graceful stop and forced kill.
    pub kill_grace: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: default_ffmpeg_args(),
            playlist_name: DEFAULT_PLAYLIST_NAME.to_string(),
            segment_pattern: DEFAULT_SEGMENT_PATTERN.to_string(),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl EncoderConfig {
    /// Config for an arbitrary program with a literal argument list.
    pub fn custom(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Default::default()
        }
    }

    /// Path of the manifest inside `output_dir`.
    pub fn playlist_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.playlist_name)
    }

    /// Render the argument template for one session.
    pub fn render_args(&self, title: &str, window_id: &str, output_dir: &Path) -> Vec<String> {
        let output_dir_str = output_dir.to_string_lossy();
        let playlist = self.playlist_path(output_dir);
        let playlist = playlist.to_string_lossy();
        let segments = output_dir.join(&self.segment_pattern);
        let segments = segments.to_string_lossy();

        let values: [(&str, &str); 5] = [
            ("title", title),
            ("window_id", window_id),
            ("output_dir", &*output_dir_str),
            ("playlist", &*playlist),
            ("segment_pattern", &*segments),
        ];

        self.args.iter().map(|arg| substitute(arg, &values)).collect()
    }
}

/// Single pass `{name}` substitution; unknown names are left as written and
/// substituted text is never rescanned.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let lookup = |name: &str| values.iter().find(|(key, _)| *key == name).map(|(_, v)| *v);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => match lookup(&after[..close]) {
                Some(value) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            },
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// gdigrab window capture, NVENC H.264, 1 s HLS segments.
fn default_ffmpeg_args() -> Vec<String> {
    [
        "-hide_banner",
        "-nostats",
        "-progress",
        "pipe:1",
        "-f",
        "gdigrab",
        "-framerate",
        "30",
        "-i",
        "title={title}",
        "-vf",
        "scale=1920:1080",
        "-c:v",
        "h264_nvenc",
        "-preset",
        "p4",
        "-tune",
        "ll",
        "-rc",
        "vbr",
        "-pix_fmt",
        "yuv420p",
        "-b:v",
        "8000k",
        "-maxrate",
        "10000k",
        "-bufsize",
        "12000k",
        "-g",
        "30",
        "-f",
        "hls",
        "-hls_time",
        "1",
        "-hls_list_size",
        "10",
        "-hls_flags",
        "delete_segments+program_date_time",
        "-hls_segment_filename",
        "{segment_pattern}",
        "-hls_segment_type",
        "mpegts",
        "-hls_start_number_source",
        "generic",
        "-hls_allow_cache",
        "0",
        "{playlist}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
