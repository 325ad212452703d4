//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use mirrortv_encoder::EncoderConfig;
use mirrortv_engine::{EngineConfig, DEFAULT_MAX_SESSIONS};
use mirrortv_playback::ReadinessPolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "mirrortv")]
#[command(about = "Stream desktop windows to browsers over HLS")]
#[command(version)]
pub struct ServerConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "MIRRORTV_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Static web UI directory
    #[arg(long, env = "MIRRORTV_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Parent directory of per-client HLS output
    #[arg(long, env = "MIRRORTV_STREAM_ROOT", default_value = "public/stream")]
    pub stream_root: PathBuf,

    /// Error log file
    #[arg(long, env = "MIRRORTV_ERROR_LOG", default_value = "errors.json")]
    pub error_log: PathBuf,

    /// Maximum concurrent streams
    #[arg(long, env = "MIRRORTV_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Encoder executable
    #[arg(long, env = "FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Replace the encoder argument template (repeat per argument)
    #[arg(long = "encoder-arg", allow_hyphen_values = true)]
    pub encoder_args: Vec<String>,

    /// Seconds between a graceful stop and a forced kill
    #[arg(long, env = "MIRRORTV_KILL_GRACE_SECS", default_value_t = 5)]
    pub kill_grace_secs: u64,

    /// Seconds shutdown waits for encoders to exit
    #[arg(long, env = "MIRRORTV_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind, self.port).parse()?)
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        let mut encoder = if self.encoder_args.is_empty() {
            EncoderConfig {
                program: self.ffmpeg.clone(),
                ..Default::default()
            }
        } else {
            EncoderConfig::custom(self.ffmpeg.clone(), self.encoder_args.clone())
        };
        encoder.kill_grace = Duration::from_secs(self.kill_grace_secs);
        encoder
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_sessions: self.max_sessions,
            stream_root: self.stream_root.clone(),
            encoder: self.encoder_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            ..Default::default()
        }
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy::default()
    }
}
