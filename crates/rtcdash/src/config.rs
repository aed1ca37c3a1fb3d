use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::RecorderResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory holding the init segment, clusters and manifest.
    /// Wiped every time a new session starts.
    pub recording_dir: PathBuf,
    pub signaling_addr: SocketAddr,
    pub http_addr: SocketAddr,
    /// Seconds between picture loss indications sent for the video track.
    pub pli_interval: u64,

    pub manifest: ManifestConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recording_dir: PathBuf::from("./dash"),
            signaling_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8125)),
            pli_interval: 5,
            manifest: ManifestConfig::default(),
        }
    }
}

impl RecorderConfig {
    pub fn load<P>(file: P) -> RecorderResult<Self>
    where
        P: AsRef<Path>,
    {
        let data = std::fs::read_to_string(file)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }

    pub fn pli_interval(&self) -> Duration {
        Duration::from_secs(self.pli_interval.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub codecs: Vec<String>,
    /// `MPD@minBufferTime`, in seconds.
    pub min_buffer_time: u64,
    /// `MPD@minimumUpdatePeriod`, in seconds.
    pub minimum_update_period: u64,
    /// Units per second of the cluster durations reported by the muxer.
    pub timescale: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    /// Advertised `Representation@bandwidth`, in bits per second.
    pub bandwidth: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            codecs: vec!["vp8".to_string(), "opus".to_string()],
            min_buffer_time: 5,
            minimum_update_period: 1,
            timescale: 1000,
            width: Some(640),
            height: Some(480),
            bandwidth: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: RecorderConfig = toml::from_str(
            r#"
recording_dir = "/tmp/record"
http_addr = "127.0.0.1:9000"

[manifest]
codecs = ["vp9", "opus"]
"#,
        )
        .unwrap();

        assert_eq!(config.recording_dir, PathBuf::from("/tmp/record"));
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.signaling_addr.port(), 8888);
        assert_eq!(config.manifest.codecs, vec!["vp9", "opus"]);
        assert_eq!(config.manifest.min_buffer_time, 5);
        assert_eq!(config.manifest.timescale, 1000);
    }

    #[test]
    fn test_pli_interval_never_zero() {
        let config = RecorderConfig {
            pli_interval: 0,
            ..Default::default()
        };
        assert_eq!(config.pli_interval(), Duration::from_secs(1));
    }
}
