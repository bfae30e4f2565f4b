use crate::constants::TCP_PORT;
use crate::error::{DVRIPError, Result};
use crate::scorer::Thresholds;
use serde::{Deserialize, Serialize};
use chrono::TimeDelta;
use std::path::Path;
use tokio::time::Duration;

/// Longest index lookback accepted, in hours.
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 365;
/// Longest extraction half-window or scan chunk accepted, in seconds.
pub const MAX_WINDOW_SECS: i64 = 24 * 3600;

fn bounded(secs: i64, max: i64) -> TimeDelta {
    TimeDelta::seconds(secs.clamp(1, max))
}

// ---------- Camera ----------
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: TCP_PORT,
            username: "admin".to_string(),
            password: String::new(),
            timeout_secs: 10,
        }
    }
}

impl CameraConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ---------- Extraction ----------
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Half-width of the photo-marker search window around an alarm.
    pub photo_window_secs: i64,
    /// Half-width of the motion-clip search window around an alarm.
    pub motion_window_secs: i64,
    /// Frames sampled from a photo marker. Front-loaded: these files are short.
    pub photo_samples: Vec<usize>,
    /// Frames sampled from a motion clip, spread over the first seconds.
    pub motion_samples: Vec<usize>,
    pub download_timeout_secs: u64,
    /// Extra download attempts after the first one.
    pub download_retries: usize,
    pub retry_backoff_ms: u64,
    pub thresholds: Thresholds,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            photo_window_secs: 20,
            motion_window_secs: 180,
            photo_samples: vec![0, 1, 2, 3, 5, 8, 10, 12, 14, 16, 18, 20, 24, 28, 32],
            motion_samples: vec![0, 10, 30, 60, 90, 120, 150, 180],
            download_timeout_secs: 30,
            download_retries: 2,
            retry_backoff_ms: 800,
            thresholds: Thresholds::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn photo_window(&self) -> TimeDelta {
        bounded(self.photo_window_secs, MAX_WINDOW_SECS)
    }

    pub fn motion_window(&self) -> TimeDelta {
        bounded(self.motion_window_secs, MAX_WINDOW_SECS)
    }
}

// ---------- Scanner ----------
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub want: usize,
    pub max_lookback_hours: i64,
    pub initial_chunk_minutes: i64,
    pub min_chunk_seconds: i64,
    pub max_chunk_hours: i64,
    /// Row count at which a query is assumed to have been truncated.
    pub cap_guard: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            want: 30,
            max_lookback_hours: 24,
            initial_chunk_minutes: 10,
            min_chunk_seconds: 60,
            max_chunk_hours: 4,
            cap_guard: 60,
        }
    }
}

impl ScannerConfig {
    pub fn lookback(&self) -> TimeDelta {
        bounded(self.max_lookback_hours.saturating_mul(3600), MAX_LOOKBACK_HOURS * 3600)
    }

    pub fn initial_chunk(&self) -> TimeDelta {
        bounded(self.initial_chunk_minutes.saturating_mul(60), MAX_WINDOW_SECS)
    }

    pub fn min_chunk(&self) -> TimeDelta {
        bounded(self.min_chunk_seconds, MAX_WINDOW_SECS)
    }

    pub fn max_chunk(&self) -> TimeDelta {
        bounded(self.max_chunk_hours.saturating_mul(3600), MAX_WINDOW_SECS)
    }
}

// ---------- Poller ----------
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_secs: u64,
    pub history_max: usize,
    pub workers: usize,
    pub want: usize,
    pub lookback_hours: i64,
    /// Upper bound on one extraction job, downloads included.
    pub job_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            history_max: 200,
            workers: 2,
            want: 50,
            lookback_hours: 12,
            job_timeout_secs: 60,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }
}

// ---------- Root ----------
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub extraction: ExtractionConfig,
    pub scanner: ScannerConfig,
    pub poller: PollerConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| DVRIPError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DVRIPError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(DVRIPError::ConfigError(msg.to_string()));
        if self.camera.host.trim().is_empty() {
            return fail("camera.host must be set");
        }
        if self.poller.workers == 0 {
            return fail("poller.workers must be at least 1");
        }
        if self.poller.history_max == 0 {
            return fail("poller.history_max must be at least 1");
        }
        if self.scanner.cap_guard == 0 || self.scanner.want == 0 {
            return fail("scanner.cap_guard and scanner.want must be positive");
        }
        let lookback = 1..=MAX_LOOKBACK_HOURS;
        if !lookback.contains(&self.scanner.max_lookback_hours)
            || !lookback.contains(&self.poller.lookback_hours)
        {
            return fail("lookback hours must be within 1..=8760");
        }
        let window = 1..=MAX_WINDOW_SECS;
        let s = &self.scanner;
        if !window.contains(&s.min_chunk_seconds)
            || !(1..=MAX_WINDOW_SECS / 60).contains(&s.initial_chunk_minutes)
            || !(1..=MAX_WINDOW_SECS / 3600).contains(&s.max_chunk_hours)
        {
            return fail("scanner chunk widths must be positive and at most one day");
        }
        if !window.contains(&self.extraction.photo_window_secs)
            || !window.contains(&self.extraction.motion_window_secs)
        {
            return fail("extraction windows must be positive and at most one day");
        }
        if self.extraction.photo_samples.is_empty() || self.extraction.motion_samples.is_empty() {
            return fail("extraction sample lists must not be empty");
        }
        let t = &self.extraction.thresholds;
        if !(t.bottom_white_ratio > 0.0 && t.bottom_fraction > 0.0 && t.flat_bottom_std >= 0.0) {
            return fail("extraction.thresholds must be positive");
        }
        if t.jpeg_quality == 0 || t.jpeg_quality > 100 {
            return fail("extraction.thresholds.jpeg_quality must be within 1..=100");
        }
        Ok(())
    }
}
