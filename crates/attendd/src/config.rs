use attend_core::{RandomFaceCounter, RecognizerError, RosterRecognizer, DEFAULT_CONFIDENCE_RANGE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineSettings;

const DEFAULT_ROSTER: &str = "John Doe,Jane Smith";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read roster file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid roster file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Where the camera stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    Simulated,
    Device(PathBuf),
}

impl CameraSource {
    /// `"simulated"` (or empty) selects the in-process camera; anything else is a device path.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("simulated") {
            CameraSource::Simulated
        } else {
            CameraSource::Device(PathBuf::from(value))
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera to acquire on start (default: simulated).
    pub camera: CameraSource,
    /// Requested frame size.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Period between detection ticks.
    pub tick_interval: Duration,
    /// Simulated recognition processing time for a capture.
    pub capture_delay: Duration,
    /// Upper bound for synthetic face counts.
    pub max_faces: u32,
    /// Inclusive confidence bounds (whole percent) for synthetic recognition.
    pub confidence_min: u16,
    pub confidence_max: u16,
    /// Whether recognition may report the `"unknown"` identity.
    pub include_unknown: bool,
    /// Known identities.
    pub roster: Vec<String>,
    /// Optional TOML file overriding the roster section.
    pub roster_file: Option<PathBuf>,
}

/// `[roster]` table of a roster file.
#[derive(Debug, Deserialize)]
struct RosterFile {
    roster: RosterSection,
}

#[derive(Debug, Deserialize)]
struct RosterSection {
    names: Vec<String>,
    include_unknown: Option<bool>,
    confidence_min: Option<u16>,
    confidence_max: Option<u16>,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let tick_ms: u64 = env_parse(&lookup, "ATTEND_TICK_INTERVAL_MS", 1000).max(1);
        let capture_ms: u64 = env_parse(&lookup, "ATTEND_CAPTURE_DELAY_MS", 2000);

        let roster = split_roster(
            &lookup("ATTEND_ROSTER").unwrap_or_else(|| DEFAULT_ROSTER.to_string()),
        );

        Self {
            camera: lookup("ATTEND_CAMERA_DEVICE")
                .map(|v| CameraSource::parse(&v))
                .unwrap_or(CameraSource::Simulated),
            frame_width: env_parse(&lookup, "ATTEND_FRAME_WIDTH", 640),
            frame_height: env_parse(&lookup, "ATTEND_FRAME_HEIGHT", 480),
            tick_interval: Duration::from_millis(tick_ms),
            capture_delay: Duration::from_millis(capture_ms),
            max_faces: env_parse(&lookup, "ATTEND_MAX_FACES", 3),
            confidence_min: env_parse(
                &lookup,
                "ATTEND_CONFIDENCE_MIN",
                *DEFAULT_CONFIDENCE_RANGE.start(),
            ),
            confidence_max: env_parse(
                &lookup,
                "ATTEND_CONFIDENCE_MAX",
                *DEFAULT_CONFIDENCE_RANGE.end(),
            ),
            include_unknown: lookup("ATTEND_INCLUDE_UNKNOWN")
                .map(|v| v.trim() != "0")
                .unwrap_or(true),
            roster,
            roster_file: lookup("ATTEND_ROSTER_FILE").map(PathBuf::from),
        }
    }

    /// Replace roster settings with the `[roster]` table of a TOML file.
    pub fn apply_roster_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_roster_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), names = self.roster.len(), "roster file loaded");
        Ok(())
    }

    fn apply_roster_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: RosterFile = toml::from_str(text)?;
        let section = file.roster;
        self.roster = section.names;
        if let Some(include_unknown) = section.include_unknown {
            self.include_unknown = include_unknown;
        }
        if let Some(min) = section.confidence_min {
            self.confidence_min = min;
        }
        if let Some(max) = section.confidence_max {
            self.confidence_max = max;
        }
        Ok(())
    }

    pub fn recognizer(&self) -> Result<RosterRecognizer, RecognizerError> {
        RosterRecognizer::new(
            self.roster.clone(),
            self.include_unknown,
            self.confidence_min..=self.confidence_max,
        )
    }

    pub fn face_counter(&self) -> RandomFaceCounter {
        RandomFaceCounter::new(self.max_faces)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tick_interval: self.tick_interval,
            capture_delay: self.capture_delay,
        }
    }
}

fn split_roster(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable value, using default");
            default
        }),
        None => default,
    }
}
