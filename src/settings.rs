//! Runtime settings, stored as JSON under the user's config directory.

use crate::audio::MAX_AUDIO_CHANNELS;
use crate::dsp::window::WindowKind;
use crate::param::AudioAnnotations;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_TICK_RATE_HZ: f32 = 60.0;
const MAX_TICK_RATE_HZ: f32 = 480.0;
// One year; longer runs are indistinguishable from running forever.
const MAX_RUN_SECONDS: f32 = 31_536_000.0;

fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shadermeter")
}

pub fn default_path() -> PathBuf {
    config_dir().join("settings.json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSettings {
    pub name: String,
    /// Name of the audio source feeding this parameter.
    pub source: String,
    pub annotations: AudioAnnotations,
}

impl Default for ParamSettings {
    fn default() -> Self {
        Self {
            name: "audio_spectrum".into(),
            source: String::new(),
            annotations: AudioAnnotations {
                is_fft: true,
                window: Some(WindowKind::Hann.name().into()),
                ..AudioAnnotations::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub tick_rate_hz: f32,
    pub channels: usize,
    /// Stop after this many seconds; run forever when absent.
    pub run_seconds: Option<f32>,
    pub params: Vec<ParamSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            channels: 2,
            run_seconds: None,
            params: vec![ParamSettings::default()],
        }
    }
}

impl Settings {
    pub fn sanitize(&mut self) {
        if self.log_level.trim().is_empty() {
            self.log_level = "info".into();
        }
        self.tick_rate_hz = if self.tick_rate_hz.is_finite() {
            self.tick_rate_hz.clamp(1.0, MAX_TICK_RATE_HZ)
        } else {
            DEFAULT_TICK_RATE_HZ
        };
        self.channels = self.channels.clamp(1, MAX_AUDIO_CHANNELS);
        self.run_seconds = self
            .run_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| secs.min(MAX_RUN_SECONDS));

        for (index, param) in self.params.iter_mut().enumerate() {
            if param.name.trim().is_empty() {
                param.name = format!("audio_{index}");
            }
        }
    }

    /// Distinct, non-empty source names referenced by the parameters.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .params
            .iter()
            .map(|param| param.source.clone())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Load settings from `path`. Missing or unreadable files give defaults.
pub fn load_or_default(path: &Path) -> Settings {
    let mut settings: Settings = fs::read_to_string(path)
        .ok()
        .and_then(|s| {
            serde_json::from_str(&s)
                .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                .ok()
        })
        .unwrap_or_default();
    settings.sanitize();
    settings
}

/// Write `settings` to `path` if nothing exists there yet. Returns whether a
/// file was written.
pub fn persist_if_missing(path: &Path, settings: &Settings) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    let json = serde_json::to_string_pretty(settings).context("failed to encode settings")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {parent:?}"))?;
    }
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json).with_context(|| format!("failed to write {temp_path:?}"))?;
    fs::rename(&temp_path, path).with_context(|| format!("failed to move settings to {path:?}"))?;

    info!("[settings] wrote default settings to {path:?}");
    Ok(true)
}
