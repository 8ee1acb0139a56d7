//! Process-wide settings with alias keys and forward compatibility

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::session::{AudioFormat, RecordingOptions};

pub mod keys {
    pub const THEME: &str = "theme";
    pub const AUDIO_FORMAT: &str = "audio_format";
    pub const FORMAT_ALIAS: &str = "format";
    pub const AUDIO_QUALITY: &str = "audio_quality";
    pub const QUALITY_ALIAS: &str = "quality";
    pub const AUTO_SPLIT_ENABLED: &str = "auto_split_enabled";
    pub const SPLIT_INTERVAL_MINUTES: &str = "split_interval_minutes";
    pub const SPLIT_SIZE_MB: &str = "split_size_mb";
    pub const STORAGE_LOCATION: &str = "storage_location";
    pub const INPUT_DEVICE_ID: &str = "input_device_id";
}

pub const DEFAULT_STORAGE_LOCATION: &str = "TavernTapes_Recordings";
pub const DEFAULT_INPUT_DEVICE: &str = "default";

/// UI theme preference. Carried for the host; the core never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Theme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Invalid value for \"{key}\": {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Canonical settings snapshot.
///
/// On-disk form is a flat map of raw entries; reads apply defaults
/// for missing keys and tolerate malformed values, writes emit the
/// canonical key together with its legacy alias and pass unrecognized
/// entries through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub theme: Theme,
    pub audio_format: AudioFormat,
    pub audio_quality: u32,
    pub auto_split_enabled: bool,
    pub split_interval_minutes: u32,
    pub split_size_mb: u64,
    pub storage_location: String,
    pub input_device_id: String,
    /// Entries written by newer versions, preserved verbatim
    pub unknown: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            audio_format: AudioFormat::Wav,
            audio_quality: 320,
            auto_split_enabled: true,
            split_interval_minutes: 30,
            split_size_mb: 500,
            storage_location: DEFAULT_STORAGE_LOCATION.to_string(),
            input_device_id: DEFAULT_INPUT_DEVICE.to_string(),
            unknown: Map::new(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    keys::THEME,
    keys::AUDIO_FORMAT,
    keys::FORMAT_ALIAS,
    keys::AUDIO_QUALITY,
    keys::QUALITY_ALIAS,
    keys::AUTO_SPLIT_ENABLED,
    keys::SPLIT_INTERVAL_MINUTES,
    keys::SPLIT_SIZE_MB,
    keys::STORAGE_LOCATION,
    keys::INPUT_DEVICE_ID,
];

impl Settings {
    /// Build a snapshot from raw stored entries, applying defaults
    /// for anything missing or malformed. The canonical key wins over
    /// its alias when both are present.
    pub fn from_entries(entries: &Map<String, Value>) -> Self {
        let mut settings = Self::default();

        if let Some(theme) = str_entry(entries, keys::THEME).and_then(|s| s.parse().ok()) {
            settings.theme = theme;
        }
        if let Some(format) = str_entry(entries, keys::AUDIO_FORMAT)
            .or_else(|| str_entry(entries, keys::FORMAT_ALIAS))
            .and_then(|s| s.parse().ok())
        {
            settings.audio_format = format;
        }
        if let Some(quality) = uint_entry(entries, keys::AUDIO_QUALITY)
            .or_else(|| uint_entry(entries, keys::QUALITY_ALIAS))
        {
            if valid_quality(quality) {
                settings.audio_quality = quality as u32;
            }
        }
        if let Some(Value::Bool(enabled)) = entries.get(keys::AUTO_SPLIT_ENABLED) {
            settings.auto_split_enabled = *enabled;
        }
        if let Some(minutes) = uint_entry(entries, keys::SPLIT_INTERVAL_MINUTES) {
            if (1..=120).contains(&minutes) {
                settings.split_interval_minutes = minutes as u32;
            }
        }
        if let Some(mb) = uint_entry(entries, keys::SPLIT_SIZE_MB) {
            if mb >= 1 {
                settings.split_size_mb = mb;
            }
        }
        if let Some(location) = str_entry(entries, keys::STORAGE_LOCATION) {
            if !location.is_empty() {
                settings.storage_location = location.to_string();
            }
        }
        if let Some(device) = str_entry(entries, keys::INPUT_DEVICE_ID) {
            if !device.is_empty() {
                settings.input_device_id = device.to_string();
            }
        }

        settings.unknown = entries
            .iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        settings
    }

    /// Raw entries for persistence. Alias keys are written alongside
    /// their canonical counterparts; unknown entries round-trip.
    pub fn to_entries(&self) -> Map<String, Value> {
        let mut entries = Map::new();
        entries.insert(keys::THEME.into(), Value::from(self.theme.as_str()));
        let format = Value::from(self.audio_format.as_str());
        entries.insert(keys::AUDIO_FORMAT.into(), format.clone());
        entries.insert(keys::FORMAT_ALIAS.into(), format);
        let quality = Value::from(self.audio_quality);
        entries.insert(keys::AUDIO_QUALITY.into(), quality.clone());
        entries.insert(keys::QUALITY_ALIAS.into(), quality);
        entries.insert(
            keys::AUTO_SPLIT_ENABLED.into(),
            Value::from(self.auto_split_enabled),
        );
        entries.insert(
            keys::SPLIT_INTERVAL_MINUTES.into(),
            Value::from(self.split_interval_minutes),
        );
        entries.insert(keys::SPLIT_SIZE_MB.into(), Value::from(self.split_size_mb));
        entries.insert(
            keys::STORAGE_LOCATION.into(),
            Value::from(self.storage_location.as_str()),
        );
        entries.insert(
            keys::INPUT_DEVICE_ID.into(),
            Value::from(self.input_device_id.as_str()),
        );
        for (k, v) in &self.unknown {
            entries.insert(k.clone(), v.clone());
        }
        entries
    }

    /// Apply a single keyed write. Alias keys update the canonical
    /// field (and so both spellings on the next write-back);
    /// unrecognized keys are preserved verbatim.
    pub fn apply(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        let invalid = |reason: &str| SettingsError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            keys::THEME => {
                self.theme = value
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| invalid("expected \"light\" or \"dark\""))?;
            }
            keys::AUDIO_FORMAT | keys::FORMAT_ALIAS => {
                self.audio_format = value
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| invalid("expected \"wav\" or \"compressed\""))?;
            }
            keys::AUDIO_QUALITY | keys::QUALITY_ALIAS => {
                let quality = value
                    .as_u64()
                    .filter(|q| valid_quality(*q))
                    .ok_or_else(|| invalid("expected 64..=320 in steps of 32"))?;
                self.audio_quality = quality as u32;
            }
            keys::AUTO_SPLIT_ENABLED => {
                self.auto_split_enabled =
                    value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            }
            keys::SPLIT_INTERVAL_MINUTES => {
                let minutes = value
                    .as_u64()
                    .filter(|m| (1..=120).contains(m))
                    .ok_or_else(|| invalid("expected 1..=120"))?;
                self.split_interval_minutes = minutes as u32;
            }
            keys::SPLIT_SIZE_MB => {
                self.split_size_mb = value
                    .as_u64()
                    .filter(|mb| *mb >= 1)
                    .ok_or_else(|| invalid("expected an integer >= 1"))?;
            }
            keys::STORAGE_LOCATION => {
                let location = value
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("expected a non-empty path"))?;
                self.storage_location = location.to_string();
            }
            keys::INPUT_DEVICE_ID => {
                let device = value
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("expected a non-empty device id"))?;
                self.input_device_id = device.to_string();
            }
            _ => {
                self.unknown.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Derive the recording options this snapshot implies.
    pub fn recording_options(&self) -> RecordingOptions {
        RecordingOptions {
            format: self.audio_format,
            quality_kbps: self.audio_quality,
            split_interval_minutes: self
                .auto_split_enabled
                .then_some(self.split_interval_minutes),
            split_size_mb: self.auto_split_enabled.then_some(self.split_size_mb),
            input_device_id: (self.input_device_id != DEFAULT_INPUT_DEVICE)
                .then(|| self.input_device_id.clone()),
        }
    }
}

fn str_entry<'a>(entries: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entries.get(key).and_then(Value::as_str)
}

fn uint_entry(entries: &Map<String, Value>, key: &str) -> Option<u64> {
    entries.get(key).and_then(Value::as_u64)
}

fn valid_quality(q: u64) -> bool {
    (64..=320).contains(&q) && (q - 64) % 32 == 0
}
