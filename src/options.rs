//! Option keys, values and the explicit/preset lookup view.
//!
//! Every recognized option has a tri-state: absent (not in the set), a boolean
//! flag, or a scalar value. Falsy scalars (empty string, `false`, numeric zero)
//! are stored as [`OptionValue::Off`] so they never reach the filter chain but
//! still shadow a preset default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ResonateError, Result};
use crate::preset::Preset;

/// How a key's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Flag,
    Number,
    Text,
}

/// The closed set of recognized option keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionKey {
    Input,
    FfmpegPath,
    FfprobePath,
    Nightcore,
    Slowed,
    Reverse,
    NoiseReduction,
    Flanger,
    Phaser,
    Pitch,
    Bass,
    Tempo,
    Pulsate,
    RawAudioFilters,
    Highpass,
    Lowpass,
    Volume,
    Bitrate,
    Preset,
    Codec,
    Format,
    Output,
}

impl OptionKey {
    pub const ALL: [OptionKey; 22] = [
        OptionKey::Input,
        OptionKey::FfmpegPath,
        OptionKey::FfprobePath,
        OptionKey::Nightcore,
        OptionKey::Slowed,
        OptionKey::Reverse,
        OptionKey::NoiseReduction,
        OptionKey::Flanger,
        OptionKey::Phaser,
        OptionKey::Pitch,
        OptionKey::Bass,
        OptionKey::Tempo,
        OptionKey::Pulsate,
        OptionKey::RawAudioFilters,
        OptionKey::Highpass,
        OptionKey::Lowpass,
        OptionKey::Volume,
        OptionKey::Bitrate,
        OptionKey::Preset,
        OptionKey::Codec,
        OptionKey::Format,
        OptionKey::Output,
    ];

    /// Canonical external name of the key
    pub fn name(self) -> &'static str {
        match self {
            OptionKey::Input => "input",
            OptionKey::FfmpegPath => "ffmpeg-path",
            OptionKey::FfprobePath => "ffprobe-path",
            OptionKey::Nightcore => "nightcore",
            OptionKey::Slowed => "slowed",
            OptionKey::Reverse => "reverse",
            OptionKey::NoiseReduction => "noise-reduction",
            OptionKey::Flanger => "flanger",
            OptionKey::Phaser => "phaser",
            OptionKey::Pitch => "pitch",
            OptionKey::Bass => "bass",
            OptionKey::Tempo => "tempo",
            OptionKey::Pulsate => "pulsate",
            OptionKey::RawAudioFilters => "raw-audio-filters",
            OptionKey::Highpass => "highpass",
            OptionKey::Lowpass => "lowpass",
            OptionKey::Volume => "volume",
            OptionKey::Bitrate => "bitrate",
            OptionKey::Preset => "preset",
            OptionKey::Codec => "codec",
            OptionKey::Format => "format",
            OptionKey::Output => "output",
        }
    }

    /// Alternative names accepted for the key
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            OptionKey::FfmpegPath => &["ffmpeg"],
            OptionKey::FfprobePath => &["ffprobe"],
            OptionKey::Nightcore => &["speed", "spedup"],
            OptionKey::Volume => &["vol"],
            OptionKey::RawAudioFilters => &["audio-filters", "af"],
            _ => &[],
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            OptionKey::Nightcore
            | OptionKey::Slowed
            | OptionKey::Reverse
            | OptionKey::NoiseReduction
            | OptionKey::Flanger
            | OptionKey::Phaser => ValueKind::Flag,
            OptionKey::Pitch
            | OptionKey::Bass
            | OptionKey::Tempo
            | OptionKey::Pulsate
            | OptionKey::Highpass
            | OptionKey::Lowpass
            | OptionKey::Volume => ValueKind::Number,
            _ => ValueKind::Text,
        }
    }

    /// Numeric keys whose value must be strictly positive (rates, factors, frequencies)
    pub fn requires_positive(self) -> bool {
        matches!(
            self,
            OptionKey::Pitch
                | OptionKey::Tempo
                | OptionKey::Highpass
                | OptionKey::Lowpass
                | OptionKey::Pulsate
        )
    }

    /// Whether a preset may provide a default for this key.
    /// Invocation-specific keys (paths, the preset selector itself) may not.
    pub fn is_presettable(self) -> bool {
        !matches!(
            self,
            OptionKey::Input
                | OptionKey::Output
                | OptionKey::Preset
                | OptionKey::FfmpegPath
                | OptionKey::FfprobePath
        )
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptionKey {
    type Err = ResonateError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches('-').to_ascii_lowercase().replace('_', "-");
        OptionKey::ALL
            .iter()
            .copied()
            .find(|key| key.name() == wanted || key.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| ResonateError::InvalidOption {
                key: s.to_string(),
                value: String::new(),
                reason: "unknown option".to_string(),
            })
    }
}

/// A stored option value. Absence is represented by the key not being set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Flag,
    Value(String),
    /// Explicitly switched off (falsy input); contributes nothing.
    Off,
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Flag => f.write_str("true"),
            OptionValue::Value(value) => f.write_str(value),
            OptionValue::Off => f.write_str("off"),
        }
    }
}

fn is_falsy(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed.parse::<f64>().map(|n| n == 0.0).unwrap_or(false)
}

/// Mapping from option key to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    values: BTreeMap<OptionKey, OptionValue>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a boolean flag key. `false` stores [`OptionValue::Off`].
    pub fn set_flag(&mut self, key: OptionKey, enabled: bool) -> Result<()> {
        if key.kind() != ValueKind::Flag {
            return Err(ResonateError::InvalidOption {
                key: key.name().to_string(),
                value: enabled.to_string(),
                reason: "option takes a value, not a flag".to_string(),
            });
        }
        let value = if enabled { OptionValue::Flag } else { OptionValue::Off };
        self.values.insert(key, value);
        Ok(())
    }

    /// Set a key from its textual form, validating it against the key's kind.
    pub fn set_value(&mut self, key: OptionKey, raw: &str) -> Result<()> {
        let invalid = |reason: &str| ResonateError::InvalidOption {
            key: key.name().to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let value = match key.kind() {
            ValueKind::Flag => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => OptionValue::Flag,
                _ if is_falsy(raw) => OptionValue::Off,
                _ => return Err(invalid("expected true or false")),
            },
            _ if is_falsy(raw) => OptionValue::Off,
            ValueKind::Number => {
                let trimmed = raw.trim();
                match trimmed.parse::<f64>() {
                    Ok(n) if n.is_finite() && n < 0.0 && key.requires_positive() => {
                        return Err(invalid("expected a positive number"));
                    }
                    Ok(n) if n.is_finite() => OptionValue::Value(trimmed.to_string()),
                    _ => return Err(invalid("expected a number")),
                }
            }
            ValueKind::Text => OptionValue::Value(raw.to_string()),
        };

        self.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: OptionKey) -> Option<&OptionValue> {
        self.values.get(&key)
    }

    pub fn remove(&mut self, key: OptionKey) -> Option<OptionValue> {
        self.values.remove(&key)
    }

    pub fn contains(&self, key: OptionKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &OptionValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(key, value)| match value {
                OptionValue::Flag => key.name().to_string(),
                other => format!("{}={}", key.name(), other),
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Where an effective value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionSource {
    Explicit,
    Preset,
}

/// Read-only view resolving a key from the explicit options first, then the
/// active preset's defaults.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveOptions<'a> {
    explicit: &'a OptionSet,
    preset: Option<&'a Preset>,
}

impl<'a> EffectiveOptions<'a> {
    pub fn new(explicit: &'a OptionSet, preset: Option<&'a Preset>) -> Self {
        Self { explicit, preset }
    }

    pub fn preset(&self) -> Option<&'a Preset> {
        self.preset
    }

    pub fn get(&self, key: OptionKey) -> Option<&'a OptionValue> {
        self.explicit
            .get(key)
            .or_else(|| self.preset.and_then(|preset| preset.options.get(key)))
    }

    pub fn source(&self, key: OptionKey) -> Option<OptionSource> {
        if self.explicit.contains(key) {
            Some(OptionSource::Explicit)
        } else if self.preset.is_some_and(|preset| preset.options.contains(key)) {
            Some(OptionSource::Preset)
        } else {
            None
        }
    }

    pub fn is_enabled(&self, key: OptionKey) -> bool {
        matches!(self.get(key), Some(OptionValue::Flag))
    }

    /// Scalar value of a key, `None` when absent or switched off
    pub fn value(&self, key: OptionKey) -> Option<&'a str> {
        match self.get(key) {
            Some(OptionValue::Value(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn number(&self, key: OptionKey) -> Option<f64> {
        self.value(key).and_then(|value| value.trim().parse::<f64>().ok())
    }
}
