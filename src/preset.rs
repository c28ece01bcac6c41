//! Named option presets and the option resolver.
//!
//! Presets are loaded once from a TOML file of the form:
//!
//! ```toml
//! [[preset]]
//! id = "nc"
//! name = "Nightcore"
//! [preset.options]
//! nightcore = true
//! bass = 5
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ResonateError, Result};
use crate::options::{EffectiveOptions, OptionKey, OptionSet, ValueKind};

/// A named set of option defaults. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub options: OptionSet,
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    preset: Vec<RawPreset>,
}

#[derive(Debug, Deserialize)]
struct RawPreset {
    id: String,
    name: Option<String>,
    #[serde(default)]
    options: BTreeMap<String, toml::Value>,
}

impl RawPreset {
    fn into_preset(self) -> Result<Preset> {
        let mut options = OptionSet::new();
        let mut seen: HashMap<OptionKey, String> = HashMap::new();
        for (name, value) in self.options {
            let key: OptionKey = name.parse()?;
            if let Some(first) = seen.get(&key) {
                return Err(ResonateError::InvalidOption {
                    key: name,
                    value: value.to_string(),
                    reason: format!(
                        "'{}' is already set as '{}' in preset '{}'",
                        key, first, self.id
                    ),
                });
            }
            seen.insert(key, name.clone());
            if !key.is_presettable() {
                return Err(ResonateError::InvalidOption {
                    key: name,
                    value: value.to_string(),
                    reason: format!("cannot be set by preset '{}'", self.id),
                });
            }
            match value {
                toml::Value::Boolean(enabled) => match key.kind() {
                    ValueKind::Flag => options.set_flag(key, enabled)?,
                    _ => options.set_value(key, &enabled.to_string())?,
                },
                toml::Value::String(text) => options.set_value(key, &text)?,
                toml::Value::Integer(n) => options.set_value(key, &n.to_string())?,
                toml::Value::Float(n) => options.set_value(key, &n.to_string())?,
                other => {
                    return Err(ResonateError::InvalidOption {
                        key: name,
                        value: other.to_string(),
                        reason: "expected a boolean, string or number".to_string(),
                    })
                }
            }
        }

        Ok(Preset {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            options,
        })
    }
}

/// Ordered, read-only collection of presets.
#[derive(Debug, Clone, Default)]
pub struct PresetStore {
    presets: Vec<Preset>,
}

impl PresetStore {
    pub fn new(presets: Vec<Preset>) -> Result<Self> {
        let mut seen = HashSet::new();
        for preset in &presets {
            if !seen.insert(preset.id.as_str()) {
                return Err(ResonateError::Config(format!(
                    "Duplicate preset id '{}'",
                    preset.id
                )));
            }
        }
        Ok(Self { presets })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PresetFile = toml::from_str(content)?;
        let presets = file
            .preset
            .into_iter()
            .map(RawPreset::into_preset)
            .collect::<Result<Vec<_>>>()?;
        Self::new(presets)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResonateError::Config(format!(
                "Failed to read preset file {}: {}",
                path.display(),
                e
            ))
        })?;
        let store = Self::from_toml_str(&content)?;
        info!("Loaded {} presets from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    /// Find a preset by id, falling back to a case-insensitive display name match.
    pub fn find(&self, id_or_name: &str) -> Result<&Preset> {
        let wanted = id_or_name.trim();
        self.presets
            .iter()
            .find(|preset| preset.id == wanted)
            .or_else(|| {
                self.presets
                    .iter()
                    .find(|preset| preset.name.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| ResonateError::PresetNotFound(wanted.to_string()))
    }

    /// Resolve the explicit options against the preset they request, if any.
    pub fn resolve<'a>(&'a self, explicit: &'a OptionSet) -> Result<EffectiveOptions<'a>> {
        let preset = match EffectiveOptions::new(explicit, None).value(OptionKey::Preset) {
            Some(requested) => {
                let preset = self.find(requested)?;
                debug!("Using preset '{}' ({})", preset.name, preset.id);
                Some(preset)
            }
            None => None,
        };
        Ok(resolve(explicit, preset))
    }
}

/// Combine explicit options with an optional preset. Explicit values win;
/// preset values fill in keys the caller did not set.
pub fn resolve<'a>(explicit: &'a OptionSet, preset: Option<&'a Preset>) -> EffectiveOptions<'a> {
    EffectiveOptions::new(explicit, preset)
}
