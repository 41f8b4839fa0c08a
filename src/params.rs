//! Parameter schema and value model.
//!
//! Descriptors are produced by the extractor and owned by the host once
//! emitted. Snapshots travel with every `UPDATE_PARAMS`; [`ParameterSet`]
//! resolves an incoming snapshot against the active schema so the factory
//! always sees a value for every declared key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    Color,
    Boolean,
}

impl ParamType {
    /// Parse an explicit `type` field from a parameter block.
    ///
    /// Accepts the common control names authors use in place of the
    /// canonical three.
    pub fn from_declared(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "number" | "float" | "int" | "integer" | "range" | "slider" => Some(ParamType::Number),
            "color" | "colour" => Some(ParamType::Color),
            "boolean" | "bool" | "checkbox" | "toggle" => Some(ParamType::Boolean),
            _ => None,
        }
    }

    /// Value used when a declared default cannot be coerced to this type.
    pub fn zero_value(self) -> ParamValue {
        match self {
            ParamType::Number => ParamValue::Number(0.0),
            ParamType::Color => ParamValue::Color("#000000".into()),
            ParamType::Boolean => ParamValue::Boolean(false),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamType::Number => "number",
            ParamType::Color => "color",
            ParamType::Boolean => "boolean",
        })
    }
}

/// A live parameter value. Serialized as the bare JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Boolean(bool),
    Color(String),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Number(_) => ParamType::Number,
            ParamValue::Boolean(_) => ParamType::Boolean,
            ParamValue::Color(_) => ParamType::Color,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert this value to `ty`, or `None` when no sensible conversion exists.
    pub fn coerce(&self, ty: ParamType) -> Option<ParamValue> {
        match (ty, self) {
            (ParamType::Number, ParamValue::Number(n)) => n.is_finite().then_some(ParamValue::Number(*n)),
            (ParamType::Number, ParamValue::Color(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(ParamValue::Number),
            (ParamType::Number, ParamValue::Boolean(_)) => None,

            (ParamType::Color, ParamValue::Color(s)) => normalize_hex_color(s).map(ParamValue::Color),
            (ParamType::Color, ParamValue::Number(n)) => {
                if n.fract() == 0.0 && (0.0..=f64::from(0xFF_FF_FFu32)).contains(n) {
                    Some(ParamValue::Color(format!("#{:06x}", *n as u32)))
                } else {
                    None
                }
            }
            (ParamType::Color, ParamValue::Boolean(_)) => None,

            (ParamType::Boolean, ParamValue::Boolean(b)) => Some(ParamValue::Boolean(*b)),
            (ParamType::Boolean, ParamValue::Number(n)) => Some(ParamValue::Boolean(*n != 0.0)),
            (ParamType::Boolean, ParamValue::Color(s)) => match s.trim() {
                "true" => Some(ParamValue::Boolean(true)),
                "false" => Some(ParamValue::Boolean(false)),
                _ => None,
            },
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Color(value.to_string())
    }
}

/// True for `#rgb` / `#rrggbb` strings.
pub fn looks_like_hex_color(value: &str) -> bool {
    normalize_hex_color(value).is_some()
}

/// Normalize `#rgb` and `#rrggbb` to lowercase `#rrggbb`.
pub fn normalize_hex_color(value: &str) -> Option<String> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => Some(format!("#{}", hex.to_ascii_lowercase())),
        3 => {
            let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            Some(format!("#{}", expanded.to_ascii_lowercase()))
        }
        _ => None,
    }
}

/// Parse a hex colour into linear-ish RGB components in `0..=1`.
pub fn hex_to_rgb(value: &str) -> Option<[f32; 3]> {
    let normalized = normalize_hex_color(value)?;
    let packed = u32::from_str_radix(&normalized[1..], 16).ok()?;
    Some([
        ((packed >> 16) & 0xFF) as f32 / 255.0,
        ((packed >> 8) & 0xFF) as f32 / 255.0,
        (packed & 0xFF) as f32 / 255.0,
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub key: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub label: String,
    pub default: ParamValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    pub current: ParamValue,
}

impl ParameterDescriptor {
    /// Descriptor whose label is the key and whose current value is the default.
    pub fn new(key: impl Into<String>, param_type: ParamType, default: ParamValue) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            param_type,
            current: default.clone(),
            default,
            min: None,
            max: None,
            step: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>, step: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self.step = step;
        self
    }

    /// Whether a numeric value falls outside the declared `min`/`max`.
    pub fn is_out_of_range(&self, value: &ParamValue) -> bool {
        let Some(n) = value.as_number() else {
            return false;
        };
        self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max)
    }
}

/// Mapping `key → value` sent with every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSnapshot(BTreeMap<String, ParamValue>);

impl ParameterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{key: default}` for every descriptor.
    pub fn from_defaults(descriptors: &[ParameterDescriptor]) -> Self {
        descriptors
            .iter()
            .map(|d| (d.key.clone(), d.default.clone()))
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ParamValue)> for ParameterSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Active schema plus the last value each key resolved to.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    descriptors: Vec<ParameterDescriptor>,
    last_known: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new(descriptors: Vec<ParameterDescriptor>) -> Self {
        let last_known = descriptors
            .iter()
            .map(|d| (d.key.clone(), d.current.clone()))
            .collect();
        Self {
            descriptors,
            last_known,
        }
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Resolve `incoming` into the snapshot handed to the factory.
    ///
    /// Declared keys take the incoming value (coerced to the declared type),
    /// else the last value they resolved to, else their default. Values are
    /// not clamped to `min`/`max`. Undeclared incoming keys pass through.
    pub fn resolve(&mut self, incoming: &ParameterSnapshot) -> ParameterSnapshot {
        let mut resolved = ParameterSnapshot::new();

        for descriptor in &self.descriptors {
            let key = descriptor.key.as_str();
            let offered = incoming.get(key).and_then(|value| {
                let coerced = value.coerce(descriptor.param_type);
                if coerced.is_none() {
                    log::warn!(
                        "Ignoring value {:?} for parameter '{}': expected {}",
                        value,
                        key,
                        descriptor.param_type
                    );
                }
                coerced
            });

            let value = offered
                .or_else(|| self.last_known.get(key).cloned())
                .unwrap_or_else(|| descriptor.default.clone());

            if descriptor.is_out_of_range(&value) {
                log::debug!(
                    "Parameter '{}' = {:?} is outside [{:?}, {:?}]; passing through unclamped",
                    key,
                    value,
                    descriptor.min,
                    descriptor.max
                );
            }

            self.last_known.insert(key.to_string(), value.clone());
            resolved.insert(key, value);
        }

        for (key, value) in incoming.iter() {
            if !resolved.contains_key(key) {
                self.last_known.insert(key.clone(), value.clone());
                resolved.insert(key.clone(), value.clone());
            }
        }

        resolved
    }
}
