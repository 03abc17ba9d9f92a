//! Settings registry
//!
//! A flat table of named, domain-constrained values. Every frame the owner
//! takes a [`ChangeSet`] with [`SettingsRegistry::changes`], hands it to the
//! components that react to changes, and closes the cycle with
//! [`SettingsRegistry::end_cycle`]. Values written during a cycle (by the
//! benchmark script or by the user) are reported in the next snapshot.

use crate::{ConfigError, Result};
use mempool_gpu::{BufferRepresentation, CpuPageProperty, HeapType, MemoryPool};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Closed enum stored in an enum setting by index
pub trait SettingEnum: Copy + PartialEq + Sized + 'static {
    /// Variants in index order
    const VARIANTS: &'static [Self];

    /// Label shown to users and written to reports
    fn label(self) -> &'static str;

    /// Identifier used in config files and on the command line
    fn key(self) -> &'static str;

    fn index(self) -> usize {
        Self::VARIANTS
            .iter()
            .position(|v| *v == self)
            .unwrap_or_default()
    }

    fn from_index(index: usize) -> Option<Self> {
        Self::VARIANTS.get(index).copied()
    }

    /// Parse a key, a label or an index
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::VARIANTS
            .iter()
            .copied()
            .find(|v| v.key().eq_ignore_ascii_case(text) || v.label().eq_ignore_ascii_case(text))
            .or_else(|| text.parse::<usize>().ok().and_then(Self::from_index))
    }

    fn labels() -> Vec<&'static str> {
        Self::VARIANTS.iter().map(|v| v.label()).collect()
    }

    fn keys() -> Vec<&'static str> {
        Self::VARIANTS.iter().map(|v| v.key()).collect()
    }
}

macro_rules! impl_setting_enum {
    ($ty:ident { $($variant:ident => $key:literal),+ $(,)? }) => {
        impl SettingEnum for $ty {
            const VARIANTS: &'static [Self] = &[$($ty::$variant),+];

            fn label(self) -> &'static str {
                $ty::label(self)
            }

            fn key(self) -> &'static str {
                match self {
                    $($ty::$variant => $key),+
                }
            }
        }
    };
}

impl_setting_enum!(HeapType {
    Upload => "upload",
    Default => "default",
    Custom => "custom",
    GpuUpload => "gpu_upload",
});

impl_setting_enum!(CpuPageProperty {
    NotAvailable => "not_available",
    WriteCombine => "write_combine",
    WriteBack => "write_back",
});

impl_setting_enum!(MemoryPool {
    L0 => "l0",
    L1 => "l1",
});

impl_setting_enum!(BufferRepresentation {
    Raw => "raw",
    Formatted => "formatted",
    Structured => "structured",
    Constant => "constant",
});

/// Set of values a setting may hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingDomain {
    Int { min: i64, max: i64 },
    Bool,
    Enum { labels: Vec<&'static str>, keys: Vec<&'static str> },
    Text { max_len: usize },
}

impl SettingDomain {
    pub fn enumeration<T: SettingEnum>() -> Self {
        Self::Enum {
            labels: T::labels(),
            keys: T::keys(),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Int { .. } => "int",
            Self::Bool => "bool",
            Self::Enum { .. } => "enum",
            Self::Text { .. } => "text",
        }
    }
}

/// Current value of a setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    /// Index into the enum labels
    Enum(usize),
    Text(String),
}

impl SettingValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Enum(_) => "enum",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Enum(v) => write!(f, "#{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Registration record for one setting
#[derive(Debug, Clone)]
pub struct SettingDef {
    pub name: &'static str,
    pub group: &'static str,
    pub label: &'static str,
    pub domain: SettingDomain,
    pub default: SettingValue,
    pub visible: bool,
}

impl SettingDef {
    pub fn int(
        name: &'static str,
        group: &'static str,
        label: &'static str,
        default: i64,
        min: i64,
        max: i64,
    ) -> Self {
        Self {
            name,
            group,
            label,
            domain: SettingDomain::Int { min, max },
            default: SettingValue::Int(default),
            visible: true,
        }
    }

    pub fn boolean(
        name: &'static str,
        group: &'static str,
        label: &'static str,
        default: bool,
    ) -> Self {
        Self {
            name,
            group,
            label,
            domain: SettingDomain::Bool,
            default: SettingValue::Bool(default),
            visible: true,
        }
    }

    pub fn enumeration<T: SettingEnum>(
        name: &'static str,
        group: &'static str,
        label: &'static str,
        default: T,
    ) -> Self {
        Self {
            name,
            group,
            label,
            domain: SettingDomain::enumeration::<T>(),
            default: SettingValue::Enum(default.index()),
            visible: true,
        }
    }

    pub fn text(
        name: &'static str,
        group: &'static str,
        label: &'static str,
        default: impl Into<String>,
        max_len: usize,
    ) -> Self {
        Self {
            name,
            group,
            label,
            domain: SettingDomain::Text { max_len },
            default: SettingValue::Text(default.into()),
            visible: true,
        }
    }

    /// Register the setting hidden
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// A registered setting
#[derive(Debug, Clone)]
pub struct Setting {
    def: SettingDef,
    value: SettingValue,
    baseline: SettingValue,
    /// Number of selectable enum values, `labels.len()` unless clamped
    num_values: usize,
}

impl Setting {
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn group(&self) -> &'static str {
        self.def.group
    }

    pub fn label(&self) -> &'static str {
        self.def.label
    }

    pub fn domain(&self) -> &SettingDomain {
        &self.def.domain
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    pub fn is_visible(&self) -> bool {
        self.def.visible
    }

    /// Value rendered for display, using the label for enums
    pub fn display_value(&self) -> String {
        match (&self.def.domain, &self.value) {
            (SettingDomain::Enum { labels, .. }, SettingValue::Enum(idx)) => labels
                .get(*idx)
                .map_or_else(|| idx.to_string(), |label| (*label).to_string()),
            (_, value) => value.to_string(),
        }
    }

    fn clamp(&self, value: SettingValue) -> Result<SettingValue> {
        match (&self.def.domain, value) {
            (SettingDomain::Int { min, max }, SettingValue::Int(v)) => {
                Ok(SettingValue::Int(v.clamp(*min, *max)))
            }
            (SettingDomain::Bool, SettingValue::Bool(v)) => Ok(SettingValue::Bool(v)),
            (SettingDomain::Enum { .. }, SettingValue::Enum(v)) => {
                Ok(SettingValue::Enum(v.min(self.num_values - 1)))
            }
            (SettingDomain::Text { max_len }, SettingValue::Text(v)) => {
                let len = v.chars().count();
                if len > *max_len {
                    return Err(ConfigError::InvalidValue {
                        field: self.def.name.to_string(),
                        message: format!("{len} characters exceeds the limit of {max_len}"),
                    });
                }
                Ok(SettingValue::Text(v))
            }
            (domain, value) => Err(ConfigError::TypeMismatch {
                name: self.def.name.to_string(),
                expected: value.kind(),
                actual: domain.kind(),
            }),
        }
    }
}

/// Names of the settings whose value differs from the cycle baseline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    names: BTreeSet<&'static str>,
}

impl ChangeSet {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// True if any of `names` changed
    pub fn any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.contains(name))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.iter().copied()
    }
}

/// Registry of named settings
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    settings: Vec<Setting>,
    index: HashMap<&'static str, usize>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting; its default becomes both value and baseline
    pub fn register(&mut self, def: SettingDef) -> Result<()> {
        if self.index.contains_key(def.name) {
            return Err(ConfigError::DuplicateSetting(def.name.to_string()));
        }

        let num_values = match &def.domain {
            SettingDomain::Int { min, max } if min > max => {
                return Err(ConfigError::InvalidDomain {
                    name: def.name.to_string(),
                    message: format!("min {min} exceeds max {max}"),
                });
            }
            SettingDomain::Enum { labels, keys } => {
                if labels.is_empty() || labels.len() != keys.len() {
                    return Err(ConfigError::InvalidDomain {
                        name: def.name.to_string(),
                        message: "enum needs one key per label".to_string(),
                    });
                }
                labels.len()
            }
            _ => 0,
        };

        let mut setting = Setting {
            value: def.default.clone(),
            baseline: def.default.clone(),
            def,
            num_values,
        };
        let value = setting.clamp(setting.def.default.clone())?;
        setting.value = value.clone();
        setting.baseline = value;

        self.index.insert(setting.def.name, self.settings.len());
        self.settings.push(setting);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn setting(&self, name: &str) -> Result<&Setting> {
        self.index
            .get(name)
            .map(|&idx| &self.settings[idx])
            .ok_or_else(|| ConfigError::UnknownSetting(name.to_string()))
    }

    fn setting_mut(&mut self, name: &str) -> Result<&mut Setting> {
        match self.index.get(name) {
            Some(&idx) => Ok(&mut self.settings[idx]),
            None => Err(ConfigError::UnknownSetting(name.to_string())),
        }
    }

    /// All settings in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    pub fn get(&self, name: &str) -> Result<&SettingValue> {
        Ok(&self.setting(name)?.value)
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            SettingValue::Int(v) => Ok(*v),
            other => Err(mismatch(name, "int", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            SettingValue::Bool(v) => Ok(*v),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            SettingValue::Text(v) => Ok(v),
            other => Err(mismatch(name, "text", other)),
        }
    }

    pub fn enum_index(&self, name: &str) -> Result<usize> {
        match self.get(name)? {
            SettingValue::Enum(v) => Ok(*v),
            other => Err(mismatch(name, "enum", other)),
        }
    }

    pub fn enum_value<T: SettingEnum>(&self, name: &str) -> Result<T> {
        let idx = self.enum_index(name)?;
        T::from_index(idx).ok_or_else(|| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("index {idx} has no variant"),
        })
    }

    /// True iff the value differs from the one at the start of the cycle
    pub fn changed(&self, name: &str) -> Result<bool> {
        let setting = self.setting(name)?;
        Ok(setting.value != setting.baseline)
    }

    /// Write a value, clamped to the domain
    pub fn set_value(&mut self, name: &str, value: SettingValue) -> Result<()> {
        let setting = self.setting_mut(name)?;
        setting.value = setting.clamp(value)?;
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_value(name, SettingValue::Int(value))
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.set_value(name, SettingValue::Bool(value))
    }

    pub fn set_enum<T: SettingEnum>(&mut self, name: &str, value: T) -> Result<()> {
        self.set_value(name, SettingValue::Enum(value.index()))
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_value(name, SettingValue::Text(value.into()))
    }

    /// Parse `text` according to the setting's domain and write it
    pub fn set_from_str(&mut self, name: &str, text: &str) -> Result<()> {
        let invalid = |message: String| ConfigError::InvalidValue {
            field: name.to_string(),
            message,
        };
        let text = text.trim();
        let value = match self.setting(name)?.domain() {
            SettingDomain::Int { .. } => SettingValue::Int(
                text.parse()
                    .map_err(|_| invalid(format!("expected an integer, got {text:?}")))?,
            ),
            SettingDomain::Bool => SettingValue::Bool(match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => true,
                "false" | "0" | "off" | "no" => false,
                _ => return Err(invalid(format!("expected a boolean, got {text:?}"))),
            }),
            SettingDomain::Enum { labels, keys } => {
                let found = keys
                    .iter()
                    .zip(labels)
                    .position(|(key, label)| {
                        key.eq_ignore_ascii_case(text) || label.eq_ignore_ascii_case(text)
                    })
                    .or_else(|| text.parse::<usize>().ok().filter(|idx| *idx < keys.len()));
                SettingValue::Enum(found.ok_or_else(|| {
                    invalid(format!("expected one of {}, got {text:?}", keys.join(", ")))
                })?)
            }
            SettingDomain::Text { .. } => SettingValue::Text(text.to_string()),
        };
        self.set_value(name, value)
    }

    /// Restrict an enum setting to its first `n` values
    ///
    /// The current value is clamped into the new range.
    pub fn clamp_num_values(&mut self, name: &str, n: usize) -> Result<()> {
        let setting = self.setting_mut(name)?;
        let SettingDomain::Enum { labels, .. } = &setting.def.domain else {
            return Err(ConfigError::TypeMismatch {
                name: name.to_string(),
                expected: "enum",
                actual: setting.def.domain.kind(),
            });
        };
        setting.num_values = n.clamp(1, labels.len());
        if let SettingValue::Enum(idx) = setting.value {
            setting.value = SettingValue::Enum(idx.min(setting.num_values - 1));
        }
        Ok(())
    }

    /// Selectable values of an enum setting
    pub fn num_values(&self, name: &str) -> Result<usize> {
        Ok(self.setting(name)?.num_values)
    }

    /// UI hint only
    pub fn set_visible(&mut self, name: &str, visible: bool) -> Result<()> {
        self.setting_mut(name)?.def.visible = visible;
        Ok(())
    }

    pub fn is_visible(&self, name: &str) -> Result<bool> {
        Ok(self.setting(name)?.is_visible())
    }

    /// Snapshot of everything changed since the last [`end_cycle`](Self::end_cycle)
    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            names: self
                .settings
                .iter()
                .filter(|s| s.value != s.baseline)
                .map(|s| s.def.name)
                .collect(),
        }
    }

    /// Accept the current values as the baseline of the next cycle
    pub fn end_cycle(&mut self) {
        for setting in &mut self.settings {
            setting.baseline.clone_from(&setting.value);
        }
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &SettingValue) -> ConfigError {
    ConfigError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}
