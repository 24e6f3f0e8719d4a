//! Durable, insertion-ordered settings map. Values are a closed union of
//! string | number | list&lt;scalar&gt; | one-level map&lt;string, scalar&gt; —
//! anything deeper is rejected at load time.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{PersistenceError, ValidationError};

/// A scalar leaf: what's allowed inside a `SettingValue::List` or
/// `SettingValue::Map`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingScalar {
    Text(String),
    Number(Decimal),
}

impl SettingScalar {
    fn from_json(value: &JsonValue) -> Result<Self, ValidationError> {
        match value {
            JsonValue::String(s) => Ok(SettingScalar::Text(s.clone())),
            JsonValue::Bool(b) => Ok(SettingScalar::Text(b.to_string())),
            JsonValue::Number(n) => Decimal::from_str(&n.to_string())
                .map(SettingScalar::Number)
                .map_err(|_| ValidationError::UnknownUnit(n.to_string())),
            _ => Err(ValidationError::NestingTooDeep),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            SettingScalar::Text(s) => JsonValue::String(s.clone()),
            SettingScalar::Number(d) => serde_json::Number::from_str(&d.to_string())
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
        }
    }

    /// `str(value)` — the stringification `prettify_settings` applies to
    /// every list element and every bare scalar (but not to map leaves).
    pub fn to_display_string(&self) -> String {
        match self {
            SettingScalar::Text(s) => s.clone(),
            SettingScalar::Number(d) => d.to_string(),
        }
    }
}

/// One settings value. A plain map key maps to exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Text(String),
    Number(Decimal),
    List(Vec<SettingScalar>),
    Map(IndexMap<String, SettingScalar>),
}

impl SettingValue {
    fn from_json(value: JsonValue) -> Result<Self, ValidationError> {
        match value {
            JsonValue::String(s) => Ok(SettingValue::Text(s)),
            JsonValue::Bool(b) => Ok(SettingValue::Text(b.to_string())),
            JsonValue::Number(n) => Decimal::from_str(&n.to_string())
                .map(SettingValue::Number)
                .map_err(|_| ValidationError::UnknownUnit(n.to_string())),
            JsonValue::Array(items) => items
                .iter()
                .map(SettingScalar::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(SettingValue::List),
            JsonValue::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key, SettingScalar::from_json(&value)?);
                }
                Ok(SettingValue::Map(out))
            }
            JsonValue::Null => Err(ValidationError::NestingTooDeep),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            SettingValue::Text(s) => JsonValue::String(s.clone()),
            SettingValue::Number(d) => serde_json::Number::from_str(&d.to_string())
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
            SettingValue::List(items) => {
                JsonValue::Array(items.iter().map(SettingScalar::to_json).collect())
            }
            SettingValue::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// `str(value)` for a bare scalar value, or a stringified list —
    /// the top-level half of `prettify_settings`'s conversion rule. Panics
    /// in debug builds if called on a `Map`, which is flattened by the
    /// caller instead.
    fn to_display(&self) -> PrettyValue {
        match self {
            SettingValue::Text(s) => PrettyValue::Text(s.clone()),
            SettingValue::Number(d) => PrettyValue::Text(d.to_string()),
            SettingValue::List(items) => {
                PrettyValue::List(items.iter().map(SettingScalar::to_display_string).collect())
            }
            SettingValue::Map(_) => unreachable!("maps are flattened before display conversion"),
        }
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        SettingValue::from_json(raw).map_err(DeError::custom)
    }
}

/// A prettified display value: a plain string, a stringified list, or (for
/// the flattened-map case) a raw scalar left unconverted — the one place
/// `prettify_settings` does not stringify.
#[derive(Debug, Clone, PartialEq)]
pub enum PrettyValue {
    Text(String),
    List(Vec<String>),
    Raw(SettingScalar),
}

impl PrettyValue {
    /// The JSON shape published in `settings_data`: a string, an array of
    /// strings, or (for a flattened map leaf) the unstringified scalar.
    pub fn to_json(&self) -> JsonValue {
        match self {
            PrettyValue::Text(s) => JsonValue::String(s.clone()),
            PrettyValue::List(items) => {
                JsonValue::Array(items.iter().map(|s| JsonValue::String(s.clone())).collect())
            }
            PrettyValue::Raw(scalar) => scalar.to_json(),
        }
    }
}

/// The settings map itself. Insertion order is preserved end to end —
/// through load, mutation, and save — so a settings file round-trips
/// byte-for-byte when nothing changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(IndexMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Settings(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: SettingValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    /// Load `path`; if it doesn't exist, seed it from `default_path` and
    /// write the copy back to `path` so that subsequent loads find it.
    pub fn load_or_seed(path: &Path, default_path: &Path) -> Result<Settings, PersistenceError> {
        if path.is_file() {
            return Self::read(path);
        }
        let seeded = Self::read(default_path)?;
        seeded.save(path)?;
        Ok(seeded)
    }

    fn read(path: &Path) -> Result<Settings, PersistenceError> {
        let text = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PersistenceError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write-then-rename so a crash mid-write never leaves a truncated
    /// settings file behind.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let body = serde_json::to_vec(self).map_err(|source| PersistenceError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tmp.write_all(&body).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tmp.persist(path).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Keys starting with `_` are private and excluded from every
    /// display/filter view.
    fn filtered(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter().filter(|(name, _)| !name.starts_with('_'))
    }

    /// `prettify_settings`: flatten one level of nesting, convert
    /// `snake_case` to `Title Case`, stringify scalars and list elements.
    /// Map leaves are combined into `"{Pretty Name} {Pretty Subname}"` and
    /// left unstringified.
    pub fn prettify(&self) -> IndexMap<String, PrettyValue> {
        let mut pretty = IndexMap::new();
        for (name, value) in self.filtered() {
            let pretty_name = title_case(name);
            match value {
                SettingValue::Map(map) => {
                    for (subname, subvalue) in map {
                        let combined = format!("{} {}", pretty_name, title_case(subname));
                        pretty.insert(combined, PrettyValue::Raw(subvalue.clone()));
                    }
                }
                other => {
                    pretty.insert(pretty_name, other.to_display());
                }
            }
        }
        pretty
    }

    /// `unprettify_setting_name`: resolve a prettified display name (plus
    /// a replacement value) back to the raw key and updated `SettingValue`
    /// it came from. Substring matching against the display name, not an
    /// exact un-title-casing — a prettified name that combines two raw
    /// keys would be ambiguous, so this takes the first raw key that's a
    /// prefix of it.
    pub fn unprettify(
        &self,
        pretty_name: &str,
        new_value: SettingScalar,
    ) -> Option<(String, SettingValue)> {
        let raw_name = pretty_name.replace(' ', "_").to_lowercase();
        for (name, value) in self.iter() {
            if *name == raw_name {
                return Some((
                    name.clone(),
                    match new_value {
                        SettingScalar::Text(s) => SettingValue::Text(s),
                        SettingScalar::Number(d) => SettingValue::Number(d),
                    },
                ));
            }
            if raw_name.contains(name.as_str()) {
                if let SettingValue::Map(map) = value {
                    let mut updated = map.clone();
                    for (subname, subvalue) in map {
                        if raw_name.ends_with(subname.as_str()) {
                            updated.insert(subname.clone(), new_value.clone());
                        } else {
                            updated.insert(subname.clone(), subvalue.clone());
                        }
                    }
                    return Some((name.clone(), SettingValue::Map(updated)));
                }
            }
        }
        None
    }
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        let mut s = Settings::new();
        s.set("city", SettingValue::Text("Ottawa".into()));
        s.set("_internal_token", SettingValue::Text("secret".into()));
        let mut weights = IndexMap::new();
        weights.insert("internal".to_string(), SettingScalar::Number(Decimal::new(40, 2)));
        weights.insert("external".to_string(), SettingScalar::Number(Decimal::new(20, 2)));
        s.set("decision_weights", SettingValue::Map(weights));
        s
    }

    #[test]
    fn rejects_nesting_deeper_than_one_level() {
        let raw = serde_json::json!({"a": {"b": {"c": 1}}});
        let err: Result<Settings, _> = serde_json::from_value(raw);
        assert!(err.is_err());
    }

    #[test]
    fn private_keys_excluded_from_prettify() {
        let pretty = sample().prettify();
        assert!(!pretty.contains_key("Internal Token"));
        assert!(!pretty.keys().any(|k| k.contains("_internal_token")));
    }

    #[test]
    fn prettify_flattens_one_level_map() {
        let pretty = sample().prettify();
        assert!(pretty.contains_key("Decision Weights Internal"));
        assert!(pretty.contains_key("Decision Weights External"));
    }

    #[test]
    fn unprettify_resolves_scalar_and_map_leaf() {
        let s = sample();
        let (name, value) = s.unprettify("City", SettingScalar::Text("Toronto".into())).unwrap();
        assert_eq!(name, "city");
        assert_eq!(value, SettingValue::Text("Toronto".into()));

        let (name, value) = s
            .unprettify("Decision Weights Internal", SettingScalar::Number(Decimal::new(50, 2)))
            .unwrap();
        assert_eq!(name, "decision_weights");
        match value {
            SettingValue::Map(map) => {
                assert_eq!(map.get("internal"), Some(&SettingScalar::Number(Decimal::new(50, 2))));
                assert_eq!(map.get("external"), Some(&SettingScalar::Number(Decimal::new(20, 2))));
            }
            _ => panic!("expected a map"),
        }
    }
}
