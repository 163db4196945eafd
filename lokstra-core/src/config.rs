use std::collections::HashMap;

/// A trimmed, non-placeholder-expanding key/value config surface. Full YAML
/// loading, `.env` overlay, and `${...}`/`${@provider:key}` placeholder
/// expansion belong to an external configuration collaborator — this is
/// just the typed-getter surface the registry and listener consume.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap(HashMap<String, ConfigValue>);

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Int(n)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl ConfigMap {
    pub fn new() -> Self {
        ConfigMap::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_roundtrip() {
        let config = ConfigMap::new()
            .insert("name", "lokstra")
            .insert("port", 8080i64)
            .insert("debug", true);
        assert_eq!(config.get_str("name"), Some("lokstra"));
        assert_eq!(config.get("port").and_then(ConfigValue::as_i64), Some(8080));
        assert_eq!(config.get("debug").and_then(ConfigValue::as_bool), Some(true));
    }

    #[test]
    fn get_or_falls_back_on_missing_key() {
        let config = ConfigMap::new();
        assert_eq!(config.get_or("missing", "default"), "default");
    }
}
