use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FloatList(Vec<f64>),
}

/// Errors raised by typed settings lookups.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    #[error("setting `{0}` is not defined")]
    Missing(String),

    #[error("setting `{key}` is not {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Key-value configuration shared by a run.
///
/// Settings are only read through typed getters; keys iterate in sorted
/// order so the value serializes identically on every process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns these settings with `key` set.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: SettingValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: SettingValue) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn lookup(&self, key: &str) -> Result<&SettingValue, SettingsError> {
        self.values
            .get(key)
            .ok_or_else(|| SettingsError::Missing(key.to_owned()))
    }

    fn wrong(key: &str, expected: &'static str) -> SettingsError {
        SettingsError::WrongType {
            key: key.to_owned(),
            expected,
        }
    }

    /// # Errors
    ///
    /// Fails if `key` is missing or not a boolean.
    pub fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        match self.lookup(key)? {
            SettingValue::Bool(b) => Ok(*b),
            _ => Err(Self::wrong(key, "a boolean")),
        }
    }

    /// Integers are accepted where a float is expected.
    ///
    /// # Errors
    ///
    /// Fails if `key` is missing or not numeric.
    pub fn get_f64(&self, key: &str) -> Result<f64, SettingsError> {
        match self.lookup(key)? {
            SettingValue::Float(x) => Ok(*x),
            #[allow(clippy::cast_precision_loss)]
            SettingValue::Int(n) => Ok(*n as f64),
            _ => Err(Self::wrong(key, "a number")),
        }
    }

    /// # Errors
    ///
    /// Fails if `key` is missing or not a non-negative integer.
    pub fn get_usize(&self, key: &str) -> Result<usize, SettingsError> {
        match self.lookup(key)? {
            SettingValue::Int(n) => {
                usize::try_from(*n).map_err(|_| Self::wrong(key, "a non-negative integer"))
            }
            _ => Err(Self::wrong(key, "a non-negative integer")),
        }
    }

    /// # Errors
    ///
    /// Fails if `key` is missing or not a string.
    pub fn get_str(&self, key: &str) -> Result<&str, SettingsError> {
        match self.lookup(key)? {
            SettingValue::Str(s) => Ok(s),
            _ => Err(Self::wrong(key, "a string")),
        }
    }

    /// # Errors
    ///
    /// Fails if `key` is missing or not a list of numbers.
    pub fn get_f64_list(&self, key: &str) -> Result<&[f64], SettingsError> {
        match self.lookup(key)? {
            SettingValue::FloatList(values) => Ok(values),
            _ => Err(Self::wrong(key, "a list of numbers")),
        }
    }
}
