use crate::error::{Error, Result};
use k8s_openapi::serde_json::{Map, Value};
use kube::api::GroupVersionKind;
use serde::{Deserialize, Serialize};

/// Loosely typed arguments of an action request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

fn missing(key: &str) -> Error {
    Error::Custom(format!("payload does not contain {key:?}"))
}

impl Payload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A payload naming `action_name` under the `action` field.
    #[must_use]
    pub fn create<I>(action_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut payload = Self::new();
        payload.insert("action", action_name);
        payload.0.extend(fields);
        payload
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn action_name(&self) -> Option<&str> {
        self.get("action").and_then(Value::as_str)
    }

    /// # Errors
    ///
    /// Returns an error if the key is absent or not a string
    pub fn string(&self, key: &str) -> Result<String> {
        self.get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| missing(key))
    }

    /// Like [`Payload::string`], but an absent key reads as an empty string.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is present but not a string
    pub fn optional_string(&self, key: &str) -> Result<String> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(Error::Custom(format!(
                "{key:?} accessor error: {other} is not a string"
            ))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the key is absent, not an array, or holds a non-string entry
    pub fn string_slice(&self, key: &str) -> Result<Vec<String>> {
        let entries = self
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| missing(key))?;

        entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| Error::Custom("could not convert slice entry to string".into()))
            })
            .collect()
    }

    /// Numbers are read as is; strings are parsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither a number nor a parsable string
    pub fn float64(&self, key: &str) -> Result<f64> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| missing(key)),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|e| Error::Custom(format!("parse {key:?} as float: {e}"))),
            other => Err(Error::Custom(format!(
                "unable to handle type for {key:?}; got {other:?}"
            ))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the key is absent or the number is outside `u16`
    pub fn uint16(&self, key: &str) -> Result<u16> {
        let value = self
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing(key))?;

        if !(0.0..=f64::from(u16::MAX)).contains(&value) {
            return Err(Error::Custom(format!("value {value} is not a valid uint16")));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = value as u16;
        Ok(value)
    }

    /// Reads the `group`, `version` and `kind` fields.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three is missing
    pub fn group_version_kind(&self) -> Result<GroupVersionKind> {
        Ok(GroupVersionKind::gvk(
            &self.string("group")?,
            &self.string("version")?,
            &self.string("kind")?,
        ))
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
