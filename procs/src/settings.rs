// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Dual-form settings strings for the control surface. See [`Settings`] for details.

use crate::{ProcError, ProcResult};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Key that selects a specific registry slot in a create payload.
pub const KEY_FORCED_PROC_ID: &str = "forced_proc_id";

/// Key that names a processor type - in a create payload, and in a PUT payload where a
/// *different* name triggers type substitution.
pub const KEY_PROC_NAME: &str = "proc_name";

/// A parsed settings payload.
///
/// Settings strings arrive in either of two forms, distinguished solely by the shape
/// of the first and last character:
///
/// - begins with `{` and ends with `}` ⇒ a JSON object;
/// - anything else ⇒ a query string of `key=value` pairs separated by `&`.
///
/// Query-string values are untyped text, so the typed getters ([`get_i64`],
/// [`get_u64`]) accept both JSON numbers and numeric strings. Key order is preserved.
///
/// [`get_i64`]: Self::get_i64
/// [`get_u64`]: Self::get_u64
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    map: Map<String, Value>,
}

impl Settings {
    #[must_use]
    pub fn empty() -> Self { Self { map: Map::new() } }

    /// Parses a dual-form settings string. An empty string parses to empty settings.
    ///
    /// # Errors
    ///
    /// [`ProcError::Invalid`] when the payload looks like JSON but is malformed or not
    /// an object.
    pub fn parse(raw: &str) -> ProcResult<Self> {
        if raw.is_empty() {
            return Ok(Self::empty());
        }
        if raw.starts_with('{') && raw.ends_with('}') {
            let value: Value =
                serde_json::from_str(raw).map_err(|_| ProcError::Invalid)?;
            let Value::Object(map) = value else {
                return Err(ProcError::Invalid);
            };
            return Ok(Self { map });
        }
        let mut map = Map::new();
        for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(key.to_owned(), Value::String(value.to_owned()));
        }
        Ok(Self { map })
    }

    /// Wraps an already-parsed JSON object (e.g. a `settings` subtree taken from a
    /// processor's state).
    #[must_use]
    pub fn from_object(map: Map<String, Value>) -> Self { Self { map } }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool { self.map.contains_key(key) }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> { self.map.get(key) }

    /// Text view of a value: strings borrow, numbers and booleans render.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.map.get(key)? {
            Value::String(text) => Some(Cow::Borrowed(text)),
            Value::Number(number) => Some(Cow::Owned(number.to_string())),
            Value::Bool(flag) => Some(Cow::Owned(flag.to_string())),
            _ => None,
        }
    }

    /// Integer view of a value, accepting both `500` and `"500"`.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.map.get(key)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// As [`Self::get_i64`] for unsigned values.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.map.get(key)? {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> { self.map.remove(key) }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> { self.map.iter() }

    /// Re-serializes as a JSON object string - itself a valid dual-form payload. Used
    /// to carry settings from an old processor into its substitute.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        Value::Object(self.map.clone()).to_string()
    }
}
