//! Dynamic values shared by the store, the expression language and the renderer.
//!
//! The semantics follow the scripting conventions authors expect from story
//! formats: loose truthiness, numeric coercion, text concatenation with `+`,
//! and a canonical JSON form for lists and maps.

use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;

pub type Map = IndexMap<String, Value>;

/// Largest integer that still round-trips through `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Map(Map),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(boolean) => *boolean,
            Self::Number(number) => *number != 0.0 && !number.is_nan(),
            Self::Text(text) => !text.is_empty(),
            Self::List(_) | Self::Map(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(boolean) => f64::from(u8::from(*boolean)),
            Self::Number(number) => *number,
            Self::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    0.0
                } else {
                    text.parse().unwrap_or(f64::NAN)
                }
            }
            Self::List(_) | Self::Map(_) => f64::NAN,
        }
    }

    /// Text shown to the reader. `undefined` displays as nothing.
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }

    /// Reads `name` from a map, or `length` from a list or text.
    pub fn member(&self, name: &str) -> Value {
        match self {
            Self::Map(map) => map.get(name).cloned().unwrap_or_default(),
            Self::List(items) if name == "length" => Self::Number(items.len() as f64),
            Self::Text(text) if name == "length" => Self::Number(text.chars().count() as f64),
            _ => Self::Undefined,
        }
    }

    pub fn index(&self, index: &Value) -> Value {
        match (self, index) {
            (Self::List(items), Self::Number(number)) if number.fract() == 0.0 && *number >= 0.0 => {
                items.get(*number as usize).cloned().unwrap_or_default()
            }
            (Self::Text(text), Self::Number(number)) if number.fract() == 0.0 && *number >= 0.0 => text
                .chars()
                .nth(*number as usize)
                .map(|character| Self::Text(character.to_string()))
                .unwrap_or_default(),
            (_, Self::Text(name)) => self.member(name),
            (Self::Map(_), key) => self.member(&key.to_string()),
            _ => Self::Undefined,
        }
    }

    /// Walks map members along `segments`.
    pub fn lookup<S: AsRef<str>>(&self, segments: &[S]) -> Value {
        let mut current = self;
        for segment in segments {
            match current {
                Self::Map(map) => match map.get(segment.as_ref()) {
                    Some(value) => current = value,
                    None => return Self::Undefined,
                },
                _ => return Self::Undefined,
            }
        }
        current.clone()
    }

    /// Writes `value` below `segments`, creating missing maps.
    ///
    /// Returns the index of the first segment whose slot holds a non-map value.
    pub fn set_in<S: AsRef<str>>(&mut self, segments: &[S], value: Value) -> Result<(), usize> {
        let Some((last, parents)) = segments.split_last() else {
            *self = value;
            return Ok(());
        };
        if !matches!(self, Self::Map(_)) {
            return Err(0);
        }
        let mut current = self;
        for (position, segment) in parents.iter().enumerate() {
            let Self::Map(map) = current else {
                return Err(position.saturating_sub(1));
            };
            current = map
                .entry(segment.as_ref().to_owned())
                .or_insert_with(|| Self::Map(Map::new()));
            if !matches!(current, Self::Map(_)) {
                return Err(position);
            }
        }
        match current {
            Self::Map(map) => {
                map.insert(last.as_ref().to_owned(), value);
                Ok(())
            }
            _ => Err(parents.len().saturating_sub(1)),
        }
    }

    /// `==`: null and undefined are equal, numbers compare against numeric text.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (left, right) if left.is_nullish() && right.is_nullish() => true,
            (Self::Number(_), Self::Text(_)) | (Self::Text(_), Self::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Self::Bool(_), _) | (_, Self::Bool(_)) if !self.is_nullish() && !other.is_nullish() => {
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// `===`: same kind and same content.
    pub fn strict_equals(&self, other: &Value) -> bool {
        self == other
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(left), Self::Text(right)) => Some(left.cmp(right)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(boolean) => serde_json::Value::Bool(*boolean),
            Self::Number(number) => {
                if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
                    serde_json::Value::from(*number as i64)
                } else {
                    serde_json::Number::from_f64(*number)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Canonical compact JSON text.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_owned()
    } else if number.is_infinite() {
        if number > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        (number as i64).to_string()
    } else {
        number.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => Ok(()),
            Self::Null => write!(f, "null"),
            Self::Bool(boolean) => write!(f, "{boolean}"),
            Self::Number(number) => write!(f, "{}", format_number(*number)),
            Self::Text(text) => write!(f, "{text}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json_string()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(boolean) => Self::Bool(boolean),
            serde_json::Value::Number(number) => Self::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(object) => Self::Map(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Self::Bool(boolean)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Number(number as f64)
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Self::Number(f64::from(number))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}
