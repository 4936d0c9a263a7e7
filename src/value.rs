//! Program inputs and outputs.
use std::{fmt::Debug, str::FromStr};

use serde::{Deserialize, Serialize};

/// A scalar or structured value passed to or returned from a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Str(String),
    /// A sequence of values, possibly of different kinds.
    List(Vec<Value>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

/// A [`Value`] could not be parsed from a string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("'{0}' is not a boolean, integer, 0x-prefixed hex string or quoted string")]
pub struct ParseValueError(String);

impl FromStr for Value {
    type Err = ParseValueError;

    /// Parses `true`/`false`, decimal integers, `0x`-prefixed hex bytes and strings in double
    /// quotes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(quoted) = s
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Ok(Value::Str(quoted.to_string()));
        }
        match s {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            _ => {}
        }
        if let Some(hex) = s.strip_prefix("0x") {
            if hex.len() % 2 != 0 || !hex.is_ascii() {
                return Err(ParseValueError(s.to_string()));
            }
            return (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Bytes)
                .map_err(|_| ParseValueError(s.to_string()));
        }
        s.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ParseValueError(s.to_string()))
    }
}

/// Whether an input is secret shared or sent to all nodes in the clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Secret shared, each node only learns its own share.
    Secret,
    /// Sent unchanged to every node.
    Public,
}

/// A named program input.
#[derive(Clone, PartialEq, Eq)]
pub struct NamedInput {
    /// Name of the input, unique within one execution request.
    pub name: String,
    /// The value of the input.
    pub value: Value,
    /// How the input is delivered to the nodes.
    pub visibility: Visibility,
}

impl NamedInput {
    /// A secret input.
    pub fn secret(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            visibility: Visibility::Secret,
        }
    }

    /// A public input.
    pub fn public(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            visibility: Visibility::Public,
        }
    }
}

impl Debug for NamedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("NamedInput");
        s.field("name", &self.name);
        match self.visibility {
            // We don't want to potentially log the secret input
            Visibility::Secret => s.field("value", &"<REDACTED>"),
            Visibility::Public => s.field("value", &self.value),
        };
        s.field("visibility", &self.visibility).finish()
    }
}
