use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime value manipulated by model code.
///
/// The engine deals in a small closed set of value shapes; richer types
/// (agentsets, lists of agents, colors) live on the host side of the
/// compiler boundary and reach the engine already lowered to these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Double-precision number (the model language's only numeric type).
    Number(f64),
    /// Boolean literal.
    Boolean(bool),
    /// UTF-8 text.
    Text(String),
    /// The absence of a value; what a command procedure "returns".
    Nothing,
}

impl Value {
    /// Read this value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(num) => Some(*num),
            _ => None,
        }
    }

    /// Read this value as a boolean, if it is one.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Read this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Short name of this value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Text(_) => "text",
            Value::Nothing => "nothing",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(num) => write!(f, "{}", num),
            Value::Boolean(flag) => write!(f, "{}", flag),
            Value::Text(text) => write!(f, "{}", text),
            Value::Nothing => write!(f, "nothing"),
        }
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Number(num)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Boolean(flag)
    }
}
