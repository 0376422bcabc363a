use std::fmt;

use super::value::Object;

/// Error value seen by scripts.
///
/// Thrown values that are not already errors get wrapped in one; runtime
/// faults become an error named after the fault. Selectors: `name`,
/// `message`, `cause`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub name: String,
    pub message: String,
    pub cause: Option<Object>,
}

impl ErrorObject {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Object) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn select(&self, key: &str) -> Object {
        match key {
            "name" => Object::string(self.name.as_str()),
            "message" => Object::string(self.message.as_str()),
            "cause" => self.cause.clone().unwrap_or_default(),
            _ => Object::Nil,
        }
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}
