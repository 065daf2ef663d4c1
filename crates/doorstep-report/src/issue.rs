//! A single finding within a report.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::item::Item;
use crate::level::Level;

fn unset_level() -> Level {
    Level::Info
}

fn empty_error_data() -> Value {
    Value::Object(Map::new())
}

/// One finding at a severity, located at an [`Item`].
///
/// Issues are immutable once created. The severity is not part of the issue
/// JSON: it is implied by which list of the compiled table holds the issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(skip, default = "unset_level")]
    level: Level,
    processor: Option<String>,
    code: String,
    message: String,
    #[serde(default)]
    item: Item,
    #[serde(default)]
    context: Option<Vec<Item>>,
    #[serde(rename = "error-data", default = "empty_error_data")]
    error_data: Value,
}

impl Issue {
    /// Create an issue.
    pub fn new(
        level: Level,
        processor: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        item: Item,
        context: Option<Vec<Item>>,
        error_data: Option<Value>,
    ) -> Self {
        Self {
            level,
            processor,
            code: code.into(),
            message: message.into(),
            item,
            context,
            error_data: error_data.unwrap_or_else(empty_error_data),
        }
    }

    /// Read an issue from its JSON form, attaching the severity of the list
    /// it was found in.
    pub fn parse(level: Level, value: Value) -> crate::Result<Self> {
        let mut issue: Issue = serde_json::from_value(value)?;
        issue.level = level;
        Ok(issue)
    }

    pub(crate) fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn processor(&self) -> Option<&str> {
        self.processor.as_deref()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn context(&self) -> Option<&[Item]> {
        self.context.as_deref()
    }

    pub fn error_data(&self) -> &Value {
        &self.error_data
    }

    /// Identity used when comparing issue sets across merges.
    pub fn key(&self) -> (Level, &str, &str, &Item) {
        (self.level, &self.code, &self.message, &self.item)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.code, self.message)
    }
}
