//! The mergeable findings of one or more processor runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ReportError, Result};
use crate::issue::Issue;
use crate::item::Item;
use crate::level::{IntoLevel, Level};

/// Data-domain shape of a report; fixes how items are located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Tabular,
    Geojson,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Tabular => f.write_str("tabular"),
            Preset::Geojson => f.write_str("geojson"),
        }
    }
}

impl FromStr for Preset {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tabular" => Ok(Preset::Tabular),
            "geojson" => Ok(Preset::Geojson),
            other => Err(ReportError::UnknownPreset(other.to_string())),
        }
    }
}

/// Provenance record for supplementary data a processor consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplementary {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: Value,
    pub name: String,
}

/// Context the report was produced in; only `format` affects compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportContext {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub package: Option<Value>,
}

/// Descriptive properties of the data a report covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProperties {
    #[serde(rename = "row-count")]
    pub row_count: Option<u64>,
    pub time: f64,
    pub encoding: Option<String>,
    pub headers: Option<Vec<String>>,
}

impl Default for ReportProperties {
    fn default() -> Self {
        Self {
            row_count: None,
            time: 0.0,
            encoding: Some("utf-8".to_string()),
            headers: None,
        }
    }
}

/// Issues grouped by severity, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueMap {
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
    informations: Vec<Issue>,
}

impl IssueMap {
    pub fn get(&self, level: Level) -> &[Issue] {
        match level {
            Level::Error => &self.errors,
            Level::Warning => &self.warnings,
            Level::Info => &self.informations,
        }
    }

    fn get_mut(&mut self, level: Level) -> &mut Vec<Issue> {
        match level {
            Level::Error => &mut self.errors,
            Level::Warning => &mut self.warnings,
            Level::Info => &mut self.informations,
        }
    }

    pub(crate) fn push(&mut self, issue: Issue) {
        self.get_mut(issue.level()).push(issue);
    }

    /// Total issues across every severity.
    pub fn len(&self) -> usize {
        self.errors.len() + self.warnings.len() + self.informations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All issues, most severe first.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .chain(self.informations.iter())
    }
}

/// Optional parts of a new issue.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    pub item: Option<Item>,
    pub error_data: Option<Value>,
    pub context: Option<Vec<Item>>,
    pub at_top: bool,
}

impl IssueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_error_data(mut self, data: Value) -> Self {
        self.error_data = Some(data);
        self
    }

    pub fn with_context(mut self, context: Vec<Item>) -> Self {
        self.context = Some(context);
        self
    }

    /// Prepend instead of append.
    pub fn at_top(mut self) -> Self {
        self.at_top = true;
        self
    }
}

/// Findings of one processor run, or of several merged together.
///
/// Issues only grow: they are added with [`Report::add_issue`] and merged
/// with [`Report::update`]. The preset is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub(crate) processor: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) preset: Preset,
    pub(crate) filename: Option<String>,
    pub(crate) context: Option<ReportContext>,
    pub(crate) issues: IssueMap,
    pub(crate) supplementary: Vec<Supplementary>,
    pub(crate) properties: ReportProperties,
}

impl Report {
    /// Create an empty report for a processor.
    pub fn new(
        preset: Preset,
        processor: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            processor: Some(processor.into()),
            description: Some(description.into()),
            ..Self::empty(preset)
        }
    }

    /// Create an anonymous report, used as a merge base.
    pub fn empty(preset: Preset) -> Self {
        Self {
            processor: None,
            description: None,
            preset,
            filename: None,
            context: None,
            issues: IssueMap::default(),
            supplementary: Vec::new(),
            properties: ReportProperties::default(),
        }
    }

    /// Set the filename the report describes.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the context used when compiling.
    pub fn with_context(mut self, context: ReportContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn processor(&self) -> Option<&str> {
        self.processor.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn context(&self) -> Option<&ReportContext> {
        self.context.as_ref()
    }

    pub fn issues(&self) -> &IssueMap {
        &self.issues
    }

    /// Issues at one severity.
    pub fn issues_at(&self, level: Level) -> &[Issue] {
        self.issues.get(level)
    }

    pub fn supplementary(&self) -> &[Supplementary] {
        &self.supplementary
    }

    pub fn properties(&self) -> &ReportProperties {
        &self.properties
    }

    /// Add an issue at `level`, attributed to this report's processor.
    ///
    /// `level` may be a [`Level`], a severity name or a numeric log level;
    /// anything else fails with [`ReportError::InvalidSeverity`].
    pub fn add_issue(
        &mut self,
        level: impl IntoLevel,
        code: impl Into<String>,
        message: impl Into<String>,
        options: IssueOptions,
    ) -> Result<()> {
        let level = level.into_level()?;
        let issue = Issue::new(
            level,
            self.processor.clone(),
            code,
            message,
            options.item.unwrap_or_default(),
            options.context,
            options.error_data,
        );
        self.append_issue(issue, options.at_top);
        Ok(())
    }

    /// Tabular shorthand: the item type follows from the coordinates.
    pub fn add_tabular_issue(
        &mut self,
        level: impl IntoLevel,
        code: impl Into<String>,
        message: impl Into<String>,
        row: Option<u64>,
        column: Option<u64>,
        row_values: Option<serde_json::Map<String, Value>>,
    ) -> Result<()> {
        let item = Item::tabular(row, column, row_values);
        self.add_issue(level, code, message, IssueOptions::new().with_item(item))
    }

    fn append_issue(&mut self, issue: Issue, at_top: bool) {
        if at_top {
            self.issues.get_mut(issue.level()).insert(0, issue);
        } else {
            self.issues.push(issue);
        }
    }

    /// Record supplementary provenance. Records are never deduplicated.
    pub fn add_supplementary(
        &mut self,
        kind: impl Into<String>,
        source: impl Into<Value>,
        name: impl Into<String>,
    ) {
        let record = Supplementary {
            kind: kind.into(),
            source: source.into(),
            name: name.into(),
        };
        debug!(kind = %record.kind, name = %record.name, "Adding supplementary");
        self.supplementary.push(record);
    }

    /// Update a single property by its report key.
    ///
    /// Returns whether the key was recognised and applied. Unknown keys, the
    /// immutable `preset` and values of the wrong shape are ignored.
    pub fn set_property(&mut self, key: &str, value: Value) -> bool {
        let applied = match key {
            "row-count" => match value {
                Value::Null => {
                    self.properties.row_count = None;
                    true
                }
                v => v
                    .as_u64()
                    .map(|n| self.properties.row_count = Some(n))
                    .is_some(),
            },
            "time" => value.as_f64().map(|t| self.properties.time = t).is_some(),
            "encoding" => match value {
                Value::Null => {
                    self.properties.encoding = None;
                    true
                }
                Value::String(s) => {
                    self.properties.encoding = Some(s);
                    true
                }
                _ => false,
            },
            "headers" => match value {
                Value::Null => {
                    self.properties.headers = None;
                    true
                }
                v => serde_json::from_value::<Vec<String>>(v)
                    .map(|h| self.properties.headers = Some(h))
                    .is_ok(),
            },
            _ => false,
        };

        if !applied {
            debug!(key, "Ignoring unrecognised report property");
        }
        applied
    }

    /// Update several properties; unrecognised keys are ignored.
    pub fn set_properties<K, I>(&mut self, properties: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in properties {
            self.set_property(key.as_ref(), value);
        }
    }

    /// Merge `other` into this report in place.
    ///
    /// Issues of `other` follow this report's own at every severity;
    /// supplementary records are concatenated; row count, encoding and
    /// headers are adopted from `other` only where unset here.
    pub fn update(&mut self, other: &Report) {
        for level in Level::ALL {
            self.issues
                .get_mut(level)
                .extend(other.issues.get(level).iter().cloned());
        }

        self.supplementary.extend(other.supplementary.iter().cloned());

        if self.properties.row_count.is_none() {
            self.properties.row_count = other.properties.row_count;
        }
        if self.properties.encoding.is_none() {
            self.properties.encoding = other.properties.encoding.clone();
        }
        if self.properties.headers.is_none() {
            self.properties.headers = other.properties.headers.clone();
        }
        if self.filename.is_none() {
            self.filename = other.filename.clone();
        }
    }

    /// Whether this report, or any issue in it, belongs to `processor`.
    pub fn has_processor(&self, processor: &str, include_subprocessors: bool) -> bool {
        if self.processor.as_deref() == Some(processor) {
            return true;
        }
        include_subprocessors
            && self
                .issues
                .iter()
                .any(|issue| issue.processor() == Some(processor))
    }
}

/// Merge several reports into `base`, or into a fresh report of their
/// shared preset.
///
/// Fails with [`ReportError::IncompatiblePresets`] if the reports (and base)
/// do not all share one preset, or if there is nothing to take a preset from.
pub fn combine_reports<'a, I>(reports: I, base: Option<Report>) -> Result<Report>
where
    I: IntoIterator<Item = &'a Report>,
{
    let reports: Vec<&Report> = reports.into_iter().collect();

    let presets: BTreeSet<Preset> = reports
        .iter()
        .map(|r| r.preset)
        .chain(base.as_ref().map(|b| b.preset))
        .collect();

    if presets.len() != 1 {
        let names = presets.iter().map(Preset::to_string).collect::<Vec<_>>();
        warn!(presets = ?names, "Refusing to combine reports");
        return Err(ReportError::IncompatiblePresets(names));
    }

    let mut base = match base {
        Some(base) => base,
        None => Report::empty(*presets.iter().next().unwrap_or(&Preset::Tabular)),
    };

    for report in reports {
        base.update(report);
    }

    Ok(base)
}
