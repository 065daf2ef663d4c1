//! The external JSON form of a report, and reading it back.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::issue::Issue;
use crate::level::Level;
use crate::report::{IssueMap, Preset, Report, ReportContext, ReportProperties, Supplementary};

/// Filename used when a report does not know which file it describes.
pub const UNKNOWN_FILENAME: &str = "unknown.csv";

/// One table of a compiled report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTable {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
    #[serde(default)]
    pub informations: Vec<Issue>,
    #[serde(rename = "row-count", default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub headers: Option<Vec<String>>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub valid: bool,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub schema: Value,
    #[serde(rename = "error-count", default)]
    pub error_count: usize,
}

fn default_scheme() -> String {
    "file".to_string()
}

/// A compiled report, as consumed by printers and remote clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledReport {
    pub valid: bool,
    #[serde(rename = "error-count")]
    pub error_count: usize,
    #[serde(default)]
    pub supplementary: Vec<Supplementary>,
    #[serde(default)]
    pub filename: String,
    pub preset: Preset,
    #[serde(rename = "table-count", default)]
    pub table_count: usize,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<Value>,
    pub tables: Vec<CompiledTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReportContext>,
}

impl CompiledReport {
    /// The first (and, today, only) table.
    pub fn table(&self) -> Option<&CompiledTable> {
        self.tables.first()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Format of a report: the context's declared format, else the filename
/// extension without its dot.
fn report_format(filename: &str, context: Option<&ReportContext>) -> String {
    if let Some(format) = context.and_then(|c| c.format.as_deref()) {
        return format.to_string();
    }
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Report {
    /// Render the report in its external form.
    ///
    /// Pure: compiling twice without changing the report yields equal output.
    /// `filename` and `context` override the report's own when given.
    pub fn compile(
        &self,
        filename: Option<&str>,
        context: Option<&ReportContext>,
    ) -> CompiledReport {
        let filename = filename
            .or(self.filename.as_deref())
            .filter(|f| !f.is_empty())
            .unwrap_or(UNKNOWN_FILENAME)
            .to_string();
        let context = context.or(self.context.as_ref());
        let format = report_format(&filename, context);

        let error_count = self.issues.len();
        let valid = self.issues.get(Level::Error).is_empty();
        let time = Some(self.properties.time);

        let table = CompiledTable {
            format,
            errors: self.issues.get(Level::Error).to_vec(),
            warnings: self.issues.get(Level::Warning).to_vec(),
            informations: self.issues.get(Level::Info).to_vec(),
            row_count: self.properties.row_count,
            headers: self.properties.headers.clone(),
            source: filename.clone(),
            time,
            valid,
            scheme: default_scheme(),
            encoding: self.properties.encoding.clone(),
            schema: Value::Null,
            error_count,
        };

        CompiledReport {
            valid,
            error_count,
            supplementary: self.supplementary.clone(),
            filename,
            preset: self.preset,
            table_count: 1,
            time,
            warnings: Vec::new(),
            tables: vec![table],
            metadata: None,
        }
    }

    /// Rebuild a report from its compiled form.
    ///
    /// Every issue keeps its processor, code, message, item, context and
    /// error data; severities come from the list each issue was found in.
    pub fn from_compiled(compiled: CompiledReport) -> Self {
        let mut report = Report::empty(compiled.preset);
        report.processor = Some("(unknown)".to_string());
        report.description = Some("(parsed by doorstep)".to_string());
        report.filename = Some(compiled.filename).filter(|f| !f.is_empty());
        report.supplementary = compiled.supplementary;

        let table = compiled.tables.into_iter().next();
        report.context = compiled.metadata.or_else(|| {
            table.as_ref().map(|t| ReportContext {
                format: Some(t.format.clone()).filter(|f| !f.is_empty()),
                package: None,
            })
        });

        if let Some(table) = table {
            report.properties = ReportProperties {
                row_count: table.row_count,
                time: table.time.or(compiled.time).unwrap_or(0.0),
                encoding: table.encoding,
                headers: table.headers,
            };
            report.issues = IssueMap::from_lists(table.errors, table.warnings, table.informations);
        }

        report
    }

    /// Parse a compiled report from a JSON value.
    pub fn parse(value: Value) -> Result<Self> {
        let compiled: CompiledReport = serde_json::from_value(value)?;
        Ok(Self::from_compiled(compiled))
    }

    /// Parse a compiled report from a JSON string.
    pub fn parse_str(json: &str) -> Result<Self> {
        let compiled: CompiledReport = serde_json::from_str(json)?;
        Ok(Self::from_compiled(compiled))
    }

    /// Load a compiled report from a reader.
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let compiled: CompiledReport = serde_json::from_reader(reader)?;
        Ok(Self::from_compiled(compiled))
    }
}

impl IssueMap {
    pub(crate) fn from_lists(
        errors: Vec<Issue>,
        warnings: Vec<Issue>,
        informations: Vec<Issue>,
    ) -> Self {
        let mut map = IssueMap::default();
        for (level, issues) in [
            (Level::Error, errors),
            (Level::Warning, warnings),
            (Level::Info, informations),
        ] {
            for issue in issues {
                map.push(issue.with_level(level));
            }
        }
        map
    }
}
