//! Processors compiled into the binary, for the local engine.

use std::path::Path;

use doorstep_engine::{
    Processor, ProcessorMetadata, ProcessorRegistry, Result, Step, StepContext, StepError,
    Workflow,
};
use doorstep_report::{Level, Preset};
use serde_json::{Map, Value, json};

/// Registry of every built-in processor.
pub fn registry() -> ProcessorRegistry {
    ProcessorRegistry::new().with("columns", || Box::new(ColumnCount))
}

/// Flags rows whose width differs from the header row.
///
/// Fields are split on the `delimiter` setting (default `,`); quoting is
/// not interpreted.
pub struct ColumnCount;

impl Processor for ColumnCount {
    fn code(&self) -> &str {
        "lintol/doorstep-columns:1"
    }

    fn description(&self) -> &str {
        "Checks every row has as many columns as the header"
    }

    fn preset(&self) -> Preset {
        Preset::Tabular
    }

    fn build_workflow(&self, _file: &Path, metadata: &ProcessorMetadata) -> Result<Workflow> {
        let delimiter = metadata
            .get_setting("delimiter", json!(","))
            .as_str()
            .unwrap_or(",")
            .to_string();

        Ok(Workflow::new()
            .step(Step::new("load", move |ctx: &mut StepContext<'_>| {
                let text = std::fs::read_to_string(ctx.file)?;
                let rows: Vec<Vec<&str>> = text
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(|line| line.split(delimiter.as_str()).map(str::trim).collect())
                    .collect();
                Ok(json!(rows))
            }))
            .step(
                Step::new("output", |ctx: &mut StepContext<'_>| {
                    let rows: Vec<Vec<String>> = match ctx.output("load") {
                        Some(value) => serde_json::from_value(value.clone())?,
                        None => return Err(StepError::new("workflow", "load step produced nothing")),
                    };
                    let Some((headers, body)) = rows.split_first() else {
                        ctx.report.set_property("row-count", json!(0));
                        return Ok(Value::Null);
                    };

                    ctx.report
                        .set_properties([("row-count", json!(body.len())), ("headers", json!(headers))]);

                    let mut ragged = 0;
                    for (i, row) in body.iter().enumerate() {
                        if row.len() == headers.len() {
                            continue;
                        }
                        ragged += 1;
                        let values: Map<String, Value> = headers
                            .iter()
                            .zip(row)
                            .map(|(h, v)| (h.clone(), json!(v)))
                            .collect();
                        ctx.report.add_tabular_issue(
                            Level::Error,
                            "wrong-column-count",
                            format!(
                                "Row {} has {} columns, expected {}",
                                i + 1,
                                row.len(),
                                headers.len()
                            ),
                            Some(i as u64 + 1),
                            None,
                            Some(values),
                        )?;
                    }
                    Ok(json!(ragged))
                })
                .after("load"),
            ))
    }
}
