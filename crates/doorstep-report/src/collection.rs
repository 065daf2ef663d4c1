//! Lookup over a set of reports.

use serde_json::Value;

use crate::error::Result;
use crate::report::Report;

/// A set of reports, typically one per processor of a run.
#[derive(Debug, Clone, Default)]
pub struct ReportCollection {
    reports: Vec<Report>,
}

impl ReportCollection {
    pub fn new(reports: Vec<Report>) -> Self {
        Self { reports }
    }

    /// Parse each compiled report in `values`.
    pub fn parse(values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let reports = values
            .into_iter()
            .map(Report::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { reports })
    }

    /// Reports that belong to `processor`, directly or through their issues.
    pub fn find_by_processor(&self, processor: &str, include_subprocessors: bool) -> Vec<&Report> {
        self.reports
            .iter()
            .filter(|r| r.has_processor(processor, include_subprocessors))
            .collect()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IssueOptions, Level, Preset};

    #[test]
    fn test_find_by_processor() {
        let mut a = Report::new(Preset::Tabular, "a", "A");
        a.add_issue(Level::Error, "x", "m", IssueOptions::new()).unwrap();
        let b = Report::new(Preset::Tabular, "b", "B");

        let parsed = Report::parse(a.compile(None, None).to_value().unwrap()).unwrap();
        let collection = ReportCollection::new(vec![parsed, b]);

        assert_eq!(collection.find_by_processor("a", true).len(), 1);
        assert!(collection.find_by_processor("a", false).is_empty());
        assert_eq!(collection.find_by_processor("b", false).len(), 1);
    }
}
