//! Report, issue and item model for doorstep.
//!
//! Every processor produces a [`Report`] and every engine hands one back, so
//! this crate fixes the shapes they share:
//!
//! - [`Issue`]: one finding at a [`Level`], located at an [`Item`]
//! - [`Report`]: issues grouped by severity, supplementary provenance and
//!   data properties, mergeable with [`Report::update`] and
//!   [`combine_reports`]
//! - [`CompiledReport`]: the stable JSON form consumed by printers and
//!   remote clients, and read back with [`Report::parse`]
//!
//! # Example
//!
//! ```
//! use doorstep_report::{combine_reports, IssueOptions, Level, Preset, Report};
//!
//! let mut a = Report::new(Preset::Tabular, "lintol/a:1", "A");
//! a.add_issue(Level::Error, "bad-cell", "Bad cell", IssueOptions::new()).unwrap();
//! let mut b = Report::new(Preset::Tabular, "lintol/b:1", "B");
//! b.add_issue(Level::Warning, "odd-row", "Odd row", IssueOptions::new()).unwrap();
//!
//! let combined = combine_reports([&a, &b], None).unwrap();
//! assert_eq!(combined.compile(None, None).error_count, 2);
//! ```

mod collection;
mod compiled;
mod error;
mod issue;
mod item;
mod level;
mod report;

pub use collection::ReportCollection;
pub use compiled::{CompiledReport, CompiledTable, UNKNOWN_FILENAME};
pub use error::{ReportError, Result};
pub use issue::Issue;
pub use item::{Entity, Item, LocatedItem, TabularItemType};
pub use level::{IntoLevel, Level};
pub use report::{
    IssueMap, IssueOptions, Preset, Report, ReportContext, ReportProperties, Supplementary,
    combine_reports,
};
