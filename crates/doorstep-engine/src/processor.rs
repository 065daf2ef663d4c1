//! The processor plugin boundary.
//!
//! Processors are registered up front in a [`ProcessorRegistry`] under the
//! module names clients refer to. Engines that run processors in-process
//! look modules up here; nothing is imported dynamically.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use doorstep_report::{Preset, Report};

use crate::definition::ProcessorMetadata;
use crate::error::Result;
use crate::workflow::Workflow;

/// A unit of analysis logic.
pub trait Processor: Send + Sync {
    /// Stable identifier recorded on every issue this processor raises.
    fn code(&self) -> &str;

    fn description(&self) -> &str;

    fn preset(&self) -> Preset;

    /// Build the task graph that checks `file`.
    fn build_workflow(&self, file: &Path, metadata: &ProcessorMetadata) -> Result<Workflow>;

    /// Fresh report owned by one run of this processor.
    fn make_report(&self) -> Report {
        Report::new(self.preset(), self.code(), self.description())
    }
}

/// Builds a processor instance.
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Factory table of processors, keyed by module name.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under a module name.
    pub fn register<F>(&mut self, module: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(module.into(), Arc::new(factory));
    }

    /// Builder form of [`ProcessorRegistry::register`].
    pub fn with<F>(mut self, module: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.register(module, factory);
        self
    }

    /// Instantiate the processor for `module`.
    ///
    /// Tries the name as given, then without its extension, so `pii.py`
    /// resolves a processor registered as `pii`.
    pub fn create(&self, module: &str) -> Option<Box<dyn Processor>> {
        self.factories
            .get(module)
            .or_else(|| {
                Path::new(module)
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| self.factories.get(stem))
            })
            .map(|factory| factory())
    }

    pub fn contains(&self, module: &str) -> bool {
        self.create(module).is_some()
    }

    /// Registered module names, sorted.
    pub fn modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("modules", &self.modules())
            .finish()
    }
}
