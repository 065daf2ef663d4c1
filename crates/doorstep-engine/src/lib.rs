//! Engine contract, sessions and the in-process engine.
//!
//! An [`Engine`] runs processors over one data file inside a [`Session`]:
//!
//! 1. `make_session` acquires backend resources ([`with_session`] scopes
//!    them so they are always released)
//! 2. `add_data` and `add_processor` attach the input and the
//!    [`ProcessorIni`] definitions
//! 3. `monitor_pipeline` starts the run and returns a [`CancelHandle`] and
//!    a [`Completion`]
//! 4. `get_output` returns the merged [`Report`](doorstep_report::Report)
//!    or the run's single [`EngineError`]
//!
//! [`LocalEngine`] runs processors from a [`ProcessorRegistry`] in this
//! process. Container and pipeline-cluster engines live in their own
//! crates and implement the same trait.

pub mod data;
pub mod definition;
pub mod engine;
pub mod error;
pub mod file;
pub mod local;
pub mod processor;
pub mod retry;
pub mod session;
pub mod workflow;

pub use data::{DataFile, DataSource, fetch_url};
pub use definition::{
    DefinitionBlock, DockerImage, MetadataContext, ProcessorDefinition, ProcessorIni,
    ProcessorMetadata, check_name,
};
pub use engine::{Engine, with_session};
pub use error::{EngineError, Result};
pub use file::{
    BucketFileManager, ContentFileManager, FileManager, LocalFileManager, base_name,
    make_file_manager,
};
pub use local::LocalEngine;
pub use processor::{Processor, ProcessorFactory, ProcessorRegistry};
pub use retry::{RetryPolicy, with_retry};
pub use session::{CancelHandle, Completion, Outcome, ResultSlot, Session, SessionResources};
pub use workflow::{Step, StepContext, StepError, StepFn, Workflow};
