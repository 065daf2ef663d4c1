//! Processor definition documents.
//!
//! A client describes what to run with a [`ProcessorIni`]: a language, an
//! optional package context, and one [`ProcessorMetadata`] per processor
//! keyed by a unique id.
//!
//! ```json
//! {
//!   "lang": "en_GB.UTF-8",
//!   "context": {"package": null},
//!   "definitions": {
//!     "pii-1": {
//!       "module": "pii.py",
//!       "definition": {"docker": {"image": "lintol/doorstep", "revision": "latest"}},
//!       "context": {"package": null, "format": "csv"},
//!       "settings": {"threshold": 3},
//!       "configuration": {},
//!       "supplementary": {"register": "https://example.org/register.csv"}
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use doorstep_report::ReportContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::file::base_name;

/// Container image requested by a processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerImage {
    pub image: Option<String>,
    pub revision: Option<String>,
}

/// Backend-specific definition block of a processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionBlock {
    #[serde(default)]
    pub docker: Option<DockerImage>,
}

/// Package and format context of a processor run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataContext {
    /// Package description. Clients sometimes send it JSON-encoded as a
    /// string; see [`MetadataContext::package`].
    #[serde(default)]
    pub package: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
}

impl MetadataContext {
    /// The package, decoding it if it arrived as a JSON string.
    pub fn package(&self) -> Option<Value> {
        match &self.package {
            Some(Value::String(s)) => serde_json::from_str(s).ok().or(Some(Value::String(s.clone()))),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.clone()),
        }
    }
}

/// Configuration of one processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMetadata {
    #[serde(default)]
    pub lang: Option<String>,
    /// Name of the module (within the posted modules) implementing it.
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub definition: DefinitionBlock,
    #[serde(default)]
    pub context: MetadataContext,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    /// Supplementary data: name to URL.
    #[serde(default)]
    pub supplementary: Option<BTreeMap<String, String>>,
}

impl ProcessorMetadata {
    /// Metadata naming only a module.
    pub fn for_module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            ..Default::default()
        }
    }

    /// Look up a setting, falling back to `default`.
    pub fn get_setting(&self, setting: &str, default: Value) -> Value {
        self.settings.get(setting).cloned().unwrap_or(default)
    }

    /// `image:revision` to run, with defaults for whatever is missing.
    pub fn docker_image(&self, default_image: &str, default_revision: &str) -> String {
        let docker = self.definition.docker.as_ref();
        let image = docker
            .and_then(|d| d.image.as_deref())
            .unwrap_or(default_image);
        let revision = docker
            .and_then(|d| d.revision.as_deref())
            .unwrap_or(default_revision);
        format!("{image}:{revision}")
    }

    /// Context handed to the report compiler.
    pub fn report_context(&self) -> ReportContext {
        ReportContext {
            format: self.context.format.clone(),
            package: self.context.package(),
        }
    }
}

/// The document a client posts to describe a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorIni {
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub context: MetadataContext,
    #[serde(default)]
    pub definitions: BTreeMap<String, ProcessorMetadata>,
}

impl ProcessorIni {
    /// A document with a single processor.
    pub fn single(name: impl Into<String>, metadata: ProcessorMetadata) -> Self {
        let mut definitions = BTreeMap::new();
        definitions.insert(name.into(), metadata);
        Self {
            definitions,
            ..Default::default()
        }
    }

    /// Parse from JSON.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| EngineError::Configuration(format!("invalid processor definitions: {e}")))
    }
}

/// One processor attached to a session, with its module source resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorDefinition {
    /// Unique id of the processor within the run.
    pub name: String,
    /// Module filename, if the processor has one.
    pub module: Option<String>,
    pub content: Option<Vec<u8>>,
    pub metadata: ProcessorMetadata,
}

impl ProcessorDefinition {
    /// Resolve every definition in `ini` against the posted `modules`.
    ///
    /// Fails with [`EngineError::MissingModuleContent`] if a definition names
    /// a module that was not posted. Processor ids and module file names
    /// become path components wherever a run is staged, so both must pass
    /// [`check_name`]. The document's `lang` and package context fill in for
    /// processors that do not set their own.
    pub fn collect(
        modules: &HashMap<String, Vec<u8>>,
        ini: &ProcessorIni,
    ) -> Result<Vec<ProcessorDefinition>> {
        ini.definitions
            .iter()
            .map(|(name, metadata)| {
                check_name("processor id", name)?;
                if let Some(module) = &metadata.module {
                    check_name("module name", base_name(module))?;
                }

                let mut metadata = metadata.clone();
                if metadata.lang.is_none() {
                    metadata.lang = ini.lang.clone();
                }
                if metadata.context.package.is_none() {
                    metadata.context.package = ini.context.package.clone();
                }

                let content = match &metadata.module {
                    Some(module) => Some(modules.get(module).cloned().ok_or_else(|| {
                        EngineError::MissingModuleContent {
                            processor: name.clone(),
                            module: module.clone(),
                        }
                    })?),
                    None => None,
                };

                Ok(ProcessorDefinition {
                    name: name.clone(),
                    module: metadata.module.clone(),
                    content,
                    metadata,
                })
            })
            .collect()
    }
}

/// Reject names that are not a single plain path component: empty, `.`,
/// `..`, or containing anything outside `[A-Za-z0-9_.-]`.
pub fn check_name(what: &str, name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if plain {
        Ok(())
    } else {
        Err(EngineError::Configuration(format!("invalid {what} '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ini() -> ProcessorIni {
        ProcessorIni::from_value(json!({
            "lang": "en_GB.UTF-8",
            "context": {"package": "{\"name\": \"pkg\"}"},
            "definitions": {
                "pii-1": {
                    "module": "pii.py",
                    "definition": {"docker": {"image": "lintol/ds-pii", "revision": "v2"}},
                    "context": {"format": "csv"},
                    "settings": {"threshold": 3},
                    "supplementary": {"register": "https://example.org/r.csv"}
                },
                "bare": {}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_ini() {
        let ini = ini();
        assert_eq!(ini.definitions.len(), 2);
        let pii = &ini.definitions["pii-1"];
        assert_eq!(pii.get_setting("threshold", json!(0)), json!(3));
        assert_eq!(pii.get_setting("missing", json!("x")), json!("x"));
        assert_eq!(pii.docker_image("lintol/doorstep", "latest"), "lintol/ds-pii:v2");
        assert_eq!(
            ini.definitions["bare"].docker_image("lintol/doorstep", "latest"),
            "lintol/doorstep:latest"
        );
    }

    #[test]
    fn test_package_decoded_from_string() {
        let ini = ini();
        assert_eq!(ini.context.package(), Some(json!({"name": "pkg"})));
    }

    #[test]
    fn test_collect_resolves_modules() {
        let mut modules = HashMap::new();
        modules.insert("pii.py".to_string(), b"source".to_vec());

        let defs = ProcessorDefinition::collect(&modules, &ini()).unwrap();
        assert_eq!(defs.len(), 2);
        let bare = defs.iter().find(|d| d.name == "bare").unwrap();
        assert!(bare.content.is_none());
        assert_eq!(bare.metadata.lang.as_deref(), Some("en_GB.UTF-8"));
        let pii = defs.iter().find(|d| d.name == "pii-1").unwrap();
        assert_eq!(pii.content.as_deref(), Some(&b"source"[..]));
        assert_eq!(pii.metadata.report_context().format.as_deref(), Some("csv"));
        assert_eq!(
            pii.metadata.report_context().package,
            Some(json!({"name": "pkg"}))
        );
    }

    #[test]
    fn test_collect_missing_module() {
        let err = ProcessorDefinition::collect(&HashMap::new(), &ini()).unwrap_err();
        match err {
            EngineError::MissingModuleContent { processor, module } => {
                assert_eq!(processor, "pii-1");
                assert_eq!(module, "pii.py");
            }
            other => panic!("Expected MissingModuleContent, got: {other:?}"),
        }
    }

    #[test]
    fn test_collect_rejects_path_like_ids() {
        let modules = HashMap::from([("p.py".to_string(), Vec::new())]);
        for name in ["../x", "..", ".", "", "a/b", "a\\b", "name with space"] {
            let ini = ProcessorIni::single(name, ProcessorMetadata::for_module("p.py"));
            let err = ProcessorDefinition::collect(&modules, &ini).unwrap_err();
            assert!(err.is_configuration(), "{name:?} accepted");
        }

        let ini = ProcessorIni::single("pii_2.v1-x", ProcessorMetadata::for_module("p.py"));
        assert!(ProcessorDefinition::collect(&modules, &ini).is_ok());
    }

    #[test]
    fn test_collect_rejects_dot_dot_module() {
        let modules = HashMap::from([("..".to_string(), Vec::new())]);
        let ini = ProcessorIni::single("p", ProcessorMetadata::for_module(".."));
        let err = ProcessorDefinition::collect(&modules, &ini).unwrap_err();
        assert_eq!(err, EngineError::Configuration("invalid module name '..'".into()));
    }

    #[test]
    fn test_invalid_ini() {
        let err = ProcessorIni::from_value(json!({"definitions": []})).unwrap_err();
        assert!(err.is_configuration());
    }
}
