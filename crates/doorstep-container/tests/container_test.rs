//! End-to-end runs of the container engine against a scripted runtime.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use doorstep_container::{
    CONTAINER_ROOT, ContainerEngine, ContainerEngineConfig, ContainerOutput, ContainerRuntime,
    ContainerSpec,
};
use doorstep_engine::{
    Engine, EngineError, ProcessorIni, ProcessorMetadata, Result, with_session,
};
use doorstep_report::{IssueOptions, Level, Preset, Report};
use parking_lot::Mutex;

/// Plays the part of a processor image.
///
/// Reads the data file name from the container environment and writes a
/// report with one ERROR carrying that name uppercased.
#[derive(Default)]
struct ShoutingRuntime {
    malformed: bool,
    seen: Mutex<Vec<ContainerSpec>>,
}

impl ShoutingRuntime {
    fn host_path(spec: &ContainerSpec, container_path: &str) -> PathBuf {
        let relative = container_path
            .strip_prefix(CONTAINER_ROOT)
            .unwrap_or(container_path)
            .trim_start_matches('/');
        spec.mounts[0].source.join(relative)
    }
}

#[async_trait]
impl ContainerRuntime for ShoutingRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput> {
        self.seen.lock().push(spec.clone());

        let data_file = spec.env("LINTOL_DATA_FILE").unwrap_or_default().to_string();
        let metadata = Self::host_path(spec, spec.env("LINTOL_METADATA").unwrap_or_default());
        assert!(metadata.exists(), "metadata.json not staged");
        let output = Self::host_path(spec, spec.env("LINTOL_OUTPUT_FILE").unwrap_or_default());

        let body = if self.malformed {
            "{not json".to_string()
        } else {
            let mut report = Report::new(Preset::Tabular, "lintol/shouter:1", "Shouts");
            report
                .add_issue(
                    Level::Error,
                    "foo-bar",
                    data_file.to_uppercase(),
                    IssueOptions::new(),
                )
                .unwrap();
            report.compile(Some(data_file.as_str()), None).to_json().unwrap()
        };
        std::fs::write(output, body).unwrap();
        Ok(ContainerOutput::new(String::new(), String::new(), 0))
    }
}

fn modules() -> HashMap<String, Vec<u8>> {
    HashMap::from([("shouter.py".to_string(), b"print()".to_vec())])
}

fn ini() -> ProcessorIni {
    ProcessorIni::single("shout", ProcessorMetadata::for_module("shouter.py"))
}

/// A processor asking for one supplementary file.
fn ini_with_supplementary(reference: &str) -> ProcessorIni {
    let mut metadata = ProcessorMetadata::for_module("shouter.py");
    metadata.supplementary = Some(BTreeMap::from([(
        "register".to_string(),
        reference.to_string(),
    )]));
    ProcessorIni::single("shout", metadata)
}

async fn run(engine: &ContainerEngine, filename: &str) -> Result<Report> {
    run_with(engine, filename, ini()).await
}

async fn run_with(engine: &ContainerEngine, filename: &str, ini: ProcessorIni) -> Result<Report> {
    let modules = modules();
    with_session(engine, |session| async move {
        engine
            .add_data(&session, filename, b"a,b\n1,2\n".to_vec(), false)
            .await?;
        engine.add_processor(&session, &modules, &ini).await?;
        engine.monitor_pipeline(&session).await?;
        engine.get_output(&session).await
    })
    .await
}

#[tokio::test]
async fn test_processor_report_is_returned() {
    let runtime = Arc::new(ShoutingRuntime::default());
    let engine = ContainerEngine::new(runtime.clone(), ContainerEngineConfig::default());

    let report = run(&engine, "people.csv").await.unwrap();
    let compiled = report.compile(None, None);
    let table = compiled.table().cloned().unwrap_or_else(|| panic!("no table"));
    assert_eq!(table.errors.len(), 1);
    assert_eq!(table.errors[0].code(), "foo-bar");
    assert_eq!(table.errors[0].message(), "PEOPLE.CSV");
    assert_eq!(table.errors[0].processor(), Some("lintol/shouter:1"));

    let seen = runtime.seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].name.ends_with("-shout"));
    assert_eq!(seen[0].network, "none");
    assert!(!seen[0].mounts[0].source.exists(), "staging root left behind");
}

#[tokio::test]
async fn test_malformed_report_is_fatal() {
    let runtime = Arc::new(ShoutingRuntime {
        malformed: true,
        ..Default::default()
    });
    let engine = ContainerEngine::new(runtime, ContainerEngineConfig::default());

    let err = run(&engine, "people.csv").await.unwrap_err();
    assert!(matches!(err, EngineError::MalformedOutput { ref processor, .. } if processor == "shout"));
}

#[tokio::test]
async fn test_no_processors_is_configuration_error() {
    let engine = ContainerEngine::new(
        Arc::new(ShoutingRuntime::default()),
        ContainerEngineConfig::default(),
    );
    let engine = &engine;
    let err = with_session(engine, |session| async move {
        engine
            .add_data(&session, "x.csv", b"a".to_vec(), false)
            .await?;
        engine.monitor_pipeline(&session).await?;
        engine.get_output(&session).await
    })
    .await
    .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unresolved_supplementary_fails_before_any_container_runs() {
    let runtime = Arc::new(ShoutingRuntime::default());
    let engine = ContainerEngine::new(runtime.clone(), ContainerEngineConfig::default());

    let err = run_with(
        &engine,
        "people.csv",
        ini_with_supplementary("error://register not found"),
    )
    .await
    .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(
        err,
        EngineError::Supplementary {
            processor: "shout".into(),
            name: "register".into(),
            message: "register not found".into(),
        }
    );
    assert!(runtime.seen.lock().is_empty());
}

#[tokio::test]
async fn test_local_supplementary_refused_by_default() {
    let source_dir = tempfile::TempDir::new().unwrap();
    let source = source_dir.path().join("register.csv");
    std::fs::write(&source, "id\n1\n").unwrap();
    let runtime = Arc::new(ShoutingRuntime::default());
    let engine = ContainerEngine::new(runtime.clone(), ContainerEngineConfig::default());

    let err = run_with(
        &engine,
        "people.csv",
        ini_with_supplementary(&format!("file://{}", source.display())),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Supplementary { ref message, .. }
            if message == "local supplementary files are disabled"
    ));
    assert!(runtime.seen.lock().is_empty());
}

#[tokio::test]
async fn test_local_supplementary_under_configured_dir_is_staged() {
    let source_dir = tempfile::TempDir::new().unwrap();
    let source = source_dir.path().join("register.csv");
    std::fs::write(&source, "id\n1\n").unwrap();
    let runtime = Arc::new(ShoutingRuntime::default());
    let config = ContainerEngineConfig::default().with_supplementary_dir(source_dir.path());
    let engine = ContainerEngine::new(runtime.clone(), config);

    run_with(
        &engine,
        "people.csv",
        ini_with_supplementary(&format!("file://{}", source.display())),
    )
    .await
    .unwrap();
    assert_eq!(runtime.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_path_like_processor_id_is_rejected() {
    let engine = ContainerEngine::new(
        Arc::new(ShoutingRuntime::default()),
        ContainerEngineConfig::default(),
    );
    let session = engine.make_session().await.unwrap();
    let ini = ProcessorIni::single("../x", ProcessorMetadata::for_module("shouter.py"));

    let err = engine
        .add_processor(&session, &modules(), &ini)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Configuration("invalid processor id '../x'".into())
    );
    assert!(session.processors().is_empty());
    session.close().await.unwrap();
}
