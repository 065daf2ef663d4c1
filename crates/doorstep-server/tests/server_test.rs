//! Client and server talking over the in-process channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use doorstep_engine::{
    EngineError, LocalEngine, Processor, ProcessorIni, ProcessorMetadata, ProcessorRegistry,
    Result as EngineResult, Step, StepContext, Workflow,
};
use doorstep_report::{IssueOptions, Level, Preset};
use doorstep_server::{
    DoorstepClient, DoorstepServer, LocalChannel, ServerConfig, ServerError, ServerEvent,
};
use serde_json::Value;

/// Raises one error carrying the uppercased file content.
struct Shouter;

impl Processor for Shouter {
    fn code(&self) -> &str {
        "lintol/shouter:1"
    }

    fn description(&self) -> &str {
        "Shouts the file back"
    }

    fn preset(&self) -> Preset {
        Preset::Tabular
    }

    fn build_workflow(&self, _file: &Path, _metadata: &ProcessorMetadata) -> EngineResult<Workflow> {
        Ok(Workflow::new().step(Step::new("output", |ctx: &mut StepContext<'_>| {
            let text = std::fs::read_to_string(ctx.file)?;
            ctx.report.add_issue(
                Level::Error,
                "foo-bar",
                text.trim().to_uppercase(),
                IssueOptions::new(),
            )?;
            Ok(Value::Null)
        })))
    }
}

fn setup(config: ServerConfig) -> (Arc<DoorstepServer>, DoorstepClient) {
    let engine = LocalEngine::new(ProcessorRegistry::new().with("shouter", || Box::new(Shouter)));
    let server = Arc::new(DoorstepServer::new(Arc::new(engine), config));
    let client = DoorstepClient::new(Arc::new(LocalChannel::new(Arc::clone(&server))));
    (server, client)
}

fn shouter() -> (HashMap<String, String>, ProcessorIni) {
    let modules = HashMap::from([("shouter.py".to_string(), "# shouts".to_string())]);
    let ini = ProcessorIni::single("shout", ProcessorMetadata::for_module("shouter.py"));
    (modules, ini)
}

#[tokio::test]
async fn test_full_flow_publishes_result() {
    let (server, client) = setup(ServerConfig::default());
    let mut events = server.subscribe();
    let (modules, ini) = shouter();

    let engagement = client.engage().await.unwrap();
    assert_eq!(engagement.server_id, server.id());
    client
        .post_processor(&engagement, modules, &ini)
        .await
        .unwrap();
    client
        .post_data(&engagement, "people.csv", "hello", false)
        .await
        .unwrap();

    let report = client.get_report(&engagement).await.unwrap();
    let errors = report.issues_at(Level::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message(), "HELLO");
    assert_eq!(errors[0].processor(), Some("lintol/shouter:1"));
    assert_eq!(report.filename(), Some("people.csv"));

    let ServerEvent::Result {
        server_id,
        session_id,
    } = events.recv().await.unwrap();
    assert_eq!(server_id, engagement.server_id);
    assert_eq!(session_id, engagement.session_id);

    // Fetching again returns the same report.
    let again = client.get_report(&engagement).await.unwrap();
    assert_eq!(again.issues_at(Level::Error).len(), 1);

    server.shutdown().await.unwrap();
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_report_over_limit_is_refused() {
    let (server, client) = setup(ServerConfig {
        max_report_chars: 10,
    });
    let (modules, ini) = shouter();

    let engagement = client.engage().await.unwrap();
    client
        .post_processor(&engagement, modules, &ini)
        .await
        .unwrap();
    client
        .post_data(&engagement, "people.csv", "hello", false)
        .await
        .unwrap();

    match client.get_report(&engagement).await.unwrap_err() {
        ServerError::ReportTooLong { length, limit } => {
            assert_eq!(limit, 10);
            assert!(length > 10);
        }
        other => panic!("Expected ReportTooLong, got: {other:?}"),
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_error_rebuilt_on_client() {
    let (server, client) = setup(ServerConfig::default());
    let engagement = client.engage().await.unwrap();
    let (_, ini) = shouter();

    let err = client
        .post_processor(&engagement, HashMap::new(), &ini)
        .await
        .unwrap_err();
    assert!(matches!(
        err.engine(),
        Some(EngineError::MissingModuleContent { .. })
    ));

    let other = ProcessorIni::single("x", ProcessorMetadata::for_module("other.py"));
    let modules = HashMap::from([("other.py".to_string(), String::new())]);
    let err = client
        .post_processor(&engagement, modules, &other)
        .await
        .unwrap_err();
    assert!(err.engine().is_some_and(EngineError::is_configuration));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_session_over_the_channel() {
    let (server, client) = setup(ServerConfig::default());
    let mut engagement = client.engage().await.unwrap();
    engagement.session_id = "doorstep-nope".to_string();

    let err = client
        .post_data(&engagement, "a.csv", "x", false)
        .await
        .unwrap_err();
    assert_eq!(err, ServerError::UnknownSession("doorstep-nope".to_string()));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_pending_runs() {
    let (server, client) = setup(ServerConfig::default());
    let first = client.engage().await.unwrap();
    let second = client.engage().await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(server.sessions().len(), 2);

    let waiting = {
        let client = client.clone();
        let first = first.clone();
        tokio::spawn(async move { client.get_report(&first).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    server.shutdown().await.unwrap();

    let err = waiting.await.unwrap().unwrap_err();
    assert_eq!(err.engine(), Some(&EngineError::Cancelled));
}
