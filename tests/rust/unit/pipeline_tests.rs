use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};

use querygraph::agents::{
    AgentError, HintExtractor, RelevancyClassifier, RelevancyVerdict, ResponseFormatter,
    SchemaHints, SqlAnalysis, SqlGenerator,
};
use querygraph::executor::{ExecutionError, QueryRows, RefreshError, SchemaRefresher, SqlExecutor};
use querygraph::graph_catalog::DatabaseInfo;
use querygraph::llm::EmbeddingProvider;
use querygraph::pipeline::{
    Collaborators, ConfirmRequest, ConfirmationError, ConfirmationStore, ConversationLog,
    EventSink, PendingConfirmation, Pipeline, PipelineError, PipelineEvent, RefreshStatus,
    TurnOutcome, TurnRequest,
};
use querygraph::resolver::{CandidateTable, RelevanceResolver, ResolverSettings};

use super::fixtures::{shop_graph, store_with, KeywordEmbedder, StalledEmbedder, SHOP_VOCABULARY};

mock! {
    pub Relevancy {}

    #[async_trait]
    impl RelevancyClassifier for Relevancy {
        async fn classify(
            &self,
            question: &str,
            database: &DatabaseInfo,
            history: &ConversationLog,
        ) -> Result<RelevancyVerdict, AgentError>;
    }
}

mock! {
    pub Hints {}

    #[async_trait]
    impl HintExtractor for Hints {
        async fn extract(
            &self,
            question: &str,
            database: &DatabaseInfo,
            history: &ConversationLog,
        ) -> Result<SchemaHints, AgentError>;
    }
}

mock! {
    pub Generator {}

    #[async_trait]
    impl SqlGenerator for Generator {
        async fn generate(
            &self,
            question: &str,
            schema: &[CandidateTable],
            database: &DatabaseInfo,
            history: &ConversationLog,
            instructions: &str,
        ) -> Result<SqlAnalysis, AgentError>;
    }
}

mock! {
    pub Formatter {}

    #[async_trait]
    impl ResponseFormatter for Formatter {
        async fn format(
            &self,
            question: &str,
            sql: &str,
            rows: &[Value],
            database: &DatabaseInfo,
        ) -> Result<String, AgentError>;
    }
}

mock! {
    pub Executor {}

    #[async_trait]
    impl SqlExecutor for Executor {
        async fn execute(&self, database: &DatabaseInfo, sql: &str) -> Result<QueryRows, ExecutionError>;
    }
}

mock! {
    pub Refresher {}

    #[async_trait]
    impl SchemaRefresher for Refresher {
        async fn refresh(&self, graph_id: &str, database: &DatabaseInfo) -> Result<String, RefreshError>;
    }
}

/// Mocks for one test; expectations are checked when the pipeline is dropped
struct Mocks {
    relevancy: MockRelevancy,
    hints: MockHints,
    generator: MockGenerator,
    formatter: MockFormatter,
    executor: MockExecutor,
    refresher: MockRefresher,
}

impl Mocks {
    fn new() -> Self {
        Self {
            relevancy: MockRelevancy::new(),
            hints: MockHints::new(),
            generator: MockGenerator::new(),
            formatter: MockFormatter::new(),
            executor: MockExecutor::new(),
            refresher: MockRefresher::new(),
        }
    }

    /// On-topic question whose hints name `tables` and whose SQL is `sql`
    fn answering(sql: &'static str, tables: &'static [&'static str]) -> Self {
        let mut mocks = Self::new();
        mocks
            .relevancy
            .expect_classify()
            .times(1)
            .returning(|_, _, _| Ok(RelevancyVerdict::OnTopic));
        mocks.hints.expect_extract().times(1).returning(move |_, _, _| {
            Ok(SchemaHints {
                tables: tables.iter().map(|t| t.to_string()).collect(),
                columns: Vec::new(),
            })
        });
        mocks
            .generator
            .expect_generate()
            .times(1)
            .returning(move |_, _, _, _, _| Ok(analysis(sql)));
        mocks
    }

    async fn into_pipeline(self) -> Pipeline {
        self.into_pipeline_with(
            Arc::new(KeywordEmbedder::new(SHOP_VOCABULARY)),
            Duration::from_secs(5),
        )
        .await
    }

    async fn into_pipeline_with(
        self,
        embedder: Arc<dyn EmbeddingProvider>,
        resolve_timeout: Duration,
    ) -> Pipeline {
        let store = store_with("shop", Arc::new(shop_graph())).await;
        let resolver = Arc::new(RelevanceResolver::new(
            store.clone(),
            embedder,
            ResolverSettings {
                top_k: 1,
                ..ResolverSettings::default()
            },
        ));
        Pipeline::new(
            store,
            resolver,
            Collaborators {
                relevancy: Arc::new(self.relevancy),
                hints: Arc::new(self.hints),
                generator: Arc::new(self.generator),
                formatter: Arc::new(self.formatter),
            },
            Arc::new(self.executor),
            Arc::new(self.refresher),
            Arc::new(ConfirmationStore::new(16)),
            resolve_timeout,
        )
    }
}

fn analysis(sql: &str) -> SqlAnalysis {
    SqlAnalysis {
        is_sql_translatable: true,
        instructions_comments: String::new(),
        explanation: "Straight lookup".to_string(),
        sql_query: sql.to_string(),
        tables_used: vec!["customers".to_string()],
        missing_information: Vec::new(),
        ambiguities: vec!["Which time zone".to_string()],
        confidence: 90,
        error: None,
    }
}

fn question(text: &str) -> TurnRequest {
    TurnRequest {
        graph_id: "shop".to_string(),
        chat: vec![text.to_string()],
        ..TurnRequest::default()
    }
}

fn confirm(answer: &str, token: Option<&str>) -> ConfirmRequest {
    ConfirmRequest {
        graph_id: "shop".to_string(),
        confirmation: answer.to_string(),
        confirmation_token: token.map(str::to_string),
        sql_query: None,
        chat: vec!["Drop the logs table".to_string()],
    }
}

async fn drain(sink: EventSink, mut rx: tokio::sync::mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    drop(sink);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

async fn run(pipeline: &Pipeline, request: TurnRequest) -> (TurnOutcome, Vec<PipelineEvent>) {
    let (sink, rx) = EventSink::channel(64);
    let outcome = pipeline.run_turn(request, &sink).await;
    (outcome, drain(sink, rx).await)
}

async fn resume(pipeline: &Pipeline, request: ConfirmRequest) -> (TurnOutcome, Vec<PipelineEvent>) {
    let (sink, rx) = EventSink::channel(64);
    let outcome = pipeline.resume(request, &sink).await;
    (outcome, drain(sink, rx).await)
}

fn kinds(events: &[PipelineEvent]) -> Vec<&'static str> {
    events.iter().map(PipelineEvent::kind).collect()
}

fn step_messages(events: &[PipelineEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ReasoningStep { message } => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

fn parked_token(outcome: &TurnOutcome) -> String {
    match outcome {
        TurnOutcome::AwaitingConfirmation { token, .. } => token.clone(),
        other => panic!("expected a parked statement, got {:?}", other),
    }
}

#[tokio::test]
async fn test_select_runs_without_confirmation_or_refresh() {
    let mut mocks = Mocks::answering("SELECT count(*) FROM customers", &["customer"]);
    mocks
        .executor
        .expect_execute()
        .withf(|_, sql| sql == "SELECT count(*) FROM customers")
        .times(1)
        .returning(|_, _| Ok(vec![json!({ "count()": 42 })]));
    mocks.refresher.expect_refresh().never();
    mocks
        .formatter
        .expect_format()
        .times(1)
        .returning(|_, _, rows, _| Ok(format!("There are {} customers.", rows[0]["count()"])));
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("How many customers do we have?")).await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            sql: "SELECT count(*) FROM customers".to_string(),
            refresh: None,
        }
    );
    assert_eq!(
        kinds(&events),
        vec![
            "reasoning_step",
            "final_result",
            "reasoning_step",
            "query_result",
            "reasoning_step",
            "ai_response"
        ]
    );
    assert_eq!(
        step_messages(&events),
        vec![
            "Step 1: Analyzing user query and generating SQL...",
            "Step 2: Executing SQL query",
            "Step 3: Generating user-friendly response",
        ]
    );
    assert_eq!(
        events[1],
        PipelineEvent::FinalResult {
            data: "SELECT count(*) FROM customers".to_string(),
            conf: 90,
            miss: String::new(),
            amb: "- Which time zone".to_string(),
            exp: "Straight lookup".to_string(),
            is_valid: true,
        }
    );
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::AiResponse {
            message: "There are 42 customers.".to_string()
        })
    );
    assert!(pipeline.confirmations().is_empty().await);
}

#[tokio::test]
async fn test_drop_waits_for_confirm_then_runs_once() {
    let mut mocks = Mocks::answering("DROP TABLE logs", &["log"]);
    mocks
        .executor
        .expect_execute()
        .withf(|_, sql| sql == "DROP TABLE logs")
        .times(1)
        .returning(|_, _| {
            Ok(vec![json!({
                "operation": "DROP",
                "affected_rows": null,
                "status": "success"
            })])
        });
    mocks
        .refresher
        .expect_refresh()
        .withf(|graph_id, _| graph_id == "shop")
        .times(1)
        .returning(|_, _| Ok("Loaded 5 tables and 12 columns into graph 'shop'".to_string()));
    mocks
        .formatter
        .expect_format()
        .times(1)
        .returning(|_, _, _, _| Ok("The logs table is gone.".to_string()));
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("Drop the logs table")).await;

    let token = parked_token(&outcome);
    assert_eq!(
        kinds(&events),
        vec!["reasoning_step", "final_result", "destructive_confirmation"]
    );
    match &events[2] {
        PipelineEvent::DestructiveConfirmation {
            message,
            sql_query,
            operation_type,
            confirmation_token,
        } => {
            assert_eq!(sql_query, "DROP TABLE logs");
            assert_eq!(operation_type, "DROP");
            assert_eq!(confirmation_token, &token);
            assert!(message.contains("CONFIRM"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(pipeline.confirmations().len().await, 1);

    let (outcome, events) = resume(&pipeline, confirm("CONFIRM", Some(&token))).await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            sql: "DROP TABLE logs".to_string(),
            refresh: Some(RefreshStatus::Success),
        }
    );
    assert_eq!(
        kinds(&events),
        vec![
            "reasoning_step",
            "query_result",
            "reasoning_step",
            "schema_refresh",
            "reasoning_step",
            "ai_response"
        ]
    );
    assert_eq!(
        step_messages(&events),
        vec![
            "Step 2: Executing confirmed SQL query",
            "Step 3: Schema change detected - refreshing graph...",
            "Step 4: Generating user-friendly response",
        ]
    );
    match &events[3] {
        PipelineEvent::SchemaRefresh {
            message,
            refresh_status,
        } => {
            assert_eq!(*refresh_status, RefreshStatus::Success);
            assert!(message.starts_with("Schema change detected (DROP operation)"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // the token is spent
    let (outcome, events) = resume(&pipeline, confirm("CONFIRM", Some(&token))).await;
    assert_eq!(
        outcome,
        TurnOutcome::Failed(PipelineError::Confirmation(ConfirmationError::UnknownToken))
    );
    assert_eq!(kinds(&events), vec!["error"]);
}

#[tokio::test]
async fn test_declining_cancels_without_executing() {
    let mut mocks = Mocks::answering("DROP TABLE logs", &["log"]);
    mocks.executor.expect_execute().never();
    mocks.refresher.expect_refresh().never();
    mocks.formatter.expect_format().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, _) = run(&pipeline, question("Drop the logs table")).await;
    let token = parked_token(&outcome);

    let (outcome, events) = resume(&pipeline, confirm("no", Some(&token))).await;

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(
        events,
        vec![PipelineEvent::OperationCancelled {
            message: "Operation cancelled. The destructive SQL query was not executed."
                .to_string()
        }]
    );
    assert!(pipeline.confirmations().is_empty().await);
}

#[tokio::test]
async fn test_confirmation_keyword_ignores_case_and_padding() {
    let mut mocks = Mocks::answering("DROP TABLE logs", &["log"]);
    mocks
        .executor
        .expect_execute()
        .times(1)
        .returning(|_, _| Ok(vec![json!({"operation": "DROP", "affected_rows": null, "status": "success"})]));
    mocks
        .refresher
        .expect_refresh()
        .times(1)
        .returning(|_, _| Ok("Loaded 5 tables and 12 columns into graph 'shop'".to_string()));
    mocks
        .formatter
        .expect_format()
        .times(1)
        .returning(|_, _, _, _| Ok("Dropped.".to_string()));
    let pipeline = mocks.into_pipeline().await;

    let (outcome, _) = run(&pipeline, question("Drop the logs table")).await;
    let token = parked_token(&outcome);

    let (outcome, events) = resume(&pipeline, confirm("  confirm ", Some(&token))).await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            sql: "DROP TABLE logs".to_string(),
            refresh: Some(RefreshStatus::Success),
        }
    );
    assert!(!kinds(&events).contains(&"operation_cancelled"));
}

#[tokio::test]
async fn test_confirm_without_token_is_rejected() {
    let mut mocks = Mocks::new();
    mocks.executor.expect_execute().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = resume(&pipeline, confirm("CONFIRM", None)).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed(PipelineError::Confirmation(ConfirmationError::MissingToken))
    );
    assert_eq!(kinds(&events), vec!["error"]);
}

#[tokio::test]
async fn test_token_from_another_graph_is_rejected_and_spent() {
    let mut mocks = Mocks::new();
    mocks.executor.expect_execute().never();
    let pipeline = mocks.into_pipeline().await;
    let token = pipeline
        .confirmations()
        .insert(PendingConfirmation::new("warehouse", "DROP TABLE stock", "DROP"))
        .await;

    let (outcome, _) = resume(&pipeline, confirm("CONFIRM", Some(&token))).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed(PipelineError::Confirmation(
            ConfirmationError::GraphMismatch {
                expected: "warehouse".to_string(),
                actual: "shop".to_string(),
            }
        ))
    );
    assert!(pipeline.confirmations().is_empty().await);
}

#[tokio::test]
async fn test_confirmed_sql_must_match_parked_statement() {
    let mut mocks = Mocks::new();
    mocks.executor.expect_execute().never();
    let pipeline = mocks.into_pipeline().await;
    let token = pipeline
        .confirmations()
        .insert(PendingConfirmation::new("shop", "DELETE FROM logs", "DELETE"))
        .await;

    let mut request = confirm("CONFIRM", Some(&token));
    request.sql_query = Some("DROP DATABASE shop".to_string());
    let (outcome, _) = resume(&pipeline, request).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed(PipelineError::Confirmation(
            ConfirmationError::StatementMismatch
        ))
    );
}

#[tokio::test]
async fn test_off_topic_question_gets_followup() {
    let mut mocks = Mocks::new();
    mocks.relevancy.expect_classify().times(1).returning(|_, _, _| {
        Ok(RelevancyVerdict::OffTopic {
            reason: "weather is not part of the shop database".to_string(),
            suggestions: vec!["How many orders were placed today?".to_string()],
        })
    });
    mocks.hints.expect_extract().never();
    mocks.generator.expect_generate().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("Will it rain tomorrow?")).await;

    assert_eq!(outcome, TurnOutcome::Rejected);
    assert_eq!(
        events[1],
        PipelineEvent::FollowupQuestions {
            message: "Off topic question: weather is not part of the shop database".to_string(),
            suggestions: vec!["How many orders were placed today?".to_string()],
        }
    );
}

#[tokio::test]
async fn test_unreadable_relevancy_reply_ends_with_invalid_result() {
    let mut mocks = Mocks::new();
    mocks.relevancy.expect_classify().times(1).returning(|_, _, _| {
        Ok(RelevancyVerdict::Unparseable {
            raw: "maybe?".to_string(),
            error: "Failed to parse response: no JSON object found".to_string(),
        })
    });
    mocks.hints.expect_extract().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("orders?")).await;

    assert_eq!(outcome, TurnOutcome::Rejected);
    match &events[1] {
        PipelineEvent::FinalResult {
            conf, is_valid, exp, ..
        } => {
            assert_eq!(*conf, 0);
            assert!(!is_valid);
            assert!(exp.ends_with("Raw response: maybe?"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_no_matching_tables_asks_for_more_detail() {
    let mut mocks = Mocks::new();
    mocks
        .relevancy
        .expect_classify()
        .returning(|_, _, _| Ok(RelevancyVerdict::OnTopic));
    mocks
        .hints
        .expect_extract()
        .returning(|_, _, _| Ok(SchemaHints::default()));
    mocks.generator.expect_generate().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("What about it?")).await;

    assert_eq!(outcome, TurnOutcome::InsufficientSchema);
    match events.last() {
        Some(PipelineEvent::FollowupQuestions { message, .. }) => {
            assert!(message.starts_with("Insufficient schema"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_resolution_timeout_fails_the_turn() {
    let mut mocks = Mocks::new();
    mocks
        .relevancy
        .expect_classify()
        .returning(|_, _, _| Ok(RelevancyVerdict::OnTopic));
    mocks.hints.expect_extract().returning(|_, _, _| {
        Ok(SchemaHints {
            tables: vec!["customers".to_string()],
            columns: Vec::new(),
        })
    });
    mocks.generator.expect_generate().never();
    let pipeline = mocks
        .into_pipeline_with(Arc::new(StalledEmbedder), Duration::from_millis(50))
        .await;

    let (outcome, events) = run(&pipeline, question("List customers")).await;

    assert_eq!(outcome, TurnOutcome::Failed(PipelineError::ResolveTimeout));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::error(
            "Timeout error while finding tables relevant to your request."
        ))
    );
}

#[tokio::test]
async fn test_untranslatable_question_stops_after_final_result() {
    let mut mocks = Mocks::new();
    mocks
        .relevancy
        .expect_classify()
        .returning(|_, _, _| Ok(RelevancyVerdict::OnTopic));
    mocks.hints.expect_extract().returning(|_, _, _| {
        Ok(SchemaHints {
            tables: vec!["customer".to_string()],
            columns: Vec::new(),
        })
    });
    mocks.generator.expect_generate().returning(|_, _, _, _, _| {
        let mut reply = analysis("");
        reply.is_sql_translatable = false;
        reply.missing_information = vec!["customer lifetime value".to_string()];
        Ok(reply)
    });
    mocks.executor.expect_execute().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("Which customers are most valuable?")).await;

    assert_eq!(outcome, TurnOutcome::NotTranslatable);
    match events.last() {
        Some(PipelineEvent::FinalResult { is_valid, miss, .. }) => {
            assert!(!is_valid);
            assert_eq!(miss, "- customer lifetime value");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_database_error_becomes_error_event() {
    let mut mocks = Mocks::answering("SELECT * FROM customer", &["customer"]);
    mocks.executor.expect_execute().times(1).returning(|_, _| {
        Err(ExecutionError::Database(
            "Code: 60. Table shop.customer does not exist".to_string(),
        ))
    });
    mocks.formatter.expect_format().never();
    let pipeline = mocks.into_pipeline().await;

    let (outcome, events) = run(&pipeline, question("Show customers")).await;

    assert!(matches!(
        outcome,
        TurnOutcome::Failed(PipelineError::Execution(_))
    ));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::error(
            "Error executing query: Code: 60. Table shop.customer does not exist"
        ))
    );
}

#[tokio::test]
async fn test_failed_refresh_is_reported_and_turn_still_answers() {
    let mut mocks = Mocks::answering("ALTER TABLE logs ADD COLUMN level String", &["log"]);
    mocks
        .executor
        .expect_execute()
        .times(1)
        .returning(|_, _| Ok(Vec::new()));
    mocks.refresher.expect_refresh().times(1).returning(|_, _| {
        Err(RefreshError::Introspection {
            database: "shop".to_string(),
            message: "connection refused".to_string(),
        })
    });
    mocks
        .formatter
        .expect_format()
        .times(1)
        .returning(|_, _, _, _| Ok("Added a level column to logs.".to_string()));
    let pipeline = mocks.into_pipeline().await;

    let (outcome, _) = run(&pipeline, question("Add a level column to logs")).await;
    let token = parked_token(&outcome);
    let (outcome, events) = resume(&pipeline, confirm("CONFIRM", Some(&token))).await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            sql: "ALTER TABLE logs ADD COLUMN level String".to_string(),
            refresh: Some(RefreshStatus::Failed),
        }
    );
    let refresh = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::SchemaRefresh {
                message,
                refresh_status,
            } => Some((message.clone(), *refresh_status)),
            _ => None,
        })
        .unwrap();
    assert_eq!(refresh.1, RefreshStatus::Failed);
    assert!(refresh
        .0
        .starts_with("Schema was modified but graph refresh failed:"));
    assert_eq!(kinds(&events).last(), Some(&"ai_response"));
}

#[tokio::test]
async fn test_disconnected_client_aborts_before_any_work() {
    let mut mocks = Mocks::new();
    mocks.relevancy.expect_classify().never();
    let pipeline = mocks.into_pipeline().await;

    let (sink, rx) = EventSink::channel(4);
    drop(rx);
    let outcome = pipeline.run_turn(question("How many orders?"), &sink).await;

    assert_eq!(outcome, TurnOutcome::Aborted);
}

#[tokio::test]
async fn test_unknown_graph_fails_turn() {
    let pipeline = Mocks::new().into_pipeline().await;
    let mut request = question("How many orders?");
    request.graph_id = "warehouse".to_string();

    let (outcome, events) = run(&pipeline, request).await;

    assert!(matches!(outcome, TurnOutcome::Failed(PipelineError::Graph(_))));
    assert_eq!(kinds(&events), vec!["reasoning_step", "error"]);
}
