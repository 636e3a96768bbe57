//! Per-turn orchestration.
//!
//! A turn walks an explicit [`TurnState`] machine:
//!
//! ```text
//! ClassifyRelevancy -> ExtractHints -> ResolveSchema -> GenerateSql
//!   -> ClassifyDestructiveness -> (AwaitConfirmation | Execute)
//!   -> [RefreshSchema] -> FormatResponse -> End
//! ```
//!
//! Destructive statements park in the [`ConfirmationStore`] and the turn ends;
//! a later confirm call picks the statement up again at `Execute`. Every state
//! reports progress through an [`EventSink`] before doing its work, so a client
//! that disconnects stops the turn ahead of the next side effect.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agents::{
    analysis::bullet_list, HintExtractor, LlmHintExtractor, LlmRelevancyClassifier,
    LlmResponseFormatter, LlmSqlGenerator, RelevancyClassifier, RelevancyVerdict,
    ResponseFormatter, SchemaHints, SqlGenerator,
};
use crate::executor::{QueryRows, SchemaRefresher, SqlExecutor};
use crate::graph_catalog::{DatabaseInfo, SchemaGraphStore};
use crate::llm::CompletionProvider;
use crate::resolver::{CandidateTable, RelevanceResolver};

pub mod confirmation;
pub mod errors;
pub mod events;
pub mod history;
pub mod statement;

pub use confirmation::{ConfirmationError, ConfirmationStore, PendingConfirmation};
pub use errors::PipelineError;
pub use events::{EventSink, PipelineEvent, RefreshStatus, MESSAGE_DELIMITER};
pub use history::{ConversationLog, Turn};
pub use statement::SchemaChange;

/// Literal a client must send to run a parked destructive statement
pub const CONFIRM_KEYWORD: &str = "CONFIRM";

const MAX_LOGGED_QUESTION_CHARS: usize = 500;

/// Strip line breaks and bound the length of user text before it reaches the logs
pub fn sanitize_question(question: &str) -> String {
    question
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(MAX_LOGGED_QUESTION_CHARS)
        .collect()
}

/// The completion-backed collaborators a turn calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub relevancy: Arc<dyn RelevancyClassifier>,
    pub hints: Arc<dyn HintExtractor>,
    pub generator: Arc<dyn SqlGenerator>,
    pub formatter: Arc<dyn ResponseFormatter>,
}

impl Collaborators {
    /// All four collaborators sharing one completion provider
    pub fn from_provider(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            relevancy: Arc::new(LlmRelevancyClassifier::new(provider.clone())),
            hints: Arc::new(LlmHintExtractor::new(provider.clone())),
            generator: Arc::new(LlmSqlGenerator::new(provider.clone())),
            formatter: Arc::new(LlmResponseFormatter::new(provider)),
        }
    }
}

/// A new question against a graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnRequest {
    pub graph_id: String,
    /// Every question so far; the last one is current
    pub chat: Vec<String>,
    /// SQL (or other results) produced for the earlier questions
    pub result: Vec<Value>,
    pub instructions: Option<String>,
}

/// Answer to a `destructive_confirmation` event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmRequest {
    pub graph_id: String,
    pub confirmation: String,
    pub confirmation_token: Option<String>,
    /// When present, must match the parked statement
    pub sql_query: Option<String>,
    pub chat: Vec<String>,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Off-topic, inappropriate, or the classifier could not be understood
    Rejected,
    InsufficientSchema,
    NotTranslatable,
    AwaitingConfirmation {
        token: String,
        operation_type: String,
    },
    Cancelled,
    Completed {
        sql: String,
        refresh: Option<RefreshStatus>,
    },
    Failed(PipelineError),
    /// The client disconnected mid-turn
    Aborted,
}

enum TurnState {
    ClassifyRelevancy,
    ExtractHints,
    ResolveSchema(SchemaHints),
    GenerateSql(Vec<CandidateTable>),
    ClassifyDestructiveness(String),
    AwaitConfirmation {
        sql: String,
        operation_type: String,
    },
    Execute {
        sql: String,
        confirmed: bool,
    },
    RefreshSchema {
        sql: String,
        rows: QueryRows,
        change: SchemaChange,
    },
    FormatResponse {
        sql: String,
        rows: QueryRows,
        refresh: Option<RefreshStatus>,
    },
    End(TurnOutcome),
}

struct TurnContext<'a> {
    graph_id: String,
    question: String,
    history: ConversationLog,
    instructions: String,
    database: DatabaseInfo,
    sink: &'a EventSink,
}

pub struct Pipeline {
    store: Arc<dyn SchemaGraphStore>,
    resolver: Arc<RelevanceResolver>,
    agents: Collaborators,
    executor: Arc<dyn SqlExecutor>,
    refresher: Arc<dyn SchemaRefresher>,
    confirmations: Arc<ConfirmationStore>,
    resolve_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn SchemaGraphStore>,
        resolver: Arc<RelevanceResolver>,
        agents: Collaborators,
        executor: Arc<dyn SqlExecutor>,
        refresher: Arc<dyn SchemaRefresher>,
        confirmations: Arc<ConfirmationStore>,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            agents,
            executor,
            refresher,
            confirmations,
            resolve_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn SchemaGraphStore> {
        &self.store
    }

    pub fn refresher(&self) -> &Arc<dyn SchemaRefresher> {
        &self.refresher
    }

    pub fn confirmations(&self) -> &ConfirmationStore {
        &self.confirmations
    }

    /// Run one question from relevancy check to answer (or to a confirmation request)
    pub async fn run_turn(&self, request: TurnRequest, sink: &EventSink) -> TurnOutcome {
        match self.start_turn(request, sink).await {
            Ok(ctx) => self.drive(ctx, TurnState::ClassifyRelevancy).await,
            Err(e) => self.fail(sink, e).await,
        }
    }

    /// Continue a turn parked at `AwaitConfirmation`
    pub async fn resume(&self, request: ConfirmRequest, sink: &EventSink) -> TurnOutcome {
        match self.start_resume(request, sink).await {
            Ok(Some((ctx, sql))) => {
                self.drive(ctx, TurnState::Execute { sql, confirmed: true })
                    .await
            }
            Ok(None) => TurnOutcome::Cancelled,
            Err(e) => self.fail(sink, e).await,
        }
    }

    async fn start_turn<'a>(
        &self,
        request: TurnRequest,
        sink: &'a EventSink,
    ) -> Result<TurnContext<'a>, PipelineError> {
        let question = request
            .chat
            .last()
            .cloned()
            .ok_or(PipelineError::EmptyQuestion)?;
        log::info!("User Query: {}", sanitize_question(&question));

        sink.send(PipelineEvent::step(
            "Step 1: Analyzing user query and generating SQL...",
        ))
        .await?;

        let database = self.database(&request.graph_id).await?;
        Ok(TurnContext {
            history: ConversationLog::from_history(&request.chat, &request.result),
            graph_id: request.graph_id,
            question,
            instructions: request.instructions.unwrap_or_default(),
            database,
            sink,
        })
    }

    /// `Ok(None)` when the user declined
    async fn start_resume<'a>(
        &self,
        request: ConfirmRequest,
        sink: &'a EventSink,
    ) -> Result<Option<(TurnContext<'a>, String)>, PipelineError> {
        // Spend the token whatever the answer is
        let pending = match request.confirmation_token.as_deref() {
            Some(token) => Some(self.confirmations.take(token, &request.graph_id).await),
            None => None,
        };

        if !request.confirmation.trim().eq_ignore_ascii_case(CONFIRM_KEYWORD) {
            log::info!(
                "Destructive operation on '{}' cancelled by user",
                request.graph_id
            );
            sink.send(PipelineEvent::OperationCancelled {
                message: "Operation cancelled. The destructive SQL query was not executed."
                    .to_string(),
            })
            .await?;
            return Ok(None);
        }

        let pending = match pending {
            Some(pending) => pending?,
            None => return Err(ConfirmationError::MissingToken.into()),
        };
        if let Some(sql) = &request.sql_query {
            if sql.trim() != pending.sql_query.trim() {
                return Err(ConfirmationError::StatementMismatch.into());
            }
        }

        let question = request
            .chat
            .last()
            .cloned()
            .ok_or(PipelineError::EmptyQuestion)?;
        log::info!(
            "User confirmed {} on '{}': {}",
            pending.operation_type,
            request.graph_id,
            sanitize_question(&question)
        );

        let database = self.database(&request.graph_id).await?;
        let ctx = TurnContext {
            history: ConversationLog::from_history(&request.chat, &[]),
            graph_id: request.graph_id,
            question,
            instructions: String::new(),
            database,
            sink,
        };
        Ok(Some((ctx, pending.sql_query)))
    }

    async fn database(&self, graph_id: &str) -> Result<DatabaseInfo, PipelineError> {
        let graph = self.store.select_graph(graph_id).await?;
        Ok(graph.database().clone())
    }

    async fn drive(&self, ctx: TurnContext<'_>, mut state: TurnState) -> TurnOutcome {
        loop {
            state = match self.step(&ctx, state).await {
                Ok(TurnState::End(outcome)) => return outcome,
                Ok(next) => next,
                Err(e) => return self.fail(ctx.sink, e).await,
            };
        }
    }

    async fn fail(&self, sink: &EventSink, err: PipelineError) -> TurnOutcome {
        if matches!(err, PipelineError::StreamClosed) {
            log::info!("Client disconnected, abandoning turn");
            return TurnOutcome::Aborted;
        }
        log::error!("Turn failed: {}", err);
        if sink.send(PipelineEvent::error(err.to_string())).await.is_err() {
            log::debug!("Client gone before error could be delivered");
        }
        TurnOutcome::Failed(err)
    }

    async fn step(
        &self,
        ctx: &TurnContext<'_>,
        state: TurnState,
    ) -> Result<TurnState, PipelineError> {
        match state {
            TurnState::ClassifyRelevancy => self.classify_relevancy(ctx).await,
            TurnState::ExtractHints => {
                let hints = self
                    .agents
                    .hints
                    .extract(&ctx.question, &ctx.database, &ctx.history)
                    .await?;
                Ok(TurnState::ResolveSchema(hints))
            }
            TurnState::ResolveSchema(hints) => self.resolve_schema(ctx, hints).await,
            TurnState::GenerateSql(schema) => self.generate_sql(ctx, schema).await,
            TurnState::ClassifyDestructiveness(sql) => {
                Ok(match statement::destructive_operation(&sql) {
                    Some(operation_type) => TurnState::AwaitConfirmation {
                        sql,
                        operation_type,
                    },
                    None => TurnState::Execute {
                        sql,
                        confirmed: false,
                    },
                })
            }
            TurnState::AwaitConfirmation {
                sql,
                operation_type,
            } => self.await_confirmation(ctx, sql, operation_type).await,
            TurnState::Execute { sql, confirmed } => self.execute(ctx, sql, confirmed).await,
            TurnState::RefreshSchema { sql, rows, change } => {
                self.refresh_schema(ctx, sql, rows, change).await
            }
            TurnState::FormatResponse { sql, rows, refresh } => {
                self.format_response(ctx, sql, rows, refresh).await
            }
            TurnState::End(outcome) => Ok(TurnState::End(outcome)),
        }
    }

    async fn classify_relevancy(&self, ctx: &TurnContext<'_>) -> Result<TurnState, PipelineError> {
        log::info!(
            "Calling relevancy classifier with query: {}",
            sanitize_question(&ctx.question)
        );
        let verdict = self
            .agents
            .relevancy
            .classify(&ctx.question, &ctx.database, &ctx.history)
            .await?;

        let event = match verdict {
            RelevancyVerdict::OnTopic => return Ok(TurnState::ExtractHints),
            RelevancyVerdict::OffTopic {
                reason,
                suggestions,
            } => {
                log::info!("SQL Fail reason: {}", reason);
                PipelineEvent::FollowupQuestions {
                    message: format!("Off topic question: {}", reason),
                    suggestions,
                }
            }
            RelevancyVerdict::Inappropriate {
                reason,
                suggestions,
            } => {
                log::info!("SQL Fail reason: {}", reason);
                PipelineEvent::FollowupQuestions {
                    message: format!("Inappropriate question: {}", reason),
                    suggestions,
                }
            }
            RelevancyVerdict::Unparseable { raw, error } => PipelineEvent::FinalResult {
                data: String::new(),
                conf: 0,
                miss: String::new(),
                amb: String::new(),
                exp: format!("{}. Raw response: {}", error, raw),
                is_valid: false,
            },
        };
        ctx.sink.send(event).await?;
        Ok(TurnState::End(TurnOutcome::Rejected))
    }

    async fn resolve_schema(
        &self,
        ctx: &TurnContext<'_>,
        hints: SchemaHints,
    ) -> Result<TurnState, PipelineError> {
        let resolution = tokio::time::timeout(
            self.resolve_timeout,
            self.resolver
                .resolve(&ctx.graph_id, &hints.tables, &hints.columns),
        )
        .await;

        let schema = match resolution {
            Ok(result) => result?,
            Err(_) => {
                log::warn!(
                    "Schema resolution for '{}' exceeded {:?}",
                    ctx.graph_id,
                    self.resolve_timeout
                );
                return Err(PipelineError::ResolveTimeout);
            }
        };

        if schema.is_empty() {
            log::info!("No relevant tables found in '{}'", ctx.graph_id);
            ctx.sink
                .send(PipelineEvent::FollowupQuestions {
                    message: "Insufficient schema: no tables in this database match the question. \
                              Try naming the data you are looking for."
                        .to_string(),
                    suggestions: Vec::new(),
                })
                .await?;
            return Ok(TurnState::End(TurnOutcome::InsufficientSchema));
        }
        Ok(TurnState::GenerateSql(schema))
    }

    async fn generate_sql(
        &self,
        ctx: &TurnContext<'_>,
        schema: Vec<CandidateTable>,
    ) -> Result<TurnState, PipelineError> {
        log::info!(
            "Calling SQL generator with query: {}",
            sanitize_question(&ctx.question)
        );
        let analysis = self
            .agents
            .generator
            .generate(
                &ctx.question,
                &schema,
                &ctx.database,
                &ctx.history,
                &ctx.instructions,
            )
            .await?;
        log::info!("SQL Result: {}", analysis.sql_query);

        ctx.sink
            .send(PipelineEvent::FinalResult {
                data: analysis.sql_query.clone(),
                conf: analysis.confidence,
                miss: bullet_list(&analysis.missing_information),
                amb: bullet_list(&analysis.ambiguities),
                exp: analysis.explanation.clone(),
                is_valid: analysis.is_sql_translatable,
            })
            .await?;

        if !analysis.is_executable() {
            return Ok(TurnState::End(TurnOutcome::NotTranslatable));
        }
        Ok(TurnState::ClassifyDestructiveness(analysis.sql_query))
    }

    async fn await_confirmation(
        &self,
        ctx: &TurnContext<'_>,
        sql: String,
        operation_type: String,
    ) -> Result<TurnState, PipelineError> {
        let token = self
            .confirmations
            .insert(PendingConfirmation::new(
                ctx.graph_id.clone(),
                sql.clone(),
                operation_type.clone(),
            ))
            .await;
        log::info!(
            "Holding {} statement on '{}' for confirmation",
            operation_type,
            ctx.graph_id
        );

        let event = PipelineEvent::DestructiveConfirmation {
            message: confirmation_message(&sql, &operation_type),
            sql_query: sql,
            operation_type: operation_type.clone(),
            confirmation_token: token.clone(),
        };
        if let Err(e) = ctx.sink.send(event).await {
            self.confirmations.discard(&token).await;
            return Err(e);
        }

        Ok(TurnState::End(TurnOutcome::AwaitingConfirmation {
            token,
            operation_type,
        }))
    }

    async fn execute(
        &self,
        ctx: &TurnContext<'_>,
        sql: String,
        confirmed: bool,
    ) -> Result<TurnState, PipelineError> {
        let message = if confirmed {
            "Step 2: Executing confirmed SQL query"
        } else {
            "Step 2: Executing SQL query"
        };
        ctx.sink.send(PipelineEvent::step(message)).await?;

        let change = self.executor.schema_change(&sql);
        let rows = self.executor.execute(&ctx.database, &sql).await?;
        ctx.sink
            .send(PipelineEvent::QueryResult { data: rows.clone() })
            .await?;

        Ok(match change {
            Some(change) => TurnState::RefreshSchema { sql, rows, change },
            None => TurnState::FormatResponse {
                sql,
                rows,
                refresh: None,
            },
        })
    }

    async fn refresh_schema(
        &self,
        ctx: &TurnContext<'_>,
        sql: String,
        rows: QueryRows,
        change: SchemaChange,
    ) -> Result<TurnState, PipelineError> {
        ctx.sink
            .send(PipelineEvent::step(
                "Step 3: Schema change detected - refreshing graph...",
            ))
            .await?;

        let (message, status) = match self.refresher.refresh(&ctx.graph_id, &ctx.database).await {
            Ok(summary) => {
                log::info!("Schema graph '{}' refreshed: {}", ctx.graph_id, summary);
                (
                    format!(
                        "Schema change detected ({} operation)\n\n\
                         Graph schema has been automatically refreshed with the latest database structure.",
                        change.operation
                    ),
                    RefreshStatus::Success,
                )
            }
            Err(e) => {
                log::error!("Schema graph '{}' refresh failed: {}", ctx.graph_id, e);
                (
                    format!("Schema was modified but graph refresh failed: {}", e),
                    RefreshStatus::Failed,
                )
            }
        };

        ctx.sink
            .send(PipelineEvent::SchemaRefresh {
                message,
                refresh_status: status,
            })
            .await?;
        Ok(TurnState::FormatResponse {
            sql,
            rows,
            refresh: Some(status),
        })
    }

    async fn format_response(
        &self,
        ctx: &TurnContext<'_>,
        sql: String,
        rows: QueryRows,
        refresh: Option<RefreshStatus>,
    ) -> Result<TurnState, PipelineError> {
        let step = if refresh.is_some() { 4 } else { 3 };
        ctx.sink
            .send(PipelineEvent::step(format!(
                "Step {}: Generating user-friendly response",
                step
            )))
            .await?;

        let message = self
            .agents
            .formatter
            .format(&ctx.question, &sql, &rows, &ctx.database)
            .await?;
        ctx.sink.send(PipelineEvent::AiResponse { message }).await?;

        Ok(TurnState::End(TurnOutcome::Completed { sql, refresh }))
    }
}

fn confirmation_message(sql: &str, operation_type: &str) -> String {
    let effect = match operation_type {
        "INSERT" => "Add new data to the database",
        "UPDATE" => "Modify existing data in the database",
        "DELETE" => "**PERMANENTLY DELETE** data from the database",
        "DROP" => "**PERMANENTLY DELETE** entire tables or database objects",
        "CREATE" => "Create new tables or database objects",
        "ALTER" => "Modify the structure of existing tables",
        "TRUNCATE" => "**PERMANENTLY DELETE ALL DATA** from specified tables",
        _ => "Change the contents of the database",
    };
    format!(
        "DESTRUCTIVE OPERATION DETECTED\n\n\
         The generated SQL query will perform a **{operation_type}** operation:\n\n\
         SQL:\n{sql}\n\n\
         What this will do:\n- {effect}\n\n\
         WARNING: This operation will make changes to your database and may be irreversible.\n\
         Reply with {CONFIRM_KEYWORD} to proceed."
    )
}
