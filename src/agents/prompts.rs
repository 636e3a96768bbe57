//! Prompt text for the completion collaborators
//!
//! Prompts are plain data. The only logic here is rendering the resolved schema
//! and query results into something a model reads well.

use serde_json::Value;

use crate::graph_catalog::KeyType;
use crate::resolver::CandidateTable;

/// Rows shown to the response formatter before summarising the remainder
pub const MAX_RESULTS_IN_PROMPT: usize = 50;

const RELEVANCY_PROMPT: &str = r#"You are an expert assistant deciding whether a user's question fits a database and whether it is appropriate.

Rules:
- Questions about data or concepts implied by the database description are On-topic. Common tables found in most systems count as On-topic even if the description does not list them.
- Questions about yourself, or about the user personally (first person), are Off-topic unless they concern data in the schema.
- Offensive, illegal or otherwise harmful questions are Inappropriate.

Respond ONLY with a JSON object:
{
  "status": "On-topic" | "Off-topic" | "Inappropriate",
  "reason": "short explanation",
  "suggestions": ["alternative questions the database can answer"]
}
Suggestions are empty for On-topic questions."#;

const HINTS_PROMPT: &str = r#"You turn natural-language questions into descriptions of the SQL tables and columns needed to answer them.

- Describe every part of the question.
- Keep descriptions generic: no literal values, codes or filter conditions.
- Prefer column descriptions when the question is about specific attributes.
- Previous questions from this session are context for the current one.

Respond ONLY with a JSON object:
{
  "tables_descriptions": [{"name": "likely table name", "description": "what the table holds"}],
  "columns_descriptions": [{"name": "likely column name", "description": "what the column holds"}]
}"#;

const ANALYSIS_RULES: &str = r#"You translate questions into SQL for the database described below. Follow these rules strictly; deviations lower your confidence score.

- Use only tables and columns present in <database_schema>.
- If the question continues an earlier one, resolve references from the conversation history.
- Always explain missing information, ambiguities, and any instruction you could not apply; lower the confidence accordingly.
- Respond ONLY with a JSON object containing every field, even when empty:
{
  "is_sql_translatable": true,
  "instructions_comments": "how the user instructions were applied",
  "explanation": "how the query answers the question",
  "sql_query": "single SQL statement",
  "tables_used": ["table"],
  "missing_information": ["..."],
  "ambiguities": ["..."],
  "confidence": 0-100
}"#;

const FORMATTER_RULES: &str = r#"Instructions:
1. Answer the user's question in plain language based on the results.
2. For SELECT queries focus on the key findings.
3. For INSERT/UPDATE/DELETE confirm the operation and mention affected records.
4. For CREATE, DROP and other operations confirm completion.
5. Use lists for multiple items and include relevant numbers.
6. If there are no results, say that no matching data was found.
7. Do not mention SQL unless it helps the user understand the answer.

Answer conversationally, as if explaining the findings to a colleague."#;

pub fn relevancy_system_prompt() -> &'static str {
    RELEVANCY_PROMPT
}

pub fn relevancy_user_prompt(question: &str, database_description: &str) -> String {
    format!(
        "The user's question: {}\nThe database description: {}",
        question,
        serde_json::to_string(database_description).unwrap_or_default()
    )
}

pub fn hints_system_prompt(database_description: &str) -> String {
    format!(
        "{}\n\nThe database you work with has the following description: {}.",
        HINTS_PROMPT, database_description
    )
}

pub fn hints_user_prompt(question: &str, previous_questions: &[&str]) -> String {
    let previous: Vec<String> = previous_questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("Query {}: {}", i + 1, q))
        .collect();
    serde_json::json!({
        "previous_user_queries": previous,
        "user_query": question,
    })
    .to_string()
}

/// One block per table: header, columns, then foreign keys
pub fn format_schema(tables: &[CandidateTable]) -> String {
    let blocks: Vec<String> = tables
        .iter()
        .map(|table| {
            let mut block = format!("Table: {} - {}\n", table.name, table.description);
            for column in &table.columns {
                let key = match column.key_type {
                    KeyType::None => String::new(),
                    other => format!(", {} KEY", other),
                };
                block.push_str(&format!(
                    "  - {} ({}{}, {}): {}\n",
                    column.name,
                    column.data_type,
                    key,
                    if column.nullable { "NULL" } else { "NOT NULL" },
                    column.description
                ));
            }
            if !table.foreign_keys.is_empty() {
                block.push_str("  ");
                block.push_str(&table.foreign_key_summary);
                block.push('\n');
            }
            block
        })
        .collect();
    blocks.join("\n")
}

pub fn analysis_prompt(
    question: &str,
    schema: &str,
    database_description: &str,
    instructions: &str,
    history: &str,
) -> String {
    format!(
        "{ANALYSIS_RULES}\n\n\
         <database_description>\n{database_description}\n</database_description>\n\n\
         <instructions>\n{instructions}\n</instructions>\n\n\
         <database_schema>\n{schema}\n</database_schema>\n\n\
         <conversation_history>\n{history}\n</conversation_history>\n\n\
         <user_query>\n{question}\n</user_query>"
    )
}

pub fn formatter_prompt(
    question: &str,
    sql: &str,
    rows: &[Value],
    database_description: &str,
) -> String {
    let sql_type = sql
        .split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let description = if database_description.is_empty() {
        "Not provided"
    } else {
        database_description
    };
    format!(
        "You help users understand database query results.\n\n\
         Database Description: {description}\n\n\
         User's Original Question:\n{question}\n\n\
         SQL Query Executed:\n{sql}\n\n\
         Query Type: {sql_type}\n\n\
         Query Results:\n{results}\n\n\
         {FORMATTER_RULES}",
        results = format_results(rows),
    )
}

/// Render execution output for the formatter prompt
pub fn format_results(rows: &[Value]) -> String {
    if rows.is_empty() {
        return "No results found.".to_string();
    }

    if let [Value::Object(only)] = rows {
        if let Some(operation) = only.get("operation") {
            let status = only.get("status").map(plain).unwrap_or_else(|| "unknown".to_string());
            return match only.get("affected_rows") {
                Some(affected) if !affected.is_null() => format!(
                    "Operation: {}, Status: {}, Affected rows: {}",
                    plain(operation),
                    status,
                    plain(affected)
                ),
                _ => format!("Operation: {}, Status: {}", plain(operation), status),
            };
        }
    }

    let mut lines: Vec<String> = rows
        .iter()
        .take(MAX_RESULTS_IN_PROMPT)
        .enumerate()
        .map(|(i, row)| match row {
            Value::Object(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, plain(v)))
                    .collect();
                format!("{}. {}", i + 1, rendered.join(", "))
            }
            other => format!("{}. {}", i + 1, plain(other)),
        })
        .collect();

    if rows.len() > MAX_RESULTS_IN_PROMPT {
        lines.push(format!(
            "... and {} more results",
            rows.len() - MAX_RESULTS_IN_PROMPT
        ));
    }
    lines.join("\n")
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
