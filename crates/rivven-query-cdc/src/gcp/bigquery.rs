//! BigQuery query engine
//!
//! Queries run as jobs: `jobs.query` submits, `getQueryResults` is polled
//! until the job completes, and the job's final status decides success.
//! The cursor then follows `pageToken` forward one page at a time. Cells
//! arrive as JSON strings and are converted per column type.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::DateTime;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::get_query_results_response::GetQueryResultsResponse;
use gcp_bigquery_client::model::job_status::JobStatus;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_row::TableRow;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config::GcpConfig;
use crate::error::{PipelineError, Result};
use crate::query::{QueryEngine, QuerySession, RowCursor};
use crate::schema::{Column, ColumnMode, ColumnType, Row, Schema, Value};

/// Query engine backed by BigQuery
#[derive(Debug, Clone, Default)]
pub struct BigQueryEngine {
    config: GcpConfig,
}

impl BigQueryEngine {
    pub fn new(config: GcpConfig) -> Self {
        Self { config }
    }

    async fn create_client(&self) -> Result<Client> {
        let client = if let Some(path) = &self.config.credentials_file {
            let sa_key = gcp_bigquery_client::yup_oauth2::read_service_account_key(path)
                .await
                .map_err(|e| {
                    PipelineError::query(
                        "bigquery.connect",
                        format!("failed to read credentials from '{}': {}", path.display(), e),
                    )
                })?;
            Client::from_service_account_key(sa_key, false)
                .await
                .map_err(|e| PipelineError::query("bigquery.connect", e))?
        } else {
            Client::from_application_default_credentials()
                .await
                .map_err(|e| PipelineError::query("bigquery.connect", e))?
        };
        Ok(client)
    }
}

#[async_trait]
impl QueryEngine for BigQueryEngine {
    async fn open_session(&self, project_id: &str) -> Result<Box<dyn QuerySession>> {
        let client = self.create_client().await?;
        debug!(project_id = %project_id, "Opened BigQuery session");
        Ok(Box::new(BigQuerySession {
            client,
            project_id: project_id.to_string(),
        }))
    }
}

struct BigQuerySession {
    client: Client,
    project_id: String,
}

#[async_trait]
impl QuerySession for BigQuerySession {
    async fn execute(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .map_err(|e| PipelineError::query("query.run", e))?;

        let (job_id, location) = match response.job_reference.as_ref() {
            Some(job) => (job.job_id.clone(), job.location.clone()),
            None => (None, None),
        };
        let job_id =
            job_id.ok_or_else(|| PipelineError::query("query.run", "response carries no job id"))?;

        let results = JobResults {
            client: self.client.clone(),
            project_id: self.project_id.clone(),
            job_id,
            location,
        };

        let first = ResultPage::from(response);
        first.log_warnings(&results.job_id);
        let page = wait_for_completion(&results, first).await?;
        results.check_status().await?;

        let schema = page
            .schema
            .as_ref()
            .map(convert_schema)
            .unwrap_or_default();

        info!(
            job_id = %results.job_id,
            columns = schema.len(),
            "Query job completed"
        );

        Ok(Box::new(BigQueryCursor {
            schema,
            rows: PagedRows::new(results, page),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        debug!(project_id = %self.project_id, "Closed BigQuery session");
        Ok(())
    }
}

/// One page of a job's result, from either `jobs.query` or `getQueryResults`
///
/// `errors` may hold non-fatal entries even for a successful job; the job
/// status decides whether the query failed.
struct ResultPage {
    complete: bool,
    schema: Option<TableSchema>,
    rows: Vec<TableRow>,
    page_token: Option<String>,
    errors: Vec<ErrorProto>,
}

impl ResultPage {
    fn log_warnings(&self, job_id: &str) {
        for e in &self.errors {
            warn!(
                job_id = %job_id,
                reason = e.reason.as_deref().unwrap_or_default(),
                "Query job reported: {}",
                e.message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

impl From<QueryResponse> for ResultPage {
    fn from(r: QueryResponse) -> Self {
        Self {
            complete: r.job_complete.unwrap_or(false),
            schema: r.schema,
            rows: r.rows.unwrap_or_default(),
            page_token: r.page_token,
            errors: r.errors.unwrap_or_default(),
        }
    }
}

impl From<GetQueryResultsResponse> for ResultPage {
    fn from(r: GetQueryResultsResponse) -> Self {
        Self {
            complete: r.job_complete.unwrap_or(false),
            schema: r.schema,
            rows: r.rows.unwrap_or_default(),
            page_token: r.page_token,
            errors: r.errors.unwrap_or_default(),
        }
    }
}

/// Source of `getQueryResults` pages for one job
#[async_trait]
trait ResultPages: Send + Sync {
    /// Job id, for logging
    fn job_id(&self) -> &str;

    /// Fetch the page at `page_token`, or the first page when `None`.
    async fn fetch(&self, page_token: Option<String>) -> std::result::Result<ResultPage, String>;
}

struct JobResults {
    client: Client,
    project_id: String,
    job_id: String,
    location: Option<String>,
}

impl JobResults {
    /// Fail if the finished job carries a fatal error result.
    async fn check_status(&self) -> Result<()> {
        let job = self
            .client
            .job()
            .get_job(&self.project_id, &self.job_id, self.location.as_deref())
            .await
            .map_err(|e| PipelineError::query("query.status", e))?;
        match job_error(job.status.as_ref()) {
            Some(detail) => Err(PipelineError::query("query.status", detail)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResultPages for JobResults {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn fetch(&self, page_token: Option<String>) -> std::result::Result<ResultPage, String> {
        self.client
            .job()
            .get_query_results(
                &self.project_id,
                &self.job_id,
                GetQueryResultsParameters {
                    location: self.location.clone(),
                    page_token,
                    ..Default::default()
                },
            )
            .await
            .map(ResultPage::from)
            .map_err(|e| e.to_string())
    }
}

/// Fatal error of a job, if its status carries one
fn job_error(status: Option<&JobStatus>) -> Option<String> {
    let error = status?.error_result.as_ref()?;
    let message = error
        .message
        .as_deref()
        .or(error.reason.as_deref())
        .unwrap_or("unknown error");
    Some(message.to_string())
}

/// Poll until the job reports completion.
async fn wait_for_completion<P: ResultPages + ?Sized>(
    pages: &P,
    mut page: ResultPage,
) -> Result<ResultPage> {
    while !page.complete {
        debug!(job_id = %pages.job_id(), "Waiting for query job to complete");
        page = pages
            .fetch(None)
            .await
            .map_err(|e| PipelineError::query("query.wait", e))?;
        page.log_warnings(pages.job_id());
    }
    Ok(page)
}

/// Rows of a completed job, following `pageToken` forward one page at a time
struct PagedRows<P> {
    pages: P,
    buffer: VecDeque<TableRow>,
    page_token: Option<String>,
}

impl<P: ResultPages> PagedRows<P> {
    fn new(pages: P, first: ResultPage) -> Self {
        Self {
            pages,
            buffer: first.rows.into(),
            page_token: first.page_token,
        }
    }

    async fn next(&mut self) -> Result<Option<TableRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }

            let Some(token) = self.page_token.take() else {
                return Ok(None);
            };

            let page = self
                .pages
                .fetch(Some(token))
                .await
                .map_err(|e| PipelineError::row_read("rows.next", e))?;
            debug!(job_id = %self.pages.job_id(), rows = page.rows.len(), "Fetched result page");
            self.buffer.extend(page.rows);
            self.page_token = page.page_token;
        }
    }
}

struct BigQueryCursor {
    schema: Schema,
    rows: PagedRows<JobResults>,
}

#[async_trait]
impl RowCursor for BigQueryCursor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        match self.rows.next().await? {
            Some(row) => convert_row(&self.schema, row).map(Some),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Schema and cell conversion
// ============================================================================

fn convert_schema(schema: &TableSchema) -> Schema {
    Schema::new(
        schema
            .fields
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(convert_field)
            .collect(),
    )
}

fn convert_field(field: &TableFieldSchema) -> Column {
    let type_name = serde_json::to_value(&field.r#type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    Column::new(field.name.clone(), ColumnType::from_name(&type_name))
        .with_mode(ColumnMode::from_name(field.mode.as_deref()))
        .with_fields(
            field
                .fields
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(convert_field)
                .collect(),
        )
}

fn convert_row(schema: &Schema, row: TableRow) -> Result<Row> {
    let cells = row.columns.unwrap_or_default();
    if cells.len() != schema.len() {
        return Err(PipelineError::row_read(
            "rows.next",
            format!(
                "row has {} cells but schema has {} columns",
                cells.len(),
                schema.len()
            ),
        ));
    }

    schema
        .columns()
        .iter()
        .zip(cells)
        .map(|(column, cell)| {
            convert_cell(column, cell.value.as_ref()).map_err(|e| {
                PipelineError::row_read("rows.next", format!("column '{}': {}", column.name, e))
            })
        })
        .collect()
}

/// Convert one cell of the REST wire format.
///
/// Repeated cells are `[{"v": ...}, ...]`, record cells `{"f": [{"v": ...}, ...]}`.
fn convert_cell(column: &Column, cell: Option<&JsonValue>) -> std::result::Result<Value, String> {
    let cell = match cell {
        None | Some(JsonValue::Null) => return Ok(Value::Null),
        Some(cell) => cell,
    };

    if column.mode == ColumnMode::Repeated {
        let items = cell
            .as_array()
            .ok_or_else(|| format!("expected array for repeated column, got {}", cell))?;
        return items
            .iter()
            .map(|item| convert_value(column, item.get("v")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    convert_value(column, Some(cell))
}

fn convert_value(column: &Column, cell: Option<&JsonValue>) -> std::result::Result<Value, String> {
    let cell = match cell {
        None | Some(JsonValue::Null) => return Ok(Value::Null),
        Some(cell) => cell,
    };

    if column.column_type == ColumnType::Record {
        let values = cell
            .get("f")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| format!("expected record, got {}", cell))?;
        if values.len() != column.fields.len() {
            return Err(format!(
                "record has {} values but {} fields",
                values.len(),
                column.fields.len()
            ));
        }
        return column
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| {
                convert_cell(field, value.get("v")).map(|v| (field.name.clone(), v))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Record);
    }

    let text = cell
        .as_str()
        .ok_or_else(|| format!("expected string, got {}", cell))?;

    match column.column_type {
        ColumnType::Integer => text
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| format!("invalid integer '{}': {}", text, e)),
        ColumnType::Float => text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| format!("invalid float '{}': {}", text, e)),
        ColumnType::Boolean => text
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|e| format!("invalid boolean '{}': {}", text, e)),
        ColumnType::Timestamp => parse_timestamp(text).map(Value::Timestamp),
        ColumnType::Json => serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|e| format!("invalid json: {}", e)),
        _ => Ok(Value::String(text.to_string())),
    }
}

/// Timestamps are epoch seconds in float notation, e.g. `1.7040672E9`.
fn parse_timestamp(text: &str) -> std::result::Result<chrono::DateTime<chrono::Utc>, String> {
    let seconds = text
        .parse::<f64>()
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| format!("timestamp out of range: {}", text))
}
