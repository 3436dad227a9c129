use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::{
    decode::{
        build_execute_statement, decode_description, decode_outcome, decode_server_error, SqlRef,
    },
    protocol::{Description, Execution, PrepareRequest, Protocol, SimpleExecution},
    wire::{self, Batch, BatchCondition, BatchStep, PipelineRequest, Request},
    ClientOptions, Params, Result, ServerError, StatementText, StmtError, WarningChain,
};

/// [`Protocol`] over an HTTP SQL pipeline endpoint.
///
/// Requests on one instance share a server-side stream: the baton returned
/// by each response is sent with the next request, and named prepared
/// commands are stored on that stream by numeric id.
pub struct HttpPipeline {
    http: reqwest::Client,
    pipeline_url: String,
    token: String,
    options: ClientOptions,
    baton: Option<String>,
    base_url: Option<String>,
    stored: HashMap<String, i32>,
    next_sql_id: i32,
}

impl fmt::Debug for HttpPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPipeline")
            .field("pipeline_url", &self.pipeline_url)
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .field("baton", &self.baton.is_some())
            .field("stored", &self.stored.len())
            .finish()
    }
}

impl HttpPipeline {
    /// Creates a pipeline with a raw authorization header value.
    pub fn new(pipeline_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            pipeline_url: pipeline_url.into(),
            token: authorization.into(),
            options: ClientOptions::default(),
            baton: None,
            base_url: None,
            stored: HashMap::new(),
            next_sql_id: 0,
        }
    }

    /// Creates a pipeline from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(pipeline_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        let authorization = normalize_bearer_authorization(token.as_ref());
        Self::new(pipeline_url, authorization)
    }

    /// Creates a pipeline from environment variables.
    ///
    /// Reads:
    /// - `SQLSTMT_PIPELINE_URL`: full pipeline endpoint URL
    /// - `SQLSTMT_TOKEN`: access token (Bearer prefix optional)
    ///
    /// Returns an error if either variable is missing or empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sqlstmt::HttpPipeline;
    ///
    /// let pipeline = HttpPipeline::from_env().expect("missing SQLSTMT_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var("SQLSTMT_PIPELINE_URL")
            .map_err(|_| "missing SQLSTMT_PIPELINE_URL environment variable".to_owned())?;
        let token = std::env::var("SQLSTMT_TOKEN")
            .map_err(|_| "missing SQLSTMT_TOKEN environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("SQLSTMT_PIPELINE_URL is set but empty".to_owned());
        }
        if token.trim().is_empty() {
            return Err("SQLSTMT_TOKEN is set but empty".to_owned());
        }
        Ok(Self::new_bearer(url, token))
    }

    /// Applies client options such as timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Whether a server-side stream is currently open.
    pub fn has_stream(&self) -> bool {
        self.baton.is_some()
    }

    /// Closes the server-side stream, dropping every stored command.
    pub async fn close_stream(&mut self) -> Result<()> {
        if self.baton.is_none() {
            self.reset_stream();
            return Ok(());
        }
        let outcome = self.send(vec![Request::Close {}]).await;
        self.reset_stream();
        outcome.map(drop)
    }

    fn reset_stream(&mut self) {
        self.baton = None;
        self.base_url = None;
        self.stored.clear();
    }

    fn endpoint(&self) -> String {
        match &self.base_url {
            Some(base) => format!("{}/v2/pipeline", base.trim_end_matches('/')),
            None => self.pipeline_url.clone(),
        }
    }

    /// Sends `requests` on the current stream and checks every per-request
    /// result. The first failing request is reported as a server error.
    async fn send(&mut self, requests: Vec<Request>) -> Result<Vec<Option<serde_json::Value>>> {
        let kinds: Vec<&'static str> = requests.iter().map(Request::response_kind).collect();
        let payload = PipelineRequest {
            baton: self.baton.clone(),
            requests,
        };
        let response = self.send_pipeline_with_retry(&payload).await?;
        self.baton = response.baton;
        if response.base_url.is_some() {
            self.base_url = response.base_url;
        }

        if response.results.len() != kinds.len() {
            return Err(StmtError::Decode(format!(
                "result count mismatch: expected {}, got {}",
                kinds.len(),
                response.results.len()
            )));
        }

        response
            .results
            .into_iter()
            .zip(kinds)
            .enumerate()
            .map(|(index, (result, kind))| into_response(result, index, kind))
            .collect()
    }

    async fn send_pipeline_with_retry(
        &self,
        payload: &PipelineRequest,
    ) -> Result<wire::PipelineResponse> {
        let url = self.endpoint();
        let mut attempt = 0usize;
        loop {
            let response = self
                .http
                .post(&url)
                .header(header::AUTHORIZATION, &self.token)
                .header(header::CONTENT_TYPE, "application/json")
                .timeout(Duration::from_millis(self.options.timeout_ms))
                .json(payload)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.map_err(StmtError::Transport)?;

                    if !status.is_success() {
                        if should_retry_status(status) && attempt < self.options.max_retries {
                            self.wait_before_retry(attempt).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(StmtError::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }

                    return serde_json::from_str::<wire::PipelineResponse>(&body).map_err(|err| {
                        StmtError::Decode(format!(
                            "invalid pipeline response JSON: {err}; body: {body}"
                        ))
                    });
                }
                Err(err) => {
                    if should_retry_transport(&err) && attempt < self.options.max_retries {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(StmtError::Transport(err));
                }
            }
        }
    }

    /// Exponential backoff before the next retry attempt.
    async fn wait_before_retry(&self, attempt: usize) {
        let exp = attempt.min(16) as u32;
        let multiplier = 1u64 << exp;
        let delay_ms = self.options.retry_backoff_ms.saturating_mul(multiplier);

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying pipeline request after {} ms", delay_ms);

        sleep(Duration::from_millis(delay_ms)).await;
    }

    fn allocate_sql_id(&mut self) -> i32 {
        let id = self.next_sql_id;
        self.next_sql_id = self.next_sql_id.wrapping_add(1);
        id
    }
}

impl Protocol for HttpPipeline {
    async fn prepare(&mut self, request: &PrepareRequest) -> Result<Description> {
        if request.sql.trim().is_empty() {
            return Err(StmtError::Server(ServerError::new("empty statement")));
        }

        let Some(name) = &request.name else {
            let mut results = self
                .send(vec![Request::Describe {
                    sql: Some(request.sql.clone()),
                    sql_id: None,
                }])
                .await?;
            let describe = take_result::<wire::DescribeResult>(&mut results, 0)?;
            return Ok(decode_description(describe));
        };

        let mut requests = Vec::with_capacity(3);
        let previous = self.stored.remove(name);
        if let Some(previous) = previous {
            requests.push(Request::CloseSql { sql_id: previous });
        }
        let sql_id = self.allocate_sql_id();
        requests.push(Request::StoreSql {
            sql_id,
            sql: request.sql.clone(),
        });
        requests.push(Request::Describe {
            sql: None,
            sql_id: Some(sql_id),
        });
        let describe_index = requests.len() - 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(name = %name, sql_id, "storing named command");

        let outcome = self.send(requests).await;
        match &outcome {
            // The stream ran the requests, so the new id may be stored even
            // when describe failed; keep it reachable for `close_prepared`.
            Ok(_) | Err(StmtError::Server(_)) => {
                self.stored.insert(name.clone(), sql_id);
            }
            Err(_) => {
                if let Some(previous) = previous {
                    self.stored.insert(name.clone(), previous);
                }
            }
        }
        let mut results = outcome?;
        let describe = take_result::<wire::DescribeResult>(&mut results, describe_index)?;
        Ok(decode_description(describe))
    }

    async fn execute_prepared(
        &mut self,
        request: &PrepareRequest,
        params: &Params,
    ) -> Result<Execution> {
        let sql = match request.name.as_ref().and_then(|name| self.stored.get(name)) {
            Some(&sql_id) => SqlRef::Stored(sql_id),
            None => SqlRef::Text(&request.sql),
        };
        let stmt = build_execute_statement(sql, params, true)?;
        let mut results = self.send(vec![Request::Execute { stmt }]).await?;
        let result = take_result::<wire::ExecuteResult>(&mut results, 0)?;

        Ok(Execution {
            outcome: decode_outcome(result)?,
            warnings: WarningChain::new(),
        })
    }

    async fn execute_simple(&mut self, sql: &str) -> Result<SimpleExecution> {
        let text = StatementText::parse(sql)?;
        let params = Params::default();
        let steps = text
            .statements()
            .enumerate()
            .map(|(index, statement)| {
                Ok(BatchStep {
                    condition: index
                        .checked_sub(1)
                        .map(|previous| BatchCondition::Ok { step: previous as u32 }),
                    stmt: build_execute_statement(SqlRef::Text(statement), &params, true)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let expected = steps.len();

        let mut results = self
            .send(vec![Request::Batch {
                batch: Batch { steps },
            }])
            .await?;
        let batch = take_result::<wire::BatchResult>(&mut results, 0)?;

        let mut errors = batch.step_errors.into_iter();
        let mut step_results = batch.step_results.into_iter();
        let mut outcomes = Vec::with_capacity(expected);
        for step in 0..expected {
            if let Some(error) = errors.next().flatten() {
                return Err(StmtError::Server(decode_server_error(error)));
            }
            let result = step_results.next().flatten().ok_or_else(|| {
                StmtError::Decode(format!("batch step {step} was not executed"))
            })?;
            outcomes.push(decode_outcome(result)?);
        }

        Ok(SimpleExecution {
            outcomes,
            warnings: WarningChain::new(),
        })
    }

    async fn close_prepared(&mut self, request: &PrepareRequest) -> Result<()> {
        let Some(sql_id) = request.name.as_ref().and_then(|name| self.stored.remove(name)) else {
            return Ok(());
        };
        self.send(vec![Request::CloseSql { sql_id }]).await.map(drop)
    }

    async fn cancel(&mut self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!("closing pipeline stream to cancel");

        self.close_stream().await
    }
}

fn into_response(
    result: wire::PipelineResult,
    request_index: usize,
    expected_kind: &str,
) -> Result<Option<serde_json::Value>> {
    match result.kind.as_str() {
        "ok" => {
            let response = result.response.ok_or_else(|| {
                StmtError::Decode(format!(
                    "missing response payload for request {request_index}"
                ))
            })?;
            if response.kind != expected_kind {
                return Err(StmtError::Decode(format!(
                    "expected {expected_kind} response at request {request_index}, got '{}'",
                    response.kind
                )));
            }
            Ok(response.result)
        }
        "error" => {
            let error = result.error.ok_or_else(|| {
                StmtError::Decode(format!("missing error payload for request {request_index}"))
            })?;
            Err(StmtError::Server(decode_server_error(error)))
        }
        other => Err(StmtError::Decode(format!(
            "unknown pipeline result type '{other}' at request {request_index}"
        ))),
    }
}

fn take_result<T: DeserializeOwned>(
    results: &mut [Option<serde_json::Value>],
    request_index: usize,
) -> Result<T> {
    let value = results
        .get_mut(request_index)
        .and_then(Option::take)
        .ok_or_else(|| {
            StmtError::Decode(format!(
                "missing result payload at request {request_index}"
            ))
        })?;
    serde_json::from_value(value).map_err(|err| {
        StmtError::Decode(format!(
            "invalid result payload at request {request_index}: {err}"
        ))
    })
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn should_retry_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_request() || err.is_body() || err.is_connect()
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
