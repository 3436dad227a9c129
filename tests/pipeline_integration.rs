use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value as JsonValue};
use sqlstmt::{
    ClientOptions, CommandState, GeneratedKeys, HttpPipeline, Params, PrepareRequest,
    PreparedCommand, Protocol, Statement, StatementOptions, StmtError, UpdateCount, Value,
};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: JsonValue,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body,
            delay: Duration::from_millis(0),
        }
    }

    fn ok(body: JsonValue) -> Self {
        Self::json(StatusCode::OK, body)
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<JsonValue>>>,
    hits: Arc<AtomicUsize>,
}

async fn pipeline_handler(State(state): State<MockState>, body: String) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(parsed) = serde_json::from_str::<JsonValue>(&body) {
        state
            .requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .push(parsed);
    }

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    (response.status, Json(response.body))
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<JsonValue>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn pipeline_url(&self) -> String {
        format!("{}/v2/pipeline", self.base_url)
    }

    fn request(&self, index: usize) -> JsonValue {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .get(index)
            .cloned()
            .expect("request must have been recorded")
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/v2/pipeline", post(pipeline_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        requests: state.requests,
        task,
    }
}

fn ok(kind: &str, result: JsonValue) -> JsonValue {
    json!({ "type": "ok", "response": { "type": kind, "result": result } })
}

fn ok_empty(kind: &str) -> JsonValue {
    json!({ "type": "ok", "response": { "type": kind } })
}

fn pipeline_body(baton: Option<&str>, results: Vec<JsonValue>) -> JsonValue {
    json!({ "baton": baton, "base_url": null, "results": results })
}

fn describe_users() -> JsonValue {
    ok(
        "describe",
        json!({
            "params": [],
            "cols": [
                { "name": "id", "decltype": "INTEGER" },
                { "name": "name", "decltype": "TEXT" }
            ],
            "is_explain": false,
            "is_readonly": true
        }),
    )
}

fn describe_nothing() -> JsonValue {
    ok("describe", json!({ "params": [], "cols": [] }))
}

fn users_rows() -> JsonValue {
    ok(
        "execute",
        json!({
            "cols": [
                { "name": "id", "decltype": "INTEGER" },
                { "name": "name", "decltype": "TEXT" }
            ],
            "rows": [
                [
                    { "type": "integer", "value": "1" },
                    { "type": "text", "value": "Kit" }
                ],
                [
                    { "type": "integer", "value": "2" },
                    { "type": "null" }
                ]
            ],
            "affected_row_count": 0
        }),
    )
}

fn affected(count: Option<u64>) -> JsonValue {
    ok("execute", json!({ "cols": [], "rows": [], "affected_row_count": count }))
}

#[tokio::test]
async fn single_statement_describes_then_executes_on_one_stream() {
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(Some("b1"), vec![describe_users()])),
        MockResponse::ok(pipeline_body(Some("b2"), vec![users_rows()])),
    ])
    .await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let rows = stmt
        .execute_query("SELECT id, name FROM users")
        .await
        .expect("query must succeed");

    assert_eq!(rows.len(), 2);
    let first = rows.row(0).expect("first row");
    assert_eq!(first.get_i64("id"), Some(1));
    assert_eq!(first.get_text("name"), Some("Kit"));
    assert_eq!(rows.rows[1][1], Value::Null);
    assert_eq!(stmt.columns().len(), 2);
    assert!(stmt.protocol().has_stream());

    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    let describe = server.request(0);
    assert!(describe.get("baton").is_none());
    assert_eq!(describe["requests"][0]["type"], "describe");
    assert_eq!(describe["requests"][0]["sql"], "SELECT id, name FROM users");

    let execute = server.request(1);
    assert_eq!(execute["baton"], "b1");
    assert_eq!(execute["requests"][0]["type"], "execute");
    assert_eq!(execute["requests"][0]["stmt"]["want_rows"], true);
    assert!(execute["requests"][0]["stmt"].get("args").is_none());
}

#[tokio::test]
async fn multi_statement_text_runs_as_one_conditional_batch() {
    let batch = ok(
        "batch",
        json!({
            "step_results": [
                { "cols": [], "rows": [], "affected_row_count": 3 },
                { "cols": [], "rows": [] }
            ],
            "step_errors": [null, null]
        }),
    );
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(None, vec![batch]))]).await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let has_rows = stmt
        .execute("UPDATE t SET a = 1; CREATE INDEX i ON t (a)")
        .await
        .expect("batch must succeed");

    assert!(!has_rows);
    assert_eq!(stmt.update_count(), Some(UpdateCount::Rows(3)));
    assert!(!stmt.more_results());
    assert_eq!(stmt.update_count(), Some(UpdateCount::SuccessNoInfo));
    assert!(!stmt.more_results());
    assert_eq!(stmt.update_count(), None);

    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    let request = server.request(0);
    let steps = &request["requests"][0]["batch"]["steps"];
    assert_eq!(request["requests"][0]["type"], "batch");
    assert_eq!(steps[0]["stmt"]["sql"], "UPDATE t SET a = 1");
    assert!(steps[0].get("condition").is_none());
    assert_eq!(steps[1]["stmt"]["sql"], "CREATE INDEX i ON t (a)");
    assert_eq!(steps[1]["condition"], json!({ "type": "ok", "step": 0 }));
}

#[tokio::test]
async fn execute_batch_maps_missing_counts_to_success_no_info() {
    let batch = ok(
        "batch",
        json!({
            "step_results": [
                { "cols": [], "rows": [], "affected_row_count": 1 },
                { "cols": [], "rows": [] },
                { "cols": [], "rows": [], "affected_row_count": 2 }
            ],
            "step_errors": [null, null, null]
        }),
    );
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(None, vec![batch]))]).await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    stmt.add_batch("INSERT INTO t VALUES (1)").expect("must queue");
    stmt.add_batch("CREATE TABLE u (x INTEGER)").expect("must queue");
    stmt.add_batch("DELETE FROM t WHERE x < 3").expect("must queue");

    let counts = stmt.execute_batch().await.expect("batch must succeed");
    assert_eq!(
        counts,
        [
            UpdateCount::Rows(1),
            UpdateCount::SuccessNoInfo,
            UpdateCount::Rows(2)
        ]
    );

    let again = stmt.execute_batch().await.expect("empty batch succeeds");
    assert!(again.is_empty());
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_step_error_surfaces_as_execute_error() {
    let batch = ok(
        "batch",
        json!({
            "step_results": [
                { "cols": [], "rows": [], "affected_row_count": 1 },
                null
            ],
            "step_errors": [
                null,
                { "message": "near \"INSER\": syntax error", "code": "SQLITE_ERROR" }
            ]
        }),
    );
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(None, vec![batch]))]).await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    stmt.add_batch("INSERT INTO t VALUES (1)").expect("must queue");
    stmt.add_batch("INSER INTO t VALUES (2)").expect("must queue");

    let err = stmt.execute_batch().await.expect_err("batch must fail");
    match err {
        StmtError::Execute { error, .. } => {
            assert_eq!(error.code.as_deref(), Some("SQLITE_ERROR"));
            assert!(error.message.contains("INSER"));
        }
        other => panic!("expected execute error, got {other:?}"),
    }
}

#[tokio::test]
async fn describe_rejection_is_a_prepare_error() {
    let rejected = json!({
        "type": "error",
        "error": { "message": "no such table: users", "code": "SQLITE_ERROR" }
    });
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(None, vec![rejected]))]).await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let err = stmt
        .execute("SELECT * FROM users")
        .await
        .expect_err("prepare must fail");

    match err {
        StmtError::Prepare { error, .. } => assert_eq!(error.message, "no such table: users"),
        other => panic!("expected prepare error, got {other:?}"),
    }
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_statement_is_rejected_without_a_round_trip() {
    let server = spawn_server(vec![]).await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let err = stmt
        .execute("  -- nothing here\n")
        .await
        .expect_err("empty text must fail");

    assert!(matches!(err, StmtError::Prepare { .. }));
    assert_eq!(server.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generated_keys_append_returning_and_expose_rows() {
    let keys = ok(
        "execute",
        json!({
            "cols": [{ "name": "id", "decltype": "INTEGER" }],
            "rows": [[{ "type": "integer", "value": "41" }]],
            "affected_row_count": 1
        }),
    );
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(Some("b1"), vec![describe_nothing()])),
        MockResponse::ok(pipeline_body(Some("b2"), vec![keys])),
    ])
    .await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let count = stmt
        .execute_update_with_keys(
            "INSERT INTO users (name) VALUES ('Kit')",
            GeneratedKeys::columns(["id"]),
        )
        .await
        .expect("insert must succeed");

    assert_eq!(count, UpdateCount::Rows(1));
    let generated = stmt.generated_keys().expect("keys must be exposed");
    assert_eq!(generated.row(0).and_then(|row| row.get_i64("id")), Some(41));
    assert_eq!(
        server.request(1)["requests"][0]["stmt"]["sql"],
        "INSERT INTO users (name) VALUES ('Kit') RETURNING id"
    );
}

#[tokio::test]
async fn named_command_is_stored_executed_by_id_and_closed() {
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(
            Some("b1"),
            vec![ok_empty("store_sql"), describe_nothing()],
        )),
        MockResponse::ok(pipeline_body(Some("b2"), vec![affected(Some(4))])),
        MockResponse::ok(pipeline_body(Some("b3"), vec![ok_empty("close_sql")])),
    ])
    .await;
    let mut pipeline = HttpPipeline::new(server.pipeline_url(), "token");
    let mut command = PreparedCommand::named("bump", "UPDATE t SET n = n + ?");

    command.prepare(&mut pipeline).await.expect("prepare must succeed");
    let execution = command
        .execute_statement(&mut pipeline, &Params::positional([Value::integer(1)]))
        .await
        .expect("execute must succeed");
    assert_eq!(execution.outcome.update_count(), Some(UpdateCount::Rows(4)));

    command.close(&mut pipeline).await.expect("close must succeed");
    assert_eq!(command.state(), CommandState::Closed);

    let store = server.request(0);
    assert_eq!(store["requests"][0]["type"], "store_sql");
    assert_eq!(store["requests"][0]["sql"], "UPDATE t SET n = n + ?");
    let sql_id = store["requests"][0]["sql_id"].clone();
    assert_eq!(store["requests"][1]["type"], "describe");
    assert_eq!(store["requests"][1]["sql_id"], sql_id);

    let execute = server.request(1);
    assert_eq!(execute["baton"], "b1");
    assert_eq!(execute["requests"][0]["stmt"]["sql_id"], sql_id);
    assert!(execute["requests"][0]["stmt"].get("sql").is_none());
    assert_eq!(
        execute["requests"][0]["stmt"]["args"],
        json!([{ "type": "integer", "value": "1" }])
    );

    let close = server.request(2);
    assert_eq!(close["baton"], "b2");
    assert_eq!(close["requests"][0], json!({ "type": "close_sql", "sql_id": sql_id }));
}

#[tokio::test]
async fn failed_describe_keeps_the_stored_sql_closable() {
    let rejected = json!({
        "type": "error",
        "error": { "message": "no such table: missing", "code": "SQLITE_ERROR" }
    });
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(
            Some("b1"),
            vec![ok_empty("store_sql"), rejected],
        )),
        MockResponse::ok(pipeline_body(Some("b2"), vec![ok_empty("close_sql")])),
    ])
    .await;
    let mut pipeline = HttpPipeline::new(server.pipeline_url(), "token");
    let request = PrepareRequest::new(Some("s1".to_owned()), "SELECT * FROM missing", Vec::new());

    let err = pipeline.prepare(&request).await.expect_err("describe must fail");
    assert!(matches!(err, StmtError::Server(_)));

    pipeline
        .close_prepared(&request)
        .await
        .expect("close must succeed");

    let sql_id = server.request(0)["requests"][0]["sql_id"].clone();
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert_eq!(
        server.request(1)["requests"][0],
        json!({ "type": "close_sql", "sql_id": sql_id })
    );
}

#[tokio::test]
async fn unsent_reprepare_keeps_the_previous_stored_sql() {
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(
            Some("b1"),
            vec![ok_empty("store_sql"), describe_nothing()],
        )),
        MockResponse::json(StatusCode::UNAUTHORIZED, json!({"error": "expired"})),
        MockResponse::ok(pipeline_body(Some("b2"), vec![ok_empty("close_sql")])),
    ])
    .await;
    let mut pipeline = HttpPipeline::new(server.pipeline_url(), "token");
    let first = PrepareRequest::new(Some("s1".to_owned()), "SELECT 1", Vec::new());
    let second = PrepareRequest::new(Some("s1".to_owned()), "SELECT 2", Vec::new());

    pipeline.prepare(&first).await.expect("prepare must succeed");
    let err = pipeline.prepare(&second).await.expect_err("request must fail");
    assert!(matches!(err, StmtError::Http { status: 401, .. }));

    pipeline
        .close_prepared(&first)
        .await
        .expect("close must succeed");

    let sql_id = server.request(0)["requests"][0]["sql_id"].clone();
    assert_eq!(
        server.request(2)["requests"][0],
        json!({ "type": "close_sql", "sql_id": sql_id })
    );
}

#[tokio::test]
async fn named_params_are_sent_without_prefix() {
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(Some("b1"), vec![describe_users()])),
        MockResponse::ok(pipeline_body(Some("b2"), vec![users_rows()])),
    ])
    .await;
    let mut pipeline = HttpPipeline::new(server.pipeline_url(), "token");
    let mut command = PreparedCommand::unnamed("SELECT id, name FROM users WHERE name = :name");

    command.prepare(&mut pipeline).await.expect("prepare must succeed");
    let execution = command
        .execute_statement(&mut pipeline, &Params::named([(":name", Value::text("Kit"))]))
        .await
        .expect("execute must succeed");
    assert!(execution.outcome.is_row_set());

    let stmt = &server.request(1)["requests"][0]["stmt"];
    assert!(stmt.get("args").is_none());
    assert_eq!(
        stmt["named_args"],
        json!([{ "name": "name", "value": { "type": "text", "value": "Kit" } }])
    );
}

#[tokio::test]
async fn retries_on_retryable_http_status() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})),
        MockResponse::ok(pipeline_body(None, vec![describe_nothing()])),
        MockResponse::ok(pipeline_body(None, vec![affected(Some(2))])),
    ])
    .await;

    let pipeline = HttpPipeline::new(server.pipeline_url(), "token").with_options(ClientOptions {
        timeout_ms: 1_000,
        max_retries: 1,
        retry_backoff_ms: 1,
    });
    let mut stmt = Statement::new(pipeline);

    let count = stmt
        .execute_update("UPDATE users SET name = 'Renamed'")
        .await
        .expect("request must succeed after retry");

    assert_eq!(count, UpdateCount::Rows(2));
    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_retryable_status_surfaces_http_error() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::UNAUTHORIZED,
        json!({"error": "bad token"}),
    )])
    .await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));

    let err = stmt.execute("SELECT 1").await.expect_err("must fail");
    match err {
        StmtError::Http { status, .. } => assert_eq!(status, 401),
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_timeout_surfaces_transport_error() {
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(
        None,
        vec![describe_nothing()],
    ))
    .with_delay(Duration::from_millis(150))])
    .await;

    let pipeline = HttpPipeline::new(server.pipeline_url(), "token").with_options(ClientOptions {
        timeout_ms: 20,
        max_retries: 0,
        retry_backoff_ms: 1,
    });
    let mut stmt = Statement::new(pipeline);

    let err = stmt
        .execute("DELETE FROM users")
        .await
        .expect_err("request must timeout");

    match err {
        StmtError::Transport(inner) => assert!(inner.is_timeout()),
        other => panic!("expected transport timeout error, got {other:?}"),
    }
}

#[tokio::test]
async fn query_timeout_interrupts_a_slow_round_trip() {
    let server = spawn_server(vec![MockResponse::ok(pipeline_body(
        None,
        vec![describe_nothing()],
    ))
    .with_delay(Duration::from_millis(500))])
    .await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"))
        .with_options(StatementOptions::default().with_query_timeout_ms(30));

    let err = stmt
        .execute("SELECT 1")
        .await
        .expect_err("execution must time out");

    assert!(matches!(err, StmtError::Timeout { timeout_ms: 30 }));
    assert!(stmt.result_set().is_none());
    assert!(!stmt.protocol().has_stream());
}

#[tokio::test]
async fn closing_the_stream_sends_close_with_baton() {
    let server = spawn_server(vec![
        MockResponse::ok(pipeline_body(Some("b1"), vec![describe_nothing()])),
        MockResponse::ok(pipeline_body(Some("b2"), vec![affected(Some(1))])),
        MockResponse::ok(pipeline_body(None, vec![ok_empty("close")])),
    ])
    .await;
    let mut stmt = Statement::new(HttpPipeline::new(server.pipeline_url(), "token"));
    stmt.execute("DELETE FROM t WHERE id = 1")
        .await
        .expect("delete must succeed");
    stmt.close().await.expect("close must succeed");

    let mut pipeline = stmt.into_protocol();
    pipeline.close_stream().await.expect("stream close must succeed");

    assert!(!pipeline.has_stream());
    let close = server.request(2);
    assert_eq!(close["baton"], "b2");
    assert_eq!(close["requests"][0]["type"], "close");
    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
}
