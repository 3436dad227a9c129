use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct PipelineRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baton: Option<String>,
    pub requests: Vec<Request>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Execute {
        stmt: ExecuteStatement,
    },
    Batch {
        batch: Batch,
    },
    Describe {
        #[serde(skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sql_id: Option<i32>,
    },
    StoreSql {
        sql_id: i32,
        sql: String,
    },
    CloseSql {
        sql_id: i32,
    },
    Close {},
}

impl Request {
    /// Response `type` the server answers this request with.
    pub fn response_kind(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Batch { .. } => "batch",
            Self::Describe { .. } => "describe",
            Self::StoreSql { .. } => "store_sql",
            Self::CloseSql { .. } => "close_sql",
            Self::Close {} => "close",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecuteStatement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_args: Option<Vec<NamedArg>>,
    pub want_rows: bool,
}

#[derive(Debug, Serialize)]
pub struct NamedArg {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Serialize)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

#[derive(Debug, Serialize)]
pub struct BatchStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BatchCondition>,
    pub stmt: ExecuteStatement,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCondition {
    Ok { step: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null {},
    Integer { value: String },
    Float { value: String },
    Text { value: String },
    Blob { base64: String },
}

#[derive(Debug, Deserialize)]
pub struct PipelineResponse {
    #[serde(default)]
    pub baton: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub results: Vec<PipelineResult>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineResult {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub response: Option<ResponseEnvelope>,
    #[serde(default)]
    pub error: Option<PipelineError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PipelineError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Shape depends on `kind`; decoded by the caller.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub cols: Vec<Col>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    /// Absent when the server does not track affected rows.
    #[serde(default)]
    pub affected_row_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DescribeResult {
    #[serde(default)]
    pub cols: Vec<Col>,
}

#[derive(Debug, Deserialize)]
pub struct BatchResult {
    #[serde(default)]
    pub step_results: Vec<Option<ExecuteResult>>,
    #[serde(default)]
    pub step_errors: Vec<Option<PipelineError>>,
}

#[derive(Debug, Deserialize)]
pub struct Col {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decltype: Option<String>,
}
