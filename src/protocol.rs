//! Narrow contract between the statement core and a protocol layer.

use std::future::Future;

use crate::{Col, Params, Result, ResultOutcome, TypeName, WarningChain};

/// Parse+describe request for one statement text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrepareRequest {
    /// Server-side name; `None` selects the unnamed command slot.
    pub name: Option<String>,
    pub sql: String,
    /// Declared parameter types. Empty means "infer / none".
    pub param_types: Vec<TypeName>,
}

impl PrepareRequest {
    pub fn new(name: Option<String>, sql: impl Into<String>, param_types: Vec<TypeName>) -> Self {
        Self {
            name,
            sql: sql.into(),
            param_types,
        }
    }
}

/// What the server said about a prepared statement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Description {
    pub columns: Vec<Col>,
    pub param_types: Vec<TypeName>,
    pub warnings: WarningChain,
}

/// Result of a bind+execute round trip.
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub outcome: ResultOutcome,
    pub warnings: WarningChain,
}

/// Result of a simple-mode round trip: one outcome per embedded statement,
/// in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimpleExecution {
    pub outcomes: Vec<ResultOutcome>,
    pub warnings: WarningChain,
}

/// Protocol layer driven by the statement core.
///
/// Implementations report server-side rejections as
/// [`crate::StmtError::Server`]; the core re-tags them as prepare or execute
/// failures. Every call is one request/response cycle and the core never
/// issues a call before the previous one has finished.
pub trait Protocol: Send {
    /// Parse and describe `request`.
    fn prepare(&mut self, request: &PrepareRequest)
        -> impl Future<Output = Result<Description>> + Send;

    /// Bind `params` to a prepared statement and run it.
    fn execute_prepared(
        &mut self,
        request: &PrepareRequest,
        params: &Params,
    ) -> impl Future<Output = Result<Execution>> + Send;

    /// Run a multi-statement text as one opaque unit.
    fn execute_simple(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<SimpleExecution>> + Send;

    /// Release server-side resources held for a prepared statement.
    fn close_prepared(
        &mut self,
        request: &PrepareRequest,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Ask the server to abandon whatever is in flight.
    fn cancel(&mut self) -> impl Future<Output = Result<()>> + Send;
}
