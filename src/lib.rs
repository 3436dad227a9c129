//! `sqlstmt` is the statement-execution core of an async SQL client.
//!
//! A [`Statement`] accepts raw SQL text and picks how to run it:
//! - one statement: prepare on the unnamed slot, then execute with no
//!   bind values
//! - several statements, or a batch queued with
//!   [`Statement::add_batch`]: one simple-mode round trip
//!
//! Results, update counts, generated keys and warnings are exposed on the
//! statement afterwards. The wire side is any [`Protocol`]; [`HttpPipeline`]
//! speaks an HTTP SQL pipeline endpoint.

mod batch;
mod decode;
mod error;
mod generated_keys;
mod lexer;
mod mode;
mod options;
mod params;
mod pipeline;
mod prepared;
mod protocol;
mod sql_text;
mod statement;
mod types;
mod value;
mod warning;
mod wire;

pub use batch::{BatchBuffer, ResultBatches};
pub use error::{ServerError, StmtError};
pub use generated_keys::GeneratedKeys;
pub use mode::ExecutionMode;
pub use options::{ClientOptions, StatementOptions};
pub use params::Params;
pub use pipeline::HttpPipeline;
pub use prepared::{CommandState, PreparedCommand};
pub use protocol::{Description, Execution, PrepareRequest, Protocol, SimpleExecution};
pub use sql_text::{StatementKind, StatementText};
pub use statement::{CancelHandle, Statement};
pub use types::{Col, ResultOutcome, RowRef, RowSet, TypeName, UpdateCount};
pub use value::Value;
pub use warning::{Warning, WarningChain};

pub type Result<T> = std::result::Result<T, StmtError>;
