use crate::StatementText;

/// Protocol path chosen for one top-level execute call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The whole text goes to the server as one unit; one outcome comes back
    /// per embedded statement.
    Simple,
    /// Parse and describe first, then bind and execute a single statement.
    Extended,
}

impl ExecutionMode {
    /// More than one statement needs simple mode. Everything else, including
    /// an empty text, goes through the extended cycle.
    pub fn select(text: &StatementText) -> Self {
        if text.count() > 1 {
            Self::Simple
        } else {
            Self::Extended
        }
    }
}
