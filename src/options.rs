/// Configures HTTP timeout and retry behavior of [`crate::HttpPipeline`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 0,
            retry_backoff_ms: 250,
        }
    }
}

/// Per-statement execution settings.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatementOptions {
    /// Cancel a round trip that takes longer than this. `None` waits forever.
    pub query_timeout_ms: Option<u64>,
    /// Keep at most this many rows of a row set; `0` keeps all of them.
    pub max_rows: usize,
}

impl StatementOptions {
    pub fn with_query_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.query_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}
