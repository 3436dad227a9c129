use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::sync::{futures::Notified, Notify};

use crate::{
    batch::{BatchBuffer, ResultBatches},
    protocol::Protocol,
    Col, ExecutionMode, GeneratedKeys, Params, PreparedCommand, Result, ResultOutcome, RowSet,
    StatementOptions, StatementText, StmtError, UpdateCount, WarningChain,
};

/// Cancels the in-flight execution of the [`Statement`] it was taken from.
///
/// Cloneable and usable from any task. Cancelling while nothing is in flight
/// has no effect on later executions.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    notify: Arc<Notify>,
}

impl CancelHandle {
    /// Interrupts the execution currently in flight, if any.
    pub fn cancel(&self) {
        self.notify.notify_waiters();
    }
}

enum Interrupted {
    Cancelled,
    TimedOut { timeout_ms: u64 },
}

impl From<Interrupted> for StmtError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => StmtError::Cancelled,
            Interrupted::TimedOut { timeout_ms } => StmtError::Timeout { timeout_ms },
        }
    }
}

/// Races `round_trip` against cancellation and the optional timeout.
///
/// `cancelled` must already be enabled so that a cancel issued before the
/// first poll is still observed.
async fn guarded<F, T>(
    cancelled: Pin<&mut Notified<'_>>,
    timeout_ms: Option<u64>,
    round_trip: F,
) -> std::result::Result<Result<T>, Interrupted>
where
    F: Future<Output = Result<T>>,
{
    let deadline = async {
        match timeout_ms {
            Some(timeout_ms) => {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                timeout_ms
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(Interrupted::Cancelled),
        timeout_ms = deadline => Err(Interrupted::TimedOut { timeout_ms }),
        result = round_trip => Ok(result),
    }
}

/// Statement execution over a [`Protocol`].
///
/// Single-statement texts run through the extended cycle (prepare, then
/// execute with no bind values); multi-statement texts and batches run in
/// simple mode. Every operation takes `&mut self`, so one instance never has
/// more than one round trip in flight.
#[derive(Debug)]
pub struct Statement<P: Protocol> {
    protocol: P,
    options: StatementOptions,
    command: Option<PreparedCommand>,
    results: ResultBatches,
    generated_keys: Option<RowSet>,
    warnings: WarningChain,
    batch: BatchBuffer,
    cancel: CancelHandle,
    closed: bool,
}

impl<P: Protocol> Statement<P> {
    /// Creates an open statement with default options.
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            options: StatementOptions::default(),
            command: None,
            results: ResultBatches::default(),
            generated_keys: None,
            warnings: WarningChain::new(),
            batch: BatchBuffer::default(),
            cancel: CancelHandle::default(),
            closed: false,
        }
    }

    /// Applies the query timeout and row limit.
    pub fn with_options(mut self, options: StatementOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Gives the protocol back, e.g. to close its stream.
    pub fn into_protocol(self) -> P {
        self.protocol
    }

    /// Handle that cancels this statement's in-flight execution.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Executes `sql`. Returns `true` when the first result is a row set.
    pub async fn execute(&mut self, sql: &str) -> Result<bool> {
        self.execute_with_keys(sql, GeneratedKeys::None).await
    }

    /// Executes `sql`, optionally asking for generated keys.
    ///
    /// When keys are requested the returned rows are exposed through
    /// [`Statement::generated_keys`], the primary result becomes the affected
    /// count, and the return value is `false`.
    pub async fn execute_with_keys(&mut self, sql: &str, keys: GeneratedKeys) -> Result<bool> {
        self.ensure_open()?;
        let mut text = StatementText::parse(sql)?;
        let returning = keys.apply(&mut text)?;
        let mode = ExecutionMode::select(&text);
        self.execute_text(text, mode, returning).await
    }

    /// Executes `sql` and returns its row set.
    pub async fn execute_query(&mut self, sql: &str) -> Result<&RowSet> {
        if !self.execute(sql).await? {
            return Err(StmtError::NoResultSetAvailable);
        }
        self.result_set().ok_or(StmtError::NoResultSetAvailable)
    }

    /// Executes `sql` and returns its affected-row count.
    pub async fn execute_update(&mut self, sql: &str) -> Result<UpdateCount> {
        self.execute_update_with_keys(sql, GeneratedKeys::None).await
    }

    pub async fn execute_update_with_keys(
        &mut self,
        sql: &str,
        keys: GeneratedKeys,
    ) -> Result<UpdateCount> {
        if self.execute_with_keys(sql, keys).await? {
            return Err(StmtError::NoResultCountAvailable);
        }
        self.update_count().ok_or(StmtError::NoResultCountAvailable)
    }

    /// Queues `sql` for the next [`Statement::execute_batch`].
    pub fn add_batch(&mut self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        self.batch.add(StatementText::parse(sql)?);
        Ok(())
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Runs every queued statement in one simple-mode round trip.
    ///
    /// Returns one count per queued statement in queue order. The queue is
    /// consumed: calling again without new [`Statement::add_batch`] calls
    /// returns an empty list without touching the server.
    pub async fn execute_batch(&mut self) -> Result<Vec<UpdateCount>> {
        self.ensure_open()?;
        let Some(text) = self.batch.take() else {
            self.results = ResultBatches::default();
            return Ok(Vec::new());
        };

        self.execute_text(text, ExecutionMode::Simple, false).await?;
        let counts = self.results.update_counts();
        self.results = ResultBatches::default();
        self.release_command().await?;
        Ok(counts)
    }

    /// Current row set, if the current result is one.
    pub fn result_set(&self) -> Option<&RowSet> {
        self.results.first().and_then(ResultOutcome::row_set)
    }

    /// Current affected-row count, if the current result is one.
    pub fn update_count(&self) -> Option<UpdateCount> {
        self.results.first().and_then(ResultOutcome::update_count)
    }

    /// Every outcome of the last execution that has not been skipped yet.
    pub fn results(&self) -> &[ResultOutcome] {
        self.results.outcomes()
    }

    /// Moves to the next result of a multi-statement execution. Returns
    /// `true` when the new current result is a row set.
    pub fn more_results(&mut self) -> bool {
        self.results.advance();
        self.results.first().is_some_and(ResultOutcome::is_row_set)
    }

    /// Rows returned for a generated-keys request.
    pub fn generated_keys(&self) -> Option<&RowSet> {
        self.generated_keys.as_ref()
    }

    /// Output columns described for the current prepared command.
    pub fn columns(&self) -> &[Col] {
        self.command
            .as_ref()
            .map(PreparedCommand::columns)
            .unwrap_or(&[])
    }

    pub fn warnings(&self) -> &WarningChain {
        &self.warnings
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the prepared command and drops every result. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.results = ResultBatches::default();
        self.generated_keys = None;
        self.batch.clear();
        self.release_command().await
    }

    async fn execute_text(
        &mut self,
        text: StatementText,
        mode: ExecutionMode,
        returning: bool,
    ) -> Result<bool> {
        self.results = ResultBatches::default();
        self.generated_keys = None;

        #[cfg(feature = "tracing")]
        tracing::debug!(?mode, statements = text.count(), "executing statement text");

        // Listening starts before the superseded command is closed, so a
        // cancel during that close is not lost.
        let notify = Arc::clone(&self.cancel.notify);
        let mut cancelled = std::pin::pin!(notify.notified());
        cancelled.as_mut().enable();

        let timeout_ms = self.options.query_timeout_ms;
        let protocol = &mut self.protocol;
        let slot = &mut self.command;
        let dispatched = guarded(cancelled, timeout_ms, async move {
            Self::release(protocol, slot).await?;
            Self::dispatch(protocol, slot, mode, text).await
        })
        .await;

        let (mut results, warnings) = match dispatched {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                if let Some(warnings) = err.warnings() {
                    self.warnings.append(warnings.clone());
                }
                return Err(err);
            }
            Err(interrupted) => {
                self.abort().await;
                return Err(interrupted.into());
            }
        };
        self.warnings.append(warnings);

        if returning {
            if let Some(keys) = results.take_first_row_set() {
                if let Some(first) = results.first_mut() {
                    *first = ResultOutcome::Count(keys.len() as i64);
                }
                self.generated_keys = Some(keys);
            }
        }
        for outcome in results.outcomes_mut() {
            if let ResultOutcome::Rows(rows) = outcome {
                rows.truncate(self.options.max_rows);
            }
        }

        self.results = results;
        Ok(self.results.first().is_some_and(ResultOutcome::is_row_set))
    }

    async fn dispatch(
        protocol: &mut P,
        slot: &mut Option<PreparedCommand>,
        mode: ExecutionMode,
        text: StatementText,
    ) -> Result<(ResultBatches, WarningChain)> {
        match mode {
            ExecutionMode::Simple => {
                let expected = text.count();
                let execution = protocol
                    .execute_simple(&text.to_text())
                    .await
                    .map_err(|err| match err {
                        StmtError::Server(error) => StmtError::Execute {
                            error,
                            warnings: WarningChain::new(),
                        },
                        other => other,
                    })?;
                let results = ResultBatches::from_simple(expected, execution.outcomes)?;
                Ok((results, execution.warnings))
            }
            ExecutionMode::Extended => {
                let command = slot.insert(PreparedCommand::unnamed(text.to_text()));
                let prepare_warnings = command.prepare(protocol).await?;

                let execution = match command
                    .execute_statement(protocol, &Params::default())
                    .await
                {
                    Ok(execution) => execution,
                    Err(StmtError::Execute { error, warnings }) => {
                        return Err(StmtError::Execute {
                            error,
                            warnings: WarningChain::chain(prepare_warnings, warnings),
                        })
                    }
                    Err(other) => return Err(other),
                };

                Ok((
                    ResultBatches::from_extended(execution.outcome),
                    WarningChain::chain(prepare_warnings, execution.warnings),
                ))
            }
        }
    }

    /// Propagates a cancellation to the protocol layer and closes the
    /// command that was in flight. Partial results are discarded.
    async fn abort(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("cancelling in-flight execution");

        let acknowledged = self.protocol.cancel().await.is_ok();
        if let Some(mut command) = self.command.take() {
            if acknowledged {
                // Closed locally whatever the server answers.
                if let Err(_err) = command.force_close(&mut self.protocol).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "failed to release cancelled command");
                }
            } else {
                command.abandon();
            }
        }
        self.results = ResultBatches::default();
        self.generated_keys = None;
    }

    async fn release_command(&mut self) -> Result<()> {
        Self::release(&mut self.protocol, &mut self.command).await
    }

    async fn release(protocol: &mut P, slot: &mut Option<PreparedCommand>) -> Result<()> {
        match slot.take() {
            Some(mut command) => command.close(protocol).await,
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StmtError::StatementClosed);
        }
        Ok(())
    }
}
