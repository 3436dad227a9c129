//! Prepared-command lifecycle: `Unprepared → Prepared → Executed → Closed`.

use crate::{
    protocol::{Execution, PrepareRequest, Protocol},
    Col, Params, Result, StmtError, TypeName, WarningChain,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Unprepared,
    Prepared,
    Executed,
    Closed,
}

/// One parse+describe cycle against the server and the executions that
/// follow it.
#[derive(Debug)]
pub struct PreparedCommand {
    request: PrepareRequest,
    columns: Vec<Col>,
    described_param_types: Vec<TypeName>,
    state: CommandState,
}

impl PreparedCommand {
    /// Command using the server's unnamed statement slot.
    pub fn unnamed(sql: impl Into<String>) -> Self {
        Self::from_request(PrepareRequest::new(None, sql, Vec::new()))
    }

    pub fn named(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::from_request(PrepareRequest::new(Some(name.into()), sql, Vec::new()))
    }

    pub fn from_request(request: PrepareRequest) -> Self {
        Self {
            request,
            columns: Vec::new(),
            described_param_types: Vec::new(),
            state: CommandState::Unprepared,
        }
    }

    pub fn request(&self) -> &PrepareRequest {
        &self.request
    }

    pub fn sql(&self) -> &str {
        &self.request.sql
    }

    pub fn name(&self) -> Option<&str> {
        self.request.name.as_deref()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, CommandState::Prepared | CommandState::Executed)
    }

    /// Output columns reported by the describe step.
    pub fn columns(&self) -> &[Col] {
        &self.columns
    }

    /// Parameter types reported by the describe step.
    pub fn param_types(&self) -> &[TypeName] {
        &self.described_param_types
    }

    /// Issues the parse+describe round trip and stores the described columns.
    ///
    /// A command that is still open must be closed before it is prepared
    /// again.
    pub async fn prepare<P: Protocol>(&mut self, protocol: &mut P) -> Result<WarningChain> {
        match self.state {
            CommandState::Unprepared => {}
            CommandState::Closed => {
                return Err(StmtError::InvalidState("command is closed".to_owned()))
            }
            CommandState::Prepared | CommandState::Executed => {
                return Err(StmtError::InvalidState(
                    "command must be closed before it is prepared again".to_owned(),
                ))
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(name = ?self.request.name, sql = %self.request.sql, "preparing command");

        let description = protocol
            .prepare(&self.request)
            .await
            .map_err(|err| match err {
                StmtError::Server(error) => StmtError::Prepare {
                    error,
                    warnings: WarningChain::new(),
                },
                other => other,
            })?;

        self.columns = description.columns;
        self.described_param_types = description.param_types;
        self.state = CommandState::Prepared;
        Ok(description.warnings)
    }

    /// Binds `params` and runs the prepared statement.
    pub async fn execute_statement<P: Protocol>(
        &mut self,
        protocol: &mut P,
        params: &Params,
    ) -> Result<Execution> {
        match self.state {
            CommandState::Prepared | CommandState::Executed => {}
            CommandState::Unprepared => {
                return Err(StmtError::InvalidState(
                    "command has not been prepared".to_owned(),
                ))
            }
            CommandState::Closed => {
                return Err(StmtError::InvalidState("command is closed".to_owned()))
            }
        }

        let execution = protocol
            .execute_prepared(&self.request, params)
            .await
            .map_err(|err| match err {
                StmtError::Server(error) => StmtError::Execute {
                    error,
                    warnings: WarningChain::new(),
                },
                other => other,
            })?;

        self.state = CommandState::Executed;
        Ok(execution)
    }

    /// Releases the server-side plan. Idempotent; the command is `Closed`
    /// afterwards even if the server call fails.
    pub async fn close<P: Protocol>(&mut self, protocol: &mut P) -> Result<()> {
        let was_open = self.is_open();
        self.state = CommandState::Closed;
        if was_open {
            protocol.close_prepared(&self.request).await?;
        }
        Ok(())
    }

    /// Like [`PreparedCommand::close`], but sends the release even when the
    /// prepare never completed locally: an interrupted prepare may still
    /// have reached the server.
    pub async fn force_close<P: Protocol>(&mut self, protocol: &mut P) -> Result<()> {
        let already_closed = self.state == CommandState::Closed;
        self.state = CommandState::Closed;
        if already_closed {
            return Ok(());
        }
        protocol.close_prepared(&self.request).await
    }

    /// Marks the command closed without a server round trip.
    pub fn abandon(&mut self) {
        self.state = CommandState::Closed;
    }
}

#[cfg(feature = "tracing")]
impl Drop for PreparedCommand {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::debug!(name = ?self.request.name, "prepared command dropped without close");
        }
    }
}
