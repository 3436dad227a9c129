//! Per-statement outcome aggregation and the batch buffer.

use crate::{Result, ResultOutcome, RowSet, StatementText, StmtError, UpdateCount};

/// Ordered outcomes of one top-level execution, one per executed statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultBatches {
    outcomes: Vec<ResultOutcome>,
    /// Index of the current outcome; earlier ones have been skipped.
    cursor: usize,
}

impl ResultBatches {
    /// Extended mode always produces exactly one outcome.
    pub fn from_extended(outcome: ResultOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
            cursor: 0,
        }
    }

    /// Simple mode must produce one outcome per statement that was sent.
    pub fn from_simple(expected: usize, outcomes: Vec<ResultOutcome>) -> Result<Self> {
        if outcomes.len() != expected {
            return Err(StmtError::Decode(format!(
                "result count mismatch: expected {expected}, got {}",
                outcomes.len()
            )));
        }
        Ok(Self {
            outcomes,
            cursor: 0,
        })
    }

    /// Number of outcomes not yet skipped by [`ResultBatches::advance`].
    pub fn len(&self) -> usize {
        self.outcomes.len() - self.cursor
    }

    /// Whether every outcome has been consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining outcomes in execution order.
    pub fn outcomes(&self) -> &[ResultOutcome] {
        &self.outcomes[self.cursor..]
    }

    /// Mutable view of the remaining outcomes.
    pub fn outcomes_mut(&mut self) -> &mut [ResultOutcome] {
        &mut self.outcomes[self.cursor..]
    }

    /// Current outcome.
    pub fn first(&self) -> Option<&ResultOutcome> {
        self.outcomes.get(self.cursor)
    }

    /// Mutable access to the current outcome.
    pub fn first_mut(&mut self) -> Option<&mut ResultOutcome> {
        self.outcomes.get_mut(self.cursor)
    }

    /// Moves past the current outcome and returns it, exposing the next one.
    pub fn advance(&mut self) -> Option<ResultOutcome> {
        let slot = self.outcomes.get_mut(self.cursor)?;
        self.cursor += 1;
        Some(std::mem::replace(slot, ResultOutcome::CountUnknown))
    }

    /// Takes the first outcome's row set, leaving `CountUnknown` behind.
    pub fn take_first_row_set(&mut self) -> Option<RowSet> {
        let first = self.first_mut()?;
        if !first.is_row_set() {
            return None;
        }
        std::mem::replace(first, ResultOutcome::CountUnknown).into_row_set()
    }

    /// Update counts in execution order. Row sets and unknown counts both
    /// report success without a count; neither is ever rendered as zero.
    pub fn update_counts(&self) -> Vec<UpdateCount> {
        self.outcomes()
            .iter()
            .map(|outcome| outcome.update_count().unwrap_or(UpdateCount::SuccessNoInfo))
            .collect()
    }
}

/// Statements accumulated by `add_batch`, consumed once by `execute_batch`.
#[derive(Clone, Debug, Default)]
pub struct BatchBuffer {
    text: Option<StatementText>,
}

impl BatchBuffer {
    pub fn add(&mut self, text: StatementText) {
        match &mut self.text {
            Some(existing) => existing.append(text),
            None => self.text = Some(text),
        }
    }

    pub fn clear(&mut self) {
        self.text = None;
    }

    pub fn count(&self) -> usize {
        self.text.as_ref().map_or(0, StatementText::count)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Moves the accumulated text out, leaving the buffer empty.
    pub fn take(&mut self) -> Option<StatementText> {
        self.text.take().filter(|text| !text.is_empty())
    }
}
