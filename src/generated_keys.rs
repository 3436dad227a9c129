use crate::{Result, StatementText, StmtError};

/// Which generated keys, if any, a caller wants returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GeneratedKeys {
    #[default]
    None,
    /// Every column of the affected rows.
    Default,
    /// Only the named columns.
    Columns(Vec<String>),
    /// Column positions. Not supported.
    Indexes(Vec<usize>),
}

impl GeneratedKeys {
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Columns(names.into_iter().map(Into::into).collect())
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Rewrites `text` so that its statement returns the requested keys.
    ///
    /// Returns `Ok(false)` without touching the text when no keys were
    /// requested.
    pub fn apply(&self, text: &mut StatementText) -> Result<bool> {
        let columns = match self {
            Self::None => return Ok(false),
            Self::Default => None,
            Self::Columns(names) => Some(names.as_slice()),
            Self::Indexes(_) => {
                return Err(StmtError::UnsupportedOperation(
                    "generated keys by column index".to_owned(),
                ))
            }
        };

        if text.count() > 1 {
            return Err(StmtError::UnsupportedOperation(
                "generated keys for multi-statement text".to_owned(),
            ));
        }

        if !text.inject_returning_clause(columns) {
            return Err(StmtError::InvalidCommandForGeneratedKeys);
        }
        Ok(true)
    }
}
