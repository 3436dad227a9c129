//! Statement text model: one or more logical SQL statements held as a unit.

use std::fmt;
use std::str::FromStr;

use crate::{
    lexer::{self, Segment},
    Result,
};

/// Leading-keyword classification of a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Other,
}

impl StatementKind {
    /// Whether the statement changes data and can carry a `RETURNING` clause.
    pub fn is_data_mutating(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete | Self::Merge)
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "SELECT" | "VALUES" | "TABLE" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "MERGE" => Some(Self::Merge),
            _ => None,
        }
    }

    fn classify(words: &[String]) -> Self {
        match words.first().map(String::as_str) {
            // CTE bodies are parenthesized, so the first statement keyword
            // at the top level is the main statement.
            Some("WITH") => words[1..]
                .iter()
                .find_map(|word| Self::from_keyword(word))
                .unwrap_or(Self::Other),
            Some(word) => Self::from_keyword(word).unwrap_or(Self::Other),
            None => Self::Other,
        }
    }
}

/// Ordered sequence of logical SQL statements.
///
/// Owned by value: batches are built by moving texts in with
/// [`StatementText::append`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatementText {
    statements: Vec<Segment>,
}

impl StatementText {
    /// Splits raw SQL into statements at top-level terminators.
    ///
    /// Fails with [`crate::StmtError::Syntax`] on unterminated quotes or
    /// comments. Whitespace- or comment-only segments never count as a
    /// statement.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            statements: lexer::split(text)?,
        })
    }

    /// Number of logical statements.
    pub fn count(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> impl Iterator<Item = &str> + '_ {
        self.statements.iter().map(|segment| segment.text.as_str())
    }

    pub fn last(&self) -> Option<&str> {
        self.statements.last().map(|segment| segment.text.as_str())
    }

    /// Kind of the last statement, which is the one generated keys apply to.
    pub fn last_kind(&self) -> StatementKind {
        self.statements
            .last()
            .and_then(|segment| lexer::shape(&segment.text).ok())
            .map_or(StatementKind::Other, |shape| {
                StatementKind::classify(&shape.words)
            })
    }

    /// Appends `other`'s statements after this text's statements.
    pub fn append(&mut self, other: StatementText) {
        self.statements.extend(other.statements);
    }

    /// Adds a `RETURNING` clause to the last statement.
    ///
    /// `None` (or an empty list) returns every column. Returns `false` and
    /// leaves the text untouched when the last statement is not a
    /// data-mutating statement or already returns rows.
    pub fn inject_returning_clause(&mut self, columns: Option<&[String]>) -> bool {
        let Some(last) = self.statements.last_mut() else {
            return false;
        };
        let Ok(shape) = lexer::shape(&last.text) else {
            return false;
        };
        if !StatementKind::classify(&shape.words).is_data_mutating()
            || shape.words.iter().any(|word| word == "RETURNING")
        {
            return false;
        }

        let columns = match columns {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|name| quote_identifier(name))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_owned(),
        };
        last.text
            .insert_str(shape.code_end, &format!(" RETURNING {columns}"));
        true
    }

    /// Serializes the statements back into one SQL string.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (index, segment) in self.statements.iter().enumerate() {
            if index > 0 {
                text.push_str("; ");
            }
            text.push_str(&segment.text);
            if segment.ends_in_line_comment {
                text.push('\n');
            }
        }
        text
    }
}

impl fmt::Display for StatementText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl FromStr for StatementText {
    type Err = crate::StmtError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<StatementText> for String {
    fn from(text: StatementText) -> Self {
        text.to_text()
    }
}

fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_owned()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
