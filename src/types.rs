use std::fmt;

use crate::Value;

/// Opaque type descriptor handed over by the type system. Never interpreted
/// by the statement core.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeName(pub String);

impl TypeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Described output column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Col {
    pub name: String,
    pub decltype: Option<TypeName>,
    /// `None` when the server does not report nullability.
    pub nullable: Option<bool>,
}

impl Col {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decltype: None,
            nullable: None,
        }
    }

    pub fn with_decltype(mut self, decltype: impl Into<TypeName>) -> Self {
        self.decltype = Some(decltype.into());
        self
    }
}

/// Column descriptors plus the rows a statement returned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(cols: Vec<Col>, rows: Vec<Vec<Value>>) -> Self {
        Self { cols, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.cols
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            cols: &self.cols,
            values,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> + '_ {
        self.rows.iter().map(|values| RowRef {
            cols: &self.cols,
            values,
        })
    }

    /// Drops rows past `max_rows`; `0` means unlimited.
    pub fn truncate(&mut self, max_rows: usize) {
        if max_rows > 0 {
            self.rows.truncate(max_rows);
        }
    }
}

/// Row view with name-based access.
#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    pub cols: &'a [Col],
    pub values: &'a [Value],
}

impl<'a> RowRef<'a> {
    /// Returns a value by case-insensitive column name.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        let idx = self
            .cols
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_text(&self, name: &str) -> Option<&'a str> {
        self.get(name)?.as_str()
    }
}

/// Result of one executed statement. Never both a row set and a count.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultOutcome {
    Rows(RowSet),
    /// Definite, non-negative affected-row count.
    Count(i64),
    /// The server reported success without a count.
    CountUnknown,
}

impl ResultOutcome {
    pub fn is_row_set(&self) -> bool {
        matches!(self, Self::Rows(_))
    }

    pub fn row_set(&self) -> Option<&RowSet> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_row_set(self) -> Option<RowSet> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Update-count view; `None` for row sets.
    pub fn update_count(&self) -> Option<UpdateCount> {
        match self {
            Self::Rows(_) => None,
            Self::Count(count) => Some(UpdateCount::Rows(*count)),
            Self::CountUnknown => Some(UpdateCount::SuccessNoInfo),
        }
    }
}

/// Affected-row count as reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateCount {
    Rows(i64),
    /// Success without a count. Distinct from `Rows(0)`.
    SuccessNoInfo,
}

impl UpdateCount {
    /// Integer rendering of [`UpdateCount::SuccessNoInfo`].
    pub const SUCCESS_NO_INFO: i64 = -2;

    pub fn rows(self) -> Option<i64> {
        match self {
            Self::Rows(count) => Some(count),
            Self::SuccessNoInfo => None,
        }
    }

    pub fn to_i64(self) -> i64 {
        self.rows().unwrap_or(Self::SUCCESS_NO_INFO)
    }
}

impl fmt::Display for UpdateCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(count) => write!(f, "{count}"),
            Self::SuccessNoInfo => f.write_str("success, no info"),
        }
    }
}
