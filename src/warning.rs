//! Ordered diagnostic warnings collected across prepare and execute round trips.

use std::fmt;

/// Single diagnostic message emitted by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub code: Option<String>,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered chain of warnings. New warnings go to the tail; the head is the
/// oldest warning and the first one a caller observes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WarningChain {
    warnings: Vec<Warning>,
}

impl WarningChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combines two chains: every warning of `a`, then every warning of `b`.
    ///
    /// Never deduplicates or reorders.
    pub fn chain(a: WarningChain, b: WarningChain) -> WarningChain {
        if a.is_empty() {
            return b;
        }
        if b.is_empty() {
            return a;
        }
        let mut combined = a;
        combined.warnings.extend(b.warnings);
        combined
    }

    /// Appends a single warning at the tail.
    pub fn push(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Appends another chain at the tail, in place.
    pub fn append(&mut self, other: WarningChain) {
        let this = std::mem::take(self);
        *self = Self::chain(this, other);
    }

    pub fn head(&self) -> Option<&Warning> {
        self.warnings.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.warnings.iter()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn clear(&mut self) {
        self.warnings.clear();
    }
}

impl From<Warning> for WarningChain {
    fn from(warning: Warning) -> Self {
        Self {
            warnings: vec![warning],
        }
    }
}

impl From<Vec<Warning>> for WarningChain {
    fn from(warnings: Vec<Warning>) -> Self {
        Self { warnings }
    }
}

impl FromIterator<Warning> for WarningChain {
    fn from_iter<I: IntoIterator<Item = Warning>>(iter: I) -> Self {
        Self {
            warnings: iter.into_iter().collect(),
        }
    }
}

impl Extend<Warning> for WarningChain {
    fn extend<I: IntoIterator<Item = Warning>>(&mut self, iter: I) {
        self.warnings.extend(iter);
    }
}

impl IntoIterator for WarningChain {
    type Item = Warning;
    type IntoIter = std::vec::IntoIter<Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.warnings.into_iter()
    }
}

impl<'a> IntoIterator for &'a WarningChain {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.warnings.iter()
    }
}
