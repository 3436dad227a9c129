use crate::Value;

/// Bind values for one execute round trip.
///
/// The plain statement path always binds [`Params::default`]; richer callers
/// driving [`crate::PreparedCommand`] directly may bind real values.
#[derive(Clone, Debug, PartialEq)]
pub enum Params {
    /// Positional values mapped to `?` / `$n` placeholders.
    Positional(Vec<Value>),
    /// Named values mapped to `:name` style placeholders.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Builds positional parameters.
    pub fn positional(values: impl Into<Vec<Value>>) -> Self {
        Self::Positional(values.into())
    }

    /// Builds named parameters.
    ///
    /// Names can be provided with or without prefix (`:`, `@`, `$`).
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Self::Positional(values.into())
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(values: Vec<(String, Value)>) -> Self {
        Self::Named(values)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Params, Value};

    #[test]
    fn default_is_empty_positional() {
        let params: Params = ().into();
        assert_eq!(params, Params::Positional(Vec::new()));
        assert!(params.is_empty());
    }

    #[test]
    fn positional_from_array() {
        let params: Params = [Value::integer(1), Value::text("kit")].into();
        assert_eq!(params.len(), 2);
        assert!(matches!(params, Params::Positional(_)));
    }

    #[test]
    fn named_builder() {
        let params = Params::named([("name", Value::text("kit"))]);
        match params {
            Params::Named(values) => {
                assert_eq!(values.len(), 1);
                assert_eq!(values[0].0, "name");
            }
            _ => panic!("expected named"),
        }
    }
}
