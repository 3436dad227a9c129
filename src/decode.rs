use crate::{
    protocol::Description,
    wire::{self, ExecuteStatement, NamedArg},
    Col, Params, ResultOutcome, RowSet, ServerError, StmtError, TypeName, Value,
};

/// Statement source for an execute request.
#[derive(Clone, Copy, Debug)]
pub(crate) enum SqlRef<'a> {
    Text(&'a str),
    Stored(i32),
}

pub(crate) fn build_execute_statement(
    sql: SqlRef<'_>,
    params: &Params,
    want_rows: bool,
) -> Result<ExecuteStatement, StmtError> {
    let (sql, sql_id) = match sql {
        SqlRef::Text(text) => (Some(text.to_owned()), None),
        SqlRef::Stored(id) => (None, Some(id)),
    };

    match params {
        Params::Positional(values) => {
            let args = values
                .iter()
                .cloned()
                .map(encode_value)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ExecuteStatement {
                sql,
                sql_id,
                args: (!args.is_empty()).then_some(args),
                named_args: None,
                want_rows,
            })
        }
        Params::Named(values) => {
            let named_args = values
                .iter()
                .map(|(name, value)| {
                    let name = normalize_named_parameter_name(name)?;
                    let value = encode_value(value.clone())?;
                    Ok(NamedArg { name, value })
                })
                .collect::<Result<Vec<_>, StmtError>>()?;

            Ok(ExecuteStatement {
                sql,
                sql_id,
                args: None,
                named_args: (!named_args.is_empty()).then_some(named_args),
                want_rows,
            })
        }
    }
}

/// A statement with output columns is a row set even when it returned no
/// rows; otherwise the affected count, if the server tracked one.
pub(crate) fn decode_outcome(result: wire::ExecuteResult) -> Result<ResultOutcome, StmtError> {
    if !result.cols.is_empty() {
        let cols = result.cols.into_iter().map(decode_col).collect();
        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>, StmtError>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ResultOutcome::Rows(RowSet::new(cols, rows)));
    }

    match result.affected_row_count {
        Some(count) => i64::try_from(count)
            .map(ResultOutcome::Count)
            .map_err(|_| StmtError::Decode(format!("affected row count {count} overflows i64"))),
        None => Ok(ResultOutcome::CountUnknown),
    }
}

/// The pipeline reports parameter names only, so no parameter types are
/// returned.
pub(crate) fn decode_description(result: wire::DescribeResult) -> Description {
    Description {
        columns: result.cols.into_iter().map(decode_col).collect(),
        param_types: Vec::new(),
        warnings: Default::default(),
    }
}

pub(crate) fn decode_server_error(error: wire::PipelineError) -> ServerError {
    ServerError {
        message: error.message,
        code: error.code,
    }
}

fn decode_col(col: wire::Col) -> Col {
    Col {
        name: col.name.unwrap_or_default(),
        decltype: col.decltype.map(TypeName),
        nullable: None,
    }
}

pub(crate) fn decode_value(value: wire::Value) -> Result<Value, StmtError> {
    match value {
        wire::Value::Null {} => Ok(Value::Null),
        wire::Value::Integer { value } => value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|err| StmtError::Decode(format!("invalid integer value '{value}': {err}"))),
        wire::Value::Float { value } => value
            .parse::<f64>()
            .map_err(|err| StmtError::Decode(format!("invalid float value '{value}': {err}")))
            .and_then(|parsed| {
                if parsed.is_finite() {
                    Ok(Value::Float(parsed))
                } else {
                    Err(StmtError::Decode(format!(
                        "non-finite float value '{value}' is unsupported"
                    )))
                }
            }),
        wire::Value::Text { value } => Ok(Value::Text(value)),
        wire::Value::Blob { base64 } => Ok(Value::BlobBase64(base64)),
    }
}

fn encode_value(value: Value) -> Result<wire::Value, StmtError> {
    match value {
        Value::Null => Ok(wire::Value::Null {}),
        Value::Integer(value) => Ok(wire::Value::Integer {
            value: value.to_string(),
        }),
        Value::Float(value) => {
            if !value.is_finite() {
                return Err(StmtError::Decode(format!(
                    "non-finite float value '{value}' is unsupported"
                )));
            }
            Ok(wire::Value::Float {
                value: value.to_string(),
            })
        }
        Value::Text(value) => Ok(wire::Value::Text { value }),
        Value::BlobBase64(base64) => Ok(wire::Value::Blob { base64 }),
    }
}

fn normalize_named_parameter_name(name: &str) -> Result<String, StmtError> {
    let normalized = name.trim_start_matches([':', '@', '$']);
    if normalized.is_empty() {
        return Err(StmtError::Decode(
            "named parameter name cannot be empty".to_owned(),
        ));
    }
    Ok(normalized.to_owned())
}
