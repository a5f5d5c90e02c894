// Expression Input Parser
// Builds a computation tree from a JSON document

use crate::execution::node::{ComputationNode, Operator};
use crate::io::error::{InputError, InputResult};
use crate::memory::MatrixData;

use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Parser for JSON expression documents.
///
/// A matrix is an array of equally long arrays of numbers. An operation is
/// an object `{"operator": "+" | "*" | "-" | "T", "operands": [...]}`.
/// `+` and `*` take two or more operands, `-` and `T` exactly one.
pub struct InputParser;

impl InputParser {
    /// Parse an expression tree from a JSON string
    pub fn parse_str(content: &str) -> InputResult<ComputationNode> {
        if content.trim().is_empty() {
            return Err(InputError::schema("$", "input is empty"));
        }
        let value: Value = serde_json::from_str(content)?;
        Self::parse_value(&value)
    }

    /// Parse an expression tree from a JSON file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> InputResult<ComputationNode> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_value(value: &Value) -> InputResult<ComputationNode> {
        parse_node(value, "$")
    }
}

fn parse_node(value: &Value, path: &str) -> InputResult<ComputationNode> {
    match value {
        Value::Array(rows) => parse_matrix(rows, path).map(ComputationNode::Matrix),
        Value::Object(fields) => parse_operation(fields, path),
        other => Err(InputError::schema(
            path,
            format!("expected a matrix or an operation, found {}", kind(other)),
        )),
    }
}

fn parse_operation(fields: &Map<String, Value>, path: &str) -> InputResult<ComputationNode> {
    if let Some(unknown) = fields
        .keys()
        .find(|key| !matches!(key.as_str(), "operator" | "operands"))
    {
        return Err(InputError::schema(path, format!("unknown field \"{}\"", unknown)));
    }

    let symbol = match fields.get("operator") {
        Some(Value::String(symbol)) => symbol,
        Some(other) => {
            return Err(InputError::schema(
                format!("{}.operator", path),
                format!("expected a string, found {}", kind(other)),
            ))
        }
        None => return Err(InputError::schema(path, "missing \"operator\"")),
    };
    let operator = Operator::from_symbol(symbol).ok_or_else(|| {
        InputError::schema(
            format!("{}.operator", path),
            format!("unknown operator \"{}\"", symbol),
        )
    })?;

    let operands = match fields.get("operands") {
        Some(Value::Array(operands)) => operands,
        Some(other) => {
            return Err(InputError::schema(
                format!("{}.operands", path),
                format!("expected an array, found {}", kind(other)),
            ))
        }
        None => return Err(InputError::schema(path, "missing \"operands\"")),
    };
    check_arity(operator, operands.len(), path)?;

    let children = operands
        .iter()
        .enumerate()
        .map(|(i, operand)| parse_node(operand, &format!("{}.operands[{}]", path, i)))
        .collect::<InputResult<Vec<_>>>()?;

    Ok(ComputationNode::operation(operator, children))
}

fn check_arity(operator: Operator, found: usize, path: &str) -> InputResult<()> {
    let ok = if operator.is_associative() {
        found >= operator.arity()
    } else {
        found == operator.arity()
    };
    if ok {
        return Ok(());
    }
    let expected = if operator.is_associative() {
        format!("at least {}", operator.arity())
    } else {
        format!("exactly {}", operator.arity())
    };
    Err(InputError::schema(
        format!("{}.operands", path),
        format!(
            "\"{}\" takes {} operand(s), found {}",
            operator.symbol(),
            expected,
            found
        ),
    ))
}

/// Empty matrices pass; the engine rejects them when staging
fn parse_matrix(rows: &[Value], path: &str) -> InputResult<MatrixData> {
    let mut data = Vec::with_capacity(rows.len());
    for (r, row) in rows.iter().enumerate() {
        let row_path = format!("{}[{}]", path, r);
        let Value::Array(values) = row else {
            return Err(InputError::schema(
                row_path,
                format!("expected a row of numbers, found {}", kind(row)),
            ));
        };
        let parsed = values
            .iter()
            .enumerate()
            .map(|(c, value)| {
                value.as_f64().ok_or_else(|| {
                    InputError::schema(
                        format!("{}[{}]", row_path, c),
                        format!("expected a number, found {}", kind(value)),
                    )
                })
            })
            .collect::<InputResult<Vec<f64>>>()?;
        data.push(parsed);
    }

    if let Some(first) = data.first() {
        let cols = first.len();
        if let Some((r, row)) = data.iter().enumerate().find(|(_, row)| row.len() != cols) {
            return Err(InputError::schema(
                format!("{}[{}]", path, r),
                format!("ragged matrix: expected {} values, found {}", cols, row.len()),
            ));
        }
    }
    Ok(data)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_path(err: InputError) -> String {
        match err {
            InputError::Schema { path, .. } => path,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_matrix() {
        let node = InputParser::parse_str("[[1, 2], [3, 4.5]]").unwrap();
        assert_eq!(node, ComputationNode::matrix(vec![vec![1.0, 2.0], vec![3.0, 4.5]]));
    }

    #[test]
    fn test_parse_nested_operation() {
        let input = r#"{
            "operator": "*",
            "operands": [
                {"operator": "T", "operands": [[[1, 2]]]},
                [[3, 4]]
            ]
        }"#;
        let node = InputParser::parse_str(input).unwrap();
        let expected = ComputationNode::multiply(
            ComputationNode::transpose(ComputationNode::matrix(vec![vec![1.0, 2.0]])),
            ComputationNode::matrix(vec![vec![3.0, 4.0]]),
        );
        assert_eq!(node, expected);
    }

    #[test]
    fn test_nary_operands_are_kept() {
        let node =
            InputParser::parse_str(r#"{"operator": "+", "operands": [[[1]], [[2]], [[3]]]}"#)
                .unwrap();
        assert_eq!(node.operands().len(), 3);
    }

    #[test]
    fn test_unknown_operator() {
        let err =
            InputParser::parse_str(r#"{"operator": "/", "operands": [[[1]], [[2]]]}"#).unwrap_err();
        assert_eq!(schema_path(err), "$.operator");
    }

    #[test]
    fn test_wrong_arity() {
        let err = InputParser::parse_str(r#"{"operator": "-", "operands": [[[1]], [[2]]]}"#)
            .unwrap_err();
        assert_eq!(schema_path(err), "$.operands");

        let err = InputParser::parse_str(r#"{"operator": "*", "operands": [[[1]]]}"#).unwrap_err();
        assert_eq!(schema_path(err), "$.operands");
    }

    #[test]
    fn test_ragged_matrix_location() {
        let input = r#"{"operator": "+", "operands": [[[1, 2]], [[1, 2], [3]]]}"#;
        let err = InputParser::parse_str(input).unwrap_err();
        assert_eq!(schema_path(err), "$.operands[1][1]");
    }

    #[test]
    fn test_non_numeric_entry() {
        let err = InputParser::parse_str(r#"[[1, "two"]]"#).unwrap_err();
        assert_eq!(schema_path(err), "$[0][1]");
    }

    #[test]
    fn test_missing_fields_and_unknown_keys() {
        assert!(InputParser::parse_str(r#"{"operands": []}"#).is_err());
        assert!(InputParser::parse_str(r#"{"operator": "+"}"#).is_err());
        let err = InputParser::parse_str(r#"{"operator": "-", "operands": [[[1]]], "x": 1}"#)
            .unwrap_err();
        assert_eq!(schema_path(err), "$");
    }

    #[test]
    fn test_empty_and_invalid_input() {
        assert!(matches!(
            InputParser::parse_str("   "),
            Err(InputError::Schema { .. })
        ));
        assert!(matches!(InputParser::parse_str("[[1,"), Err(InputError::Json(_))));
        assert!(matches!(
            InputParser::parse_str("42"),
            Err(InputError::Schema { .. })
        ));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"operator": "-", "operands": [[[1, -2]]]}"#).unwrap();

        let node = InputParser::parse_file(&path).unwrap();
        assert_eq!(node.count_operations(), 1);

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            InputParser::parse_file(&missing),
            Err(InputError::Io { .. })
        ));
    }
}
