// ========================================================================================
//
//                         Input validation: untrusted data → MethylationVector
//
// ========================================================================================
//
// Every caller-supplied vector passes through here before it may reach the engine.
// Checks run in a fixed order: shape, cardinality, element type, then domain. The first
// three stop at the first problem; the domain check reports every offending index at once.

use crate::types::{MethylationVector, NUM_CPG_SITES};
use itertools::Itertools;
use serde_json::Value;
use thiserror::Error;

/// The request field carrying the beta values.
pub const BETA_FIELD: &str = "betaValues";

/// How many out-of-range indices are spelled out in the headline message.
const INDEX_PREVIEW: usize = 10;

/// Caller errors. All are recoverable by resubmitting corrected input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Invalid input: request body must be a JSON object with a 'betaValues' field")]
    MalformedPayload { details: String },
    #[error("Invalid input: Expected beta values array")]
    InvalidFieldType { found: &'static str },
    #[error("Invalid input: Expected {expected} beta values, got {actual}")]
    WrongCardinality { expected: usize, actual: usize },
    #[error("Invalid input: beta value at index {index} is not a finite number (found {value})")]
    InvalidElement { index: usize, value: String },
    #[error(
        "Invalid input: {count} beta values are outside [0, 1] (indices {})",
        preview_indices(.indices)
    )]
    OutOfRangeValues { count: usize, indices: Vec<usize> },
}

impl InputError {
    /// Optional diagnostic detail that supplements the headline message.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::MalformedPayload { details } => Some(details.clone()),
            Self::InvalidFieldType { found } => {
                Some(format!("field '{BETA_FIELD}' has type {found}"))
            }
            Self::OutOfRangeValues { indices, .. } if indices.len() > INDEX_PREVIEW => Some(
                format!("out-of-range indices: {}", indices.iter().join(", ")),
            ),
            _ => None,
        }
    }
}

fn preview_indices(indices: &[usize]) -> String {
    let head = indices.iter().take(INDEX_PREVIEW).join(", ");
    if indices.len() > INDEX_PREVIEW {
        format!("{head}, ...")
    } else {
        head
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ========================================================================================
//                                   Public API
// ========================================================================================

/// Parses a raw request body and validates the `betaValues` field.
pub fn validate_payload(body: &[u8]) -> Result<MethylationVector, InputError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| InputError::MalformedPayload {
            details: e.to_string(),
        })?;
    let fields = match payload {
        Value::Object(fields) => fields,
        other => {
            return Err(InputError::MalformedPayload {
                details: format!("expected a JSON object, found {}", json_type_name(&other)),
            });
        }
    };
    let field = fields
        .get(BETA_FIELD)
        .ok_or_else(|| InputError::MalformedPayload {
            details: format!("missing field '{BETA_FIELD}'"),
        })?;
    validate_json_values(field)
}

/// Validates an already-decoded JSON value as a beta-value sequence.
pub fn validate_json_values(field: &Value) -> Result<MethylationVector, InputError> {
    let Value::Array(items) = field else {
        return Err(InputError::InvalidFieldType {
            found: json_type_name(field),
        });
    };
    check_cardinality(items.len())?;

    let betas = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| InputError::InvalidElement {
                    index,
                    value: item.to_string(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    check_domain(betas)
}

/// Validates numbers that arrived through a non-JSON path (files, command line).
pub fn validate_betas(betas: Vec<f64>) -> Result<MethylationVector, InputError> {
    check_cardinality(betas.len())?;
    if let Some(index) = betas.iter().position(|v| !v.is_finite()) {
        return Err(InputError::InvalidElement {
            index,
            value: betas[index].to_string(),
        });
    }
    check_domain(betas)
}

/// Parses comma- and/or whitespace-separated beta values, as typed into a calculator form.
/// Empty tokens are ignored.
pub fn parse_delimited(text: &str) -> Result<MethylationVector, InputError> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    check_cardinality(tokens.len())?;

    let betas = tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            lexical_core::parse::<f64>(token.as_bytes())
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| InputError::InvalidElement {
                    index,
                    value: (*token).to_string(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    check_domain(betas)
}

// ========================================================================================
//                                 Shared checks
// ========================================================================================

fn check_cardinality(actual: usize) -> Result<(), InputError> {
    if actual != NUM_CPG_SITES {
        return Err(InputError::WrongCardinality {
            expected: NUM_CPG_SITES,
            actual,
        });
    }
    Ok(())
}

fn check_domain(betas: Vec<f64>) -> Result<MethylationVector, InputError> {
    let indices: Vec<usize> = betas
        .iter()
        .enumerate()
        .filter(|(_, v)| !(0.0..=1.0).contains(*v))
        .map(|(i, _)| i)
        .collect();
    if !indices.is_empty() {
        return Err(InputError::OutOfRangeValues {
            count: indices.len(),
            indices,
        });
    }
    Ok(MethylationVector::from_validated(betas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body_with(values: Vec<Value>) -> Vec<u8> {
        serde_json::to_vec(&json!({ "betaValues": values })).unwrap()
    }

    fn halves() -> Vec<Value> {
        vec![json!(0.5); NUM_CPG_SITES]
    }

    #[test]
    fn accepts_well_formed_payload() {
        let vector = validate_payload(&body_with(halves())).unwrap();
        assert_eq!(vector.len(), NUM_CPG_SITES);
        assert!(vector.as_slice().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn integers_are_numbers_too() {
        let mut values = halves();
        values[0] = json!(0);
        values[1] = json!(1);
        let vector = validate_payload(&body_with(values)).unwrap();
        assert_eq!(vector.as_slice()[0], 0.0);
        assert_eq!(vector.as_slice()[1], 1.0);
    }

    #[test]
    fn unparseable_or_fieldless_bodies_are_malformed() {
        let bodies: [&[u8]; 5] = [b"not json", b"", b"[0.5, 0.5]", b"{\"values\": []}", b"42"];
        for body in bodies {
            let err = validate_payload(body).unwrap_err();
            assert!(matches!(err, InputError::MalformedPayload { .. }), "{body:?} -> {err:?}");
        }
    }

    #[test]
    fn non_array_field_is_invalid_type() {
        for field in [json!("0.5,0.5"), json!(null), json!({"a": 1}), json!(0.5)] {
            let body = serde_json::to_vec(&json!({ "betaValues": field })).unwrap();
            let err = validate_payload(&body).unwrap_err();
            assert!(matches!(err, InputError::InvalidFieldType { .. }), "{err:?}");
            assert_eq!(err.to_string(), "Invalid input: Expected beta values array");
        }
    }

    #[test]
    fn wrong_cardinality_reports_expected_and_actual() {
        for len in [0, 2, 340, 352, 354] {
            let err = validate_payload(&body_with(vec![json!(0.5); len])).unwrap_err();
            assert_eq!(
                err,
                InputError::WrongCardinality {
                    expected: NUM_CPG_SITES,
                    actual: len
                }
            );
        }
        let err = validate_payload(&body_with(vec![json!(0.5); 340])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: Expected 353 beta values, got 340");
    }

    #[test]
    fn cardinality_is_checked_before_elements() {
        let err = validate_payload(&body_with(vec![json!("x"), json!(5.0)])).unwrap_err();
        assert!(matches!(err, InputError::WrongCardinality { actual: 2, .. }));
    }

    #[test]
    fn non_numeric_element_names_its_index() {
        let mut values = halves();
        values[17] = json!("0.5");
        values[40] = json!(null);
        let err = validate_payload(&body_with(values)).unwrap_err();
        assert_eq!(
            err,
            InputError::InvalidElement {
                index: 17,
                value: "\"0.5\"".to_string()
            }
        );
    }

    #[test]
    fn boundary_values_are_inclusive() {
        let mut values = halves();
        values[0] = json!(0.0);
        values[1] = json!(1.0);
        values[2] = json!(-0.0);
        assert!(validate_payload(&body_with(values)).is_ok());
    }

    #[test]
    fn values_just_outside_the_domain_are_rejected() {
        for (index, bad) in [(0usize, -0.0001), (352, 1.0001)] {
            let mut values = halves();
            values[index] = json!(bad);
            let err = validate_payload(&body_with(values)).unwrap_err();
            assert_eq!(
                err,
                InputError::OutOfRangeValues {
                    count: 1,
                    indices: vec![index]
                }
            );
        }
    }

    #[test]
    fn every_out_of_range_index_is_collected() {
        let mut betas = vec![0.5; NUM_CPG_SITES];
        let bad: Vec<usize> = (0..NUM_CPG_SITES).step_by(25).collect();
        for &i in &bad {
            betas[i] = if i % 2 == 0 { 1.5 } else { -2.0 };
        }
        let err = validate_betas(betas).unwrap_err();
        let InputError::OutOfRangeValues { count, ref indices } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(count, bad.len());
        assert_eq!(indices, &bad);
        assert!(err.to_string().ends_with(", ...)"), "{err}");
        assert!(err.details().unwrap().contains("350"));
    }

    #[test]
    fn first_value_out_of_range_names_index_zero() {
        let mut values = halves();
        values[0] = json!(1.5);
        let err = validate_payload(&body_with(values)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid input: 1 beta values are outside [0, 1] (indices 0)"
        );
    }

    #[test]
    fn overflowing_literal_is_an_invalid_element() {
        let tail = vec!["0.5"; NUM_CPG_SITES - 1].join(",");
        let body = format!("{{\"betaValues\":[1e400,{tail}]}}");
        let err = validate_payload(body.as_bytes()).unwrap_err();
        assert!(
            matches!(err, InputError::InvalidElement { index: 0, ref value } if value == "1e400"),
            "{err:?}"
        );
    }

    #[test]
    fn non_finite_numbers_from_other_sources_are_invalid_elements() {
        let mut betas = vec![0.5; NUM_CPG_SITES];
        betas[9] = f64::NAN;
        let err = validate_betas(betas).unwrap_err();
        assert!(matches!(err, InputError::InvalidElement { index: 9, .. }));
    }

    #[test]
    fn delimited_text_accepts_commas_and_whitespace() {
        let text = (0..NUM_CPG_SITES)
            .map(|i| if i % 3 == 0 { "0.25" } else { "0.75" })
            .join(",\n ");
        let vector = parse_delimited(&format!("{text},")).unwrap();
        assert_eq!(vector.as_slice()[0], 0.25);
        assert_eq!(vector.as_slice()[1], 0.75);
    }

    #[test]
    fn delimited_text_reports_bad_tokens_and_counts() {
        let err = parse_delimited("0.1, 0.2, 0.3").unwrap_err();
        assert!(matches!(err, InputError::WrongCardinality { actual: 3, .. }));

        let mut tokens = vec!["0.5"; NUM_CPG_SITES];
        tokens[3] = "abc";
        let err = parse_delimited(&tokens.join(",")).unwrap_err();
        assert_eq!(
            err,
            InputError::InvalidElement {
                index: 3,
                value: "abc".to_string()
            }
        );
    }
}
