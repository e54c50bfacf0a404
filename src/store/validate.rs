//! Payload checks shared by every store: declared fields only, kinds, required
//! fields and text lengths. Unique constraints are left to the store itself.

use serde_json::Value;

use crate::error::{ApiError, ApiResult, ValidationItem};
use crate::model::{FieldKind, Record, ResourceModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
}

/// Render a payload value for error reports.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keep the declared, client-writable fields of `payload`, normalised to their kinds.
///
/// All violations are collected into a single `Validation` error.
pub fn validate_payload(model: &ResourceModel, payload: Record, mode: WriteMode) -> ApiResult<Record> {
    let mut errors = Vec::new();
    let mut values = Record::new();

    for field in model.fields() {
        if model.is_managed_field(&field.name) {
            continue;
        }

        let value = payload.get(&field.name);
        let is_null = matches!(value, None | Some(Value::Null));
        let must_be_set = match mode {
            WriteMode::Insert => field.required,
            WriteMode::Update => field.required && value.is_some(),
        };
        if must_be_set && is_null {
            errors.push(ValidationItem::new(
                format!("{} cannot be null", field.name),
                "notNull Violation",
                &field.name,
                None,
            ));
            continue;
        }

        let Some(value) = value else {
            continue;
        };

        if !field.kind.accepts(value) {
            errors.push(ValidationItem::new(
                format!("{} has an invalid value", field.name),
                "Validation error",
                &field.name,
                Some(display_value(value)),
            ));
            continue;
        }

        if let (Some(max), Value::String(text)) = (field.max_length, value) {
            if text.chars().count() > max {
                errors.push(ValidationItem::new(
                    format!("Maximum length is {} characters", max),
                    "Validation error",
                    &field.name,
                    Some(text.clone()),
                ));
                continue;
            }
        }

        values.insert(field.name.clone(), normalise(field.kind, value));
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(ApiError::Validation { errors })
    }
}

/// Numeric and boolean values sent as strings are stored as JSON numbers and booleans.
fn normalise(kind: FieldKind, value: &Value) -> Value {
    match value {
        Value::String(raw) if kind != FieldKind::Text && kind != FieldKind::Timestamp => {
            kind.coerce(raw).unwrap_or_else(|| value.clone())
        }
        _ => value.clone(),
    }
}
