//! Field-level validation: checking a write's values against a
//! [`Scheme`](crate::scheme::Scheme) before it ever reaches SQL, and
//! checking that a query condition's [`Comparator`](crate::query::Comparator)
//! is even legal against the field kind it targets.

use corestore_common::{Result, StoreError};

use crate::field::{Field, FieldKind};
use crate::query::Comparator;
use crate::scheme::Scheme;
use crate::value::Value;

/// Validates one field's incoming value against its declaration:
/// required-ness, and a coarse type-family match (e.g. rejects a `Text`
/// value for an `Integer` field). Does not validate relational integrity;
/// that happens against the backend inside the worker.
pub fn validate_field_value(field: &Field, value: Option<&Value>) -> Result<()> {
    use crate::field::FieldFlags;

    match value {
        None | Some(Value::Null) => {
            if field.flags.contains(FieldFlags::REQUIRED) {
                return Err(StoreError::Validation(format!(
                    "field '{}' is required",
                    field.name
                )));
            }
            Ok(())
        }
        Some(v) => {
            if !kind_accepts(&field.kind, v) {
                return Err(StoreError::Validation(format!(
                    "field '{}' expects a {:?}-shaped value, got {}",
                    field.name,
                    field.kind,
                    v.kind_name()
                )));
            }
            Ok(())
        }
    }
}

fn kind_accepts(kind: &FieldKind, value: &Value) -> bool {
    match (kind, value) {
        (FieldKind::Integer, Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_)) => true,
        (FieldKind::Float, Value::Float(_) | Value::Double(_) | Value::Decimal(_)) => true,
        (FieldKind::Boolean, Value::Bool(_)) => true,
        (FieldKind::Text, Value::Text(_)) => true,
        (FieldKind::Bytes, Value::Bytes(_)) => true,
        (FieldKind::Data, Value::Json(_)) => true,
        (FieldKind::Extra, Value::Json(_)) => true,
        (FieldKind::Object { .. }, Value::ObjectId(_) | Value::BigInt(_) | Value::Int(_)) => true,
        (FieldKind::Set { .. }, Value::Set(_)) => true,
        (FieldKind::Array { .. }, Value::Array(_)) => true,
        (FieldKind::File, Value::Bytes(_) | Value::Text(_)) => true,
        (FieldKind::Image, Value::Bytes(_) | Value::Text(_)) => true,
        (FieldKind::Custom(_), _) => true,
        // View/FullTextView/Virtual are never written directly.
        _ => false,
    }
}

/// Validates that a write does not attempt to set a read-only, computed,
/// or view field, and that every required field is present (accounting
/// for defaults).
pub fn validate_write(scheme: &Scheme, values: &[(String, Value)]) -> Result<()> {
    use crate::field::FieldFlags;

    for (name, value) in values {
        let field = scheme.find_field(name).ok_or_else(|| {
            StoreError::Validation(format!("scheme '{}' has no field '{name}'", scheme.name))
        })?;
        if !field.kind.is_stored() {
            return Err(StoreError::Validation(format!(
                "field '{name}' is computed and cannot be written directly"
            )));
        }
        if field.flags.contains(FieldFlags::READ_ONLY) {
            return Err(StoreError::Permission(format!(
                "field '{name}' is read-only"
            )));
        }
        validate_field_value(field, Some(value))?;
    }

    for field in &scheme.fields {
        if field.flags.contains(FieldFlags::REQUIRED)
            && field.default.is_none()
            && !values.iter().any(|(n, _)| n == &field.name)
        {
            return Err(StoreError::Validation(format!(
                "field '{}' is required and was not supplied",
                field.name
            )));
        }
    }

    Ok(())
}

/// Checks whether `comparator` is a legal operation against `field`'s
/// kind, mirroring the backend's own constraint so a bad query fails at
/// the builder rather than as an opaque SQL error.
pub fn validate_comparator(field: &Field, comparator: Comparator) -> Result<()> {
    let ok = match comparator {
        Comparator::IsNull | Comparator::IsNotNull | Comparator::Equal | Comparator::NotEqual => true,
        Comparator::LessThan
        | Comparator::LessOrEqual
        | Comparator::GreaterThan
        | Comparator::GreaterOrEqual
        | Comparator::Between
        | Comparator::NotBetween => matches!(
            field.kind,
            FieldKind::Integer | FieldKind::Float | FieldKind::Text
        ),
        Comparator::In | Comparator::NotIn => true,
        Comparator::Prefix | Comparator::Suffix => matches!(field.kind, FieldKind::Text),
        Comparator::WordPart => matches!(field.kind, FieldKind::Text | FieldKind::FullTextView { .. }),
        Comparator::Includes => matches!(field.kind, FieldKind::Set { .. } | FieldKind::Array { .. }),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "comparator {comparator:?} is not valid against field '{}' ({:?})",
            field.name, field.kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::OnRemove;

    fn scheme() -> Scheme {
        Scheme::new("users")
            .field(Field::new("email", FieldKind::Text).required())
            .field(Field::new("age", FieldKind::Integer))
            .field(Field::new("bio", FieldKind::Virtual(None)))
    }

    #[test]
    fn missing_required_field_rejected() {
        let err = validate_write(&scheme(), &[("age".into(), Value::Int(20))]);
        assert!(err.is_err());
    }

    #[test]
    fn type_mismatch_rejected() {
        let field = Field::new("age", FieldKind::Integer);
        assert!(validate_field_value(&field, Some(&Value::Text("x".into()))).is_err());
    }

    #[test]
    fn virtual_field_cannot_be_written() {
        let err = validate_write(
            &scheme(),
            &[
                ("email".into(), Value::Text("a@b.com".into())),
                ("bio".into(), Value::Text("hi".into())),
            ],
        );
        assert!(err.is_err());
    }

    #[test]
    fn prefix_only_valid_on_text() {
        let text_field = Field::new("name", FieldKind::Text);
        let int_field = Field::new("age", FieldKind::Integer);
        assert!(validate_comparator(&text_field, Comparator::Prefix).is_ok());
        assert!(validate_comparator(&int_field, Comparator::Prefix).is_err());
    }

    #[test]
    fn includes_only_valid_on_collections() {
        let set_field = Field::new(
            "tags",
            FieldKind::Set {
                element: Box::new(FieldKind::Text),
            },
        );
        let text_field = Field::new("name", FieldKind::Text);
        assert!(validate_comparator(&set_field, Comparator::Includes).is_ok());
        assert!(validate_comparator(&text_field, Comparator::Includes).is_err());
    }

    #[test]
    fn unknown_on_remove_does_not_block_unrelated_validation() {
        let field = Field::new(
            "owner",
            FieldKind::Object { target: "users".into() },
        )
        .on_remove(OnRemove::Restrict)
        .unwrap();
        assert!(validate_field_value(&field, Some(&Value::ObjectId(1))).is_ok());
    }
}
