//! Typed access to opaque operation arguments.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;

/// Decode argument `index` as `A`.
pub fn arg<A: DeserializeOwned>(args: &[Value], index: usize) -> Result<A, HandlerError> {
    let value = args.get(index).ok_or_else(|| {
        HandlerError::ArgumentMismatch(format!(
            "missing argument {index} (got {} arguments)",
            args.len()
        ))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| HandlerError::ArgumentMismatch(format!("argument {index}: {e}")))
}

/// Fail unless exactly `count` arguments were supplied.
pub fn expect_arity(args: &[Value], count: usize) -> Result<(), HandlerError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(HandlerError::ArgumentMismatch(format!(
            "expected {count} arguments, got {}",
            args.len()
        )))
    }
}

/// Encode a handler's return value.
pub fn to_value<R: Serialize>(value: R) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::failed(format!("result encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_typed_arguments() {
        let args = vec![json!("key"), json!(42)];
        assert_eq!(arg::<String>(&args, 0).unwrap(), "key");
        assert_eq!(arg::<i64>(&args, 1).unwrap(), 42);
    }

    #[test]
    fn wrong_type_is_argument_mismatch() {
        let args = vec![json!("not a number")];
        assert!(matches!(
            arg::<i64>(&args, 0),
            Err(HandlerError::ArgumentMismatch(_))
        ));
    }

    #[test]
    fn missing_argument_is_argument_mismatch() {
        assert!(matches!(
            arg::<i64>(&[], 0),
            Err(HandlerError::ArgumentMismatch(_))
        ));
        assert!(expect_arity(&[json!(1)], 2).is_err());
        assert!(expect_arity(&[], 0).is_ok());
    }
}
