use jobline_worker::{HandlerError, HandlerResult, JobContext};
use serde_json::{json, Value};

/// Square a decimal integer
pub fn square(_ctx: &JobContext, payload: &[u8]) -> HandlerResult {
    let number: i64 = std::str::from_utf8(payload)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| HandlerError::new("payload is not an integer"))?;

    let squared = number
        .checked_mul(number)
        .ok_or_else(|| HandlerError::new(format!("{} squared overflows", number)))?;

    Ok(squared.to_string().into_bytes())
}

/// Count the keys of a JSON object, echoing the document back
pub fn summarize_json(_ctx: &JobContext, payload: &[u8]) -> HandlerResult {
    let document: Value = serde_json::from_slice(payload)
        .map_err(|e| HandlerError::new(format!("Invalid JSON: {}", e)))?;

    let summary = match document.as_object() {
        Some(object) => json!({
            "key_count": object.len(),
            "original": document,
        }),
        None => json!({
            "original": document,
        }),
    };

    serde_json::to_vec(&summary)
        .map_err(|e| HandlerError::new(format!("Failed to serialize result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobline_core::JobId;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext::new(JobId::new(1), Arc::from("demo"), None, CancellationToken::new())
    }

    #[test]
    fn test_square() {
        assert_eq!(square(&ctx(), b"12").unwrap(), b"144");
        assert_eq!(square(&ctx(), b" -3\n").unwrap(), b"9");
    }

    #[test]
    fn test_square_rejects_non_integers() {
        assert_eq!(
            square(&ctx(), b"twelve").unwrap_err().message(),
            "payload is not an integer"
        );
        assert!(square(&ctx(), &[0xff, 0xfe]).is_err());
        assert!(square(&ctx(), i64::MAX.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_summarize_object() {
        let result = summarize_json(&ctx(), br#"{"a": 1, "b": [2, 3]}"#).unwrap();
        let value: Value = serde_json::from_slice(&result).unwrap();

        assert_eq!(value["key_count"], 2);
        assert_eq!(value["original"]["b"][1], 3);
    }

    #[test]
    fn test_summarize_non_object() {
        let result = summarize_json(&ctx(), b"[1, 2]").unwrap();
        let value: Value = serde_json::from_slice(&result).unwrap();

        assert!(value.get("key_count").is_none());
        assert_eq!(value["original"], json!([1, 2]));
    }

    #[test]
    fn test_summarize_invalid_json() {
        let err = summarize_json(&ctx(), b"{not json").unwrap_err();
        assert!(err.message().starts_with("Invalid JSON"));
    }
}
