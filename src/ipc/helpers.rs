use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ParamError {
    pub message: String,
}

/// Required string param, trimmed. Empty-after-trim counts as missing.
pub fn required_str(params: &Value, key: &str) -> Result<String, ParamError> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(ParamError {
            message: format!("{} must not be empty", key),
        }),
        None => Err(ParamError {
            message: format!("missing {}", key),
        }),
    }
}

/// Optional string param; absent, null, or blank all come back as `None`.
pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
