use serde::{Deserialize, Serialize};

/// Response body for `GET /v1/session`. The optional fields are present only
/// when a live session exists for the resolved key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfoResponse {
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms_remaining: Option<u64>,
}

/// Response body for `POST /v1/session/reset`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResetResponse {
    pub ok: bool,
    /// Whether a live session was actually removed.
    pub cleared: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_session_omits_optional_fields() {
        let info = SessionInfoResponse {
            session_key: "alice".to_string(),
            upstream_session_id: None,
            turn_count: None,
            ttl_ms_remaining: None,
        };

        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"session_key":"alice"}"#);
    }
}
