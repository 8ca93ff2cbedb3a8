use callsim_model::{ErrorKind, ModelFinishReason, TokenUsage};
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "usage")]
    Usage(TokenUsage),
}

/// How a preset request should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetFailure {
    Moderated,
    RateLimited,
    Other,
}

impl From<PresetFailure> for ErrorKind {
    fn from(value: PresetFailure) -> Self {
        match value {
            PresetFailure::Moderated => ErrorKind::Moderated,
            PresetFailure::RateLimited => ErrorKind::RateLimitExceeded,
            PresetFailure::Other => ErrorKind::Other,
        }
    }
}

/// The preset response for an agent turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request fails with this kind of error instead of
    /// streaming the events.
    pub failure: Option<PresetFailure>,
    /// The reason reported after the events. `None` ends the stream
    /// without a completion event, like a dropped connection.
    #[serde(default = "default_finish_reason")]
    pub finish_reason: Option<ModelFinishReason>,
}

fn default_finish_reason() -> Option<ModelFinishReason> {
    Some(ModelFinishReason::Stop)
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failure: None,
            finish_reason: default_finish_reason(),
        }
    }

    /// Creates a `PresetResponse` that streams `text` as a single delta
    /// without reporting usage.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Creates a `PresetResponse` that streams `text` and then reports
    /// `completion_tokens` generated tokens.
    #[inline]
    pub fn text_with_usage<S: Into<String>>(
        text: S,
        completion_tokens: u64,
    ) -> Self {
        Self::with_events([
            PresetEvent::MessageDelta(text.into()),
            PresetEvent::Usage(TokenUsage {
                prompt_tokens: 0,
                completion_tokens,
            }),
        ])
    }

    /// Creates a `PresetResponse` that fails the request.
    #[inline]
    pub fn failing(failure: PresetFailure) -> Self {
        Self {
            events: vec![],
            failure: Some(failure),
            finish_reason: None,
        }
    }

    /// Replaces the reported finish reason.
    #[inline]
    pub fn with_finish_reason(
        mut self,
        finish_reason: Option<ModelFinishReason>,
    ) -> Self {
        self.finish_reason = finish_reason;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::MessageDelta(
                "Thank you for calling, how can I help?".to_string(),
            ),
            PresetEvent::Usage(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 9,
            }),
        ]);

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);

        let legacy: PresetResponse =
            serde_json::from_str(r#"{"events":[],"failure":null}"#).unwrap();
        assert_eq!(legacy.finish_reason, Some(ModelFinishReason::Stop));
    }

    #[test]
    fn test_failure_kind() {
        let response = PresetResponse::failing(PresetFailure::RateLimited);
        assert!(response.events.is_empty());
        assert_eq!(
            ErrorKind::from(response.failure.unwrap()),
            ErrorKind::RateLimitExceeded
        );
    }
}
