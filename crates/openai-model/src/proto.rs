use callsim_model::{ModelMessage, ModelRequest};
use serde::{Deserialize, Serialize};

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    stream: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

// -----------
// Conversions
// -----------

/// Builds the wire request. The agent's instructions always go first as
/// the system message, and the agent's model is used as is.
#[inline]
pub fn create_request(req: &ModelRequest) -> ChatCompletionRequest {
    let instructions = Message::System {
        content: req.agent.instructions.clone(),
    };
    ChatCompletionRequest {
        model: req.agent.model.clone(),
        messages: std::iter::once(instructions)
            .chain(req.messages.iter().map(create_message))
            .collect(),
        stream_options: Some(StreamOptions {
            include_usage: true,
        }),
        stream: true,
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant(content) => Message::Assistant {
            content: content.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use callsim_model::AgentHandle;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            agent: AgentHandle {
                id: "gpt-test:C1".to_owned(),
                name: "C1".to_owned(),
                model: "gpt-test".to_owned(),
                instructions: "You are a service representative.".to_owned(),
            },
            messages: vec![
                ModelMessage::User("Begin the conversation.".to_owned()),
                ModelMessage::Assistant("Hello!".to_owned()),
            ],
        };
        let expected = ChatCompletionRequest {
            model: "gpt-test".to_owned(),
            messages: vec![
                Message::System {
                    content: "You are a service representative.".to_owned(),
                },
                Message::User {
                    content: "Begin the conversation.".to_owned(),
                },
                Message::Assistant {
                    content: "Hello!".to_owned(),
                },
            ],
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            stream: true,
        };
        let wire = create_request(&request);
        assert_eq!(wire, expected);

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["stream_options"], json!({ "include_usage": true }));
    }

    #[test]
    fn test_usage_only_chunk() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#,
        )
        .unwrap();
        assert!(chunk.choices.is_empty());
        assert_eq!(
            chunk.usage,
            Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 5
            })
        );
    }
}
