//! Conversation-related types.

use callsim_model::ModelMessage;

/// Who a message in a [`Context`] is attributed to, from the point of view
/// of the persona that will read the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextRole {
    /// Extra instructions on top of the persona's own.
    System,
    /// The other side of the conversation.
    User,
    /// The persona itself.
    Assistant,
}

/// An ordered conversational context, supplied to one model invocation so
/// it can produce a contextually coherent next message.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Context {
    pub(crate) items: Vec<ModelMessage>,
}

impl Context {
    /// Creates an empty context.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message to the context.
    pub fn add_turn<S: Into<String>>(&mut self, role: ContextRole, message: S) {
        let message = message.into();
        self.items.push(match role {
            ContextRole::System => ModelMessage::System(message),
            ContextRole::User => ModelMessage::User(message),
            ContextRole::Assistant => ModelMessage::Assistant(message),
        });
    }

    /// Returns the messages in this context.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.items
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the context holds no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
