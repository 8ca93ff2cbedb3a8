use super::TerminationReason;

/// The exact sentence the representative ends a call with.
pub const CALL_ENDED_PHRASE: &str = "i will end this call now";
/// The exact sentence the representative escalates a call with.
pub const ESCALATION_PHRASE: &str =
    "i will transfer this call to my supervisor now";
/// A shorter form of [`ESCALATION_PHRASE`] that is accepted too.
pub const SHORT_ESCALATION_PHRASE: &str = "transfer this call to my supervisor";

/// Decides whether a representative message ends the call.
pub trait TerminationDetector: Send + Sync {
    /// Returns the reason the call ends, or `None` to keep going.
    fn detect(&self, message: &str) -> Option<TerminationReason>;
}

/// Lowercases `text`, turns everything that is not a letter or a digit
/// into a space, and collapses runs of whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Detects fixed phrases anywhere in a message, on word boundaries, after
/// [`normalize`] is applied to both sides.
#[derive(Clone, Debug)]
pub struct PhraseDetector {
    phrases: Vec<(String, TerminationReason)>,
}

impl PhraseDetector {
    /// Creates a detector without any phrase.
    #[inline]
    pub fn empty() -> Self {
        Self { phrases: vec![] }
    }

    /// Adds a phrase. Phrases are checked in insertion order.
    pub fn with_phrase(mut self, phrase: &str, reason: TerminationReason) -> Self {
        let phrase = normalize(phrase);
        if !phrase.is_empty() {
            self.phrases.push((phrase, reason));
        }
        self
    }
}

impl Default for PhraseDetector {
    fn default() -> Self {
        Self::empty()
            .with_phrase(CALL_ENDED_PHRASE, TerminationReason::CallEnded)
            .with_phrase(ESCALATION_PHRASE, TerminationReason::Escalated)
            .with_phrase(SHORT_ESCALATION_PHRASE, TerminationReason::Escalated)
    }
}

impl TerminationDetector for PhraseDetector {
    fn detect(&self, message: &str) -> Option<TerminationReason> {
        let haystack = format!(" {} ", normalize(message));
        self.phrases
            .iter()
            .find(|(phrase, _)| haystack.contains(&format!(" {phrase} ")))
            .map(|(_, reason)| reason.clone())
    }
}

/// Adapts a closure into a [`TerminationDetector`].
pub struct PredicateDetector<F>(pub F);

impl<F> TerminationDetector for PredicateDetector<F>
where
    F: Fn(&str) -> Option<TerminationReason> + Send + Sync,
{
    #[inline]
    fn detect(&self, message: &str) -> Option<TerminationReason> {
        (self.0)(message)
    }
}
