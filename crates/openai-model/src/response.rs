use std::pin::Pin;
use std::task::{Context, Poll, ready};

use callsim_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent, TokenUsage,
};
use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::ChatCompletionChunk;

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Both fields are cleared once the corresponding event is returned.
    pending_finish_reason: Option<ModelFinishReason>,
    pending_usage: Option<TokenUsage>,
}

impl PartialState {
    #[inline]
    fn take_pending_event(&mut self) -> Option<ModelResponseEvent> {
        if let Some(finish_reason) = self.pending_finish_reason.take() {
            return Some(ModelResponseEvent::Completed(finish_reason));
        }
        self.pending_usage.take().map(ModelResponseEvent::Usage)
    }
}

type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<BoxFuture<'static, NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_finish_reason: None,
            pending_usage: None,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    if let Some(event) = partial_state.take_pending_event() {
        return Ok((Some(event), partial_state));
    }

    let mut message_delta = None;
    loop {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        if let Some(usage) = chunk.usage {
            partial_state.pending_usage = Some(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }

        if let Some(choice) = chunk.choices.pop() {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    message_delta = Some(content);
                }
            }
            if let Some(finish_reason) = choice.finish_reason {
                partial_state.pending_finish_reason =
                    Some(match finish_reason.as_str() {
                        "content_filter" => {
                            return Err(Error::new(
                                "completion was filtered",
                                ErrorKind::Moderated,
                            ));
                        }
                        "length" => ModelFinishReason::Length,
                        _ => ModelFinishReason::Stop,
                    });
            }
        }

        if message_delta.is_some()
            || partial_state.pending_finish_reason.is_some()
            || partial_state.pending_usage.is_some()
        {
            break;
        }
    }

    // The order of events are important. Always emit message delta first,
    // then the finish reason, and finally the usage if any.

    if let Some(message_delta) = message_delta {
        return Ok((
            Some(ModelResponseEvent::MessageDelta(message_delta)),
            partial_state,
        ));
    }

    let event = partial_state.take_pending_event();
    Ok((event, partial_state))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use super::*;
    use crate::io::from_static;

    async fn collect(
        sse: Sse,
    ) -> Result<(String, Vec<ModelResponseEvent>), Error> {
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut text = String::new();
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            if let ModelResponseEvent::MessageDelta(delta) = &event {
                text.push_str(delta);
            }
            events.push(event);
        }
        Ok((text, events))
    }

    #[tokio::test]
    async fn test_simple_events() {
        let sse = from_static(&[include_bytes!("../fixtures/test_response.txt")]);
        let (text, events) = collect(sse).await.unwrap();
        assert_eq!(text, "Thank you for calling. I will end this call now.");
        assert_eq!(
            &events[events.len() - 2..],
            &[
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
                ModelResponseEvent::Usage(TokenUsage {
                    prompt_tokens: 57,
                    completion_tokens: 12,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_content_filter() {
        let sse = from_static(&[
            b"data: {\"id\":\"x\",\"choices\":[{\"delta\":{},\"finish_reason\":\"content_filter\"}]}\n\n",
        ]);
        let err = collect(sse).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_id_mismatch() {
        let sse = from_static(&[
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
              data: {\"id\":\"b\",\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
        ]);
        assert!(collect(sse).await.is_err());
    }

    #[tokio::test]
    async fn test_cut_off_stream_has_no_completion() {
        let sse = from_static(&[
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"I was charged tw\"}}]}\n\n",
        ]);
        let (text, events) = collect(sse).await.unwrap();
        assert_eq!(text, "I was charged tw");
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ModelResponseEvent::Completed(_)))
        );
    }
}
