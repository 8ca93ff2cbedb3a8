use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use reqwest::Response;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Transport(String),
    InvalidPayload,
}

/// A type for reading server-sent events from a byte stream.
pub struct Sse {
    buf: String,
    chunks: BoxStream<'static, Result<Bytes, String>>,
}

impl Sse {
    /// Reads the events of a streaming HTTP response body.
    pub fn from_response(response: Response) -> Self {
        Self::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| err.to_string())),
        )
    }

    #[inline]
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, String>> + Send + 'static,
    {
        Self {
            buf: String::new(),
            chunks: chunks.boxed(),
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain the events that are already buffered first.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let bytes = match self.chunks.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => return Err(Error::Transport(err)),
                // No more data, and what's left can't form an event.
                None => return Ok(None),
            };
            let Ok(s) = std::str::from_utf8(&bytes) else {
                return Err(Error::InvalidPayload);
            };
            self.buf.push_str(s);
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if self.buf.is_empty() {
                return Ok(None);
            }

            // For `end-of-line`, we only handle line feed. And for event, we
            // only handle one data field, comments are skipped.
            //
            // event         = *( comment / field ) end-of-line
            // comment       = colon *any-char end-of-line
            // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
            let Some(eol_idx) = self.buf.find("\n\n") else {
                return Ok(None);
            };

            let block = &self.buf[0..eol_idx];
            if block.starts_with(':') {
                // Keep-alive comment.
                self.buf.drain(0..eol_idx + 2);
                continue;
            }

            let mut field_parts = block.splitn(2, ':');
            let Some(header) = field_parts.next() else {
                return Err(Error::InvalidPayload);
            };
            if header != "data" {
                // Other events are not supported.
                return Err(Error::InvalidPayload);
            }
            let Some(data) = field_parts.next() else {
                return Err(Error::InvalidPayload);
            };
            let data = data.strip_prefix(' ').unwrap_or(data).to_owned();

            // Consume the bytes from the buffer.
            self.buf.drain(0..eol_idx + 2);

            return Ok(Some(data));
        }
    }
}

#[cfg(test)]
pub(crate) fn from_static(chunks: &[&'static [u8]]) -> Sse {
    let chunks: Vec<_> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Sse::new(futures_util::stream::iter(chunks))
}
