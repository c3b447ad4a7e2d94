// ABOUTME: Newline-delimited JSON decoding over a chunked byte stream
// ABOUTME: Yields one typed item per non-blank line, in arrival order

use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::EventStream;
use crate::error::CliError;

struct LineState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    eof: bool,
}

/// Splits `chunks` on `\n` and decodes each line as `T`. A trailing line
/// without a newline is decoded at end of stream. A transport error ends
/// the stream after being yielded once.
pub fn decode_lines<S, B, E, T>(chunks: S) -> EventStream<T>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<CliError> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(chunks),
        buf: Vec::new(),
        eof: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                if is_blank(&line) {
                    continue;
                }
                return Some((parse_line::<T>(&line), st));
            }

            if st.eof {
                if is_blank(&st.buf) {
                    return None;
                }
                let line = std::mem::take(&mut st.buf);
                return Some((parse_line::<T>(&line), st));
            }

            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.eof = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, CliError> {
    serde_json::from_slice(line).map_err(|e| {
        CliError::remote(format!(
            "malformed event '{}': {}",
            String::from_utf8_lossy(line).trim(),
            e
        ))
    })
}
