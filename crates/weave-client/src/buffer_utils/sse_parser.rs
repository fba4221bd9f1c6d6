use anyhow::Result;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::buffering::CircularLineBuffer;
use crate::traits::EventStream;
use weave_types::StreamEvent;

/// Strategy for turning SSE `data:` payloads into envelope events
pub trait SseLineParser: Send {
    /// Parse one data payload. Stateful: a request's lines go through one parser.
    fn parse_data_line(&mut self, data: &str) -> Result<Vec<StreamEvent>>;

    /// Check if this payload signals end of stream
    fn is_done_marker(&self, data: &str) -> bool {
        data == "[DONE]"
    }

    /// Events to emit once the done marker arrives
    fn on_done(&mut self) -> Vec<StreamEvent>;
}

/// Generic SSE stream parser over any chunked byte stream.
///
/// Stops reading as soon as `cancel` fires or the done marker is seen.
pub fn parse_sse_stream<S, B, E, P>(bytes: S, mut parser: P, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    P: SseLineParser + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(bytes);
        let mut buffer = CircularLineBuffer::with_capacity(4096);
        let mut finished = false;

        while !finished {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = byte_chunks.next() => chunk,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    yield Err(anyhow::anyhow!("Stream error: {}", e));
                    break;
                }
                None => {
                    if cancel.is_cancelled() {
                        tracing::debug!("SSE read stopped after cancellation");
                        break;
                    }
                    // Trailing line without newline
                    let tail = match buffer.take_remainder() {
                        Some(Ok(tail)) => tail,
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => break,
                    };
                    if let Some(data) = data_payload(&tail) {
                        if parser.is_done_marker(data) {
                            for event in parser.on_done() {
                                yield Ok(event);
                            }
                        } else {
                            match parser.parse_data_line(data) {
                                Ok(events) => {
                                    for event in events {
                                        yield Ok(event);
                                    }
                                }
                                Err(e) => yield Err(e),
                            }
                        }
                    }
                    break;
                }
            };

            buffer.extend(chunk.as_ref());

            while let Some(line_result) = buffer.next_line() {
                let line = match line_result {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e);
                        finished = true;
                        break;
                    }
                };

                let Some(data) = data_payload(&line) else {
                    continue;
                };

                if parser.is_done_marker(data) {
                    for event in parser.on_done() {
                        yield Ok(event);
                    }
                    finished = true;
                    break;
                }

                match parser.parse_data_line(data) {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
        }
    })
}

/// Payload of a `data:` line, if the line is one
fn data_payload(line: &str) -> Option<&str> {
    if line.is_empty() {
        return None;
    }
    line.strip_prefix("data:").map(str::trim_start)
}
