//! Wire encoding of review events.
//!
//! Every frame is a chat-completion chunk carrying a single character, so clients that
//! render OpenAI-style streams show the review as it is written. Keep-alives are chunks with
//! empty content; the stream always ends with exactly one `[DONE]` frame.

use async_stream::stream;
use futures_core::Stream;
use futures_util::{StreamExt, pin_mut};
use serde_json::json;

use crate::review::ReviewEvent;

/// Terminal payload of every stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A content chunk.
    Content(String),
    /// A chunk with empty content.
    KeepAlive,
    /// The terminal marker.
    Done,
}

impl Frame {
    /// `data:` payload of the frame.
    pub fn payload(&self) -> String {
        match self {
            Frame::Content(content) => chunk(content),
            Frame::KeepAlive => chunk(""),
            Frame::Done => DONE_PAYLOAD.to_string(),
        }
    }
}

fn chunk(content: &str) -> String {
    json!({
        "object": "chat.completion.chunk",
        "choices": [{ "delta": { "content": content } }],
    })
    .to_string()
}

/// Turn review events into frames.
///
/// Text is split into one frame per character. Nothing after the first terminal event is
/// forwarded, and a single [`Frame::Done`] closes the stream even if the events end without
/// one.
pub fn encode<S>(events: S) -> impl Stream<Item = Frame>
where
    S: Stream<Item = ReviewEvent>,
{
    stream! {
        pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                ReviewEvent::Heartbeat => yield Frame::KeepAlive,
                ReviewEvent::Text(text) => {
                    for ch in text.chars() {
                        yield Frame::Content(ch.to_string());
                    }
                }
                ReviewEvent::Finished(_) => break,
            }
        }
        yield Frame::Done;
    }
}
