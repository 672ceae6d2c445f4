//! Request Handler Module
//!
//! The reactor knows how to move frames, not what they mean. Whatever sits
//! on top of it (a command interpreter, a test double, the echo service the
//! binary ships with) is injected as a `RequestHandler`: one request payload
//! in, one response payload out.
//!
//! ```text
//! ┌─────────────┐  payload   ┌────────────────┐  payload   ┌─────────────┐
//! │ FrameCodec  │──────────> │ RequestHandler │──────────> │ FrameCodec  │
//! │  (decode)   │            │   (injected)   │            │  (encode)   │
//! └─────────────┘            └────────────────┘            └─────────────┘
//! ```
//!
//! A handler has no access to the reactor, so it cannot close or reorder
//! connections. Responses are framed in the same order requests were decoded.

use bytes::Bytes;

/// Turns one request payload into one response payload.
pub trait RequestHandler {
    fn handle(&mut self, request: Bytes) -> Bytes;
}

impl<F> RequestHandler for F
where
    F: FnMut(Bytes) -> Bytes,
{
    fn handle(&mut self, request: Bytes) -> Bytes {
        self(request)
    }
}

/// Replies with the request payload unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl RequestHandler for Echo {
    #[inline]
    fn handle(&mut self, request: Bytes) -> Bytes {
        request
    }
}
