//! Socket channel wire format
//!
//! Every message is one frame: a 4-byte big-endian payload length followed by
//! that many UTF-8 bytes. The payload is either a label or one of the reserved
//! sentinels.

use crate::error::ChannelError;
use crate::label::{ContextLabel, CLEAR_SENTINEL, MAX_LABEL_LEN, STOP_SENTINEL};

/// Largest payload written to or accepted from the wire
pub const MAX_FRAME_LEN: usize = MAX_LABEL_LEN;

const HEADER_LEN: usize = 4;

/// One message on the socket channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// New current label
    Set(ContextLabel),
    /// Back to "no context"
    Clear,
    /// Publisher is going away
    Stop,
}

impl Message {
    /// Message announcing `label`
    #[must_use]
    pub fn for_label(label: &ContextLabel) -> Self {
        if label.is_none() {
            Message::Clear
        } else {
            Message::Set(label.clone())
        }
    }

    fn payload(&self) -> &str {
        match self {
            Message::Set(label) => label.as_str().unwrap_or(CLEAR_SENTINEL),
            Message::Clear => CLEAR_SENTINEL,
            Message::Stop => STOP_SENTINEL,
        }
    }

    fn from_payload(payload: &str) -> Self {
        match payload {
            STOP_SENTINEL => Message::Stop,
            CLEAR_SENTINEL | "" => Message::Clear,
            text => Message::Set(ContextLabel::from_payload(text)),
        }
    }

    /// Encode as a single frame
    ///
    /// # Errors
    /// - `ChannelError::MalformedFrame` if the payload exceeds
    ///   [`MAX_FRAME_LEN`]; nothing a decoder would reject is ever produced
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let payload = self.payload().as_bytes();
        let len = match u32::try_from(payload.len()) {
            Ok(len) if payload.len() <= MAX_FRAME_LEN => len,
            _ => {
                return Err(ChannelError::malformed(format!(
                    "payload of {} bytes exceeds {MAX_FRAME_LEN}",
                    payload.len()
                )))
            }
        };
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

/// Incremental frame decoder
///
/// Bytes arrive in arbitrary chunks; partial frames stay buffered until the
/// rest shows up.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create empty decoder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet decoded
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete message, if one is buffered
    ///
    /// # Errors
    /// - `ChannelError::MalformedFrame` on an oversized length or a payload
    ///   that is not UTF-8
    pub fn next_message(&mut self) -> Result<Option<Message>, ChannelError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ChannelError::malformed(format!(
                "frame length {len} exceeds {MAX_FRAME_LEN}"
            )));
        }

        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..HEADER_LEN + len).collect();
        let payload = std::str::from_utf8(&frame[HEADER_LEN..])
            .map_err(|e| ChannelError::malformed(format!("payload is not utf-8: {e}")))?;

        Ok(Some(Message::from_payload(payload)))
    }
}
