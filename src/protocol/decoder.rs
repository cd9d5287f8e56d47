//! Incremental frame decoder.
//!
//! Accumulates raw bytes from stream reads in a `BytesMut` and extracts
//! complete frames with a small state machine:
//! - `Header`: waiting for a complete `\n`-terminated header line
//! - `Payload`: header parsed, waiting for the declared payload bytes
//! - `Skip`: discarding an out-of-bounds payload to stay in sync
//!
//! A malformed header is fatal: once the four-token line cannot be parsed
//! there is no way to tell where the next frame starts, so the caller must
//! tear down the whole receive loop. An out-of-bounds declared length is
//! recoverable because the byte count itself is still trustworthy.

use bytes::BytesMut;

use super::frame::{Frame, PayloadKind, MAX_PAYLOAD_SIZE};
use crate::error::{Result, TapError};

/// Cap on the header line length. A well-formed header is tens of bytes;
/// blowing past this means the stream is not framed at all.
const MAX_HEADER_LINE: usize = 256;

/// Parsing state.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete header line.
    Header,
    /// Header parsed, waiting for payload bytes.
    Payload {
        timestamp: i64,
        local_port: u16,
        kind: PayloadKind,
        remaining: usize,
    },
    /// Discarding the payload of a frame with an out-of-bounds length.
    Skip { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameDecoder {
    buffer: BytesMut,
    state: State,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Header,
        }
    }

    /// Push data into the decoder and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push. Frames whose
    /// declared length is out of bounds are skipped and not returned.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Framing`] on a malformed header; the decoder is
    /// unusable afterwards and the stream must be abandoned.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            if let Some(frame) = frame {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to make progress on the buffered bytes.
    ///
    /// Returns:
    /// - `Ok(Some(Some(frame)))`: a complete frame was extracted
    /// - `Ok(Some(None))`: progress was made (skip completed) but no frame
    /// - `Ok(None)`: more data is needed
    /// - `Err(..)`: fatal framing error
    fn try_extract_one(&mut self) -> Result<Option<Option<Frame>>> {
        match self.state {
            State::Header => {
                let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                    if self.buffer.len() > MAX_HEADER_LINE {
                        return Err(TapError::Framing(format!(
                            "no header terminator within {} bytes",
                            MAX_HEADER_LINE
                        )));
                    }
                    return Ok(None);
                };

                let line = self.buffer.split_to(newline + 1);
                let (timestamp, local_port, kind, length) = parse_header(&line[..newline])?;

                if length > MAX_PAYLOAD_SIZE {
                    tracing::warn!(length, "ignoring bad payload length");
                    self.state = State::Skip { remaining: length };
                    return Ok(Some(None));
                }

                self.state = State::Payload {
                    timestamp,
                    local_port,
                    kind,
                    remaining: length,
                };
                Ok(Some(None))
            }

            State::Payload {
                timestamp,
                local_port,
                kind,
                remaining,
            } => {
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::Header;
                Ok(Some(Some(Frame::new(timestamp, local_port, kind, payload))))
            }

            State::Skip { remaining } => {
                let drop = remaining.min(self.buffer.len());
                let _ = self.buffer.split_to(drop);

                if drop == remaining {
                    self.state = State::Header;
                    Ok(Some(None))
                } else {
                    self.state = State::Skip {
                        remaining: remaining - drop,
                    };
                    Ok(None)
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one header line: `timestamp:local_port:kind:payload_length`.
///
/// Any deviation is a fatal framing error, except the kind token which maps
/// unrecognized values to [`PayloadKind::Unknown`]. A negative declared
/// length is fatal as well: skipping a negative byte count has no defined
/// meaning on the stream.
fn parse_header(line: &[u8]) -> Result<(i64, u16, PayloadKind, usize)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| TapError::Framing("non-ASCII header line".to_string()))?;

    let mut tokens = line.trim_end().splitn(4, ':');
    let (Some(tk_tstamp), Some(tk_port), Some(tk_kind), Some(tk_len)) = (
        tokens.next(),
        tokens.next(),
        tokens.next(),
        tokens.next(),
    ) else {
        return Err(TapError::Framing(format!("missing header tokens: {line:?}")));
    };

    let timestamp: i64 = tk_tstamp
        .parse()
        .map_err(|_| TapError::Framing(format!("bad timestamp: {tk_tstamp:?}")))?;
    let local_port: u16 = tk_port
        .parse()
        .map_err(|_| TapError::Framing(format!("bad port: {tk_port:?}")))?;
    let length: i64 = tk_len
        .parse()
        .map_err(|_| TapError::Framing(format!("bad payload length: {tk_len:?}")))?;

    if length < 0 {
        return Err(TapError::Framing(format!("negative payload length: {length}")));
    }

    Ok((
        timestamp,
        local_port,
        PayloadKind::from_token(tk_kind),
        length as usize,
    ))
}
