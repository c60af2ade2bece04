//! Line framing for the nREPL socket.
//!
//! Every request the client writes and every response fragment the server
//! writes is one JSON object on one `\n`-terminated line. Fragments of
//! different exchanges interleave freely; correlation happens above this
//! layer by `id`, so the codec only has to find line boundaries.
//!
//! A single fragment can carry a whole printed eval result, so the decoder
//! caps one line at [`MAX_FRAGMENT_BYTES`]. Blank lines are skipped.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Largest response fragment the reader accepts: 1 MiB.
pub const MAX_FRAGMENT_BYTES: usize = 1_048_576;

/// One JSON message per line, in both directions.
#[derive(Debug)]
pub struct ReplCodec(LinesCodec);

impl ReplCodec {
    /// Codec limited to [`MAX_FRAGMENT_BYTES`] per inbound line.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_FRAGMENT_BYTES))
    }

    fn next_fragment(
        &mut self,
        src: &mut BytesMut,
        mut decode: impl FnMut(&mut LinesCodec, &mut BytesMut) -> std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<String>> {
        loop {
            match decode(&mut self.0, src).map_err(map_codec_error)? {
                Some(line) if line.trim().is_empty() => {}
                other => return Ok(other),
            }
        }
    }
}

impl Default for ReplCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ReplCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_fragment(src, LinesCodec::decode)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_fragment(src, LinesCodec::decode_eof)
    }
}

impl Encoder<String> for ReplCodec {
    type Error = AppError;

    fn encode(&mut self, request: String, dst: &mut BytesMut) -> Result<()> {
        if request.contains('\n') {
            return Err(AppError::Protocol(
                "request spans more than one line".into(),
            ));
        }
        self.0.encode(request, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::Protocol(format!(
            "response fragment exceeds {MAX_FRAGMENT_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
