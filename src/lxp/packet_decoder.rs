use crate::prelude::*;
use crate::lxp::packet::{Packet, Parser, HEARTBEAT_LEN, PREFIX};

use {bytes::BytesMut, tokio_util::codec::Decoder};

/// Largest frame we expect from a datalog; anything declaring more is garbage.
pub const MAX_FRAME_LEN: usize = 1024;

/// Cuts whole frames out of the receive buffer.
///
/// Incomplete trailing data stays in the buffer for the next call. A frame that fails
/// validation is consumed and reported as an error; decoding can continue afterwards.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    discarded: usize,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes thrown away while looking for a frame prefix.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn skip(&mut self, src: &mut BytesMut, n: usize) {
        let _ = src.split_to(n);
        self.discarded += n;
    }
}

impl Decoder for PacketDecoder {
    type Item = Packet;
    type Error = LxpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let before = self.discarded;

        // resync one byte at a time until the buffer starts with a prefix
        while src.len() >= 2 && src[0..2] != PREFIX {
            self.skip(src, 1);
        }
        if src.len() == 1 && src[0] != PREFIX[0] {
            self.skip(src, 1);
        }
        if self.discarded > before {
            debug!("discarded {} bytes before frame prefix", self.discarded - before);
        }

        if src.len() < 6 {
            return Ok(None);
        }

        let frame_len = Utils::u16ify(src, 4) as usize + 6;
        if !(HEARTBEAT_LEN..=MAX_FRAME_LEN).contains(&frame_len) {
            // a prefix lookalike inside garbage; step past it and try again next time
            self.skip(src, 1);
            return Err(LxpError::LengthMismatch {
                declared: frame_len,
                actual: src.len() + 1,
            });
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        trace!("frame {:?}", frame.as_ref());

        Parser::parse(&frame).map(Some)
    }
}
