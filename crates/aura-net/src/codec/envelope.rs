use std::marker::PhantomData;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{NetError, NetResult};

use super::{DefaultFraming, FrameLengthResolver, HEADER_LEN};

/// Splits the receive buffer into complete, still encrypted envelopes.
/// Encoding writes the bytes unmodified, ciphering is done by the connection.
#[derive(Debug)]
pub struct EnvelopeCodec<R = DefaultFraming> {
    max_len: usize,
    _framing: PhantomData<fn() -> R>,
}

impl<R> EnvelopeCodec<R> {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            _framing: PhantomData,
        }
    }

    fn check_len(&self, len: usize) -> NetResult<()> {
        if len < HEADER_LEN || len > self.max_len {
            return Err(NetError::FrameSize(len));
        }

        Ok(())
    }
}

impl<R: FrameLengthResolver> Decoder for EnvelopeCodec<R> {
    type Item = BytesMut;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < R::MIN_HEADER_LEN {
            return Ok(None);
        }

        let len = R::frame_len(src);
        self.check_len(len)?;

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(len)))
    }
}

impl<'a, R> Encoder<&'a [u8]> for EnvelopeCodec<R> {
    type Error = NetError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item);
        Ok(())
    }
}
