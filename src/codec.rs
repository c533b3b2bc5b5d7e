use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::FramingConfig;
use crate::frame::{self, Frame, HEADER_LEN};

pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(config: &FramingConfig) -> FrameCodec {
        FrameCodec {
            max_frame_size: config.max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(&FramingConfig::default())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = frame::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Reject oversized frames as soon as the header is in, before buffering any payload.
        if let Some(length) = Frame::peek_length(src) {
            if length as u64 > self.max_frame_size as u64 {
                return Err(frame::Error::FrameTooLarge {
                    length: length as u64,
                    max: self.max_frame_size as u64,
                });
            }
        }

        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            Err(frame::Error::Incomplete) => return Ok(None), // Not enough data to parse a frame.
            Err(err) => return Err(err),
        };

        let position: usize = cursor
            .position()
            .try_into()
            .expect("Cursor position is too large");

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(frame::Error::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = frame::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + item.len());
        Frame::write_header(item.len(), dst)?;
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}
