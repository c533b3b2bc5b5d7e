use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::config::FramingConfig;
use crate::frame::{self, Frame};

/// A byte stream exchanging length-prefixed frames.
///
/// The connection owns its stream, so the underlying socket is closed exactly once, when the
/// connection is dropped.
pub struct Connection<S = TcpStream> {
    pub id: Uuid,
    stream: S,
    codec: FrameCodec,
    buffer_size: usize,
    io_timeout: Option<Duration>,
    // Data is read from the stream into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: &FramingConfig) -> Connection<S> {
        Connection {
            id: Uuid::new_v4(),
            stream,
            codec: FrameCodec::new(config),
            buffer_size: config.buffer_size.max(1),
            io_timeout: config.io_timeout,
            buffer: BytesMut::with_capacity(config.buffer_size.max(1)),
        }
    }

    /// Reads a single frame, reading at most `buffer_size` bytes from the stream at a time.
    ///
    /// Fails with `ConnectionClosed` if the peer closes the stream before a whole frame arrived,
    /// including before the first byte, and with `Timeout` if the frame is not complete within
    /// the configured I/O timeout.
    pub async fn read_frame(&mut self) -> Result<Frame, frame::Error> {
        let limit = self.io_timeout;
        within(limit, self.read_frame_inner()).await
    }

    async fn read_frame_inner(&mut self) -> Result<Frame, frame::Error> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }

            self.buffer.reserve(self.buffer_size);
            let n = (&mut self.stream)
                .take(self.buffer_size as u64)
                .read_buf(&mut self.buffer)
                .await?;

            if n == 0 {
                return Err(frame::Error::ConnectionClosed);
            }
        }
    }

    /// Writes the header and the payload of the frame as a single write.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), frame::Error> {
        let mut dst = BytesMut::new();
        self.codec.encode(frame, &mut dst)?;

        let stream = &mut self.stream;
        within(self.io_timeout, async move {
            stream.write_all(&dst).await?;
            stream.flush().await?;
            Ok::<_, frame::Error>(())
        })
        .await
    }

    /// Writes a frame whose payload is streamed from `source` in chunks of at most `buffer_size`
    /// bytes, so the payload is never held in memory as a whole.
    ///
    /// Exactly `known_length` bytes are taken from the source. If it runs dry before that, the
    /// frame on the wire is left incomplete and `SourceTooShort` is returned. The I/O timeout
    /// applies to each chunk rather than to the whole payload.
    pub async fn write_frame_from_source<R>(
        &mut self,
        source: R,
        known_length: u64,
    ) -> Result<(), frame::Error>
    where
        R: AsyncRead + Unpin,
    {
        if known_length > self.codec.max_frame_size() as u64 || known_length > u32::MAX as u64 {
            return Err(frame::Error::FrameTooLarge {
                length: known_length,
                max: (self.codec.max_frame_size() as u64).min(u32::MAX as u64),
            });
        }

        let mut header = Vec::with_capacity(frame::HEADER_LEN);
        Frame::write_header(known_length as usize, &mut header)?;
        let limit = self.io_timeout;
        within(limit, async {
            self.stream.write_all(&header).await.map_err(frame::Error::from)
        })
        .await?;

        let mut source = source.take(known_length);
        let mut chunk = vec![0u8; self.buffer_size];
        let mut sent = 0u64;

        loop {
            let n = source.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            within(limit, async {
                self.stream.write_all(&chunk[..n]).await.map_err(frame::Error::from)
            })
            .await?;
            sent += n as u64;
        }

        within(limit, async {
            self.stream.flush().await.map_err(frame::Error::from)
        })
        .await?;

        if sent < known_length {
            return Err(frame::Error::SourceTooShort {
                expected: known_length,
                actual: sent,
            });
        }

        Ok(())
    }

    /// Shuts down the write half, signalling the peer that nothing else will be sent.
    pub async fn shutdown(&mut self) -> Result<(), frame::Error> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn within<T, F>(limit: Option<Duration>, io: F) -> Result<T, frame::Error>
where
    F: Future<Output = Result<T, frame::Error>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, io)
            .await
            .map_err(|_| frame::Error::Timeout(limit))?,
        None => io.await,
    }
}
