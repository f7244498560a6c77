//! Framing of calls and replies on a byte stream.
//!
//! Every frame is one postcard-encoded [`Frame`] behind a 4-byte big-endian
//! length prefix. Calls are multiplexed by a connection-local id chosen by
//! the caller.
//!
//! A unary call is answered by exactly one `Reply` or `Failure`. A streaming
//! call is answered by any number of `Item`s followed by `End` or `Failure`.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::service::{RequestBody, ResponseBody};
use super::status::RpcStatus;

/// Largest frame accepted on either side.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Client to server: start a call.
    Call { id: u64, body: RequestBody },
    /// Client to server: the caller lost interest in `id`.
    Cancel { id: u64 },
    /// Server to client: the response of a unary call.
    Reply { id: u64, body: ResponseBody },
    /// Server to client: one message of a streaming call.
    Item { id: u64, body: ResponseBody },
    /// Server to client: a streaming call completed.
    End { id: u64 },
    /// Server to client: the call failed at the RPC level.
    Failure { id: u64, status: RpcStatus },
}

impl Frame {
    pub fn id(&self) -> u64 {
        match self {
            Frame::Call { id, .. }
            | Frame::Cancel { id }
            | Frame::Reply { id, .. }
            | Frame::Item { id, .. }
            | Frame::End { id }
            | Frame::Failure { id, .. } => *id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Codec(#[from] postcard::Error),
}

/// Length-delimited postcard codec for [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder().max_frame_length(max).new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let bytes = postcard::to_stdvec(&frame)?;
        self.inner.encode(Bytes::from(bytes), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{LookupRequest, ReadResponse, Status};

    fn roundtrip(frame: Frame) -> Frame {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().expect("complete frame")
    }

    #[test]
    fn test_call_frame() {
        let frame = Frame::Call {
            id: 7,
            body: RequestBody::Lookup(LookupRequest {
                header: None,
                name: "somefile".into(),
            }),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
        assert_eq!(frame.id(), 7);
    }

    #[test]
    fn test_failure_frame_keeps_status() {
        let frame = Frame::Failure {
            id: 3,
            status: RpcStatus::unimplemented("Fallocate"),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_partial_input_waits() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::Item {
                    id: 1,
                    body: ResponseBody::Read(ReadResponse {
                        status: Status::OK,
                        buffer: vec![1; 64],
                    }),
                },
                &mut buf,
            )
            .unwrap();
        let mut head = buf.split_to(10);
        assert!(codec.decode(&mut head).unwrap().is_none());
        head.unsplit(buf);
        assert!(matches!(codec.decode(&mut head).unwrap(), Some(Frame::Item { id: 1, .. })));
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::End { id: 1 }, &mut buf).unwrap();
        codec.encode(Frame::Cancel { id: 2 }, &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::End { id: 1 }));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Cancel { id: 2 }));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::with_max_frame_len(32);
        let mut buf = BytesMut::new();
        let frame = Frame::Item {
            id: 1,
            body: ResponseBody::Read(ReadResponse {
                status: Status::OK,
                buffer: vec![0; 128],
            }),
        };
        assert!(matches!(codec.encode(frame, &mut buf), Err(FrameError::Io(_))));
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0xff, 0xff][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Codec(_))));
    }
}
