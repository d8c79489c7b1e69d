use crate::{ProtocolError, Result, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec delimiting frames with a length prefix
///
/// Stream format: [4-byte length (big-endian)] [frame bytes]
///
/// Frame bytes are handed through untouched so that a malformed body is
/// reported by [`crate::Frame::decode`] without tearing down the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(item.len()));
        }

        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frame;
    use jobline_core::JobId;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        let frame = Frame::JobRequest {
            job_id: JobId::new(1),
            payload: b"6*7".to_vec(),
        };
        codec.encode(frame.encode(), &mut buffer).unwrap();
        codec.encode(Frame::heartbeat("w-1").encode(), &mut buffer).unwrap();

        let first = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(Frame::decode(&first).unwrap(), frame);

        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(Frame::decode(&second).unwrap(), Frame::heartbeat("w-1"));

        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();

        codec
            .encode(Frame::register("worker-a").encode(), &mut buffer)
            .unwrap();

        // Split buffer - keep only partial frame
        let full_len = buffer.len();
        let rest = buffer.split_off(full_len / 2);

        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.unsplit(rest);
        let bytes = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::register("worker-a"));
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buffer.put_slice(b"junk");

        match codec.decode(&mut buffer) {
            Err(ProtocolError::FrameTooLarge(len)) => assert_eq!(len, MAX_FRAME_SIZE + 1),
            other => panic!("Expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_body_still_framed() {
        let mut codec = FrameCodec;
        let mut buffer = BytesMut::new();
        codec
            .encode(Bytes::from_static(&[0xff, 0x00, 0x01]), &mut buffer)
            .unwrap();

        let bytes = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&bytes[..], &[0xff, 0x00, 0x01]);
        assert!(Frame::decode(&bytes).is_err());
    }
}
