use crate::{MAX_IDENTITY_LEN, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use jobline_core::{JobEnvelope, JobId, JobStatus, ResultEnvelope, MAX_PAYLOAD_SIZE};
use thiserror::Error;

/// Frame types of the worker/broker protocol
///
/// Layout of every frame (integers big-endian):
///
/// ```text
/// 0   version  u8
/// 1   type     u8
/// 2.. body
///       REGISTER | HEARTBEAT | DEREGISTER : identity_len u16, identity (utf-8)
///       JOB_REQUEST                       : job_id u64, payload_len u32, payload
///       JOB_RESULT                        : job_id u64, status u8, payload_len u32, payload
/// ..  extension area
/// ```
///
/// Bytes following the last field of a body belong to the extension area and
/// are ignored, so a newer peer may append fields without breaking this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Register = 1,
    Heartbeat = 2,
    JobRequest = 3,
    JobResult = 4,
    Deregister = 5,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameType::Register),
            2 => Some(FrameType::Heartbeat),
            3 => Some(FrameType::JobRequest),
            4 => Some(FrameType::JobResult),
            5 => Some(FrameType::Deregister),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Reasons a frame body cannot be understood. Always recoverable: the frame
/// is dropped and the session carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame")]
    Empty,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    #[error("Frame truncated: missing {0}")]
    MissingField(&'static str),

    #[error("Identity is not valid UTF-8")]
    InvalidIdentity,

    #[error("Unknown job status code: {0}")]
    UnknownStatus(u8),

    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Expected a job request, got {0:?}")]
    UnexpectedFrame(FrameType),
}

/// Protocol frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Worker announces itself (sent on every connect)
    Register { identity: String },

    /// Worker liveness signal
    Heartbeat { identity: String },

    /// Broker assigns a job
    JobRequest { job_id: JobId, payload: Vec<u8> },

    /// Worker reports a job outcome
    JobResult(ResultEnvelope),

    /// Worker leaves the pool
    Deregister { identity: String },
}

impl Frame {
    pub fn register(identity: impl Into<String>) -> Self {
        Frame::Register {
            identity: identity.into(),
        }
    }

    pub fn heartbeat(identity: impl Into<String>) -> Self {
        Frame::Heartbeat {
            identity: identity.into(),
        }
    }

    pub fn deregister(identity: impl Into<String>) -> Self {
        Frame::Deregister {
            identity: identity.into(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Register { .. } => FrameType::Register,
            Frame::Heartbeat { .. } => FrameType::Heartbeat,
            Frame::JobRequest { .. } => FrameType::JobRequest,
            Frame::JobResult(_) => FrameType::JobResult,
            Frame::Deregister { .. } => FrameType::Deregister,
        }
    }

    /// Serialize the frame. Identities are clipped to [`MAX_IDENTITY_LEN`]
    /// bytes. Payloads must respect [`MAX_PAYLOAD_SIZE`]; `ResultEnvelope`
    /// error constructors already clip their text to it.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len_hint());
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.frame_type().as_u8());

        match self {
            Frame::Register { identity }
            | Frame::Heartbeat { identity }
            | Frame::Deregister { identity } => put_identity(&mut dst, identity),
            Frame::JobRequest { job_id, payload } => {
                dst.put_u64(job_id.value());
                put_payload(&mut dst, payload);
            }
            Frame::JobResult(result) => {
                dst.put_u64(result.job_id.value());
                dst.put_u8(result.status.as_u8());
                put_payload(&mut dst, &result.payload);
            }
        }

        dst.freeze()
    }

    /// Parse one frame. Trailing bytes after the body are ignored.
    pub fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader { buf: src };

        let version = reader.u8("version").map_err(|_| DecodeError::Empty)?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let type_byte = reader.u8("frame type")?;
        let frame_type =
            FrameType::from_u8(type_byte).ok_or(DecodeError::InvalidFrameType(type_byte))?;

        let frame = match frame_type {
            FrameType::Register => Frame::Register {
                identity: reader.identity()?,
            },
            FrameType::Heartbeat => Frame::Heartbeat {
                identity: reader.identity()?,
            },
            FrameType::Deregister => Frame::Deregister {
                identity: reader.identity()?,
            },
            FrameType::JobRequest => {
                let job_id = JobId::new(reader.u64("job_id")?);
                let payload = reader.payload()?;
                Frame::JobRequest { job_id, payload }
            }
            FrameType::JobResult => {
                let job_id = JobId::new(reader.u64("job_id")?);
                let code = reader.u8("status")?;
                let status =
                    JobStatus::from_u8(code).map_err(|_| DecodeError::UnknownStatus(code))?;
                let payload = reader.payload()?;
                Frame::JobResult(ResultEnvelope {
                    job_id,
                    status,
                    payload,
                })
            }
        };

        Ok(frame)
    }

    fn encoded_len_hint(&self) -> usize {
        2 + match self {
            Frame::Register { identity }
            | Frame::Heartbeat { identity }
            | Frame::Deregister { identity } => 2 + identity.len(),
            Frame::JobRequest { payload, .. } => 12 + payload.len(),
            Frame::JobResult(result) => 13 + result.payload.len(),
        }
    }
}

/// Decode a frame that must be a job request
pub fn decode_job(src: &[u8]) -> Result<JobEnvelope, DecodeError> {
    match Frame::decode(src)? {
        Frame::JobRequest { job_id, payload } => {
            let actual = payload.len();
            JobEnvelope::new(job_id, payload).map_err(|_| DecodeError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual,
            })
        }
        other => Err(DecodeError::UnexpectedFrame(other.frame_type())),
    }
}

/// Encode a job result frame
pub fn encode_result(result: &ResultEnvelope) -> Bytes {
    Frame::JobResult(result.clone()).encode()
}

fn put_identity(dst: &mut BytesMut, identity: &str) {
    let bytes = clip_utf8(identity, MAX_IDENTITY_LEN).as_bytes();
    dst.put_u16(bytes.len() as u16);
    dst.put_slice(bytes);
}

fn put_payload(dst: &mut BytesMut, payload: &[u8]) {
    debug_assert!(
        payload.len() <= MAX_PAYLOAD_SIZE,
        "payload of {} bytes exceeds MAX_PAYLOAD_SIZE",
        payload.len()
    );
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
}

fn clip_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        if self.buf.remaining() < 1 {
            return Err(DecodeError::MissingField(field));
        }
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        if self.buf.remaining() < 2 {
            return Err(DecodeError::MissingField(field));
        }
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        if self.buf.remaining() < 4 {
            return Err(DecodeError::MissingField(field));
        }
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        if self.buf.remaining() < 8 {
            return Err(DecodeError::MissingField(field));
        }
        Ok(self.buf.get_u64())
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&[u8], DecodeError> {
        if self.buf.remaining() < len {
            return Err(DecodeError::MissingField(field));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn identity(&mut self) -> Result<String, DecodeError> {
        let len = self.u16("identity length")? as usize;
        let bytes = self.take(len, "identity")?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidIdentity)
    }

    fn payload(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32("payload length")? as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: len,
            });
        }
        Ok(self.take(len, "payload")?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job_request(job_id: u64, payload: &[u8]) -> Bytes {
        Frame::JobRequest {
            job_id: JobId::new(job_id),
            payload: payload.to_vec(),
        }
        .encode()
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::from_u8(1), Some(FrameType::Register));
        assert_eq!(FrameType::from_u8(5), Some(FrameType::Deregister));
        assert_eq!(FrameType::from_u8(0), None);
        assert_eq!(FrameType::from_u8(99), None);

        assert_eq!(FrameType::JobRequest.as_u8(), 3);
        assert_eq!(FrameType::JobResult.as_u8(), 4);
    }

    #[test]
    fn test_version_is_first_byte() {
        for frame in [
            Frame::register("w"),
            Frame::heartbeat("w"),
            Frame::deregister("w"),
            Frame::JobResult(ResultEnvelope::success(JobId::new(1), vec![])),
        ] {
            let bytes = frame.encode();
            assert_eq!(bytes[0], PROTOCOL_VERSION);
            assert_eq!(bytes[1], frame.frame_type().as_u8());
        }
    }

    #[test]
    fn test_result_layout() {
        let result = ResultEnvelope::success(JobId::new(1), b"42".to_vec());
        let bytes = encode_result(&result);

        assert_eq!(
            &bytes[..],
            &[1, 4, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 2, b'4', b'2']
        );
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::JobResult(result));
    }

    #[test]
    fn test_oversized_error_result_still_decodes() {
        let message = "e".repeat(MAX_PAYLOAD_SIZE + 2 * 1024 * 1024);
        let result = ResultEnvelope::application_error(JobId::new(5), message);
        let bytes = encode_result(&result);

        assert!(bytes.len() <= crate::MAX_FRAME_SIZE);
        match Frame::decode(&bytes).unwrap() {
            Frame::JobResult(decoded) => {
                assert_eq!(decoded.status, JobStatus::ApplicationError);
                assert_eq!(decoded.payload.len(), MAX_PAYLOAD_SIZE);
            }
            other => panic!("Expected JobResult, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_job() {
        let job = decode_job(&job_request(1, b"6*7")).unwrap();
        assert_eq!(job.job_id, JobId::new(1));
        assert_eq!(job.payload, b"6*7");
    }

    #[test]
    fn test_decode_job_rejects_other_frames() {
        let bytes = Frame::heartbeat("broker").encode();
        assert_eq!(
            decode_job(&bytes),
            Err(DecodeError::UnexpectedFrame(FrameType::Heartbeat))
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(Frame::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(Frame::decode(&[2, 3]), Err(DecodeError::UnsupportedVersion(2)));
        assert_eq!(Frame::decode(&[1]), Err(DecodeError::MissingField("frame type")));
        assert_eq!(Frame::decode(&[1, 42]), Err(DecodeError::InvalidFrameType(42)));
        assert_eq!(Frame::decode(&[1, 3, 0, 0]), Err(DecodeError::MissingField("job_id")));

        let full = job_request(9, b"abcdef");
        let truncated = &full[..full.len() - 2];
        assert_eq!(decode_job(truncated), Err(DecodeError::MissingField("payload")));

        let mut bad_status = encode_result(&ResultEnvelope::success(JobId::new(1), vec![])).to_vec();
        bad_status[10] = 7;
        assert_eq!(Frame::decode(&bad_status), Err(DecodeError::UnknownStatus(7)));

        assert_eq!(
            Frame::decode(&[1, 1, 0, 2, 0xc3, 0x28]),
            Err(DecodeError::InvalidIdentity)
        );
    }

    #[test]
    fn test_oversized_payload_length() {
        let mut bytes = vec![1, 3];
        bytes.extend_from_slice(&5u64.to_be_bytes());
        bytes.extend_from_slice(&((MAX_PAYLOAD_SIZE + 1) as u32).to_be_bytes());

        match decode_job(&bytes) {
            Err(DecodeError::PayloadTooLarge { actual, .. }) => {
                assert_eq!(actual, MAX_PAYLOAD_SIZE + 1)
            }
            other => panic!("Expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_extension_area_ignored() {
        let mut bytes = job_request(3, b"payload").to_vec();
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let job = decode_job(&bytes).unwrap();
        assert_eq!(job.job_id, JobId::new(3));
        assert_eq!(job.payload, b"payload");
    }

    #[test]
    fn test_identity_clipped_on_char_boundary() {
        let identity = "é".repeat(200);
        let bytes = Frame::register(identity).encode();

        match Frame::decode(&bytes).unwrap() {
            Frame::Register { identity } => {
                assert!(identity.len() <= MAX_IDENTITY_LEN);
                assert_eq!(identity.chars().count(), MAX_IDENTITY_LEN / 2);
            }
            other => panic!("Expected Register, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode(&bytes);
            let _ = decode_job(&bytes);
        }

        #[test]
        fn prop_job_request_roundtrip(
            job_id in any::<u64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let job = decode_job(&job_request(job_id, &payload)).unwrap();
            prop_assert_eq!(job.job_id, JobId::new(job_id));
            prop_assert_eq!(job.payload, payload);
        }

        #[test]
        fn prop_truncated_request_is_rejected(
            job_id in any::<u64>(),
            payload in proptest::collection::vec(any::<u8>(), 1..64),
            cut in 0usize..1000,
        ) {
            let full = job_request(job_id, &payload);
            let cut = cut % full.len();
            prop_assert!(decode_job(&full[..cut]).is_err());
        }
    }
}
