//! Size-prefixed framing used on the bridge socket.
//!
//! ```text
//! +----------------+---------------------------------------------+
//! | N: u32 (BE)    | N > 0: exactly N payload bytes              |
//! |                | N = 0: optional UTF-8 diagnostic until EOF  |
//! +----------------+---------------------------------------------+
//! ```
//!
//! The prefix is always written before any payload byte.  Only the failure
//! form relies on connection close to delimit its body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

pub const HEADER_LEN: usize = 4;

/// Upper bound on the buffer reserved from an untrusted length prefix.
const MAX_PREALLOC: u32 = 1 << 20;

/// One response on the bridge socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Capture bytes.  An empty payload is sent as a failure without text.
    Payload(Vec<u8>),
    /// Zero-length prefix followed by a diagnostic (possibly empty).
    Failure(String),
}

/// Big-endian length prefix for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], FramingError> {
    let n = u32::try_from(len).map_err(|_| FramingError::TooLarge(len))?;
    Ok(n.to_be_bytes())
}

impl Frame {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_failure(&self) -> bool {
        match self {
            Self::Payload(bytes) => bytes.is_empty(),
            Self::Failure(_) => true,
        }
    }

    fn parts(&self) -> (usize, &[u8]) {
        match self {
            Self::Payload(bytes) => (bytes.len(), bytes),
            Self::Failure(text) => (0, text.as_bytes()),
        }
    }

    /// Full wire image of the frame.
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        let (len, body) = self.parts();
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&encode_header(len)?);
        out.extend_from_slice(body);
        Ok(out)
    }

    /// Parse a complete wire image (everything received until close).
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let (header, rest) = bytes.split_at(HEADER_LEN);
        let n = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if n == 0 {
            return Ok(Self::Failure(String::from_utf8_lossy(rest).into_owned()));
        }
        if rest.len() < n as usize {
            return Err(FramingError::Truncated {
                expected: n,
                received: rest.len(),
            });
        }
        Ok(Self::Payload(rest[..n as usize].to_vec()))
    }

    /// Write header then body, then flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), FramingError>
    where
        W: AsyncWrite + Unpin,
    {
        let (len, body) = self.parts();
        writer.write_all(&encode_header(len)?).await?;
        if !body.is_empty() {
            writer.write_all(body).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame.  A payload is read to its exact length; failure text
    /// is read until the peer closes.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, FramingError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let n = u32::from_be_bytes(header);

        if n == 0 {
            let mut text = Vec::new();
            reader.read_to_end(&mut text).await?;
            return Ok(Self::Failure(String::from_utf8_lossy(&text).into_owned()));
        }

        let mut body = Vec::with_capacity(n.min(MAX_PREALLOC) as usize);
        reader.take(u64::from(n)).read_to_end(&mut body).await?;
        if body.len() < n as usize {
            return Err(FramingError::Truncated {
                expected: n,
                received: body.len(),
            });
        }
        Ok(Self::Payload(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        assert_eq!(encode_header(50_000).unwrap(), [0x00, 0x00, 0xC3, 0x50]);
        assert_eq!(encode_header(0).unwrap(), [0, 0, 0, 0]);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let wire = Frame::Payload(payload.clone()).encode().unwrap();
        assert_eq!(wire.len(), HEADER_LEN + payload.len());
        assert_eq!(Frame::decode(&wire).unwrap(), Frame::Payload(payload));
    }

    #[test]
    fn test_failure_with_and_without_text() {
        let wire = Frame::failure("ERROR: No image available.").encode().unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 0]);
        assert_eq!(
            Frame::decode(&wire).unwrap(),
            Frame::Failure("ERROR: No image available.".into())
        );

        assert_eq!(Frame::decode(&[0, 0, 0, 0]).unwrap(), Frame::Failure(String::new()));
        assert!(Frame::Payload(vec![]).is_failure());
    }

    #[test]
    fn test_decode_truncated_payload() {
        let mut wire = Frame::Payload(vec![9u8; 100]).encode().unwrap();
        wire.truncate(50);
        assert!(matches!(
            Frame::decode(&wire),
            Err(FramingError::Truncated { expected: 100, received: 46 })
        ));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let payload = vec![0x5A; 10_000];

        let sent = payload.clone();
        let writer = tokio::spawn(async move {
            Frame::Payload(sent).write_to(&mut a).await.unwrap();
        });
        let frame = Frame::read_from(&mut b).await.unwrap();
        writer.await.unwrap();
        assert_eq!(frame, Frame::Payload(payload));
    }

    #[tokio::test]
    async fn test_stream_failure_reads_until_close() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            Frame::failure("camera timeout").write_to(&mut a).await.unwrap();
            drop(a);
        });
        let frame = Frame::read_from(&mut b).await.unwrap();
        writer.await.unwrap();
        assert_eq!(frame, Frame::Failure("camera timeout".into()));
    }

    #[tokio::test]
    async fn test_stream_garbled_header_does_not_preallocate() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            a.write_all(b"HTTP/1.1 200 OK").await.unwrap();
            drop(a);
        });
        let result = Frame::read_from(&mut b).await;
        writer.await.unwrap();
        assert!(matches!(
            result,
            Err(FramingError::Truncated { expected: 0x4854_5450, received: 11 })
        ));
    }

    #[tokio::test]
    async fn test_stream_closed_mid_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            a.write_all(&encode_header(10).unwrap()).await.unwrap();
            a.write_all(b"abc").await.unwrap();
            drop(a);
        });
        let result = Frame::read_from(&mut b).await;
        writer.await.unwrap();
        assert!(matches!(
            result,
            Err(FramingError::Truncated { expected: 10, received: 3 })
        ));
    }
}
