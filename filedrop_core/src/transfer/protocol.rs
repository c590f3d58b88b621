//! Wire framing for the transfer connection.
//!
//! Every message is `[u32 big-endian length][payload]`:
//! - count frame: the number of files as decimal ASCII text
//! - name frame: the UTF-8 file name
//! - body frame: the file size, followed by exactly that many raw bytes

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::{BUFFER_SIZE, MAX_BODY_SIZE, MAX_COUNT_LENGTH, MAX_FILENAME_LENGTH};
use super::utils::with_timeout;
use crate::error::{BodyError, FrameError};

/// Size of the length prefix in front of every frame
pub const LEN_PREFIX_SIZE: usize = 4;

fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode the number of files announced at the start of a session
pub fn encode_count(count: u32) -> Bytes {
    frame(count.to_string().as_bytes())
}

/// Encode a file name frame
pub fn encode_name(name: &str) -> Result<Bytes, FrameError> {
    validate_name(name)?;
    Ok(frame(name.as_bytes()))
}

/// Encode the length prefix that precedes a file body
pub fn encode_body_len(len: u64) -> Result<[u8; LEN_PREFIX_SIZE], FrameError> {
    if len > MAX_BODY_SIZE {
        return Err(FrameError::BodyTooLarge(len));
    }
    Ok((len as u32).to_be_bytes())
}

fn validate_name(name: &str) -> Result<(), FrameError> {
    if name.is_empty() {
        return Err(FrameError::InvalidName("empty name".to_string()));
    }
    if name.len() > MAX_FILENAME_LENGTH {
        return Err(FrameError::InvalidName(format!(
            "name too long ({} bytes, max {})",
            name.len(),
            MAX_FILENAME_LENGTH
        )));
    }
    Ok(())
}

/// Fill `buf` completely, reporting how far we got if the stream ends first
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(FrameError::UnexpectedEof {
                expected: buf.len() as u64,
                received: filled as u64,
            });
        }
        filled += n;
    }
    Ok(())
}

async fn read_len<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    read_full(reader, &mut len_buf).await?;
    Ok(u32::from_be_bytes(len_buf))
}

/// Read a length-prefixed control frame, rejecting oversized ones before allocating
async fn read_control_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_len(reader).await? as usize;
    if len > max {
        return Err(FrameError::TooLarge { len, max });
    }

    let mut buf = vec![0u8; len];
    read_full(reader, &mut buf).await?;
    Ok(buf)
}

/// Read the file count frame
pub async fn read_count<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let payload = read_control_frame(reader, MAX_COUNT_LENGTH).await?;
    let text = String::from_utf8_lossy(&payload);
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidCount(text.into_owned()));
    }
    text.parse::<u32>()
        .map_err(|_| FrameError::InvalidCount(text.into_owned()))
}

/// Read a file name frame
pub async fn read_name<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let payload = read_control_frame(reader, MAX_FILENAME_LENGTH).await?;
    let name = String::from_utf8(payload)
        .map_err(|_| FrameError::InvalidName("not valid UTF-8".to_string()))?;
    validate_name(&name)?;
    Ok(name)
}

/// Read the length prefix of a file body
pub async fn read_body_len<R>(reader: &mut R) -> Result<u64, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(read_len(reader).await? as u64)
}

/// Copy exactly `len` bytes from `reader` into `sink`.
///
/// Every read and write is bounded by `io_timeout`. `on_progress` is called
/// after each chunk with the number of bytes copied so far. Returns the number
/// of bytes copied, which always equals `len` on success.
pub async fn copy_body<R, W, F>(
    reader: &mut R,
    sink: &mut W,
    len: u64,
    io_timeout: Duration,
    mut on_progress: F,
) -> Result<u64, BodyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut copied: u64 = 0;
    let mut buffer = vec![0u8; len.clamp(1, BUFFER_SIZE as u64) as usize];

    while copied < len {
        let to_read = std::cmp::min(buffer.len() as u64, len - copied) as usize;
        let n = match with_timeout(io_timeout, reader.read(&mut buffer[..to_read])).await {
            Ok(0) => {
                // Keep whatever arrived so far on the sink side
                let _ = with_timeout(io_timeout, sink.flush()).await;
                return Err(BodyError::Source(FrameError::UnexpectedEof {
                    expected: len,
                    received: copied,
                }));
            }
            Ok(n) => n,
            Err(e) => {
                let _ = with_timeout(io_timeout, sink.flush()).await;
                return Err(BodyError::Source(FrameError::Io(e)));
            }
        };

        with_timeout(io_timeout, sink.write_all(&buffer[..n]))
            .await
            .map_err(BodyError::Sink)?;
        copied += n as u64;
        on_progress(copied);
    }

    with_timeout(io_timeout, sink.flush())
        .await
        .map_err(BodyError::Sink)?;
    Ok(copied)
}

/// Write an already encoded frame or prefix, bounded by `io_timeout`
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8], io_timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    with_timeout(io_timeout, writer.write_all(bytes)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_count_boundaries() {
        for count in [0u32, 1, u32::MAX] {
            let encoded = encode_count(count);
            let mut reader = &encoded[..];
            assert_eq!(read_count(&mut reader).await.unwrap(), count);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_count_wire_layout() {
        let encoded = encode_count(3);
        assert_eq!(&encoded[..], &[0, 0, 0, 1, b'3']);
    }

    #[tokio::test]
    async fn test_name_boundaries() {
        let longest = "n".repeat(MAX_FILENAME_LENGTH);
        for name in ["a", "report.pdf", "résumé.txt", longest.as_str()] {
            let encoded = encode_name(name).unwrap();
            let mut reader = &encoded[..];
            assert_eq!(read_name(&mut reader).await.unwrap(), name);
        }
    }

    #[test]
    fn test_encode_name_rejects_invalid() {
        assert!(matches!(encode_name(""), Err(FrameError::InvalidName(_))));
        let too_long = "x".repeat(MAX_FILENAME_LENGTH + 1);
        assert!(matches!(encode_name(&too_long), Err(FrameError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_body_len_boundaries() {
        for len in [0u64, 1, MAX_BODY_SIZE] {
            let encoded = encode_body_len(len).unwrap();
            let mut reader = &encoded[..];
            assert_eq!(read_body_len(&mut reader).await.unwrap(), len);
        }
        assert!(matches!(
            encode_body_len(MAX_BODY_SIZE + 1),
            Err(FrameError::BodyTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_count_rejected() {
        for bad in [&b""[..], b"-1", b"+3", b"3x", b"99999999999"] {
            let mut wire = (bad.len() as u32).to_be_bytes().to_vec();
            wire.extend_from_slice(bad);
            let mut reader = &wire[..];
            let err = read_count(&mut reader).await.unwrap_err();
            assert!(
                matches!(err, FrameError::InvalidCount(_) | FrameError::TooLarge { .. }),
                "unexpected error for {:?}: {}",
                bad,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_name_frame_rejected_before_payload() {
        // Only the length prefix is present; the reader must not wait for the payload
        let wire = ((MAX_FILENAME_LENGTH + 1) as u32).to_be_bytes();
        let mut reader = &wire[..];
        let err = read_name(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("Message too large"));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_unexpected_eof() {
        let encoded = encode_name("report.pdf").unwrap();
        let mut reader = &encoded[..encoded.len() - 3];
        match read_name(&mut reader).await {
            Err(FrameError::UnexpectedEof { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 7);
            }
            other => panic!("Expected UnexpectedEof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_copy_body_stops_at_declared_length() {
        let wire = b"hello, next frame";
        let mut reader = &wire[..];
        let mut sink = Vec::new();
        let mut updates = Vec::new();

        let copied = copy_body(&mut reader, &mut sink, 5, T, |done| updates.push(done))
            .await
            .unwrap();

        assert_eq!(copied, 5);
        assert_eq!(sink, b"hello");
        assert_eq!(reader, b", next frame");
        assert_eq!(updates.last(), Some(&5));
    }

    #[tokio::test]
    async fn test_copy_body_short_stream() {
        let wire = b"abc";
        let mut reader = &wire[..];
        let mut sink = Vec::new();

        let err = copy_body(&mut reader, &mut sink, 10, T, |_| {})
            .await
            .unwrap_err();
        match err {
            BodyError::Source(FrameError::UnexpectedEof { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("Expected short body, got {:?}", other),
        }
        assert_eq!(sink, b"abc");
    }

    #[tokio::test]
    async fn test_copy_empty_body() {
        let mut reader = &b""[..];
        let mut sink = Vec::new();
        let copied = copy_body(&mut reader, &mut sink, 0, T, |_| {}).await.unwrap();
        assert_eq!(copied, 0);
        assert!(sink.is_empty());
    }
}
