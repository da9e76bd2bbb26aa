//! Length-prefixed framing over a byte stream.
//!
//! A frame is a little-endian `u32` length followed by that many bytes.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Writes one frame and flushes.
///
/// A failure may leave a partial frame on the stream; callers must drop the
/// connection rather than write to it again.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads frames from one connection, reusing a single buffer.
///
/// [`next_frame`](Self::next_frame) is cancel safe: a partially read frame
/// survives a dropped future and the next call picks up where it stopped.
/// This lets one task wait on several connections with `select!`.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_len: usize,
    len_buf: [u8; 4],
    len_filled: usize,
    // Payload length once the prefix is complete
    expected: Option<usize>,
    buf: Vec<u8>,
    filled: usize,
    frames: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `reader`; frames longer than `max_len` are rejected.
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            max_len,
            len_buf: [0; 4],
            len_filled: 0,
            expected: None,
            buf: Vec::with_capacity(max_len),
            filled: 0,
            frames: 0,
        }
    }

    /// Waits for the next complete frame and returns its length; the bytes
    /// are in [`frame`](Self::frame) until the next call.
    ///
    /// Frames longer than the limit fail with [`io::ErrorKind::InvalidData`];
    /// the stream is then out of sync and should be dropped. A stream that
    /// ends, even mid-frame, fails with [`io::ErrorKind::UnexpectedEof`].
    pub async fn next_frame(&mut self) -> io::Result<usize> {
        loop {
            match self.expected {
                None => {
                    let n = self.reader.read(&mut self.len_buf[self.len_filled..]).await?;
                    if n == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    self.len_filled += n;
                    if self.len_filled < self.len_buf.len() {
                        continue;
                    }

                    let len = u32::from_le_bytes(self.len_buf) as usize;
                    if len > self.max_len {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("frame of {len} bytes exceeds limit of {}", self.max_len),
                        ));
                    }
                    self.buf.clear();
                    self.buf.resize(len, 0);
                    self.filled = 0;
                    self.expected = Some(len);
                }
                Some(len) if self.filled == len => {
                    self.expected = None;
                    self.len_filled = 0;
                    self.frames += 1;
                    return Ok(len);
                }
                Some(len) => {
                    let n = self.reader.read(&mut self.buf[self.filled..len]).await?;
                    if n == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    self.filled += n;
                }
            }
        }
    }

    /// The frame returned by the last successful [`next_frame`](Self::next_frame).
    pub fn frame(&self) -> &[u8] {
        match self.expected {
            None => &self.buf,
            // A newer frame is half read
            Some(_) => &[],
        }
    }

    /// Complete frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_prefixes_length() {
        let mut out = Vec::new();
        write_frame(&mut out, b"hello").unwrap();
        assert_eq!(&out[..4], &5u32.to_le_bytes());
        assert_eq!(&out[4..], b"hello");
    }

    #[tokio::test]
    async fn test_read_consecutive_frames() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"first").unwrap();
        write_frame(&mut stream, b"").unwrap();
        write_frame(&mut stream, b"third!").unwrap();

        let mut reader = FrameReader::new(stream.as_slice(), 64);

        assert_eq!(reader.next_frame().await.unwrap(), 5);
        assert_eq!(reader.frame(), b"first");
        assert_eq!(reader.next_frame().await.unwrap(), 0);
        assert_eq!(reader.next_frame().await.unwrap(), 6);
        assert_eq!(reader.frame(), b"third!");
        assert_eq!(reader.frames_read(), 3);

        let eof = reader.next_frame().await.unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut stream = Vec::new();
        write_frame(&mut stream, &[0u8; 100]).unwrap();

        let mut reader = FrameReader::new(stream.as_slice(), 99);
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_eof() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"complete").unwrap();
        stream.truncate(8);

        let mut reader = FrameReader::new(stream.as_slice(), 64);
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(reader.frames_read(), 0);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads_survives_cancellation() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, 64);

        let mut bytes = Vec::new();
        write_frame(&mut bytes, b"across").unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut tx, &bytes[..6]).await.unwrap();

        // Reads the prefix and two payload bytes, then gets cancelled
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.next_frame()).await;
        assert!(pending.is_err());

        tokio::io::AsyncWriteExt::write_all(&mut tx, &bytes[6..]).await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), 6);
        assert_eq!(reader.frame(), b"across");
    }
}
