//! Demultiplexer for the runtime's attached-stream format.
//!
//! When a process runs without a TTY the runtime interleaves stdout and stderr
//! on one byte stream. Every frame carries an 8-byte header:
//!
//! ```text
//! [ tag: u8 | reserved: 3 bytes | length: u32 big-endian ] payload...
//! ```
//!
//! with tag 1 for stdout and 2 for stderr (0 is an stdin echo and is dropped).
//! Frames may be split across, or packed into, arbitrary transport chunks.
//!
//! Only [`ExecChunk::Multiplexed`] input goes through the decoder. Backends
//! whose client already splits the stream, such as bollard, hand over
//! [`ExecChunk::Output`] and report malformed frames themselves.

use bytes::{Buf, Bytes, BytesMut};

use code_play_core::{Error, Result};

use crate::engine::{ExecChunk, StreamChannel};

/// Length of a frame header.
pub const HEADER_LEN: usize = 8;

const TAG_STDIN: u8 = 0;
const TAG_STDOUT: u8 = 1;
const TAG_STDERR: u8 = 2;

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a transport chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<(StreamChannel, Bytes)>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let tag = self.buf[0];
            let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                as usize;

            let channel = match tag {
                TAG_STDIN => None,
                TAG_STDOUT => Some(StreamChannel::Stdout),
                TAG_STDERR => Some(StreamChannel::Stderr),
                other => {
                    return Err(Error::protocol(format!(
                        "unknown stream tag {} in frame header",
                        other
                    )))
                }
            };

            if self.buf.len() < HEADER_LEN + len {
                break;
            }

            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(len).freeze();
            if let Some(channel) = channel {
                frames.push((channel, payload));
            }
        }

        Ok(frames)
    }

    /// Signal end of stream. Leftover bytes mean a truncated frame.
    pub fn finish(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else if self.buf.len() < HEADER_LEN {
            Err(Error::protocol(format!(
                "stream ended inside a frame header ({} of {} bytes)",
                self.buf.len(),
                HEADER_LEN
            )))
        } else {
            Err(Error::protocol(format!(
                "stream ended inside a frame payload ({} bytes buffered)",
                self.buf.len() - HEADER_LEN
            )))
        }
    }
}

/// Encode one frame in the multiplexed format.
pub fn encode_frame(channel: StreamChannel, payload: &[u8]) -> Bytes {
    let tag = match channel {
        StreamChannel::Stdout => TAG_STDOUT,
        StreamChannel::Stderr => TAG_STDERR,
    };
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[tag, 0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Accumulates exec output into separate stdout and stderr buffers.
#[derive(Debug, Default)]
pub struct OutputCollector {
    decoder: FrameDecoder,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: ExecChunk) -> Result<()> {
        match chunk {
            ExecChunk::Multiplexed(raw) => {
                for (channel, payload) in self.decoder.push(&raw)? {
                    self.append(channel, &payload);
                }
            }
            ExecChunk::Output(channel, payload) => self.append(channel, &payload),
        }
        Ok(())
    }

    /// Finish collection, returning `(stdout, stderr)`.
    pub fn finish(self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.decoder.finish()?;
        Ok((self.stdout, self.stderr))
    }

    fn append(&mut self, channel: StreamChannel, payload: &[u8]) {
        match channel {
            StreamChannel::Stdout => self.stdout.extend_from_slice(payload),
            StreamChannel::Stderr => self.stderr.extend_from_slice(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(frames: &[(u8, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, payload) in frames {
            out.extend_from_slice(&[*tag, 0, 0, 0]);
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            out.extend_from_slice(payload);
        }
        out
    }

    #[test]
    fn test_demux_stdout_then_stderr() {
        let raw = stream(&[(1, b"hello"), (2, b"err")]);
        let mut collector = OutputCollector::new();
        collector
            .feed(ExecChunk::Multiplexed(Bytes::from(raw)))
            .unwrap();
        let (stdout, stderr) = collector.finish().unwrap();
        assert_eq!(stdout, b"hello");
        assert_eq!(stderr, b"err");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let raw = stream(&[(1, b"hello world")]);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(&raw[..3]).unwrap().is_empty());
        assert!(decoder.push(&raw[3..12]).unwrap().is_empty());
        let frames = decoder.push(&raw[12..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, StreamChannel::Stdout);
        assert_eq!(&frames[0].1[..], b"hello world");
        decoder.finish().unwrap();
    }

    #[test]
    fn test_empty_payload_and_stdin_frames() {
        let raw = stream(&[(0, b"typed"), (1, b""), (2, b"x")]);
        let frames = FrameDecoder::new().push(&raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].1.is_empty());
        assert_eq!(frames[1], (StreamChannel::Stderr, Bytes::from_static(b"x")));
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let raw = stream(&[(7, b"??")]);
        let err = FrameDecoder::new().push(&raw).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_truncated_payload_is_protocol_error() {
        let raw = stream(&[(1, b"hello")]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&raw[..raw.len() - 2]).unwrap();
        assert!(matches!(decoder.finish(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_short_header_is_protocol_error() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[1, 0, 0]).unwrap();
        assert!(matches!(decoder.finish(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_encode_frame_matches_wire_layout() {
        let frame = encode_frame(StreamChannel::Stderr, b"err");
        assert_eq!(&frame[..], &stream(&[(2, b"err")])[..]);
    }

    #[test]
    fn test_pre_attributed_output_bypasses_decoder() {
        let mut collector = OutputCollector::new();
        collector
            .feed(ExecChunk::Output(StreamChannel::Stdout, Bytes::from_static(b"a")))
            .unwrap();
        collector
            .feed(ExecChunk::Output(StreamChannel::Stderr, Bytes::from_static(b"b")))
            .unwrap();
        let (stdout, stderr) = collector.finish().unwrap();
        assert_eq!((stdout, stderr), (b"a".to_vec(), b"b".to_vec()));
    }
}
