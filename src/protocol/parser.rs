use std::io::{self, Read};

use super::types::*;

/// Parser position inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    WaitingForHeader,
    WaitingForReserved,
    WaitingForIndex,
    WaitingForData,
}

/// Byte-at-a-time frame decoder for one device role.
///
/// The header scan keeps a one-byte look-back window, so a stream that loses
/// alignment picks up again at the next sync pair instead of discarding a
/// whole frame's worth of bytes.
pub struct FrameParser {
    role: DeviceRole,
    sync: [u8; 2],
    state: ParserState,
    /// Last header byte seen while scanning for sync
    prev: Option<u8>,
    buf: Vec<u8>,
    marker: u8,
    sequence: u32,
    frames_decoded: u64,
}

impl FrameParser {
    pub fn new(role: DeviceRole) -> Self {
        Self {
            role,
            sync: role.sync_bytes(),
            state: ParserState::WaitingForHeader,
            prev: None,
            buf: Vec::with_capacity(role.payload_len()),
            marker: 0,
            sequence: 0,
            frames_decoded: 0,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of complete frames produced so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Feed one byte; returns a frame when this byte completes one
    pub fn process_byte(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ParserState::WaitingForHeader => {
                if self.prev == Some(self.sync[0]) && byte == self.sync[1] {
                    self.prev = None;
                    self.state = ParserState::WaitingForReserved;
                } else {
                    self.prev = Some(byte);
                }
                None
            }
            ParserState::WaitingForReserved => {
                self.marker = match self.role {
                    DeviceRole::Signal => 0,
                    DeviceRole::Marker => byte,
                };
                self.state = ParserState::WaitingForIndex;
                None
            }
            ParserState::WaitingForIndex => {
                self.buf.push(byte);
                if self.buf.len() == INDEX_LEN {
                    self.sequence = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                    self.buf.clear();
                    self.state = ParserState::WaitingForData;
                }
                None
            }
            ParserState::WaitingForData => {
                self.buf.push(byte);
                if self.buf.len() < self.role.payload_len() {
                    return None;
                }

                let payload = match self.role {
                    DeviceRole::Signal => FramePayload::Signal(decode_signal(&self.buf)),
                    // Trailing 3 bytes carry nothing beyond the reserved-byte marker
                    DeviceRole::Marker => FramePayload::Marker(self.marker),
                };

                self.buf.clear();
                self.state = ParserState::WaitingForHeader;
                self.frames_decoded += 1;

                Some(Frame {
                    sequence: self.sequence,
                    payload,
                })
            }
        }
    }

    /// Feed a slice, collecting every frame it completes
    pub fn process_bytes(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.process_byte(b)).collect()
    }
}

/// Decode a single 3-byte channel group into microvolts
pub fn decode_sample(group: [u8; 3]) -> f32 {
    let raw = (((group[0] ^ 0x80) as i32) << 16) | ((group[1] as i32) << 8) | group[2] as i32;
    ((raw - SIGNED_OFFSET) as f64 * MICROVOLTS_PER_COUNT) as f32
}

fn decode_signal(payload: &[u8]) -> [f32; SIGNAL_CHANNELS] {
    let mut values = [0.0f32; SIGNAL_CHANNELS];
    for (ch, group) in payload.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        values[ch] = decode_sample([group[0], group[1], group[2]]);
    }
    values
}

/// Pulls batched reads from a socket (or any reader) through a [`FrameParser`].
pub struct FrameReader<R> {
    inner: R,
    parser: FrameParser,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, role: DeviceRole) -> Self {
        Self {
            inner,
            parser: FrameParser::new(role),
            buf: vec![0u8; 4096].into_boxed_slice(),
            pos: 0,
            len: 0,
        }
    }

    pub fn parser(&self) -> &FrameParser {
        &self.parser
    }

    /// Block until a full frame is decoded.
    ///
    /// Returns `UnexpectedEof` once the peer closes the connection.
    pub fn read_frame(&mut self) -> io::Result<Frame> {
        loop {
            while self.pos < self.len {
                let byte = self.buf[self.pos];
                self.pos += 1;
                if let Some(frame) = self.parser.process_byte(byte) {
                    return Ok(frame);
                }
            }

            let n = match self.inner.read(&mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
            }
            self.pos = 0;
            self.len = n;
        }
    }
}
