//! Simulated acquisition device for demos and integration tests

use std::f64::consts::PI;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::{encode_marker_frame, encode_signal_frame, DeviceRole, SIGNAL_CHANNELS};

/// Outcome of [`SimulatedDevice::stream`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamReport {
    pub sent: u64,
    pub skipped: u64,
    pub last_sequence: u32,
}

/// TCP client that speaks the device wire protocol
pub struct SimulatedDevice {
    role: DeviceRole,
    stream: TcpStream,
    frequency: f64,
    amplitude: f64,
}

impl SimulatedDevice {
    pub fn connect(addr: SocketAddr, role: DeviceRole) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        log::info!("Simulated {} device connected to {}", role.name(), addr);
        Ok(Self {
            role,
            stream,
            frequency: 10.0,
            amplitude: 50.0,
        })
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Sine frequency (Hz) and amplitude (µV) for generated signal frames
    pub fn with_waveform(mut self, frequency: f64, amplitude: f64) -> Self {
        self.frequency = frequency;
        self.amplitude = amplitude;
        self
    }

    pub fn send_signal(&mut self, sequence: u32, values: &[f32; SIGNAL_CHANNELS]) -> io::Result<()> {
        self.stream.write_all(&encode_signal_frame(sequence, values))
    }

    pub fn send_marker(&mut self, sequence: u32, marker: u8) -> io::Result<()> {
        self.stream.write_all(&encode_marker_frame(sequence, marker))
    }

    /// Raw bytes, for exercising resync
    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Emit `frames` sequence numbers at `rate_hz` (0 means as fast as
    /// possible). Every `drop_every`-th sequence is skipped to simulate loss.
    pub fn stream(&mut self, frames: u32, rate_hz: f64, drop_every: Option<u32>) -> io::Result<StreamReport> {
        let period = (rate_hz > 0.0).then(|| Duration::from_secs_f64(1.0 / rate_hz));
        let started = Instant::now();
        let mut report = StreamReport::default();

        for seq in 0..frames {
            if let Some(period) = period {
                let due = started + period * seq;
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
            }

            if matches!(drop_every, Some(k) if k > 0 && seq > 0 && seq % k == 0) {
                report.skipped += 1;
                continue;
            }

            match self.role {
                DeviceRole::Signal => {
                    let values = self.signal_values(seq, rate_hz);
                    self.send_signal(seq, &values)?;
                }
                DeviceRole::Marker => self.send_marker(seq, marker_value(seq))?,
            }
            report.sent += 1;
            report.last_sequence = seq;
        }

        self.stream.flush()?;
        Ok(report)
    }

    fn signal_values(&self, seq: u32, rate_hz: f64) -> [f32; SIGNAL_CHANNELS] {
        let rate = if rate_hz > 0.0 { rate_hz } else { 1000.0 };
        let t = seq as f64 / rate;
        let mut values = [0.0f32; SIGNAL_CHANNELS];
        for (ch, v) in values.iter_mut().enumerate() {
            let phase = 2.0 * PI * ch as f64 / SIGNAL_CHANNELS as f64;
            *v = (self.amplitude * (2.0 * PI * self.frequency * t + phase).sin()) as f32;
        }
        values
    }

    /// Close the write half so the server sees end of stream
    pub fn finish(self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }
}

/// A marker pulse every 500 sequences, cycling through values 1..=9
fn marker_value(seq: u32) -> u8 {
    if seq % 500 == 0 {
        ((seq / 500) % 9 + 1) as u8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FramePayload, FrameReader};
    use std::net::TcpListener;

    #[test]
    fn test_marker_pattern() {
        assert_eq!(marker_value(0), 1);
        assert_eq!(marker_value(1), 0);
        assert_eq!(marker_value(500), 2);
        assert_eq!(marker_value(4500), 1);
    }

    #[test]
    fn test_stream_skips_dropped_sequences() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let sender = thread::spawn(move || {
            let mut device = SimulatedDevice::connect(addr, DeviceRole::Signal).unwrap();
            let report = device.stream(10, 0.0, Some(4)).unwrap();
            device.finish().unwrap();
            report
        });

        let (socket, _) = listener.accept().unwrap();
        let mut reader = FrameReader::new(socket, DeviceRole::Signal);
        let mut sequences = Vec::new();
        while let Ok(frame) = reader.read_frame() {
            assert!(matches!(frame.payload, FramePayload::Signal(_)));
            sequences.push(frame.sequence);
        }

        let report = sender.join().unwrap();
        assert_eq!(sequences, vec![0, 1, 2, 3, 5, 6, 7, 9]);
        assert_eq!(report.sent, 8);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.last_sequence, 9);
    }
}
