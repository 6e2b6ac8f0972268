use super::types::*;

/// Encode a microvolt value into its 3-byte wire group.
///
/// Values are quantised to one ADC count and clamped to the 24-bit range.
pub fn encode_sample(microvolts: f32) -> [u8; 3] {
    let count = (microvolts as f64 / MICROVOLTS_PER_COUNT).round();
    let count = count.clamp(-(SIGNED_OFFSET as f64), (SIGNED_OFFSET - 1) as f64) as i32;
    let unsigned = (count + SIGNED_OFFSET) as u32;
    [
        ((unsigned >> 16) as u8) ^ 0x80,
        (unsigned >> 8) as u8,
        unsigned as u8,
    ]
}

/// Build a complete signal-source frame
pub fn encode_signal_frame(sequence: u32, values: &[f32; SIGNAL_CHANNELS]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(DeviceRole::Signal.frame_len());
    bytes.extend_from_slice(&SIGNAL_SYNC);
    bytes.push(0);
    bytes.extend_from_slice(&sequence.to_be_bytes());
    for &value in values {
        bytes.extend_from_slice(&encode_sample(value));
    }
    bytes
}

/// Build a complete marker-source frame
pub fn encode_marker_frame(sequence: u32, marker: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(DeviceRole::Marker.frame_len());
    bytes.extend_from_slice(&MARKER_SYNC);
    bytes.push(marker);
    bytes.extend_from_slice(&sequence.to_be_bytes());
    bytes.extend_from_slice(&[0u8; BYTES_PER_SAMPLE]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::decode_sample;

    #[test]
    fn test_encode_zero() {
        assert_eq!(encode_sample(0.0), [0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_negative_count() {
        let bytes = encode_sample(-(MICROVOLTS_PER_COUNT as f32));
        assert_eq!(bytes, [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let huge = encode_sample(1.0e9);
        assert_eq!(huge, [0x7F, 0xFF, 0xFF]);
        let tiny = encode_sample(-1.0e9);
        assert_eq!(tiny, [0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_sample_quantisation() {
        let value = 123.456f32;
        let decoded = decode_sample(encode_sample(value));
        assert!((decoded - value).abs() <= MICROVOLTS_PER_COUNT as f32);
    }

    #[test]
    fn test_marker_frame_layout() {
        let bytes = encode_marker_frame(0x01020304, 9);
        assert_eq!(bytes, vec![0xAA, 0x56, 9, 1, 2, 3, 4, 0, 0, 0]);
    }
}
