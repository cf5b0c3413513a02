//! CRC-24 parity for Mode S messages

/// CRC-24 generator polynomial used in Mode S (0x1FFF409)
const CRC24_POLY: u32 = 0x1FFF409;

/// Polynomial remainder over every bit of `msg`.
///
/// For DF17/18 the parity field is the plain CRC, so an intact message leaves
/// a residual of zero. Address/parity formats (DF20/21 and friends) leave the
/// transponder address XORed into the residual instead.
pub fn residual(msg: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &byte in msg {
        crc ^= (byte as u32) << 16;

        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc & 0xFFFFFF
}

/// Extract ICAO address from message (bytes 1-3)
pub fn icao(msg: &[u8]) -> u32 {
    ((msg[1] as u32) << 16) | ((msg[2] as u32) << 8) | (msg[3] as u32)
}

/// Downlink format from the first five bits.
///
/// Formats 24 and above share the `11` prefix and are folded into 24.
pub fn downlink_format(msg: &[u8]) -> u8 {
    let df = (msg[0] >> 3) & 0x1F;
    df.min(24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residual_of_valid_long_squitter() {
        let msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        assert_eq!(residual(&msg), 0);
    }

    #[test]
    fn test_every_single_bit_error_is_detected() {
        let msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        for bit in 0..msg.len() * 8 {
            let mut corrupted = msg.clone();
            corrupted[bit / 8] ^= 0x80 >> (bit % 8);
            assert_ne!(residual(&corrupted), 0, "bit {} flip went undetected", bit);
        }
    }

    #[test]
    fn test_icao() {
        let msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        assert_eq!(icao(&msg), 0x4840D6);
    }

    #[test]
    fn test_downlink_format() {
        let msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        assert_eq!(downlink_format(&msg), 17);
        assert_eq!(downlink_format(&[0xA8, 0, 0, 0]), 21);
        assert_eq!(downlink_format(&[0xFF, 0, 0, 0]), 24);
    }
}
