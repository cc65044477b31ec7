use crc::{Crc, CRC_16_XMODEM};

/// Descriptor CRC per ECMA-167 7.2.6: x^16 + x^12 + x^5 + 1 with a zero
/// initial value, which is the standard XMODEM polynomial.
const DESCRIPTOR_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub fn descriptor_crc(data: &[u8]) -> u16 {
    DESCRIPTOR_CRC.checksum(data)
}
