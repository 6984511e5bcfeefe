//! Mapping get-method names to the ids contracts dispatch on.

const CRC16_XMODEM_POLY: u16 = 0x1021;

/// Id of a get-method: the CRC-16/XMODEM of its name with bit 16 set.
pub fn method_name_hash(name: &str) -> u64 {
    (crc16_xmodem(name.as_bytes()) as u64 & 0xffff) | 0x10000
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |mut crc, b| {
        crc ^= (*b as u16) << 8;
        for _ in 0..8 {
            crc = match crc & 0x8000 {
                0 => crc << 1,
                _ => (crc << 1) ^ CRC16_XMODEM_POLY,
            };
        }
        crc
    })
}
