use nom::{number::complete::le_u16, number::complete::le_u32, IResult};

pub struct Utils;

impl Utils {
    pub fn round(x: f64, decimals: u32) -> f64 {
        let y = 10i32.pow(decimals) as f64;
        (x * y).round() / y
    }

    /// Little-endian u16 at `offset`, or 0 if the slice is too short.
    pub fn u16ify(array: &[u8], offset: usize) -> u16 {
        match array.get(offset..offset + 2) {
            Some(b) => u16::from_le_bytes([b[0], b[1]]),
            None => 0,
        }
    }

    /// Recovers a signed value from a raw register word.
    pub fn twos_complement(raw: u16) -> i16 {
        if raw & 0x8000 != 0 {
            (raw as i32 - 0x10000) as i16
        } else {
            raw as i16
        }
    }

    pub fn le_u16_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u16(input)?;
        Ok((input, v as f64 / 10.0))
    }

    pub fn le_u16_div100(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u16(input)?;
        Ok((input, v as f64 / 100.0))
    }

    pub fn le_u16_div1000(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u16(input)?;
        Ok((input, v as f64 / 1000.0))
    }

    pub fn le_u32_div10(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u32(input)?;
        Ok((input, v as f64 / 10.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twos_complement() {
        assert_eq!(Utils::twos_complement(0x0064), 100);
        assert_eq!(Utils::twos_complement(0xFF9C), -100);
        assert_eq!(Utils::twos_complement(0x8000), i16::MIN);
    }

    #[test]
    fn u16ify_short_slice() {
        assert_eq!(Utils::u16ify(&[0x34, 0x12], 0), 0x1234);
        assert_eq!(Utils::u16ify(&[0x34], 0), 0);
    }

    #[test]
    fn scaled_parsers() {
        assert_eq!(Utils::le_u16_div10(&[0xE8, 0x03]).unwrap().1, 100.0);
        assert_eq!(Utils::le_u16_div100(&[0x8A, 0x13]).unwrap().1, 50.02);
        assert!(Utils::le_u32_div10(&[0x01, 0x00]).is_err());
    }
}
