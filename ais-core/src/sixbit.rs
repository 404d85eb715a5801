//! Six-bit ASCII armoring and bit packing for AIS payloads.
//!
//! AIS payloads are bit strings packed MSB-first, then armored six bits at a
//! time into printable characters. Text fields use a separate 64-symbol
//! alphabet (`@` = 0, padding).

// ---------------------------------------------------------------------------
// Alphabets
// ---------------------------------------------------------------------------

/// Six-bit text alphabet used inside name, callsign and destination fields.
pub const SIXBIT_TEXT_TABLE: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// Armor one six-bit value into its payload character.
///
/// Panics if `value > 63`; callers only ever pass masked six-bit groups.
pub fn six_bit_encode(value: u8) -> char {
    assert!(value <= 63, "six-bit value out of range: {value}");
    if value <= 39 {
        (value + 48) as char
    } else {
        (value + 56) as char
    }
}

/// Inverse of [`six_bit_encode`]. Returns `None` for characters outside the
/// armoring range.
pub fn six_bit_decode(c: char) -> Option<u8> {
    match c as u32 {
        48..=87 => Some((c as u32 - 48) as u8),
        96..=119 => Some((c as u32 - 56) as u8),
        _ => None,
    }
}

fn text_index(c: char) -> u8 {
    let upper = c.to_ascii_uppercase();
    if !upper.is_ascii() {
        return 0;
    }
    SIXBIT_TEXT_TABLE
        .iter()
        .position(|&b| b == upper as u8)
        .map(|i| i as u8)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Bit packing
// ---------------------------------------------------------------------------

/// Two's complement of `value` in a `bits`-wide field.
pub fn twos_complement(value: i64, bits: usize) -> u64 {
    if value < 0 {
        ((1i64 << bits) + value) as u64
    } else {
        value as u64
    }
}

/// MSB-first bit accumulator.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    pub fn with_capacity(bits: usize) -> Self {
        BitWriter {
            bits: Vec::with_capacity(bits),
        }
    }

    /// Append the low `width` bits of `value`.
    pub fn push_uint(&mut self, value: u64, width: usize) {
        for i in (0..width).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Append a signed value as a `width`-bit two's complement field.
    pub fn push_int(&mut self, value: i64, width: usize) {
        self.push_uint(twos_complement(value, width), width);
    }

    pub fn push_bits(&mut self, bits: &[bool]) {
        self.bits.extend_from_slice(bits);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn as_bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn into_bits(self) -> Vec<bool> {
        self.bits
    }

    pub fn into_payload(self) -> String {
        bits_to_payload(&self.bits)
    }
}

/// Encode `text` into exactly `length` six-bit characters: uppercased,
/// unmapped characters become `@`, padded with `@` and truncated.
pub fn text_to_six_bit(text: &str, length: usize) -> Vec<bool> {
    let mut w = BitWriter::with_capacity(length * 6);
    let mut chars = text.chars();
    for _ in 0..length {
        let idx = chars.next().map(text_index).unwrap_or(0);
        w.push_uint(idx as u64, 6);
    }
    w.into_bits()
}

/// Callsign field: trimmed, uppercased, fixed at 7 characters.
pub fn callsign_to_six_bit(callsign: &str) -> Vec<bool> {
    text_to_six_bit(&callsign.trim().to_ascii_uppercase(), 7)
}

/// Armor a bit string, zero-padding the tail to a multiple of six.
pub fn bits_to_payload(bits: &[bool]) -> String {
    bits.chunks(6)
        .map(|chunk| {
            let mut v = 0u8;
            for i in 0..6 {
                v <<= 1;
                if chunk.get(i).copied().unwrap_or(false) {
                    v |= 1;
                }
            }
            six_bit_encode(v)
        })
        .collect()
}

/// Unarmor a payload back into bits. `None` on any invalid character.
pub fn payload_to_bits(payload: &str) -> Option<Vec<bool>> {
    let mut w = BitWriter::with_capacity(payload.len() * 6);
    for c in payload.chars() {
        w.push_uint(six_bit_decode(c)? as u64, 6);
    }
    Some(w.into_bits())
}

// ---------------------------------------------------------------------------
// Field readers (verification)
// ---------------------------------------------------------------------------

/// Read an unsigned field of `width` bits starting at bit `start`.
pub fn read_uint(bits: &[bool], start: usize, width: usize) -> u64 {
    bits.iter()
        .skip(start)
        .take(width)
        .fold(0u64, |acc, &b| (acc << 1) | b as u64)
}

/// Read a two's complement signed field.
pub fn read_int(bits: &[bool], start: usize, width: usize) -> i64 {
    let raw = read_uint(bits, start, width);
    if width > 0 && raw & (1 << (width - 1)) != 0 {
        raw as i64 - (1i64 << width)
    } else {
        raw as i64
    }
}

/// Read `chars` six-bit text characters, trimming `@` padding and spaces.
pub fn read_text(bits: &[bool], start: usize, chars: usize) -> String {
    let text: String = (0..chars)
        .map(|i| SIXBIT_TEXT_TABLE[read_uint(bits, start + i * 6, 6) as usize] as char)
        .collect();
    text.trim_end_matches('@').trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_six_bit_bijection() {
        let mut seen = std::collections::HashSet::new();
        for v in 0..=63u8 {
            let c = six_bit_encode(v);
            assert!(seen.insert(c), "duplicate char {c}");
            assert_eq!(six_bit_decode(c), Some(v));
        }
        assert_eq!(six_bit_encode(0), '0');
        assert_eq!(six_bit_encode(39), 'W');
        assert_eq!(six_bit_encode(40), '`');
        assert_eq!(six_bit_encode(63), 'w');
    }

    #[test]
    #[should_panic]
    fn test_six_bit_out_of_range() {
        six_bit_encode(64);
    }

    #[test]
    fn test_six_bit_decode_rejects() {
        assert_eq!(six_bit_decode('X'), None);
        assert_eq!(six_bit_decode('x'), None);
        assert_eq!(six_bit_decode(','), None);
    }

    #[test]
    fn test_twos_complement() {
        assert_eq!(twos_complement(-1, 8), 0xFF);
        assert_eq!(twos_complement(-128, 8), 0x80);
        assert_eq!(twos_complement(126, 8), 126);
        assert_eq!(twos_complement(-2_400_000, 28), (1 << 28) - 2_400_000);
    }

    #[test]
    fn test_bit_writer_widths() {
        let mut w = BitWriter::default();
        w.push_uint(1, 6);
        w.push_uint(0, 2);
        w.push_int(-1, 4);
        assert_eq!(w.len(), 12);
        let bits = w.as_bits();
        assert_eq!(read_uint(bits, 0, 6), 1);
        assert_eq!(read_uint(bits, 6, 2), 0);
        assert_eq!(read_int(bits, 8, 4), -1);
    }

    #[test]
    fn test_payload_round_trip() {
        let mut w = BitWriter::default();
        w.push_uint(0b101101_000001_111111, 18);
        w.push_uint(0b11, 2);
        let bits = w.as_bits().to_vec();
        let payload = bits_to_payload(&bits);
        assert_eq!(payload.len(), 4);
        let back = payload_to_bits(&payload).unwrap();
        assert_eq!(back.len(), 24);
        assert_eq!(&back[..20], &bits[..]);
        assert!(back[20..].iter().all(|b| !b));
    }

    #[test]
    fn test_text_padding_and_case() {
        let bits = text_to_six_bit("abc", 5);
        assert_eq!(bits.len(), 30);
        assert_eq!(read_uint(&bits, 0, 6), 1);
        assert_eq!(read_uint(&bits, 6, 6), 2);
        assert_eq!(read_uint(&bits, 12, 6), 3);
        assert_eq!(read_uint(&bits, 18, 6), 0);
        assert_eq!(read_text(&bits, 0, 5), "ABC");
    }

    #[test]
    fn test_text_truncates_and_maps_unknown() {
        let bits = text_to_six_bit("ÆGIR~LONG NAME", 4);
        assert_eq!(bits.len(), 24);
        // Æ is outside the table
        assert_eq!(read_uint(&bits, 0, 6), 0);
        assert_eq!(read_text(&bits, 0, 4), "@GIR");
    }

    #[test]
    fn test_callsign_fixed_width() {
        let bits = callsign_to_six_bit("  pd1234 ");
        assert_eq!(bits.len(), 42);
        assert_eq!(read_text(&bits, 0, 7), "PD1234");
        let long = callsign_to_six_bit("ABCDEFGHIJ");
        assert_eq!(read_text(&long, 0, 7), "ABCDEFG");
    }
}
