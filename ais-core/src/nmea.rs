//! NMEA 0183 `!AIVDM` framing: checksum, fill bits, fragmentation.
//!
//! A sentence looks like
//! `!AIVDM,<count>,<index>,<msg id>,<channel>,<payload>,<fill>*<checksum>`
//! where the checksum is the XOR of every byte between `!` and `*`.

/// Longest payload carried by a single sentence.
pub const MAX_FRAGMENT_CHARS: usize = 62;

/// Radio channel written into every sentence.
pub const DEFAULT_CHANNEL: char = 'B';

/// XOR of all bytes in `body`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Fill bits needed to pad a payload of `chars` characters to a six-bit
/// boundary. Payloads are already padded when armored, so this is 0.
pub fn fill_bits(chars: usize) -> usize {
    (6 - (chars * 6) % 6) % 6
}

/// Build one complete sentence.
pub fn make_sentence(
    payload: &str,
    fragment_count: usize,
    fragment_index: usize,
    message_id: Option<u8>,
    channel: char,
) -> String {
    let id = message_id.map(|i| i.to_string()).unwrap_or_default();
    let body = format!(
        "AIVDM,{fragment_count},{fragment_index},{id},{channel},{payload},{}",
        fill_bits(payload.len())
    );
    format!("!{body}*{:02X}", checksum(&body))
}

/// Frame a payload, splitting it into fragments when it exceeds
/// [`MAX_FRAGMENT_CHARS`]. Single sentences carry no message id.
pub fn frame_payload(payload: &str, message_id: u8, channel: char) -> Vec<String> {
    if payload.len() <= MAX_FRAGMENT_CHARS {
        return vec![make_sentence(payload, 1, 1, None, channel)];
    }
    let fragments: Vec<&str> = payload
        .as_bytes()
        .chunks(MAX_FRAGMENT_CHARS)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    let count = fragments.len();
    fragments
        .iter()
        .enumerate()
        .map(|(i, frag)| make_sentence(frag, count, i + 1, Some(message_id), channel))
        .collect()
}

/// Check a sentence's trailing checksum.
pub fn validate(sentence: &str) -> bool {
    let Some(rest) = sentence.strip_prefix('!') else {
        return false;
    };
    let Some((body, cs)) = rest.rsplit_once('*') else {
        return false;
    };
    match u8::from_str_radix(cs.trim_end(), 16) {
        Ok(expected) => checksum(body) == expected,
        Err(_) => false,
    }
}

/// Extract the armored payload field (sixth field) of a sentence.
pub fn payload_field(sentence: &str) -> Option<&str> {
    sentence.split(',').nth(5)
}

// ---------------------------------------------------------------------------
// Message id rotor
// ---------------------------------------------------------------------------

/// Sequential message id 0..=9 shared by the fragments of one message.
#[derive(Debug, Clone, Default)]
pub struct MessageIdRotor {
    current: u8,
}

impl MessageIdRotor {
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Return the id for this cycle and advance.
    pub fn rotate(&mut self) -> u8 {
        let id = self.current;
        self.current = (self.current + 1) % 10;
        id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_sentence() {
        let s = "!AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0*5C";
        assert!(validate(s));
        assert_eq!(
            checksum("AIVDM,1,1,,B,177KQJ5000G?tO`K>RA1wUbN0TKH,0"),
            0x5C
        );
    }

    #[test]
    fn test_make_sentence_format() {
        let s = make_sentence("15M67FC000G?ufbE`FepT@3n00Sa", 1, 1, None, 'B');
        assert!(s.starts_with("!AIVDM,1,1,,B,15M67FC000G?ufbE`FepT@3n00Sa,0*"));
        assert!(validate(&s));
        let hex = &s[s.len() - 2..];
        assert!(hex.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_validate_rejects_tampered() {
        let s = make_sentence("15M67FC000G?ufbE`FepT@3n00Sa", 1, 1, None, 'B');
        let tampered = s.replace("15M", "16M");
        assert!(!validate(&tampered));
        assert!(!validate("AIVDM,1,1,,B,0,0*00"));
    }

    #[test]
    fn test_fill_bits_zero() {
        assert_eq!(fill_bits(28), 0);
        assert_eq!(fill_bits(71), 0);
    }

    #[test]
    fn test_single_fragment() {
        let payload = "0".repeat(28);
        let lines = frame_payload(&payload, 7, 'B');
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("!AIVDM,1,1,,B,"));
    }

    #[test]
    fn test_two_fragments() {
        let payload: String = "5".repeat(71);
        let lines = frame_payload(&payload, 3, 'B');
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("!AIVDM,2,1,3,B,"));
        assert!(lines[1].starts_with("!AIVDM,2,2,3,B,"));
        assert_eq!(payload_field(&lines[0]).unwrap().len(), 62);
        assert_eq!(payload_field(&lines[1]).unwrap().len(), 9);
        assert!(lines.iter().all(|l| validate(l)));
    }

    #[test]
    fn test_rotor_wraps() {
        let mut rotor = MessageIdRotor::default();
        let ids: Vec<u8> = (0..12).map(|_| rotor.rotate()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1]);
        assert_eq!(rotor.current(), 2);
    }
}
