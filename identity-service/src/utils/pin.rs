//! Six-digit claim PINs relayed to players out of band.

use rand::{rngs::OsRng, Rng};

pub const PIN_LENGTH: usize = 6;

/// Prefix some clients show in front of the digits.
const DISPLAY_PREFIX: &str = "B-";

/// Uniform PIN in `000000..=999999` from the OS CSPRNG.
pub fn generate_pin() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:06}", value)
}

/// Accept a PIN as typed by a player: surrounding whitespace and the display
/// prefix are ignored, the rest must be exactly six ASCII digits.
pub fn normalize_pin(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix(DISPLAY_PREFIX).unwrap_or(trimmed);
    if digits.len() == PIN_LENGTH && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

/// Human-facing form of a stored PIN.
pub fn display_pin(pin: &str) -> String {
    format!("{}{}", DISPLAY_PREFIX, pin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_pins_are_six_digits() {
        for _ in 0..200 {
            let pin = generate_pin();
            assert_eq!(pin.len(), PIN_LENGTH);
            assert!(pin.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_normalize_accepts_display_form() {
        assert_eq!(normalize_pin("B-012345").as_deref(), Some("012345"));
        assert_eq!(normalize_pin("  987654 ").as_deref(), Some("987654"));
        assert_eq!(normalize_pin(&display_pin("000001")).as_deref(), Some("000001"));
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        assert_eq!(normalize_pin(""), None);
        assert_eq!(normalize_pin("12345"), None);
        assert_eq!(normalize_pin("1234567"), None);
        assert_eq!(normalize_pin("12a456"), None);
        assert_eq!(normalize_pin("b-123456"), None);
        assert_eq!(normalize_pin("B-B-123456"), None);
        assert_eq!(normalize_pin("１２３４５６"), None);
    }
}
