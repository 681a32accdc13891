use ring::rand::{SecureRandom, SystemRandom};

pub const CODE_LENGTH: usize = 10;

const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// Largest multiple of the alphabet size that fits in a byte; bytes at or
// above it are rejected so every symbol is equally likely.
const REJECTION_BOUND: u8 = 252;

#[derive(thiserror::Error, Debug)]
#[error("System random source unavailable")]
pub struct CodeGenerationError;

/// Generates a voucher code: `CODE_LENGTH` uppercase alphanumerics from the system CSPRNG
pub fn generate_code(rng: &SystemRandom) -> Result<String, CodeGenerationError> {
    let mut code = String::with_capacity(CODE_LENGTH);
    let mut buf = [0u8; 16];

    while code.len() < CODE_LENGTH {
        rng.fill(&mut buf).map_err(|_| CodeGenerationError)?;

        for byte in buf {
            if byte >= REJECTION_BOUND {
                continue;
            }
            code.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
            if code.len() == CODE_LENGTH {
                break;
            }
        }
    }

    Ok(code)
}

/// True if `code` has the shape of a generated voucher code
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_codes_are_well_formed() {
        let rng = SystemRandom::new();

        for _ in 0..200 {
            let code = generate_code(&rng).unwrap();
            assert!(is_well_formed(&code), "unexpected code {}", code);
        }
    }

    #[test]
    fn test_generated_codes_do_not_repeat() {
        let rng = SystemRandom::new();
        let codes: HashSet<String> = (0..1_000).map(|_| generate_code(&rng).unwrap()).collect();

        assert_eq!(codes.len(), 1_000);
    }

    #[test]
    fn test_is_well_formed_rejects_other_shapes() {
        assert!(is_well_formed("19AGVCBQOA"));
        assert!(!is_well_formed("19agvcbqoa"));
        assert!(!is_well_formed("19AGVCBQO"));
        assert!(!is_well_formed("19AGVCBQOA1"));
        assert!(!is_well_formed("19AGVC-QOA"));
    }
}
