use bcrypt::{hash, verify, DEFAULT_COST};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;

use learnvault_common::AppError;

const UPPERCASE: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

pub struct PasswordService;

impl PasswordService {
    pub fn hash_password(password: &str) -> Result<String, AppError> {
        hash(password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
        verify(password, hash)
            .map_err(|e| AppError::Authentication(format!("Failed to verify password: {}", e)))
    }

    /// Generates a random temporary credential of at least `min_len` characters,
    /// guaranteed to contain an uppercase letter, a lowercase letter, a digit
    /// and a symbol. Ambiguous characters (O/0, I/l/1) are excluded.
    pub fn generate_temp_credential(min_len: usize) -> String {
        let len = min_len.max(12);
        let mut rng = OsRng;

        let mut chars: Vec<char> = vec![
            pick(&mut rng, UPPERCASE),
            pick(&mut rng, LOWERCASE),
            pick(&mut rng, DIGITS),
            pick(&mut rng, SYMBOLS),
        ];

        let all: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, SYMBOLS].concat();
        while chars.len() < len {
            chars.push(pick(&mut rng, &all));
        }

        chars.shuffle(&mut rng);
        chars.into_iter().collect()
    }

    pub fn validate_password_strength(password: &str) -> Result<(), AppError> {
        if password.len() < 8 {
            return Err(AppError::Validation(
                "Password must be at least 8 characters long".to_string(),
            ));
        }

        let has_uppercase = password.chars().any(|c| c.is_uppercase());
        let has_lowercase = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_numeric());
        let has_special = password
            .chars()
            .any(|c| "!@#$%^&*()_+-=[]{}|;:,.<>?".contains(c));

        if !has_uppercase {
            return Err(AppError::Validation(
                "Password must contain at least one uppercase letter".to_string(),
            ));
        }

        if !has_lowercase {
            return Err(AppError::Validation(
                "Password must contain at least one lowercase letter".to_string(),
            ));
        }

        if !has_digit {
            return Err(AppError::Validation(
                "Password must contain at least one digit".to_string(),
            ));
        }

        if !has_special {
            return Err(AppError::Validation(
                "Password must contain at least one special character".to_string(),
            ));
        }

        Ok(())
    }
}

fn pick<R: Rng>(rng: &mut R, set: &[u8]) -> char {
    set[rng.gen_range(0..set.len())] as char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_credential_contains_all_character_classes() {
        for _ in 0..50 {
            let credential = PasswordService::generate_temp_credential(12);
            assert!(credential.len() >= 12);
            assert!(credential.chars().any(|c| c.is_uppercase()));
            assert!(credential.chars().any(|c| c.is_lowercase()));
            assert!(credential.chars().any(|c| c.is_numeric()));
            assert!(credential.chars().any(|c| SYMBOLS.contains(&(c as u8))));
        }
    }

    #[test]
    fn temp_credential_passes_strength_validation() {
        let credential = PasswordService::generate_temp_credential(12);
        assert!(PasswordService::validate_password_strength(&credential).is_ok());
    }

    #[test]
    fn short_minimum_is_raised_to_twelve() {
        let credential = PasswordService::generate_temp_credential(4);
        assert!(credential.len() >= 12);
    }
}
