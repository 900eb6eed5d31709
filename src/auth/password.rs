//! Password hashing and strength policy.

use thiserror::Error;
use tracing::warn;

const DEFAULT_MIN_LENGTH: usize = 8;
const DEFAULT_MAX_LENGTH: usize = 128;
const DEFAULT_MIN_CLASSES: usize = 3;
const DEFAULT_STRENGTH_THRESHOLD: u8 = 60;

/// Why a candidate password was rejected. Check order is fixed
/// (length, then variety, then score) so messages are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordRejection {
    #[error("Password must be at least {0} characters long")]
    TooShort(usize),
    #[error("Password must be at most {0} characters long")]
    TooLong(usize),
    #[error(
        "Password must contain at least {0} of the following: \
         lowercase letters, uppercase letters, numbers, special characters"
    )]
    NotEnoughVariety(usize),
    #[error("Password is too weak (score: {score}/{required}). Please choose a stronger password")]
    TooWeak { score: u8, required: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    min_length: usize,
    max_length: usize,
    min_classes: usize,
    strength_threshold: u8,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            max_length: DEFAULT_MAX_LENGTH,
            min_classes: DEFAULT_MIN_CLASSES,
            strength_threshold: DEFAULT_STRENGTH_THRESHOLD,
        }
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_length_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    #[must_use]
    pub fn with_min_classes(mut self, classes: usize) -> Self {
        self.min_classes = classes;
        self
    }

    #[must_use]
    pub fn with_strength_threshold(mut self, threshold: u8) -> Self {
        self.strength_threshold = threshold;
        self
    }

    /// Hash a password with bcrypt. Each call salts independently, so the
    /// same input never produces the same output twice.
    ///
    /// # Errors
    ///
    /// Returns an error if the bcrypt hashing itself fails.
    pub fn hash(&self, password: &str) -> anyhow::Result<String> {
        Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
    }

    /// Verify a password against a stored hash.
    ///
    /// Malformed or empty hashes verify as false rather than erroring;
    /// a bad stored hash is not the caller's fault.
    #[must_use]
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(matches) => matches,
            Err(err) => {
                warn!("password verification against malformed hash: {err}");
                false
            }
        }
    }

    /// Strength score from 0 (weak) to 100 (strong).
    ///
    /// Length contributes up to 50 points (≥8: +25, ≥12: +15, ≥16: +10);
    /// each character class present contributes 12.5 points.
    #[must_use]
    pub fn score(password: &str) -> u8 {
        let mut score = 0.0_f64;

        let length = password.chars().count();
        if length >= 8 {
            score += 25.0;
        }
        if length >= 12 {
            score += 15.0;
        }
        if length >= 16 {
            score += 10.0;
        }

        score += character_classes(password) as f64 * 12.5;

        score.min(100.0) as u8
    }

    /// Validate a candidate password against the policy.
    ///
    /// # Errors
    ///
    /// Returns the first applicable [`PasswordRejection`]: length bounds,
    /// then character variety, then strength score.
    pub fn validate(&self, password: &str) -> Result<(), PasswordRejection> {
        let length = password.chars().count();
        if length < self.min_length {
            return Err(PasswordRejection::TooShort(self.min_length));
        }
        if length > self.max_length {
            return Err(PasswordRejection::TooLong(self.max_length));
        }

        if character_classes(password) < self.min_classes {
            return Err(PasswordRejection::NotEnoughVariety(self.min_classes));
        }

        let score = Self::score(password);
        if score < self.strength_threshold {
            return Err(PasswordRejection::TooWeak {
                score,
                required: self.strength_threshold,
            });
        }

        Ok(())
    }
}

/// Count the character classes present: lowercase, uppercase, digit, symbol.
fn character_classes(password: &str) -> usize {
    let has_lower = password.chars().any(char::is_lowercase);
    let has_upper = password.chars().any(char::is_uppercase);
    let has_digit = password.chars().any(char::is_numeric);
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric());

    [has_lower, has_upper, has_digit, has_symbol]
        .into_iter()
        .filter(|present| *present)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_and_salts() -> anyhow::Result<()> {
        let policy = PasswordPolicy::new();
        let first = policy.hash("Str0ng!Pass")?;
        let second = policy.hash("Str0ng!Pass")?;

        assert_ne!(first, second);
        assert!(policy.verify("Str0ng!Pass", &first));
        assert!(policy.verify("Str0ng!Pass", &second));
        assert!(!policy.verify("wrong", &first));
        Ok(())
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        let policy = PasswordPolicy::new();
        assert!(!policy.verify("anything", "not-a-bcrypt-hash"));
        assert!(!policy.verify("anything", ""));
    }

    #[test]
    fn score_rewards_length_and_variety() {
        // 8 chars, all four classes: 25 + 50
        assert_eq!(PasswordPolicy::score("aB3!aB3!"), 75);
        // 12 chars, all four classes: 25 + 15 + 50
        assert_eq!(PasswordPolicy::score("aB3!aB3!aB3!"), 90);
        // 16 chars, all four classes: capped at 100
        assert_eq!(PasswordPolicy::score("aB3!aB3!aB3!aB3!"), 100);
        // short, single class
        assert_eq!(PasswordPolicy::score("abc"), 12);
        assert_eq!(PasswordPolicy::score(""), 0);
    }

    #[test]
    fn validate_checks_length_first() {
        let policy = PasswordPolicy::new();
        assert_eq!(
            policy.validate("aB3!"),
            Err(PasswordRejection::TooShort(8))
        );
        let long = "aB3!".repeat(40);
        assert_eq!(policy.validate(&long), Err(PasswordRejection::TooLong(128)));
    }

    #[test]
    fn validate_requires_three_classes_regardless_of_length() {
        let policy = PasswordPolicy::new();
        // Long but only lowercase: variety fails before score.
        assert_eq!(
            policy.validate("aaaaaaaaaaaaaaaaaaaaaaaa"),
            Err(PasswordRejection::NotEnoughVariety(3))
        );
        // Two classes is still not enough.
        assert_eq!(
            policy.validate("aaaaaaaaaaaaAAAAAAA"),
            Err(PasswordRejection::NotEnoughVariety(3))
        );
    }

    #[test]
    fn validate_rejects_weak_scores_with_the_score_in_the_message() {
        let policy = PasswordPolicy::new().with_strength_threshold(80);
        // 8 chars, 3 classes: 25 + 37.5 = 62
        let rejection = policy.validate("aaaaaB12").unwrap_err();
        assert_eq!(
            rejection,
            PasswordRejection::TooWeak {
                score: 62,
                required: 80
            }
        );
        assert!(rejection.to_string().contains("62/80"));
    }

    #[test]
    fn validate_accepts_strong_passwords() {
        let policy = PasswordPolicy::new();
        assert_eq!(policy.validate("Str0ng!Pass"), Ok(()));
    }
}
