use super::AuthError;

/// Shortest password accepted anywhere
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Reject passwords that do not meet the policy
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Validate then bcrypt-hash a password
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    validate_password(password)?;
    bcrypt::hash(password, cost).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify a password against a stored hash; malformed hashes never verify
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(
            hash_password("short", 4),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(validate_password("12345678").is_ok());
    }
}
