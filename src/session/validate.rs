use crate::error::ValidationError;

pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
pub const DISPLAY_NAME_MAX: usize = 50;
pub const BIO_MAX: usize = 500;
pub const PASSWORD_MIN: usize = 6;

pub fn username(username: &str) -> Result<(), ValidationError> {
    let ok = USERNAME_LEN.contains(&username.chars().count())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        return Err(ValidationError::Username);
    }
    Ok(())
}

/// Returns the trimmed name.
pub fn display_name(display_name: &str) -> Result<&str, ValidationError> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > DISPLAY_NAME_MAX {
        return Err(ValidationError::DisplayName);
    }
    Ok(trimmed)
}

pub fn bio(bio: &str) -> Result<(), ValidationError> {
    if bio.chars().count() > BIO_MAX {
        return Err(ValidationError::Bio);
    }
    Ok(())
}

pub fn email(email: &str) -> Result<(), ValidationError> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(()),
        _ => Err(ValidationError::Email),
    }
}

pub fn password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(ValidationError::Password);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(username("ada_99").is_ok());
        assert!(username("abc").is_ok());
        assert!(username("a".repeat(20).as_str()).is_ok());

        assert_eq!(username("ab"), Err(ValidationError::Username));
        assert_eq!(username(&"a".repeat(21)), Err(ValidationError::Username));
        assert_eq!(username("ada lovelace"), Err(ValidationError::Username));
        assert_eq!(username("adà"), Err(ValidationError::Username));
    }

    #[test]
    fn display_names_are_trimmed() {
        assert_eq!(display_name("  Ada  "), Ok("Ada"));
        assert_eq!(display_name("   "), Err(ValidationError::DisplayName));
        assert_eq!(display_name(&"x".repeat(51)), Err(ValidationError::DisplayName));
    }

    #[test]
    fn emails_and_passwords() {
        assert!(email("ada@example.com").is_ok());
        assert_eq!(email("ada"), Err(ValidationError::Email));
        assert_eq!(email("@example.com"), Err(ValidationError::Email));
        assert_eq!(email("a@b@c"), Err(ValidationError::Email));

        assert!(password("hunter").is_ok());
        assert_eq!(password("12345"), Err(ValidationError::Password));
    }

    #[test]
    fn bio_limit() {
        assert!(bio(&"b".repeat(500)).is_ok());
        assert_eq!(bio(&"b".repeat(501)), Err(ValidationError::Bio));
    }
}
