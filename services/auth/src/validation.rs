//! Input validation for account registration

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Registration;

/// Validate a first or last name
pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(format!("{} is required", field));
    }

    if value.chars().count() > 64 {
        return Err(format!("{} must be at most 64 characters long", field));
    }

    Ok(())
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one digit".to_string());
    }

    Ok(())
}

/// Validate a whole registration request, reporting the first problem found
pub fn validate_registration(registration: &Registration) -> Result<(), String> {
    validate_name("First name", &registration.first_name)?;
    validate_name("Last name", &registration.last_name)?;
    validate_email(registration.email.trim())?;
    validate_password(&registration.password)
}

/// Email reduced to its first character and domain, for log lines
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => match local.chars().next() {
            Some(first) => format!("{}***@{}", first, domain),
            None => format!("***@{}", domain),
        },
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_emails_keep_only_initial_and_domain() {
        assert_eq!(mask_email("ada@example.com"), "a***@example.com");
        assert_eq!(mask_email("@example.com"), "***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    fn registration(email: &str, password: &str) -> Registration {
        Registration {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn accepts_valid_registration() {
        assert!(validate_registration(&registration("ada@example.com", "engine1843")).is_ok());
    }

    #[test]
    fn rejects_bad_email() {
        assert_eq!(
            validate_registration(&registration("ada@", "engine1843")),
            Err("Invalid email format".to_string())
        );
    }

    #[test]
    fn rejects_weak_passwords() {
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("1234567890").is_err());
    }

    #[test]
    fn rejects_blank_names() {
        assert_eq!(
            validate_name("First name", "   "),
            Err("First name is required".to_string())
        );
    }
}
