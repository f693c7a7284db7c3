use crate::{error::NotificationError, models::message::Channel};

pub fn validate_fcm_token(token: &str) -> Result<(), NotificationError> {
    if token.is_empty() {
        return Err(NotificationError::validation("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(NotificationError::validation(
            "Device token too short (minimum 20 characters)",
        ));
    }

    if token.len() > 200 {
        return Err(NotificationError::validation(
            "Device token too long (maximum 200 characters)",
        ));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(NotificationError::validation(
            "Device token contains invalid characters",
        ));
    }

    Ok(())
}

pub fn validate_email_address(address: &str) -> Result<(), NotificationError> {
    let Some((local, domain)) = address.split_once('@') else {
        return Err(NotificationError::validation("Email address is missing '@'"));
    };

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(NotificationError::validation(format!(
            "Email address '{}' is malformed",
            address
        )));
    }

    if address.chars().any(char::is_whitespace) {
        return Err(NotificationError::validation(
            "Email address contains whitespace",
        ));
    }

    Ok(())
}

pub fn validate_recipient(channel: Channel, recipient: &str) -> Result<(), NotificationError> {
    match channel {
        Channel::Email => validate_email_address(recipient),
        Channel::Push => validate_fcm_token(recipient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcm_token_rules() {
        assert!(validate_fcm_token("").is_err());
        assert!(validate_fcm_token("short").is_err());
        assert!(validate_fcm_token(&"a".repeat(201)).is_err());
        assert!(validate_fcm_token("abc def ghi jkl mno pqr").is_err());
        assert!(validate_fcm_token("dQw4w9WgXcQ:APA91bHun4MxP5egoKMwt2KZFBaFUH").is_ok());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email_address("ada@example.com").is_ok());
        assert!(validate_email_address("ada.example.com").is_err());
        assert!(validate_email_address("@example.com").is_err());
        assert!(validate_email_address("ada@localhost").is_err());
        assert!(validate_email_address("ada lovelace@example.com").is_err());
    }
}
