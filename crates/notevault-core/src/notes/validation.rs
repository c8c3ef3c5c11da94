//! Note content validation.

use crate::error::{Result, VaultError};

/// Maximum bytes for a note title.
pub const MAX_TITLE_BYTES: usize = 1024;

/// Maximum bytes for a note body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn validate_title(title: &str) -> Result<()> {
    if title.len() > MAX_TITLE_BYTES {
        return Err(VaultError::Validation(format!(
            "Title too long (max {} bytes)",
            MAX_TITLE_BYTES
        )));
    }
    if title.contains('\0') {
        return Err(VaultError::Validation(
            "Title contains a NUL character".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_body(body: &str) -> Result<()> {
    if body.len() > MAX_BODY_BYTES {
        return Err(VaultError::Validation(format!(
            "Body too long (max {} bytes)",
            MAX_BODY_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_title_allowed() {
        assert!(validate_title("").is_ok());
    }

    #[test]
    fn test_title_limit() {
        assert!(validate_title(&"a".repeat(MAX_TITLE_BYTES)).is_ok());
        assert!(validate_title(&"a".repeat(MAX_TITLE_BYTES + 1)).is_err());
        // Counted in bytes, not characters.
        assert!(validate_title(&"é".repeat(MAX_TITLE_BYTES / 2 + 1)).is_err());
    }

    #[test]
    fn test_title_rejects_nul() {
        assert!(matches!(
            validate_title("a\0b"),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_body_limit() {
        assert!(validate_body(&"b".repeat(MAX_BODY_BYTES)).is_ok());
        assert!(validate_body(&"b".repeat(MAX_BODY_BYTES + 1)).is_err());
    }
}
