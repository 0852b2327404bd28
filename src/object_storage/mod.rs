use lazy_static::lazy_static;
use regex::Regex;

pub mod errors;
pub mod s3;

use errors::ObjectStorageError;

lazy_static! {
    // Wider than common storage driver defaults: app names and commit shas
    // put `:` and `.` inside keys. The widening is scoped to this gateway,
    // nothing process global is touched.
    static ref OBJECT_KEY_PATTERN: Regex = Regex::new(r"^([A-Za-z0-9._:-]*(/[A-Za-z0-9._:-]+)*)+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStat {
    Exists,
    NotFound,
}

/// Content addressed blob store keyed by string paths.
pub trait ObjectStorage: Send + Sync {
    /// Atomic replace of the object at `key`.
    fn put_content(&self, key: &str, content: &[u8]) -> Result<(), ObjectStorageError>;
    fn get_content(&self, key: &str) -> Result<Vec<u8>, ObjectStorageError>;
    fn stat(&self, key: &str) -> Result<ObjectStat, ObjectStorageError>;
    /// Idempotent: deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), ObjectStorageError>;
}

pub fn validate_key(key: &str) -> Result<(), ObjectStorageError> {
    if key.is_empty() || !OBJECT_KEY_PATTERN.is_match(key) {
        return Err(ObjectStorageError::InvalidKey { key: key.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_key;

    #[test]
    fn test_keys_with_colon_and_dot_are_legal() {
        assert!(validate_key("home/foo:git-abc12345/tar").is_ok());
        assert!(validate_key("home/foo:git-abc12345/push/slug.tgz").is_ok());
        assert!(validate_key("home/foo/cache").is_ok());
    }

    #[test]
    fn test_plain_segments_are_legal() {
        assert!(validate_key("cache").is_ok());
        assert!(validate_key("a-b_c.d:e").is_ok());
    }

    #[test]
    fn test_empty_and_malformed_keys_are_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("home//tar").is_err());
        assert!(validate_key("home/foo bar").is_err());
        assert!(validate_key("home/foo\ttar").is_err());
    }
}
