use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

/// Names with a meaning of their own during path resolution. They can never name an entry.
pub const RESERVED_NAMES: [&str; 3] = [".", "..", "~"];

/// The path separator.
pub const SEPARATOR: char = '/';

/// The name of an entry in a directory.
///
/// A name is non-empty, at most `max_len` characters long, contains no [`SEPARATOR`] and is not
/// one of the [`RESERVED_NAMES`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryName(String);

impl EntryName {
    /// Validates `name` against the naming rules with a length limit of `max_len` characters.
    pub fn new(name: &str, max_len: usize) -> Result<EntryName> {
        if name.is_empty() {
            return Err(FsError::InvalidName(name.to_owned()));
        }

        if name.chars().count() > max_len {
            return Err(FsError::InvalidName(format!(
                "{name} (longer than {max_len} characters)"
            )));
        }

        if name.contains(SEPARATOR) || RESERVED_NAMES.contains(&name) {
            return Err(FsError::InvalidName(name.to_owned()));
        }

        Ok(EntryName(name.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryName").field(&self.0).finish()
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::borrow::Borrow<str> for EntryName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name() {
        let name = EntryName::new("test", 10).unwrap();
        assert_eq!(name.as_str(), "test");
        assert_eq!(name.to_string(), "test");
    }

    #[test]
    fn test_empty_name() {
        assert!(matches!(EntryName::new("", 10), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_name_length_limit() {
        assert!(EntryName::new("abcdefghij", 10).is_ok());
        assert!(matches!(
            EntryName::new("abcdefghijk", 10),
            Err(FsError::InvalidName(_))
        ));
    }

    #[test]
    fn test_reserved_names() {
        for name in RESERVED_NAMES {
            assert!(matches!(EntryName::new(name, 10), Err(FsError::InvalidName(_))));
        }
    }

    #[test]
    fn test_name_with_separator() {
        assert!(matches!(EntryName::new("a/b", 10), Err(FsError::InvalidName(_))));
    }
}
