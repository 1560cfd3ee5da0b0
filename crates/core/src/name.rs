//! Node name validation and conflict-rename variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for handling same-name siblings during move, copy, and overwrite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictStrategy {
    /// Reject the operation with a name conflict.
    #[default]
    Fail,
    /// Pick the smallest free `name (n).ext` variant.
    Rename,
    /// Replace the conflicting node. Only valid for file-over-file.
    Overwrite,
}

impl FromStr for ConflictStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FAIL" => Ok(Self::Fail),
            "RENAME" => Ok(Self::Rename),
            "OVERWRITE" => Ok(Self::Overwrite),
            other => Err(crate::Error::InvalidStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fail => "FAIL",
            Self::Rename => "RENAME",
            Self::Overwrite => "OVERWRITE",
        };
        write!(f, "{s}")
    }
}

/// Validate a node name: non-empty, bounded, no path separators or NUL.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidName("name is empty".to_string()));
    }
    if name.len() > crate::MAX_NAME_LEN {
        return Err(crate::Error::InvalidName(format!(
            "name exceeds {} bytes",
            crate::MAX_NAME_LEN
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(crate::Error::InvalidName(format!(
            "name contains forbidden character: {name:?}"
        )));
    }
    Ok(())
}

/// Build the `n`-th rename variant of `name`.
///
/// The ` (n)` marker goes before the final `.ext`, or at the end when the
/// name has no extension. A leading dot (`.gitignore`) does not count as an
/// extension separator.
pub fn numbered_variant(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let (stem, ext) = name.split_at(idx);
            format!("{stem} ({n}){ext}")
        }
        _ => format!("{name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_variant_with_extension() {
        assert_eq!(numbered_variant("a.txt", 1), "a (1).txt");
        assert_eq!(numbered_variant("archive.tar.gz", 3), "archive.tar (3).gz");
    }

    #[test]
    fn test_numbered_variant_without_extension() {
        assert_eq!(numbered_variant("notes", 1), "notes (1)");
        assert_eq!(numbered_variant(".gitignore", 2), ".gitignore (2)");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "overwrite".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Overwrite
        );
        assert_eq!(
            "RENAME".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Rename
        );
        assert!("MERGE".parse::<ConflictStrategy>().is_err());
    }
}
