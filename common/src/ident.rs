//! Catalog identifiers.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A case-normalized catalog identifier.
///
/// Catalog tables store names in fixed-width columns, so values read back
/// from the catalog carry trailing blanks. Plain (unquoted) identifiers are
/// case-insensitive and stored upper-cased; anything else is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Builds an identifier from a raw catalog column value.
    pub fn from_catalog(raw: &str) -> Self {
        Self(raw.trim_end().to_owned())
    }

    /// Builds an identifier from user input, upper-casing plain names.
    pub fn normalized(name: &str) -> Self {
        let trimmed = name.trim();
        if let Some(inner) = trimmed
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Self(inner.replace("\"\"", "\""));
        }
        if is_plain(trimmed) {
            Self(trimmed.to_ascii_uppercase())
        } else {
            Self(trimmed.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the identifier quoted when it could not be written bare.
    pub fn quoted(&self) -> String {
        let bare = is_plain(&self.0)
            && !self.0.starts_with(|c: char| c.is_ascii_digit() || c == '$')
            && !self.0.chars().any(|c| c.is_ascii_lowercase());
        if bare {
            self.0.clone()
        } else {
            format!("\"{}\"", self.0.replace('"', "\"\""))
        }
    }
}

fn is_plain(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::from_catalog(value)
    }
}

impl From<String> for Identifier {
    fn from(mut value: String) -> Self {
        let len = value.trim_end().len();
        value.truncate(len);
        Self(value)
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_values_lose_padding() {
        let ident = Identifier::from_catalog("SP_GET_ITEMS                   ");
        assert_eq!(ident.as_str(), "SP_GET_ITEMS");
    }

    #[test]
    fn plain_names_are_upper_cased() {
        assert_eq!(Identifier::normalized("sp_items").as_str(), "SP_ITEMS");
        assert_eq!(Identifier::normalized("\"MixedCase\"").as_str(), "MixedCase");
        assert_eq!(Identifier::normalized("with space").as_str(), "with space");
    }

    #[test]
    fn quoting_only_when_needed() {
        assert_eq!(Identifier::from_catalog("PARAM_1").quoted(), "PARAM_1");
        assert_eq!(Identifier::from_catalog("Param").quoted(), "\"Param\"");
        assert_eq!(Identifier::from_catalog("1ST").quoted(), "\"1ST\"");
        assert_eq!(Identifier::from_catalog("a\"b").quoted(), "\"a\"\"b\"");
    }
}
