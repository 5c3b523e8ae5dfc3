//! Object identities and their string form
//!
//! The string form is `category/name`, or just `name` when the category is
//! empty. A backslash escapes the next character, so `/` and `\` can appear
//! inside either part.

use std::fmt;
use std::str::FromStr;

use crate::error::{CommunicatorError, Result};

/// Identity of a servant within an object adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// Identity with an empty category
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&identity_to_string(self))
    }
}

impl FromStr for Identity {
    type Err = CommunicatorError;

    fn from_str(s: &str) -> Result<Self> {
        string_to_identity(s)
    }
}

const IDENTITY_SPECIALS: &[char] = &['/', '"'];

/// Parse `category/name` into an identity
pub fn string_to_identity(s: &str) -> Result<Identity> {
    let parse_error = |reason: &str| CommunicatorError::IdentityParse {
        input: s.to_string(),
        reason: reason.to_string(),
    };

    let mut slash = None;
    let mut escaped = false;
    for (index, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '/' if slash.is_some() => return Err(parse_error("unescaped '/' appears more than once")),
            '/' => slash = Some(index),
            _ => {}
        }
    }

    let (category, name) = match slash {
        Some(index) => (&s[..index], &s[index + 1..]),
        None => ("", s),
    };

    let name = unescape(name).map_err(parse_error)?;
    let category = unescape(category).map_err(parse_error)?;
    if name.is_empty() {
        return Err(parse_error("identity name is empty"));
    }

    Ok(Identity { name, category })
}

/// Render an identity as `category/name`, escaping as needed
pub fn identity_to_string(identity: &Identity) -> String {
    let name = escape(&identity.name, IDENTITY_SPECIALS);
    if identity.category.is_empty() {
        name
    } else {
        format!("{}/{}", escape(&identity.category, IDENTITY_SPECIALS), name)
    }
}

/// Backslash-escape `\` and every character in `specials`
pub(crate) fn escape(s: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Drop escaping backslashes; a trailing lone backslash is an error
pub(crate) fn unescape(s: &str) -> std::result::Result<String, &'static str> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err("dangling escape character"),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_only() {
        let id = string_to_identity("printer").unwrap();
        assert_eq!(id, Identity::named("printer"));
        assert_eq!(identity_to_string(&id), "printer");
    }

    #[test]
    fn test_category_and_name() {
        let id: Identity = "office/printer".parse().unwrap();
        assert_eq!(id.category, "office");
        assert_eq!(id.name, "printer");
        assert_eq!(id.to_string(), "office/printer");
    }

    #[test]
    fn test_escaped_slash_survives() {
        let id = Identity::new("a/b", "c\\d");
        let text = identity_to_string(&id);
        assert_eq!(text, r"c\\d/a\/b");
        assert_eq!(string_to_identity(&text).unwrap(), id);
    }

    #[test]
    fn test_two_unescaped_slashes_rejected() {
        let err = string_to_identity("a/b/c").unwrap_err();
        assert!(matches!(err, CommunicatorError::IdentityParse { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(string_to_identity("").is_err());
        assert!(string_to_identity("category/").is_err());
    }

    #[test]
    fn test_dangling_escape_rejected() {
        let err = string_to_identity("name\\").unwrap_err();
        assert!(err.to_string().contains("dangling"));
    }
}
