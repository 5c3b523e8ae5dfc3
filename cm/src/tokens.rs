//! Quote-aware tokenizing shared by the proxy and endpoint string forms
//!
//! Double quotes group text containing whitespace or delimiters. Backslash
//! escapes are kept verbatim in the produced tokens; callers unescape the
//! parts that carry escaped content (identities, facets, adapter ids).

/// Split on unquoted whitespace, removing the quotes
pub(crate) fn tokenize(s: &str) -> Result<Vec<String>, &'static str> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            _ => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err("unterminated quote");
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Byte offsets of every `delims` character outside quotes and not escaped
pub(crate) fn unquoted_positions(s: &str, delims: &[char]) -> Vec<(usize, char)> {
    let mut positions = Vec::new();
    let mut quoted = false;
    let mut escaped = false;

    for (index, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            c if !quoted && delims.contains(&c) => positions.push((index, c)),
            _ => {}
        }
    }
    positions
}

/// Split on every unquoted occurrence of `delim`
pub(crate) fn split_unquoted(s: &str, delim: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (index, _) in unquoted_positions(s, &[delim]) {
        parts.push(&s[start..index]);
        start = index + delim.len_utf8();
    }
    parts.push(&s[start..]);
    parts
}

/// Wrap in quotes when the text would not survive tokenizing as one token
pub(crate) fn quote_if_needed(s: &str) -> String {
    let needs_quotes = s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == ':' || c == '@');
    if needs_quotes {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}
