//! HTTP header lists
//!
//! Headers keep insertion order and are never deduplicated. Lookups are
//! case-insensitive and return the first match.

use super::{Error, Result};
use std::fmt;

/// Ordered list of header fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty header list
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a header, keeping any earlier field with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replace the value of the first field named `name`, or append one
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check whether any field named `name` carries `token` in its
    /// comma-separated value list
    ///
    /// Used for `Connection: close`, `Transfer-Encoding: chunked` and
    /// `Expect: 100-continue`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.fields.len()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Iterate over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a `Name: value` line
    ///
    /// The name must be a non-empty token; whitespace between the name and
    /// the colon is rejected (RFC 7230 §3.2.4), and so are obsolete line
    /// folds.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(Error::InvalidHeader(format!("Obsolete line folding: {}", line)));
        }

        let colon_pos = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;
        let name = &line[..colon_pos];

        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }
        if !name.bytes().all(is_token_byte) {
            return Err(Error::InvalidHeader(format!("Invalid header name: {:?}", name)));
        }

        let value = line[colon_pos + 1..].trim_matches(|c| c == ' ' || c == '\t');
        if value.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return Err(Error::InvalidHeader(format!("Control character in {}", name)));
        }

        Ok((name.to_string(), value.to_string()))
    }
}

/// RFC 7230 `tchar`
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            fields: iter.into_iter().collect(),
        }
    }
}
