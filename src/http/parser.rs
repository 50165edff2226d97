//! HTTP head parsing
//!
//! Pure functions over byte buffers. The I/O loop that feeds them lives in
//! [`HttpContext`](super::HttpContext).

use super::{Error, Headers, Method, Result, Status, Version, MAX_HEADERS};

/// Bytes allowed on the request line beyond the URL itself
/// (method, two spaces, version and CRLF)
pub(crate) const REQUEST_LINE_SLACK: usize = 32;

/// Find the next CRLF in a buffer
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Locate the blank line ending a message head
///
/// Returns the length of the head including the terminating CRLF CRLF.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Number of bare CRLFs preceding the start line
pub(crate) fn leading_empty_lines(buf: &[u8]) -> usize {
    buf.chunks(2).take_while(|c| *c == b"\r\n").count() * 2
}

/// Parse HTTP request line
///
/// Format: METHOD SP URL SP HTTP/X.Y
pub fn parse_request_line(line: &str, max_url: usize) -> Result<(Method, String, Version)> {
    let mut parts = line.splitn(3, ' ');
    let (method, url, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v)) if !m.is_empty() && !u.is_empty() => (m, u, v),
        _ => {
            return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
        }
    };

    let method = Method::from_str(method)?;
    if url.len() > max_url {
        return Err(Error::UrlTooLong(max_url));
    }
    if !url.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::Parse(format!("Invalid request target: {:?}", url)));
    }
    let version = Version::from_str(version)?;

    Ok((method, url.to_string(), version))
}

/// Parse HTTP response status line
///
/// Format: HTTP/X.Y SP status SP reason
pub fn parse_status_line(line: &str) -> Result<(Version, Status, Option<String>)> {
    let mut parts = line.splitn(3, ' ');
    let version = Version::from_str(parts.next().unwrap_or_default())?;

    let code = parts.next().unwrap_or_default();
    if code.len() != 3 {
        return Err(Error::Parse(format!("Invalid status code: {}", code)));
    }
    let code = code
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", code)))?;

    let reason = parts.next().filter(|r| !r.is_empty()).map(str::to_string);
    Ok((version, Status::new(code), reason))
}

/// Split a complete head (start line through the blank line) into the
/// start line and header list
pub(crate) fn parse_head(head: &[u8], max_header: usize) -> Result<(String, Headers)> {
    let start_end = find_crlf(head)
        .ok_or_else(|| Error::Parse("Missing start line".to_string()))?;
    let start = String::from_utf8_lossy(&head[..start_end]).into_owned();

    let fields = &head[start_end + 2..];
    if fields.len() > max_header {
        return Err(Error::HeaderTooLarge(max_header));
    }

    let mut headers = Headers::new();
    let mut rest = fields;
    while let Some(pos) = find_crlf(rest) {
        if pos == 0 {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(Error::HeaderTooLarge(max_header));
        }
        let line = String::from_utf8_lossy(&rest[..pos]);
        let (name, value) = Headers::parse_header_line(&line)?;
        headers.insert(name, value);
        rest = &rest[pos + 2..];
    }

    Ok((start, headers))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes; invalid escapes are kept literally
pub fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' if plus_as_space => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Decode an `application/x-www-form-urlencoded` query string
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (percent_decode(name, true), percent_decode(value, true)),
            None => (percent_decode(pair, true), String::new()),
        })
        .collect()
}
