//! Status code table
//!
//! The table covers 100–511. Codes inside a class range that have no
//! registered meaning are listed as "Reserved"; everything outside the
//! ranges is not a valid status.

use std::fmt;

const INFORMATIONAL: std::ops::RangeInclusive<u16> = 100..=102;
const SUCCESS: std::ops::RangeInclusive<u16> = 200..=226;
const REDIRECTION: std::ops::RangeInclusive<u16> = 300..=308;
const CLIENT_ERROR: std::ops::RangeInclusive<u16> = 400..=451;
const SERVER_ERROR: std::ops::RangeInclusive<u16> = 500..=511;

/// Check whether `code` is part of the status table
pub fn status_valid(code: u16) -> bool {
    INFORMATIONAL.contains(&code)
        || SUCCESS.contains(&code)
        || REDIRECTION.contains(&code)
        || CLIENT_ERROR.contains(&code)
        || SERVER_ERROR.contains(&code)
}

/// Canonical reason phrase for `code`, or "Unknown" outside the table
pub fn status_reason_phrase(code: u16) -> &'static str {
    if !status_valid(code) {
        return "Unknown";
    }
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        449 => "Retry With",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => "Reserved",
    }
}

/// HTTP status code
///
/// Any value can be carried, including 0 ("unset") and codes outside the
/// table, since service handlers set the status directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status {
    code: u16,
}

impl Status {
    pub const fn new(code: u16) -> Self {
        Status { code }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Whether the code is in the status table
    pub fn is_valid(&self) -> bool {
        status_valid(self.code)
    }

    pub fn reason_phrase(&self) -> &'static str {
        status_reason_phrase(self.code)
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub const UNSET: Status = Status { code: 0 };
    pub const CONTINUE: Status = Status { code: 100 };
    pub const OK: Status = Status { code: 200 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const METHOD_NOT_ALLOWED: Status = Status { code: 405 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status::new(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.code, self.reason_phrase())
    }
}
