//! Response rendering.
//!
//! Handlers fill a reusable [`Response`]; [`write_response`] serializes it
//! with the standard headers into a connection's output buffer.

use std::io::Write;

pub const SERVER_NAME: &str = "fortuna";

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    HeaderFieldsTooLarge,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::HeaderFieldsTooLarge => 431,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::HeaderFieldsTooLarge => "Request Header Fields Too Large",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// A response under construction. Reused across requests; `reset` keeps the
/// body allocation.
#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub content_type: &'static str,
    /// Value for an `Allow` header (405 responses).
    pub allow: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: Status::Ok,
            content_type: TEXT_PLAIN,
            allow: None,
            body: Vec::with_capacity(4096),
        }
    }

    pub fn reset(&mut self) {
        self.status = Status::Ok;
        self.content_type = TEXT_PLAIN;
        self.allow = None;
        self.body.clear();
    }

    /// Plain-text error page: `<code> <reason>\n`.
    pub fn error(&mut self, status: Status) {
        self.reset();
        self.status = status;
        let _ = writeln!(self.body, "{} {}", status.code(), status.reason());
    }

    #[inline]
    pub fn write_str(&mut self, s: &str) {
        self.body.extend_from_slice(s.as_bytes());
    }

    /// Append `text` with `& < > " '` replaced by entities.
    pub fn write_html_escaped(&mut self, text: &[u8]) {
        escape_html(&mut self.body, text);
    }
}

/// Serialize status line, headers and body into `out`.
pub fn write_response(out: &mut Vec<u8>, resp: &Response, date: &[u8], keep_alive: bool) {
    let status = resp.status;
    let _ = write!(out, "HTTP/1.1 {} {}\r\n", status.code(), status.reason());
    out.extend_from_slice(b"Server: ");
    out.extend_from_slice(SERVER_NAME.as_bytes());
    out.extend_from_slice(b"\r\nDate: ");
    out.extend_from_slice(date);
    out.extend_from_slice(b"\r\nContent-Type: ");
    out.extend_from_slice(resp.content_type.as_bytes());
    let _ = write!(out, "\r\nContent-Length: {}\r\n", resp.body.len());
    if let Some(allow) = resp.allow {
        out.extend_from_slice(b"Allow: ");
        out.extend_from_slice(allow.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !keep_alive {
        out.extend_from_slice(b"Connection: close\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
}

pub fn escape_html(out: &mut Vec<u8>, text: &[u8]) {
    let mut last = 0;
    for (i, &b) in text.iter().enumerate() {
        let entity: &[u8] = match b {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'"' => b"&quot;",
            b'\'' => b"&#39;",
            _ => continue,
        };
        out.extend_from_slice(&text[last..i]);
        out.extend_from_slice(entity);
        last = i + 1;
    }
    out.extend_from_slice(&text[last..]);
}
