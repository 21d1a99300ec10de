// src/parser.rs
use crate::http::Method;

pub const MAX_HEADERS: usize = 32;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Incomplete,
    InvalidFormat,
    TooLarge,
}

pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub http_11: bool,
    pub headers: [(&'a str, &'a str); MAX_HEADERS],
    pub header_count: u8,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers[..self.header_count as usize]
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// Connection disposition per HTTP/1.x rules: 1.1 keeps alive unless the
    /// client says close, 1.0 closes unless the client asks to keep alive.
    pub fn wants_keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.http_11,
        }
    }
}

/// Parses one HTTP request out of the given buffer.
/// Returns the parsed request and the total number of bytes consumed,
/// including the body advertised by Content-Length.
pub fn parse_request(buf: &[u8]) -> Result<(Request<'_>, usize), ParseError> {
    // Request line: METHOD PATH HTTP/1.x\r\n
    let mut space1 = 0;
    while space1 < buf.len() && buf[space1] != b' ' {
        space1 += 1;
    }
    if space1 >= buf.len() {
        return Err(ParseError::Incomplete);
    }
    let method = Method::from_bytes(&buf[..space1]);

    let mut space2 = space1 + 1;
    while space2 < buf.len() && buf[space2] != b' ' {
        space2 += 1;
    }
    if space2 >= buf.len() {
        return Err(ParseError::Incomplete);
    }
    let path_bytes = &buf[space1 + 1..space2];

    let full_path = std::str::from_utf8(path_bytes).map_err(|_| ParseError::InvalidFormat)?;
    if full_path.is_empty() {
        return Err(ParseError::InvalidFormat);
    }

    let (path, query) = match full_path.find('?') {
        Some(idx) => (&full_path[..idx], Some(&full_path[idx + 1..])),
        None => (full_path, None),
    };

    let mut req_line_end = space2 + 1;
    while req_line_end + 1 < buf.len()
        && !(buf[req_line_end] == b'\r' && buf[req_line_end + 1] == b'\n')
    {
        req_line_end += 1;
    }
    if req_line_end + 1 >= buf.len() {
        return Err(ParseError::Incomplete);
    }
    let http_11 = &buf[space2 + 1..req_line_end] == b"HTTP/1.1";

    let mut headers = [("", ""); MAX_HEADERS];
    let mut header_count: u8 = 0;
    let mut cursor = req_line_end + 2;
    let mut saw_end = false;

    while cursor + 1 < buf.len() {
        if header_count as usize >= MAX_HEADERS {
            return Err(ParseError::TooLarge);
        }

        if buf[cursor] == b'\r' && buf[cursor + 1] == b'\n' {
            cursor += 2;
            saw_end = true;
            break; // End of headers
        }

        // Find the colon
        let mut colon_idx = cursor;
        while colon_idx < buf.len() && buf[colon_idx] != b':' && buf[colon_idx] != b'\r' {
            colon_idx += 1;
        }
        if colon_idx >= buf.len() || buf[colon_idx] == b'\r' {
            return Err(ParseError::InvalidFormat);
        }

        let name =
            std::str::from_utf8(&buf[cursor..colon_idx]).map_err(|_| ParseError::InvalidFormat)?;

        // Find the header line end
        let mut line_end = colon_idx + 1;
        while line_end + 1 < buf.len() && !(buf[line_end] == b'\r' && buf[line_end + 1] == b'\n') {
            line_end += 1;
        }
        if line_end + 1 >= buf.len() {
            return Err(ParseError::Incomplete);
        }

        let mut val_start = colon_idx + 1;
        while val_start < line_end && buf[val_start] == b' ' {
            val_start += 1;
        }

        let val = std::str::from_utf8(&buf[val_start..line_end])
            .map_err(|_| ParseError::InvalidFormat)?;

        headers[header_count as usize] = (name, val);
        header_count += 1;
        cursor = line_end + 2;
    }

    if !saw_end {
        return Err(ParseError::Incomplete);
    }

    let header_end = cursor;
    let mut content_length = 0usize;
    for (name, value) in headers.iter().take(header_count as usize) {
        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value.trim().parse().map_err(|_| ParseError::InvalidFormat)?;
        }
    }
    if buf.len() < header_end + content_length {
        return Err(ParseError::Incomplete);
    }
    let body = &buf[header_end..header_end + content_length];

    Ok((
        Request {
            method,
            path,
            query,
            http_11,
            headers,
            header_count,
            body,
        },
        header_end + content_length,
    ))
}
