//! HTTP/1.1 framing: request rendering and response reading.
//!
//! The reader consumes exactly one response per call. It understands
//! `Content-Length`, `Transfer-Encoding: chunked` (extensions ignored,
//! trailers consumed), read-until-close bodies, and the statuses and methods
//! that never carry a body. Interim `1xx` responses are skipped.

use std::io::{self, BufRead, Read, Write};

use super::{
    Proto, SimpleHeaders, SimpleMethod, SimpleRequest, SimpleResponse, WireError, WireResult,
};

/// Longest accepted status, header or chunk-size line, in bytes.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Most headers accepted in one response head (trailers included).
pub const MAX_HEADERS: usize = 100;

/// Renders `request` onto `writer` and flushes it.
///
/// # Errors
///
/// Propagates any I/O error from the writer.
pub fn write_request<W: Write>(writer: &mut W, request: &SimpleRequest) -> io::Result<()> {
    let mut head = format!(
        "{} {} {}\r\n",
        request.method(),
        request.target(),
        request.proto()
    );
    for (key, value) in request.headers().iter() {
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let mut frame = head.into_bytes();
    frame.extend_from_slice(request.body());

    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads one complete response to a request made with `method`.
///
/// # Errors
///
/// Returns a [`WireError`] describing the first framing or I/O failure.
pub fn read_response<R: BufRead>(reader: &mut R, method: &SimpleMethod) -> WireResult<SimpleResponse> {
    loop {
        let (proto, status, reason) = read_status_line(reader)?;
        let headers = read_headers(reader)?;

        if (100..200).contains(&status) && status != 101 {
            tracing::debug!("Skipping interim {status} response");
            continue;
        }

        let body = if has_no_body(method, status) {
            Vec::new()
        } else {
            read_body(reader, &headers)?
        };

        return Ok(SimpleResponse::new(proto, status, reason, headers, body));
    }
}

fn has_no_body(method: &SimpleMethod, status: u16) -> bool {
    *method == SimpleMethod::HEAD || (100..200).contains(&status) || status == 204 || status == 304
}

/// Reads one CRLF (or bare LF) terminated line without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> WireResult<String> {
    let mut raw = Vec::new();
    let limit = (MAX_LINE_LENGTH + 2) as u64;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut raw)?;

    if read == 0 {
        return Err(WireError::UnexpectedEof);
    }

    if raw.last() != Some(&b'\n') {
        if raw.len() as u64 >= limit {
            return Err(WireError::HeadTooLarge(MAX_LINE_LENGTH));
        }
        return Err(WireError::UnexpectedEof);
    }

    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }

    if raw.len() > MAX_LINE_LENGTH {
        return Err(WireError::HeadTooLarge(MAX_LINE_LENGTH));
    }

    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_status_line<R: BufRead>(reader: &mut R) -> WireResult<(Proto, u16, String)> {
    let line = read_line(reader)?;

    let (proto, rest) = line
        .split_once(' ')
        .ok_or_else(|| WireError::MalformedStatusLine(line.clone()))?;

    if !proto.starts_with("HTTP/") {
        return Err(WireError::MalformedStatusLine(line.clone()));
    }

    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError::MalformedStatusLine(line.clone()));
    }

    let status = code
        .parse::<u16>()
        .map_err(|_| WireError::MalformedStatusLine(line.clone()))?;

    Ok((Proto::from(proto), status, reason.trim().to_string()))
}

fn read_headers<R: BufRead>(reader: &mut R) -> WireResult<SimpleHeaders> {
    let mut headers = SimpleHeaders::new();

    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            return Ok(headers);
        }

        if headers.len() >= MAX_HEADERS {
            return Err(WireError::HeadTooLarge(MAX_HEADERS));
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::MalformedHeader(line.clone()))?;

        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(WireError::MalformedHeader(line.clone()));
        }

        headers.append(name, value.trim());
    }
}

fn read_body<R: BufRead>(reader: &mut R, headers: &SimpleHeaders) -> WireResult<Vec<u8>> {
    let chunked = headers
        .get_all("Transfer-Encoding")
        .flat_map(|value| value.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));

    if chunked {
        return read_chunked(reader);
    }

    if let Some(length) = content_length(headers)? {
        return read_sized(reader, length);
    }

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    Ok(body)
}

fn content_length(headers: &SimpleHeaders) -> WireResult<Option<u64>> {
    let mut length = None;

    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        let parsed = value
            .parse::<u64>()
            .map_err(|_| WireError::InvalidContentLength(value.to_string()))?;

        match length {
            Some(existing) if existing != parsed => {
                return Err(WireError::InvalidContentLength(value.to_string()))
            }
            _ => length = Some(parsed),
        }
    }

    Ok(length)
}

fn read_sized<R: BufRead>(reader: &mut R, length: u64) -> WireResult<Vec<u8>> {
    let mut body = Vec::new();
    let read = reader.by_ref().take(length).read_to_end(&mut body)?;
    if (read as u64) < length {
        return Err(WireError::UnexpectedEof);
    }
    Ok(body)
}

fn read_chunked<R: BufRead>(reader: &mut R) -> WireResult<Vec<u8>> {
    let mut body = Vec::new();

    loop {
        let line = read_line(reader)?;
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_text, 16)
            .map_err(|_| WireError::InvalidChunk(line.clone()))?;

        if size == 0 {
            // trailers
            let trailers = read_headers(reader)?;
            if !trailers.is_empty() {
                tracing::debug!("Discarding {} chunked trailers", trailers.len());
            }
            return Ok(body);
        }

        let chunk = read_sized(reader, size)?;
        body.extend_from_slice(&chunk);

        let terminator = read_line(reader)?;
        if !terminator.is_empty() {
            return Err(WireError::InvalidChunk(terminator));
        }
    }
}
