//! CGI response head parsing.

use std::io::{BufRead, Read};

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::{CgiError, Result};

/// Longest accepted header line, in bytes, excluding the line terminator.
pub const MAX_HEADER_LINE: usize = 4096;

/// Status and headers taken from the start of a CGI program's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiHead {
    /// Response status.
    pub status: StatusCode,
    /// Response headers, in the order the program sent them.
    pub headers: HeaderMap,
}

/// Read header lines up to the first blank line.
///
/// The reader is left positioned at the first body byte. A `Status` line sets
/// the status code; `Location` without `Status` means `302`. Lines that are
/// not `Name: value` are logged and skipped.
pub fn parse_head<R: BufRead>(reader: &mut R) -> Result<CgiHead> {
    let mut headers = HeaderMap::new();
    let mut status = None;
    let mut header_lines = 0usize;
    let mut terminated = false;
    let mut line = Vec::with_capacity(128);

    loop {
        line.clear();
        let limit = MAX_HEADER_LINE as u64 + 2;
        let n = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }

        let complete = line.last() == Some(&b'\n');
        if complete {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > MAX_HEADER_LINE || (!complete && n as u64 == limit) {
            return Err(CgiError::LongHeaderLine);
        }

        if line.is_empty() {
            terminated = true;
            break;
        }
        header_lines += 1;

        let text = String::from_utf8_lossy(&line);
        let Some((name, value)) = text.split_once(':') else {
            tracing::warn!(line = %text, "CGI: bogus header line");
            continue;
        };
        let value = value.trim();

        if name.eq_ignore_ascii_case("Status") {
            status = Some(parse_status(value)?);
            continue;
        }

        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(line = %text, "CGI: invalid header"),
        }
    }

    if header_lines == 0 || !terminated {
        return Err(CgiError::NoHeaders);
    }

    let status = match status {
        Some(status) => status,
        None if headers.contains_key(LOCATION) => StatusCode::FOUND,
        None if headers.contains_key(CONTENT_TYPE) => StatusCode::OK,
        None => return Err(CgiError::MissingContentType),
    };

    Ok(CgiHead { status, headers })
}

fn parse_status(value: &str) -> Result<StatusCode> {
    value
        .get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| CgiError::BogusStatus(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &str) -> (Result<CgiHead>, Vec<u8>) {
        let mut reader = Cursor::new(input.as_bytes().to_vec());
        let head = parse_head(&mut reader);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        (head, rest)
    }

    #[test]
    fn test_content_type_only() {
        let (head, rest) = parse("Content-Type: text/plain\r\n\r\nhello");
        let head = head.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers[CONTENT_TYPE], "text/plain");
        assert_eq!(rest, b"hello");
    }

    #[test]
    fn test_status_line() {
        let (head, _) = parse("Status: 404 Not Found\nContent-Type: text/plain\n\n");
        assert_eq!(head.unwrap().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_not_forwarded_as_header() {
        let (head, _) = parse("Status: 200 OK\nContent-Type: text/plain\n\n");
        assert!(!head.unwrap().headers.contains_key("status"));
    }

    #[test]
    fn test_location_without_status_is_redirect() {
        let (head, _) = parse("Location: http://example.com/\n\n");
        let head = head.unwrap();
        assert_eq!(head.status, StatusCode::FOUND);
        assert_eq!(head.headers[LOCATION], "http://example.com/");
    }

    #[test]
    fn test_status_without_content_type() {
        let (head, _) = parse("Status: 304 Not Modified\n\n");
        assert_eq!(head.unwrap().status, StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_missing_content_type() {
        let (head, _) = parse("X-Thing: 1\n\nbody");
        assert!(matches!(head, Err(CgiError::MissingContentType)));
    }

    #[test]
    fn test_no_headers() {
        assert!(matches!(parse("").0, Err(CgiError::NoHeaders)));
        assert!(matches!(parse("\r\nbody").0, Err(CgiError::NoHeaders)));
    }

    #[test]
    fn test_unterminated_head() {
        let (head, _) = parse("Content-Type: text/plain\n");
        assert!(matches!(head, Err(CgiError::NoHeaders)));
    }

    #[test]
    fn test_bogus_lines_skipped() {
        let (head, rest) = parse("garbage\nContent-Type: text/html\nX Bad: v\n\nok");
        let head = head.unwrap();
        assert_eq!(head.headers.len(), 1);
        assert_eq!(head.headers[CONTENT_TYPE], "text/html");
        assert_eq!(rest, b"ok");
    }

    #[test]
    fn test_bogus_status() {
        let (head, _) = parse("Status: abc\nContent-Type: text/plain\n\n");
        assert!(matches!(head, Err(CgiError::BogusStatus(_))));
        let (head, _) = parse("Status: 99\nContent-Type: text/plain\n\n");
        assert!(matches!(head, Err(CgiError::BogusStatus(_))));
    }

    #[test]
    fn test_repeated_headers_kept() {
        let (head, _) = parse("Content-Type: text/plain\nSet-Cookie: a=1\nSet-Cookie: b=2\n\n");
        let head = head.unwrap();
        let cookies: Vec<_> = head.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_long_line_rejected() {
        let long = format!("X-Long: {}\n\n", "a".repeat(MAX_HEADER_LINE));
        let (head, _) = parse(&long);
        assert!(matches!(head, Err(CgiError::LongHeaderLine)));
    }

    #[test]
    fn test_line_at_limit_accepted() {
        let value = "a".repeat(MAX_HEADER_LINE - "X-Long: ".len());
        let input = format!("Content-Type: text/plain\r\nX-Long: {value}\r\n\r\n");
        let (head, _) = parse(&input);
        assert_eq!(head.unwrap().headers["x-long"], value.as_str());
    }
}
