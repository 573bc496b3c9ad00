//! Incremental HTTP/1.1 response decoder.
//!
//! # States
//! ```text
//! AwaitingStatusLine → AwaitingHeaders → AwaitingBody → Complete
//!          └──────────────┴──────────────────┴──→ Error (terminal, sticky)
//! ```
//!
//! Bytes are appended to an internal buffer on every call and each unfinished
//! stage is retried, so input may be fragmented arbitrarily.

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::http::{HttpResponse, HttpStatusCode};

const CRLF: &[u8] = b"\r\n";
const STATUS_PREFIX: &[u8] = b"HTTP/1.";
const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";
/// Offset of the 3-digit code in `HTTP/1.x NNN`.
const STATUS_CODE_OFFSET: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingStatusLine,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
    Error,
}

#[derive(Debug)]
pub struct HttpResponseParser {
    state: ParserState,
    status: Option<HttpStatusCode>,
    headers: Option<HashMap<String, String>>,
    body: Vec<u8>,
    raw: Vec<u8>,
    error: Option<ProtocolError>,
}

impl HttpResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingStatusLine,
            status: None,
            headers: None,
            body: Vec::new(),
            raw: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn has_reached_error(&self) -> bool {
        self.state == ParserState::Error
    }

    /// Feed more bytes.
    ///
    /// Returns `Ok(None)` while the response is incomplete, `Ok(Some(_))` once it
    /// is complete, and the same error on every call after a protocol violation.
    /// `is_connect` marks the reply to a proxy CONNECT request, whose 200 carries
    /// no body.
    pub fn parse(&mut self, data: &[u8], is_connect: bool) -> Result<Option<HttpResponse>, ProtocolError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.state != ParserState::Complete {
            self.raw.extend_from_slice(data);
        }

        match self.advance(is_connect) {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::debug!(error = %err, "Failed to parse HTTP response");
                self.state = ParserState::Error;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn advance(&mut self, is_connect: bool) -> Result<Option<HttpResponse>, ProtocolError> {
        if self.state == ParserState::AwaitingStatusLine {
            if !self.parse_status_line()? {
                return Ok(None);
            }
            self.state = ParserState::AwaitingHeaders;
        }

        if self.state == ParserState::AwaitingHeaders {
            if !self.parse_headers()? {
                return Ok(None);
            }
            self.state = ParserState::AwaitingBody;
        }

        if self.state == ParserState::AwaitingBody {
            if !self.parse_body(is_connect)? {
                return Ok(None);
            }
            self.state = ParserState::Complete;
        }

        Ok(Some(HttpResponse::with_headers(
            self.status.unwrap_or(HttpStatusCode::Unknown),
            self.body.clone(),
            self.headers.clone().unwrap_or_default(),
        )))
    }

    fn parse_status_line(&mut self) -> Result<bool, ProtocolError> {
        let Some(end) = find(&self.raw, CRLF) else {
            let probe = &self.raw[..self.raw.len().min(STATUS_PREFIX.len())];
            if !STATUS_PREFIX.starts_with(probe) {
                return Err(ProtocolError::StatusLine(format!(
                    "'{}' is not a status line",
                    String::from_utf8_lossy(probe)
                )));
            }
            return Ok(false);
        };

        let line = String::from_utf8_lossy(&self.raw[..end]).into_owned();
        self.raw.drain(..end + CRLF.len());

        if !line.contains("HTTP/1.") {
            return Err(ProtocolError::StatusLine(format!("status code not found in '{line}'")));
        }

        let code = line
            .get(STATUS_CODE_OFFSET..STATUS_CODE_OFFSET + 3)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| ProtocolError::StatusLine(format!("failed to read the status code of '{line}'")))?;

        let status = HttpStatusCode::from_code(code);
        if status == HttpStatusCode::Unknown {
            tracing::warn!(code, "Unknown HTTP status code");
        }
        self.status = Some(status);
        Ok(true)
    }

    /// Headers are only committed once the terminating empty line is present.
    fn parse_headers(&mut self) -> Result<bool, ProtocolError> {
        let mut headers = HashMap::new();
        let mut offset = 0;

        loop {
            let rest = &self.raw[offset..];
            let Some(end) = find(rest, CRLF) else {
                return Ok(false);
            };

            if end == 0 {
                self.raw.drain(..offset + CRLF.len());
                self.headers = Some(headers);
                return Ok(true);
            }

            let line = &rest[..end];
            let Some(colon) = line.iter().position(|b| *b == b':') else {
                return Err(ProtocolError::Header(String::from_utf8_lossy(line).into_owned()));
            };

            headers.insert(normalize(&line[..colon]), normalize(&line[colon + 1..]));
            offset += end + CRLF.len();
        }
    }

    fn parse_body(&mut self, is_connect: bool) -> Result<bool, ProtocolError> {
        let status = self.status.unwrap_or(HttpStatusCode::Unknown);
        if is_connect && status == HttpStatusCode::Ok {
            return Ok(true);
        }

        if status == HttpStatusCode::NoContent {
            if self.raw.is_empty() {
                return Ok(true);
            }
            return Err(ProtocolError::UnexpectedBody);
        }

        let header = |key: &str| self.headers.as_ref().and_then(|h| h.get(key)).cloned();

        if let Some(value) = header("content-length") {
            let expected: usize = value
                .parse()
                .map_err(|_| ProtocolError::ContentLength(value.clone()))?;

            self.body.append(&mut self.raw);
            if self.body.len() > expected {
                return Err(ProtocolError::BodyOverflow { expected });
            }
            return Ok(self.body.len() == expected);
        }

        if header("transfer-encoding").as_deref() == Some("chunked") {
            return match decode_chunked(&self.raw)? {
                Some(body) => {
                    self.body = body;
                    self.raw.clear();
                    Ok(true)
                }
                None => Ok(false),
            };
        }

        Err(ProtocolError::MissingBodyLength)
    }
}

impl Default for HttpResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a chunked body.
///
/// Nothing is decoded until the buffer ends with the last-chunk terminator.
/// `Ok(None)` means more data is needed.
pub fn decode_chunked(data: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
    if !data.ends_with(CHUNKED_TERMINATOR) {
        return Ok(None);
    }

    let mut body = Vec::new();
    let mut rest = data;

    loop {
        let Some(line_end) = find(rest, CRLF) else {
            return Ok(None);
        };
        let line = String::from_utf8_lossy(&rest[..line_end]);
        // chunk extensions are ignored
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| ProtocolError::Chunked(format!("failed to convert chunk length '{line}'")))?;

        let data_start = line_end + CRLF.len();
        if size == 0 {
            if &rest[data_start..] == CRLF {
                return Ok(Some(body));
            }
            return Err(ProtocolError::Chunked("last-chunk is not the end of the body".to_string()));
        }

        let (data_end, chunk_end) = match data_start
            .checked_add(size)
            .and_then(|end| Some((end, end.checked_add(CRLF.len())?)))
        {
            Some(ends) if ends.1 <= rest.len() => ends,
            _ => return Err(ProtocolError::Chunked("chunk-size is bigger than chunk-data".to_string())),
        };
        if &rest[data_end..chunk_end] != CRLF {
            return Err(ProtocolError::Chunked("chunk-data missing final CRLF sequence".to_string()));
        }

        body.extend_from_slice(&rest[data_start..data_end]);
        rest = &rest[chunk_end..];
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Lower-case and drop every whitespace character.
fn normalize(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_chunks(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CHUNKED_TERMINATOR);
        out
    }

    #[test]
    fn content_length_across_two_reads() {
        let mut parser = HttpResponseParser::new();
        let first = parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n", false).unwrap();
        assert!(first.is_none());
        assert_eq!(parser.state(), ParserState::AwaitingBody);

        let res = parser.parse(b"OK", false).unwrap().unwrap();
        assert_eq!(res.status(), HttpStatusCode::Ok);
        assert_eq!(res.body(), b"OK");
        assert_eq!(res.header("content-length"), Some("2"));
    }

    #[test]
    fn connect_reply_needs_no_body_length() {
        let mut parser = HttpResponseParser::new();
        let res = parser.parse(b"HTTP/1.1 200 OK\r\n\r\n", true).unwrap().unwrap();
        assert_eq!(res.status(), HttpStatusCode::Ok);
        assert!(res.body().is_empty());

        let mut plain = HttpResponseParser::new();
        assert_eq!(
            plain.parse(b"HTTP/1.1 200 OK\r\n\r\n", false),
            Err(ProtocolError::MissingBodyLength)
        );
    }

    #[test]
    fn chunked_body() {
        let mut parser = HttpResponseParser::new();
        let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let res = parser.parse(data, false).unwrap().unwrap();
        assert_eq!(res.body(), b"Wikipedia");
    }

    #[test]
    fn chunked_body_reconstructs_original() {
        let five: [&[u8]; 5] = [b"a", b"0123456789abcdef0123", b"\r\n", b"tail", b"x"];
        let single: [&[u8]; 1] = [b"single chunk"];
        let cases: [&[&[u8]]; 3] = [&[], &single, &five];

        for chunks in cases {
            let expected: Vec<u8> = chunks.concat();
            let decoded = decode_chunked(&encode_chunks(chunks)).unwrap().unwrap();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn chunked_waits_for_terminator() {
        let mut parser = HttpResponseParser::new();
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nmy-\r\n";
        assert!(parser.parse(head, false).unwrap().is_none());
        assert!(parser.parse(b"4\r\ntest\r\n", false).unwrap().is_none());
        let res = parser.parse(b"0\r\n\r\n", false).unwrap().unwrap();
        assert_eq!(res.body(), b"my-test");
    }

    #[test]
    fn inconsistent_chunks_are_errors() {
        assert!(matches!(
            decode_chunked(b"zz\r\nabc\r\n0\r\n\r\n"),
            Err(ProtocolError::Chunked(_))
        ));
        assert!(matches!(
            decode_chunked(b"2\r\nabc\r\n0\r\n\r\n"),
            Err(ProtocolError::Chunked(_))
        ));
        assert_eq!(decode_chunked(b"4\r\nWiki\r\n").unwrap(), None);
    }

    #[test]
    fn oversized_chunk_length_is_an_error() {
        assert!(matches!(
            decode_chunked(b"ffffffffffffffff\r\nab\r\n0\r\n\r\n"),
            Err(ProtocolError::Chunked(_))
        ));
        assert!(matches!(
            decode_chunked(b"10\r\nab\r\n0\r\n\r\n"),
            Err(ProtocolError::Chunked(_))
        ));

        let mut parser = HttpResponseParser::new();
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nfffffffffffffffe\r\nab\r\n0\r\n\r\n";
        assert!(matches!(parser.parse(response, false), Err(ProtocolError::Chunked(_))));
    }

    #[test]
    fn byte_by_byte_matches_single_read() {
        let data = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\nnot here!";

        let mut whole = HttpResponseParser::new();
        let expected = whole.parse(data, false).unwrap().unwrap();

        let mut split = HttpResponseParser::new();
        let mut result = None;
        for byte in data.iter() {
            result = split.parse(std::slice::from_ref(byte), false).unwrap();
        }
        assert_eq!(result, Some(expected));
    }

    #[test]
    fn unknown_status_is_not_an_error() {
        let mut parser = HttpResponseParser::new();
        let res = parser
            .parse(b"HTTP/1.1 418 I'm a teapot\r\nContent-Length: 0\r\n\r\n", false)
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), HttpStatusCode::Unknown);
    }

    #[test]
    fn garbage_status_line_is_sticky_error() {
        let mut parser = HttpResponseParser::new();
        assert!(matches!(parser.parse(b"SSH-2.0", false), Err(ProtocolError::StatusLine(_))));
        assert!(parser.has_reached_error());
        assert!(parser.parse(b"HTTP/1.1 200 OK\r\n", false).is_err());
    }

    #[test]
    fn partial_status_line_waits() {
        let mut parser = HttpResponseParser::new();
        assert_eq!(parser.parse(b"HTTP/1.1 20", false), Ok(None));
        assert_eq!(parser.state(), ParserState::AwaitingStatusLine);
    }

    #[test]
    fn non_numeric_status_code() {
        let mut parser = HttpResponseParser::new();
        assert!(matches!(
            parser.parse(b"HTTP/1.1 abc OK\r\n", false),
            Err(ProtocolError::StatusLine(_))
        ));
    }

    #[test]
    fn header_without_colon() {
        let mut parser = HttpResponseParser::new();
        assert_eq!(parser.parse(b"HTTP/1.1 200 OK\r\nBroken", false), Ok(None));
        assert!(matches!(parser.parse(b"\r\n", false), Err(ProtocolError::Header(_))));
    }

    #[test]
    fn header_keys_and_values_are_normalized() {
        let mut parser = HttpResponseParser::new();
        let res = parser
            .parse(b"HTTP/1.1 200 OK\r\nX-Agent-Id :  ABC def\r\nContent-Length: 0\r\n\r\n", false)
            .unwrap()
            .unwrap();
        assert_eq!(res.header("x-agent-id"), Some("abcdef"));
    }

    #[test]
    fn invalid_content_length() {
        let mut parser = HttpResponseParser::new();
        assert_eq!(
            parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n", false),
            Err(ProtocolError::ContentLength("ten".to_string()))
        );
    }

    #[test]
    fn no_content_requires_empty_remainder() {
        let mut parser = HttpResponseParser::new();
        let res = parser.parse(b"HTTP/1.1 204 No Content\r\n\r\n", false).unwrap().unwrap();
        assert_eq!(res.status(), HttpStatusCode::NoContent);

        let mut with_body = HttpResponseParser::new();
        assert_eq!(
            with_body.parse(b"HTTP/1.1 204 No Content\r\n\r\nstray", false),
            Err(ProtocolError::UnexpectedBody)
        );
    }

    #[test]
    fn body_longer_than_declared() {
        let mut parser = HttpResponseParser::new();
        assert_eq!(
            parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nOK", false),
            Err(ProtocolError::BodyOverflow { expected: 1 })
        );
    }
}
