/*
 * parser.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tether, an HTTP client connector library.
 *
 * Tether is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tether is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tether.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length, chunked, or
//! read-until-close). Status line plus headers are bounded by a maximum size.

use bytes::Buf;
use bytes::BytesMut;
use std::io;

use crate::error::ConnectorError;

/// Longest chunk-size line (size plus extensions) accepted before its CRLF.
const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// Callback for HTTP/1.1 response events.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, _name: &str, _value: &str) {}
    fn complete(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("response header exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("malformed response: {0}")]
    Malformed(&'static str),
}

impl From<ParseError> for io::Error {
    fn from(e: ParseError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

impl From<ParseError> for ConnectorError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::HeaderTooLarge(limit) => ConnectorError::HeaderTooLarge { limit },
            other => ConnectorError::Io(other.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Response complete (or no body); the connection may carry another exchange.
    Idle,
    StatusLine,
    Headers,
    /// Headers done; caller must call set_body_mode().
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    ChunkTrailer,
}

/// Push parser for one HTTP/1.1 response at a time. Feed bytes via `receive`.
pub struct ResponseParser {
    state: ParseState,
    max_header_size: usize,
    header_bytes: usize,
    http10: bool,
    /// Content-Length when known, None for chunked or read-until-close.
    content_length: Option<u64>,
    bytes_received: u64,
    chunk_remaining: u64,
}

impl ResponseParser {
    pub fn new(max_header_size: usize) -> Self {
        Self {
            state: ParseState::StatusLine,
            max_header_size,
            header_bytes: 0,
            http10: false,
            content_length: None,
            bytes_received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Status line said HTTP/1.0.
    pub fn is_http10(&self) -> bool {
        self.http10
    }

    /// Body has no length and ends when the peer closes the connection.
    pub fn is_read_until_close(&self) -> bool {
        self.state == ParseState::Body && self.content_length.is_none()
    }

    /// Prepare for the next response on the same connection.
    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.header_bytes = 0;
        self.http10 = false;
        self.content_length = None;
        self.bytes_received = 0;
        self.chunk_remaining = 0;
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Take one CRLF-terminated head line, charging it against the header size limit.
    fn head_line(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
        let Some(line_end) = Self::find_crlf(buf) else {
            if self.header_bytes + buf.len() > self.max_header_size {
                return Err(ParseError::HeaderTooLarge(self.max_header_size));
            }
            return Ok(None);
        };
        self.header_bytes += line_end + 2;
        if self.header_bytes > self.max_header_size {
            return Err(ParseError::HeaderTooLarge(self.max_header_size));
        }
        let mut line = buf.split_to(line_end + 2);
        line.truncate(line_end);
        Ok(Some(line))
    }

    fn split_field(line: &[u8], what: &'static str) -> Result<Option<(String, String)>, ParseError> {
        let s = std::str::from_utf8(line).map_err(|_| ParseError::Malformed(what))?;
        Ok(s.find(':').map(|colon| {
            (
                s[..colon].trim().to_string(),
                s[colon + 1..].trim().to_string(),
            )
        }))
    }

    /// Consume and parse as much as possible from buf. Partial tokens stay in buf.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), ParseError> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    let line = std::str::from_utf8(&line)
                        .map_err(|_| ParseError::Malformed("status line not UTF-8"))?;
                    // HTTP/1.1 200 OK or HTTP/1.1 200
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or("");
                    if !version.starts_with("HTTP/1.") {
                        return Err(ParseError::Malformed("bad status line"));
                    }
                    self.http10 = version == "HTTP/1.0";
                    let code = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .filter(|c| (100..1000).contains(c))
                        .ok_or(ParseError::Malformed("bad status code"))?;
                    let reason = parts.next().filter(|r| !r.is_empty());
                    handler.status(code, reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    if let Some((name, value)) = Self::split_field(&line, "header not UTF-8")? {
                        handler.header(&name, &value);
                    }
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::Body => match self.content_length {
                    Some(length) => {
                        let remaining = (length - self.bytes_received) as usize;
                        let to_read = remaining.min(buf.len());
                        if to_read > 0 {
                            let chunk = buf.split_to(to_read);
                            handler.body_chunk(&chunk);
                            self.bytes_received += to_read as u64;
                        }
                        if self.bytes_received >= length {
                            handler.complete();
                            self.state = ParseState::Idle;
                        }
                    }
                    None => {
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                        return Ok(());
                    }
                },
                ParseState::ChunkSize => {
                    let Some(line_end) = Self::find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_SIZE_LINE {
                            return Err(ParseError::Malformed("chunk size line too long"));
                        }
                        return Ok(());
                    };
                    if line_end > MAX_CHUNK_SIZE_LINE {
                        return Err(ParseError::Malformed("chunk size line too long"));
                    }
                    let line = buf.split_to(line_end + 2);
                    let line = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| ParseError::Malformed("chunk size not UTF-8"))?;
                    let hex = line.split(';').next().unwrap_or(line).trim();
                    self.chunk_remaining = u64::from_str_radix(hex, 16)
                        .map_err(|_| ParseError::Malformed("bad chunk size"))?;
                    self.state = if self.chunk_remaining == 0 {
                        // Trailer fields get their own header size budget.
                        self.header_bytes = 0;
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining as usize).min(buf.len());
                    if to_read > 0 {
                        let chunk = buf.split_to(to_read);
                        handler.body_chunk(&chunk);
                        self.chunk_remaining -= to_read as u64;
                    }
                    if self.chunk_remaining > 0 || buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::Malformed("missing CRLF after chunk"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        handler.complete();
                        self.state = ParseState::Idle;
                    } else if let Some((name, value)) =
                        Self::split_field(&line, "trailer not UTF-8")?
                    {
                        handler.trailer(&name, &value);
                    }
                }
                ParseState::Idle => return Ok(()),
            }
        }
        Ok(())
    }

    /// Called after headers are received (state HeadersComplete).
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.bytes_received = 0;
        if chunked {
            self.content_length = None;
            self.state = ParseState::ChunkSize;
        } else if let Some(length) = content_length {
            self.content_length = Some(length);
            self.state = if length == 0 {
                ParseState::Idle
            } else {
                ParseState::Body
            };
        } else {
            self.content_length = None;
            self.state = ParseState::Body;
        }
    }

    /// The peer closed the connection. Completes a read-until-close body; otherwise the
    /// response was truncated.
    pub fn finish_at_eof<H: H1ResponseHandler>(&mut self, handler: &mut H) -> Result<(), ParseError> {
        match self.state {
            ParseState::Idle => Ok(()),
            ParseState::Body if self.content_length.is_none() => {
                handler.complete();
                self.state = ParseState::Idle;
                Ok(())
            }
            _ => Err(ParseError::Malformed("connection closed before end of response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        code: u16,
        reason: Option<String>,
        headers: Vec<(String, String)>,
        trailers: Vec<(String, String)>,
        body: Vec<u8>,
        complete: bool,
    }

    impl H1ResponseHandler for Recorder {
        fn status(&mut self, code: u16, reason: Option<&str>) {
            self.code = code;
            self.reason = reason.map(|s| s.to_string());
        }
        fn header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn body_chunk(&mut self, data: &[u8]) {
            self.body.extend_from_slice(data);
        }
        fn trailer(&mut self, name: &str, value: &str) {
            self.trailers.push((name.to_string(), value.to_string()));
        }
        fn complete(&mut self) {
            self.complete = true;
        }
    }

    fn head(parser: &mut ResponseParser, rec: &mut Recorder, text: &str) -> BytesMut {
        let mut buf = BytesMut::from(text);
        parser.receive(&mut buf, rec).unwrap();
        assert_eq!(parser.state(), ParseState::HeadersComplete);
        buf
    }

    #[test]
    fn content_length_body_in_pieces() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = head(&mut p, &mut rec, "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhe");
        assert_eq!(rec.code, 200);
        assert_eq!(rec.reason.as_deref(), Some("OK"));
        p.set_body_mode(Some(5), false);
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(p.state(), ParseState::Body);
        buf.extend_from_slice(b"llo");
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.body, b"hello");
        assert!(rec.complete);
        assert_eq!(p.state(), ParseState::Idle);
    }

    #[test]
    fn chunked_body_with_trailer() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = head(
            &mut p,
            &mut rec,
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Sum: 9\r\n\r\n",
        );
        p.set_body_mode(None, true);
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.body, b"Wikipedia");
        assert_eq!(rec.trailers, vec![("X-Sum".to_string(), "9".to_string())]);
        assert!(rec.complete);
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_chunk_size_is_an_error() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = head(&mut p, &mut rec, "HTTP/1.1 200 OK\r\n\r\nzz\r\n");
        p.set_body_mode(None, true);
        assert_eq!(
            p.receive(&mut buf, &mut rec),
            Err(ParseError::Malformed("bad chunk size"))
        );
    }

    #[test]
    fn header_size_limit() {
        let mut p = ResponseParser::new(32);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nX-Long: aaaaaaaaaaaaaaaaaaaa\r\n\r\n");
        assert_eq!(p.receive(&mut buf, &mut rec), Err(ParseError::HeaderTooLarge(32)));

        // Unterminated line already over the limit.
        let mut p = ResponseParser::new(16);
        let mut buf = BytesMut::from("HTTP/1.1 200 OK and then some");
        assert_eq!(p.receive(&mut buf, &mut rec), Err(ParseError::HeaderTooLarge(16)));
    }

    #[test]
    fn trailer_size_limit() {
        let mut p = ResponseParser::new(64);
        let mut rec = Recorder::default();
        let mut buf = head(
            &mut p,
            &mut rec,
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\n0\r\n",
        );
        p.set_body_mode(None, true);
        for _ in 0..10 {
            buf.extend_from_slice(format!("X-Trailer: {}\r\n", "b".repeat(40)).as_bytes());
        }
        assert_eq!(p.receive(&mut buf, &mut rec), Err(ParseError::HeaderTooLarge(64)));
        assert!(rec.trailers.len() < 2);
        assert!(!rec.complete);
    }

    #[test]
    fn small_trailers_fit_after_large_head() {
        let mut p = ResponseParser::new(64);
        let mut rec = Recorder::default();
        let mut buf = head(
            &mut p,
            &mut rec,
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\nX-Trailer-A: cccccccccccccccccccccccccccccc\r\n\r\n",
        );
        p.set_body_mode(None, true);
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.trailers, vec![("X-Trailer-A".to_string(), "c".repeat(30))]);
        assert!(rec.complete);
    }

    #[test]
    fn unterminated_chunk_size_line_is_bounded() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = head(&mut p, &mut rec, "HTTP/1.1 200 OK\r\n\r\n");
        p.set_body_mode(None, true);
        buf.extend_from_slice(&[b'f'; 100]);
        p.receive(&mut buf, &mut rec).unwrap();
        buf.extend_from_slice(&vec![b'f'; 100_000]);
        assert_eq!(
            p.receive(&mut buf, &mut rec),
            Err(ParseError::Malformed("chunk size line too long"))
        );
    }

    #[test]
    fn read_until_close() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = head(&mut p, &mut rec, "HTTP/1.0 200 OK\r\n\r\nabc");
        assert!(p.is_http10());
        p.set_body_mode(None, false);
        assert!(p.is_read_until_close());
        p.receive(&mut buf, &mut rec).unwrap();
        assert_eq!(rec.body, b"abc");
        p.finish_at_eof(&mut rec).unwrap();
        assert!(rec.complete);
        assert_eq!(p.state(), ParseState::Idle);
    }

    #[test]
    fn eof_mid_body_is_truncation() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        head(&mut p, &mut rec, "HTTP/1.1 200 OK\r\n\r\n");
        p.set_body_mode(Some(10), false);
        assert!(p.finish_at_eof(&mut rec).is_err());
    }

    #[test]
    fn garbage_status_line() {
        let mut p = ResponseParser::new(8192);
        let mut rec = Recorder::default();
        let mut buf = BytesMut::from("SSH-2.0-OpenSSH\r\n");
        assert!(p.receive(&mut buf, &mut rec).is_err());
    }
}
