/*
 * connection.rs
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

//! HTTP connection: one TCP, TLS, or unix-domain stream carrying HTTP/1.1 exchanges one at a
//! time. Drives the H1 parser; the exchange pulls body bytes through it.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;

use crate::error::ConnectorError;
use crate::protocol::http::h1::{H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;
use crate::uri::Destination;

const READ_CHUNK: usize = 8192;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http1_1,
    Http2,
}

/// Unified stream: plain TCP, TLS, or unix-domain socket. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            HttpStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            HttpStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            HttpStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            HttpStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Collects the status line and headers of one response.
#[derive(Default)]
struct HeadCollector {
    code: u16,
    reason: Option<String>,
    headers: Vec<(String, String)>,
}

impl H1ResponseHandler for HeadCollector {
    fn status(&mut self, code: u16, reason: Option<&str>) {
        self.code = code;
        self.reason = reason.map(|s| s.to_string());
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn body_chunk(&mut self, _data: &[u8]) {}
}

impl HeadCollector {
    fn into_response(self) -> Response {
        Response {
            code: self.code,
            reason: self.reason,
            headers: self.headers,
        }
    }
}

/// Appends decoded body bytes to the exchange's buffer.
struct BodySink<'a> {
    out: &'a mut BytesMut,
}

impl H1ResponseHandler for BodySink<'_> {
    fn status(&mut self, _code: u16, _reason: Option<&str>) {}

    fn header(&mut self, _name: &str, _value: &str) {}

    fn body_chunk(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }
}

/// Response head plus how its body is framed.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub response: Response,
    /// Body uses chunked transfer encoding.
    pub chunked: bool,
    /// No body bytes follow (or they have all been read already).
    pub complete: bool,
}

/// Request line and headers, and whether the body goes out with chunked framing.
///
/// The body is chunked when the request declares `Transfer-Encoding: chunked`, or when it has a
/// body but neither Content-Length nor Transfer-Encoding. Host is always ours; a caller's
/// Cookie header is merged with the stored `cookie` value.
fn request_head(request: &Request, path: &str, host: &str, cookie: Option<&str>) -> (String, bool) {
    let declared_chunked = request
        .header_value("Transfer-Encoding")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    let chunked = declared_chunked
        || (request.body.is_some()
            && request.header_value("Content-Length").is_none()
            && request.header_value("Transfer-Encoding").is_none());

    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", request.method.as_str(), path, host);
    for (k, v) in &request.headers {
        if k.eq_ignore_ascii_case("host")
            || k.eq_ignore_ascii_case("cookie")
            || (chunked && k.eq_ignore_ascii_case("content-length"))
        {
            continue;
        }
        head.push_str(k);
        head.push_str(": ");
        head.push_str(v);
        head.push_str("\r\n");
    }
    let cookie = match (request.header_value("Cookie"), cookie) {
        (Some(own), Some(stored)) => Some(format!("{}; {}", own, stored)),
        (Some(own), None) => Some(own.to_string()),
        (None, Some(stored)) => Some(stored.to_string()),
        (None, None) => None,
    };
    if let Some(cookie) = cookie {
        head.push_str("Cookie: ");
        head.push_str(&cookie);
        head.push_str("\r\n");
    }
    if chunked && !declared_chunked {
        head.push_str("Transfer-Encoding: chunked\r\n");
    }
    if request.body.is_none() && !chunked && request.header_value("Connection").is_none() {
        head.push_str("Connection: keep-alive\r\n");
    }
    head.push_str("\r\n");
    (head, chunked)
}

/// HTTP connection: holds stream, version, and parser state between exchanges.
pub struct HttpConnection {
    stream: HttpStream,
    destination: Destination,
    version: HttpVersion,
    read_timeout: Option<Duration>,
    read_buf: BytesMut,
    parser: ResponseParser,
    reusable: bool,
    /// Bytes of the current response received so far.
    response_bytes: usize,
    exchanges: u64,
}

impl HttpConnection {
    /// Wrap an already-connected stream. Used by HttpClient::connect().
    pub fn new(
        stream: HttpStream,
        destination: Destination,
        version: HttpVersion,
        max_header_size: usize,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            destination,
            version,
            read_timeout,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            parser: ResponseParser::new(max_header_size),
            reusable: true,
            response_bytes: 0,
            exchanges: 0,
        }
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Number of exchanges started on this connection.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// True once some bytes of the current response have arrived.
    pub fn response_started(&self) -> bool {
        self.response_bytes > 0
    }

    /// The current response body has been read to its end.
    pub fn is_complete(&self) -> bool {
        self.parser.state() == ParseState::Idle
    }

    /// Whether the connection can carry another exchange.
    pub fn is_reusable(&self) -> bool {
        self.reusable && self.is_complete() && self.read_buf.is_empty()
    }

    pub fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    /// Read more bytes from the stream into read_buf, bounded by the read timeout.
    async fn fill(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(READ_CHUNK);
        let read = self.stream.read_buf(&mut self.read_buf);
        let n = match self.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??,
            None => read.await?,
        };
        self.response_bytes += n;
        Ok(n)
    }

    /// Send the request and read the response head. The body is then read with `read_body`.
    /// `cookie` is the stored `Cookie` header value for this request, if any.
    pub async fn send(
        &mut self,
        request: &Request,
        path: &str,
        chunk_size: usize,
        cookie: Option<&str>,
    ) -> Result<ResponseHead, ConnectorError> {
        self.parser.reset();
        self.response_bytes = 0;
        self.exchanges += 1;
        // Anything left means the previous response was not fully consumed.
        if !self.read_buf.is_empty() {
            self.reusable = false;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unread bytes on connection before request",
            )
            .into());
        }

        self.write_request(request, path, chunk_size, cookie).await?;

        let mut head = HeadCollector::default();
        loop {
            if let Err(e) = self.parser.receive(&mut self.read_buf, &mut head) {
                self.reusable = false;
                return Err(e.into());
            }
            if self.parser.state() == ParseState::HeadersComplete {
                // Interim 1xx responses precede the final one.
                if (100..200).contains(&head.code) && head.code != 101 {
                    self.parser.reset();
                    head = HeadCollector::default();
                    continue;
                }
                break;
            }
            if self.fill().await? == 0 {
                self.reusable = false;
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response head",
                )
                .into());
            }
        }

        let response = head.into_response();
        let no_body = request.method == Method::Head
            || response.code == 204
            || response.code == 304
            || (100..200).contains(&response.code);
        let chunked = !no_body && response.is_chunked();
        let content_length = if no_body {
            Some(0)
        } else {
            response.content_length().map_err(|_| {
                self.reusable = false;
                io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length")
            })?
        };
        self.parser.set_body_mode(content_length, chunked);
        // After 101 the stream speaks another protocol; it never goes back to the pool.
        if response.code == 101
            || !response.keep_alive(self.parser.is_http10())
            || self.parser.is_read_until_close()
        {
            self.reusable = false;
        }
        Ok(ResponseHead {
            response,
            chunked,
            complete: self.is_complete(),
        })
    }

    /// Append decoded body bytes to `out`. Returns the number appended; 0 means the body is complete.
    pub async fn read_body(&mut self, out: &mut BytesMut) -> io::Result<usize> {
        let start = out.len();
        loop {
            if self.parser.state() == ParseState::Idle {
                return Ok(out.len() - start);
            }
            let mut sink = BodySink { out: &mut *out };
            if let Err(e) = self.parser.receive(&mut self.read_buf, &mut sink) {
                self.reusable = false;
                return Err(e.into());
            }
            if out.len() > start {
                return Ok(out.len() - start);
            }
            if self.parser.state() == ParseState::Idle {
                return Ok(0);
            }
            let n = match self.fill().await {
                Ok(n) => n,
                Err(e) => {
                    self.reusable = false;
                    return Err(e);
                }
            };
            if n == 0 {
                self.reusable = false;
                let mut sink = BodySink { out: &mut *out };
                self.parser.finish_at_eof(&mut sink)?;
                return Ok(0);
            }
        }
    }

    /// Close the write side (and TLS session); the connection is not reused afterwards.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.reusable = false;
        match timeout(SHUTDOWN_TIMEOUT, self.stream.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "shutdown timed out")),
        }
    }

    async fn write_request(
        &mut self,
        request: &Request,
        path: &str,
        chunk_size: usize,
        cookie: Option<&str>,
    ) -> io::Result<()> {
        let (head, chunked) = request_head(request, path, &self.destination.host_header(), cookie);
        self.stream.write_all(head.as_bytes()).await?;
        if chunked {
            if let Some(body) = &request.body {
                for chunk in body.chunks(chunk_size.max(1)) {
                    let hex_len = format!("{:x}\r\n", chunk.len());
                    self.stream.write_all(hex_len.as_bytes()).await?;
                    self.stream.write_all(chunk).await?;
                    self.stream.write_all(b"\r\n").await?;
                }
            }
            self.stream.write_all(b"0\r\n\r\n").await?;
        } else if let Some(body) = &request.body {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Scheme;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    #[test]
    fn declared_chunked_drops_content_length() {
        let mut r = Request::new(Method::Put, "http://h/x");
        r.header("Transfer-Encoding", "chunked")
            .header("Content-Length", "3")
            .body_slice(b"abc");
        let (head, chunked) = request_head(&r, "/x", "h", None);
        assert!(chunked);
        assert!(!head.to_ascii_lowercase().contains("content-length"));
        assert_eq!(head.matches("Transfer-Encoding").count(), 1);
    }

    #[test]
    fn unframed_body_goes_chunked() {
        let mut r = Request::new(Method::Post, "http://h/x");
        r.body_slice(b"abc");
        let (head, chunked) = request_head(&r, "/x", "h", None);
        assert!(chunked);
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));

        let mut r = Request::new(Method::Post, "http://h/x");
        r.header("Content-Length", "3").body_slice(b"abc");
        let (head, chunked) = request_head(&r, "/x", "h", None);
        assert!(!chunked);
        assert!(head.contains("Content-Length: 3\r\n"));
    }

    #[test]
    fn host_is_ours_and_cookies_merge() {
        let mut r = Request::get("http://h/");
        r.header("host", "elsewhere.example").header("Cookie", "a=1");
        let (head, _) = request_head(&r, "/", "h:8080", Some("b=2"));
        assert!(head.starts_with("GET / HTTP/1.1\r\nHost: h:8080\r\n"));
        assert!(!head.contains("elsewhere"));
        assert!(head.contains("Cookie: a=1; b=2\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn chunked_request_on_the_wire_and_upgrade_not_reusable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut tmp = [0u8; 512];
            while !raw.ends_with(b"\r\n0\r\n\r\n") {
                let n = s.read(&mut tmp).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&tmp[..n]);
            }
            let _ = tx.send(raw);
            s.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: echo\r\nConnection: Upgrade\r\n\r\n")
                .await
                .unwrap();
            let _ = s.read(&mut tmp).await;
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let destination = Destination::new("127.0.0.1", addr.port(), Scheme::Http);
        let mut conn = HttpConnection::new(
            HttpStream::Plain(tcp),
            destination,
            HttpVersion::Http1_1,
            8192,
            None,
        );
        let mut r = Request::new(Method::Post, format!("http://{}/up", addr));
        r.header("Transfer-Encoding", "chunked")
            .header("Host", "elsewhere.example")
            .body_slice(b"hello world");
        let head = conn.send(&r, "/up", 5, None).await.unwrap();

        let raw = String::from_utf8(rx.await.unwrap()).unwrap();
        assert!(raw.starts_with("POST /up HTTP/1.1\r\n"));
        assert!(raw.contains(&format!("Host: 127.0.0.1:{}\r\n", addr.port())));
        assert_eq!(raw.to_ascii_lowercase().matches("host:").count(), 1);
        assert!(raw.ends_with("\r\n\r\n5\r\nhello\r\n5\r\n worl\r\n1\r\nd\r\n0\r\n\r\n"));

        assert_eq!(head.response.code, 101);
        assert!(head.complete);
        assert!(!conn.is_reusable());
    }
}
