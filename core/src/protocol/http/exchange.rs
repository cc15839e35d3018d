/*
 * exchange.rs
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

//! Exchange: one request/response on a pooled connection, read by the application and then
//! released through the connector's closing strategy.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::error::ReleaseError;
use crate::pool::Lease;
use crate::protocol::http::connection::HttpConnection;
use crate::protocol::http::response::Response;
use crate::release::{release_with_strategy, ClosingStrategy, TransportHandle};
use crate::uri::{Scheme, UriError};

/// A response whose body is still attached to its connection.
///
/// Release it with [`Exchange::close`]. An exchange dropped without being released discards
/// its connection.
pub struct Exchange {
    uri: String,
    response: Response,
    lease: Option<Lease<HttpConnection>>,
    chunked: bool,
    read_timeout_configured: bool,
    buffered: BytesMut,
    complete: bool,
    aborted: bool,
    stream_closed: bool,
    strategy: Arc<dyn ClosingStrategy>,
}

impl Exchange {
    pub(crate) fn new(
        uri: String,
        response: Response,
        chunked: bool,
        complete: bool,
        lease: Lease<HttpConnection>,
        read_timeout_configured: bool,
        strategy: Arc<dyn ClosingStrategy>,
    ) -> Self {
        Self {
            uri,
            response,
            lease: Some(lease),
            chunked,
            read_timeout_configured,
            buffered: BytesMut::new(),
            complete,
            aborted: false,
            stream_closed: false,
            strategy,
        }
    }

    /// URI of the request that produced this response (after redirects).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn status(&self) -> u16 {
        self.response.code
    }

    /// True once the whole body has been received from the connection.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True if the connection carried an earlier exchange.
    pub fn is_reused(&self) -> bool {
        self.lease.as_ref().map(|l| l.is_reused()).unwrap_or(false)
    }

    fn check_readable(&self) -> io::Result<()> {
        if self.aborted {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "exchange aborted"));
        }
        if self.stream_closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "entity stream closed"));
        }
        Ok(())
    }

    /// Pull the next piece of the body into the buffer.
    async fn fill(&mut self) -> io::Result<()> {
        self.check_readable()?;
        let Some(lease) = self.lease.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "exchange released"));
        };
        let conn = lease.conn_mut();
        conn.read_body(&mut self.buffered).await?;
        self.complete = conn.is_complete();
        Ok(())
    }

    /// Read body bytes into `buf`. Returns 0 at the end of the body.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_readable()?;
        while self.buffered.is_empty() && !self.complete {
            self.fill().await?;
        }
        let n = buf.len().min(self.buffered.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.advance(n);
        Ok(n)
    }

    /// Read the rest of the body.
    pub async fn bytes(&mut self) -> io::Result<Vec<u8>> {
        self.check_readable()?;
        while !self.complete {
            self.fill().await?;
        }
        Ok(self.buffered.split().to_vec())
    }

    /// Release the exchange: the closing strategy decides between draining for reuse and
    /// aborting. Only a failure to close the response is returned.
    pub async fn close(self) -> Result<(), ReleaseError> {
        let strategy = self.strategy.clone();
        release_with_strategy(self, strategy.as_ref()).await
    }
}

/// Connection errors that mean the peer is already gone.
fn already_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

impl TransportHandle for Exchange {
    fn is_chunked(&self) -> bool {
        self.chunked
    }

    fn scheme(&self) -> Result<Scheme, UriError> {
        Scheme::from_uri(&self.uri)
    }

    fn read_timeout_configured(&self) -> bool {
        self.read_timeout_configured
    }

    async fn abort(&mut self) -> io::Result<()> {
        if self.complete || self.aborted {
            return Ok(());
        }
        self.aborted = true;
        match self.lease.as_mut() {
            Some(lease) => {
                tracing::debug!(destination = %lease.destination(), uri = %self.uri, "aborting exchange");
                let conn = lease.conn_mut();
                conn.mark_not_reusable();
                match conn.shutdown().await {
                    Err(e) if !already_closed(&e) => Err(e),
                    _ => Ok(()),
                }
            }
            None => Ok(()),
        }
    }

    async fn close_stream(&mut self) -> io::Result<()> {
        if self.stream_closed {
            return Ok(());
        }
        self.stream_closed = true;
        self.buffered.clear();
        if self.aborted {
            return Ok(());
        }
        let Some(lease) = self.lease.as_mut() else {
            return Ok(());
        };
        let conn = lease.conn_mut();
        let mut scratch = BytesMut::new();
        while !conn.is_complete() {
            scratch.clear();
            conn.read_body(&mut scratch).await?;
        }
        self.complete = true;
        Ok(())
    }

    async fn close_response(&mut self) -> io::Result<()> {
        let Some(mut lease) = self.lease.take() else {
            return Ok(());
        };
        if !self.aborted && self.complete && lease.conn().is_reusable() {
            lease.recycle();
            return Ok(());
        }
        let result = if self.aborted {
            Ok(())
        } else {
            match lease.conn_mut().shutdown().await {
                Err(e) if !already_closed(&e) => Err(e),
                _ => Ok(()),
            }
        };
        lease.discard();
        result
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::debug!(uri = %self.uri, "exchange dropped without release");
            lease.discard();
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("uri", &self.uri)
            .field("status", &self.response.code)
            .field("chunked", &self.chunked)
            .field("complete", &self.complete)
            .field("aborted", &self.aborted)
            .finish()
    }
}
