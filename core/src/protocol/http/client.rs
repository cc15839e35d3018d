/*
 * client.rs
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

//! HTTP client: opens connections to a destination over TCP, TLS with ALPN, or a unix socket.

use std::io;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::net::{http_client_config, ALPN_H2};
use crate::protocol::http::connection::{HttpConnection, HttpStream, HttpVersion};
use crate::uri::{Destination, Scheme};

/// Opens connections for the connector. The TLS connector is built on first HTTPS connect.
pub struct HttpClient {
    offer_h2: bool,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    max_header_size: usize,
    tls: OnceCell<TlsConnector>,
}

impl HttpClient {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            offer_h2: config.http2,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            max_header_size: config.max_header_size,
            tls: OnceCell::new(),
        }
    }

    /// Whether TLS connections offer `h2` in ALPN.
    pub fn offers_http2(&self) -> bool {
        self.offer_h2
    }

    fn tls_connector(&self) -> &TlsConnector {
        self.tls
            .get_or_init(|| TlsConnector::from(http_client_config(self.offer_h2)))
    }

    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T, ConnectorError>
    where
        F: std::future::Future<Output = io::Result<T>>,
    {
        match self.connect_timeout {
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| ConnectorError::Timeout(what))?
                .map_err(ConnectorError::from),
            None => fut.await.map_err(ConnectorError::from),
        }
    }

    /// Connect to `destination`. The negotiated protocol is taken from ALPN on TLS connections;
    /// plain TCP and unix sockets use HTTP/1.1.
    pub async fn connect(&self, destination: &Destination) -> Result<HttpConnection, ConnectorError> {
        let (stream, version) = match destination.scheme {
            Scheme::UnixSocket => (self.connect_unix(destination).await?, HttpVersion::Http1_1),
            Scheme::Http => {
                let tcp = self
                    .bounded("connecting", TcpStream::connect(destination.address()))
                    .await?;
                (HttpStream::Plain(tcp), HttpVersion::Http1_1)
            }
            Scheme::Https => {
                let tcp = self
                    .bounded("connecting", TcpStream::connect(destination.address()))
                    .await?;
                let server_name = ServerName::try_from(destination.host.clone()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "invalid host name")
                })?;
                let tls = self
                    .bounded("negotiating TLS", self.tls_connector().connect(server_name, tcp))
                    .await?;
                let version = match tls.get_ref().1.alpn_protocol() {
                    Some(p) if p == ALPN_H2 => HttpVersion::Http2,
                    _ => HttpVersion::Http1_1,
                };
                (HttpStream::Tls(Box::new(tls)), version)
            }
        };
        tracing::debug!(destination = %destination, ?version, "connected");
        Ok(HttpConnection::new(
            stream,
            destination.clone(),
            version,
            self.max_header_size,
            self.read_timeout,
        ))
    }

    #[cfg(unix)]
    async fn connect_unix(&self, destination: &Destination) -> Result<HttpStream, ConnectorError> {
        let stream = self
            .bounded("connecting", tokio::net::UnixStream::connect(&destination.host))
            .await?;
        Ok(HttpStream::Unix(stream))
    }

    #[cfg(not(unix))]
    async fn connect_unix(&self, destination: &Destination) -> Result<HttpStream, ConnectorError> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unix sockets are not available on this platform: {}", destination),
        )
        .into())
    }
}
