/*
 * connector.rs
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

//! HTTP connector: executes requests over pooled connections and follows redirects.

use std::io;
use std::sync::Arc;

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::pool::{Checkout, ConnectionPool, PoolConfig};
use crate::protocol::http::client::HttpClient;
use crate::protocol::http::connection::{HttpConnection, HttpVersion};
use crate::protocol::http::cookie::CookieStore;
use crate::protocol::http::exchange::Exchange;
use crate::protocol::http::redirect::{self, RedirectTracker};
use crate::protocol::http::request::Request;
use crate::release::{ClosingStrategy, GracefulClosingStrategy};
use crate::uri::parse_target;

/// Connector for HTTP/1.1 over TCP, TLS, and unix sockets.
pub struct HttpConnector {
    config: ConnectorConfig,
    pool: Arc<ConnectionPool<HttpConnection>>,
    client: HttpClient,
    cookies: CookieStore,
    strategy: Arc<dyn ClosingStrategy>,
}

/// Errors on a pooled connection that mean the server closed it while it sat idle.
fn is_stale(e: &ConnectorError) -> bool {
    match e {
        ConnectorError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

impl HttpConnector {
    /// Build a connector. Must be called within a tokio runtime once requests are executed.
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            pool: ConnectionPool::new(PoolConfig::from(&config)),
            client: HttpClient::new(&config),
            cookies: CookieStore::new(config.cookie_policy),
            strategy: Arc::new(GracefulClosingStrategy),
            config,
        }
    }

    /// Replace the closing strategy used when exchanges are released.
    pub fn with_closing_strategy(mut self, strategy: Arc<dyn ClosingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Whether TLS connections offer HTTP/2.
    pub fn offers_http2(&self) -> bool {
        self.client.offers_http2()
    }

    pub fn closing_strategy(&self) -> &Arc<dyn ClosingStrategy> {
        &self.strategy
    }

    /// Cookies received so far, kept according to the configured cookie policy.
    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<HttpConnection>> {
        &self.pool
    }

    /// Connections alive across all destinations, idle or in use.
    pub fn live_connections(&self) -> usize {
        self.pool.live_connections()
    }

    pub fn idle_connections(&self) -> usize {
        self.pool.idle_connections()
    }

    /// Send `request` and return the exchange once the response head has arrived.
    /// Redirects are followed when enabled; each intermediate exchange is released first.
    pub async fn execute(&self, request: Request) -> Result<Exchange, ConnectorError> {
        let mut request = request;
        let mut tracker = RedirectTracker::new(self.config.max_redirects, &request.uri);
        loop {
            let exchange = self.send(&request).await?;
            if !self.config.follow_redirects {
                return Ok(exchange);
            }
            let Some(next) = redirect::location(&request.uri, exchange.response())? else {
                return Ok(exchange);
            };
            let code = exchange.status();
            exchange.close().await?;
            tracker.record(&next)?;
            tracing::debug!(code, from = %request.uri, to = %next, "following redirect");
            request = redirect::follow(
                &request,
                code,
                next,
                self.config.preserve_method_on_redirect,
            )?;
        }
    }

    /// One request on one connection, with a single retry when a reused connection was stale.
    async fn send(&self, request: &Request) -> Result<Exchange, ConnectorError> {
        let target = parse_target(&request.uri)?;
        let pool = self.pool.destination(&target.destination)?;
        let mut retried = false;
        loop {
            let mut lease = match pool.acquire().await? {
                Checkout::Reused(lease) => lease,
                Checkout::Fresh(slot) => {
                    let conn = self.client.connect(&target.destination).await?;
                    slot.into_lease(conn)
                }
            };
            let version = lease.conn().version();
            if version != HttpVersion::Http1_1 {
                lease.discard();
                return Err(ConnectorError::UnsupportedProtocol(version));
            }
            let cookie = self.cookies.header_for(&target.destination, &target.path);
            match lease
                .conn_mut()
                .send(request, &target.path, self.config.chunk_size, cookie.as_deref())
                .await
            {
                Ok(head) => {
                    self.cookies
                        .store(&target.destination, &target.path, &head.response);
                    return Ok(Exchange::new(
                        request.uri.clone(),
                        head.response,
                        head.chunked,
                        head.complete,
                        lease,
                        self.config.read_timeout_configured(),
                        self.strategy.clone(),
                    ));
                }
                Err(e) => {
                    let stale = lease.is_reused()
                        && !lease.conn().response_started()
                        && request.method.is_idempotent()
                        && is_stale(&e);
                    lease.discard();
                    if stale && !retried {
                        retried = true;
                        pool.clear_idle();
                        tracing::debug!(destination = %target.destination, error = %e, "stale pooled connection, retrying");
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Close the pool. Exchanges still open discard their connections when released.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .finish()
    }
}
