/*
 * error.rs
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

//! Connector and release errors.

use std::io;

use crate::protocol::http::HttpVersion;
use crate::uri::UriError;

/// Failures while releasing an exchange.
///
/// Only `ResponseClose` is ever returned by the release executor; `Abort` and `Drain` are
/// logged where they occur and the remaining release steps still run.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// Aborting the in-flight request failed (or did not finish in time).
    #[error("abort failed: {0}")]
    Abort(#[source] io::Error),
    /// Draining or closing the response entity stream failed.
    #[error("entity stream close failed: {0}")]
    Drain(#[source] io::Error),
    /// Closing the response failed; the connection may not have been returned to or evicted from its pool.
    #[error("response close failed: {0}")]
    ResponseClose(#[source] io::Error),
}

impl ReleaseError {
    /// True for failures the executor swallows.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReleaseError::ResponseClose(_))
    }
}

impl From<ReleaseError> for io::Error {
    fn from(e: ReleaseError) -> Self {
        match e {
            ReleaseError::Abort(inner)
            | ReleaseError::Drain(inner)
            | ReleaseError::ResponseClose(inner) => inner,
        }
    }
}

/// Errors from the connector, its pool, configuration, or client lookups.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// More redirects than `maxRedirects` were needed for one exchange.
    #[error("redirect limit of {limit} exceeded at {uri}")]
    RedirectLimitExceeded { limit: u32, uri: String },

    /// A redirect pointed back to a URI already visited in this exchange.
    #[error("infinite redirect loop at {0}")]
    RedirectLoop(String),

    /// Transport-specific internals were queried on the wrong connector type.
    #[error("connector mismatch: expected {expected}, found {found}")]
    ConfigurationMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Uri(#[from] UriError),

    #[error("connection pool for {0} is closed")]
    PoolClosed(String),

    /// Status line and headers exceeded `maxHeaderSize`.
    #[error("response header exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("{0:?} exchanges are not supported by this connector")]
    UnsupportedProtocol(HttpVersion),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}
