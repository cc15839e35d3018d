/*
 * lib.rs
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

//! Tether core: connection lifecycle for an HTTP client connector.
//!
//! After each exchange the closing policy picks between draining the response so the connection
//! can be reused and aborting so it is discarded; the release executor then closes everything
//! in order on every exit path. Around it sit a per-destination connection pool, an HTTP/1.1
//! connector, and the client that lazily builds the connector from configuration properties.

pub mod config;
pub mod error;
pub mod net;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod release;
pub mod uri;

pub use config::{ConnectorConfig, CookiePolicy, Properties};
pub use error::{ConnectorError, ReleaseError};
pub use protocol::http::{Exchange, HttpConnector, HttpVersion, Method, Request, Response};
pub use provider::{Client, Connector, ConnectorProvider, HttpConnectorProvider};
pub use release::{decide, release, release_with_strategy, Action, ClosingStrategy, ExchangeState, TransportHandle};
pub use uri::{Destination, Scheme};
