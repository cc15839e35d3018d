/*
 * handle.rs
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

//! Transport handle: the capabilities the release executor needs from one exchange,
//! independent of the client library that carried it.

use std::io;

use crate::uri::{Scheme, UriError};

/// One in-flight or just-completed exchange: its request, response, and response entity stream.
///
/// The executor calls `abort` (if at all), then `close_stream`, then `close_response`, each at
/// most once. Implementations must make `abort` a no-op when the exchange already completed.
#[allow(async_fn_in_trait)]
pub trait TransportHandle {
    /// Whether the response body uses chunked transfer encoding.
    fn is_chunked(&self) -> bool;

    /// Scheme of the request URI.
    fn scheme(&self) -> Result<Scheme, UriError>;

    /// Whether a finite read timeout applies to this exchange.
    fn read_timeout_configured(&self) -> bool;

    /// Forcibly terminate the request; the connection must not be reused afterwards.
    async fn abort(&mut self) -> io::Result<()>;

    /// Close the entity stream, consuming what is left of the body unless aborted.
    async fn close_stream(&mut self) -> io::Result<()>;

    /// Close the response, handing the connection back to its pool or discarding it.
    async fn close_response(&mut self) -> io::Result<()>;
}
