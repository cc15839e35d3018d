/*
 * policy.rs
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

//! Closing policy: whether an in-flight request must be aborted before its entity stream is closed.
//!
//! Draining a chunked body waits for the terminating zero-length chunk, which a peer may never
//! send; such exchanges are aborted instead so the close cannot hang. Bodies with a known length
//! end on their own, and unix-domain peers are local, so both are drained and the connection kept.

use std::fmt;

use crate::release::TransportHandle;
use crate::uri::Scheme;

/// How to give up the connection of a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Close the entity stream (reading out what is left) so the connection can be reused.
    GracefulDrain,
    /// Abort the request, then close; the connection is discarded.
    AbortThenClose,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GracefulDrain => "graceful-drain",
            Action::AbortThenClose => "abort-then-close",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer characteristics of one exchange, derived from its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeState {
    pub chunked: bool,
    /// `None` when the request URI's scheme could not be determined.
    pub scheme: Option<Scheme>,
    pub read_timeout_configured: bool,
}

impl ExchangeState {
    pub fn new(chunked: bool, scheme: Option<Scheme>, read_timeout_configured: bool) -> Self {
        Self {
            chunked,
            scheme,
            read_timeout_configured,
        }
    }

    /// Read the state from a handle. A scheme lookup failure becomes `scheme: None`.
    pub fn of<H: TransportHandle + ?Sized>(handle: &H) -> Self {
        Self {
            chunked: handle.is_chunked(),
            scheme: handle.scheme().ok(),
            read_timeout_configured: handle.read_timeout_configured(),
        }
    }

    fn is_unix_socket(&self) -> bool {
        self.scheme == Some(Scheme::UnixSocket)
    }
}

/// Decide the release action for `state`. Pure.
pub fn decide(state: &ExchangeState) -> Action {
    if state.chunked && !state.is_unix_socket() {
        Action::AbortThenClose
    } else {
        Action::GracefulDrain
    }
}

/// Pluggable closing policy. Connectors hold one and consult it for every exchange they release.
pub trait ClosingStrategy: fmt::Debug + Send + Sync {
    fn decide(&self, state: &ExchangeState) -> Action;
}

/// Default policy: [`decide`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GracefulClosingStrategy;

impl ClosingStrategy for GracefulClosingStrategy {
    fn decide(&self, state: &ExchangeState) -> Action {
        decide(state)
    }
}
