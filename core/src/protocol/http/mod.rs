/*
 * mod.rs
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

//! HTTP/1.1 connector.
//!
//! - Push parser for response heads and bodies (`h1`), with a limit on header size.
//! - Connections over TCP, TLS (ALPN `http/1.1`, optionally `h2`), and unix sockets.
//! - Exchanges hold their pooled connection until released by the closing strategy.
//! - Redirects are followed per connector configuration.
//! - Cookies are kept per connector as the cookie policy allows.

mod request;
mod response;

pub mod h1;

pub use h1::H1ResponseHandler;
pub use request::{Method, Request};
pub use response::Response;

pub mod client;
pub mod connection;
pub mod connector;
pub mod cookie;
pub mod exchange;
pub mod redirect;

pub use client::HttpClient;
pub use connection::{HttpConnection, HttpStream, HttpVersion, ResponseHead};
pub use connector::HttpConnector;
pub use cookie::{Cookie, CookieStore};
pub use exchange::Exchange;
