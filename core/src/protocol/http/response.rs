/*
 * response.rs
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

//! HTTP response head: status, reason, headers.

/// Status line and headers of a response. The body is read from the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Response {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            reason: None,
            headers: Vec::new(),
        }
    }

    pub fn with_reason(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
            headers: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if any value of `name` contains `token` as a comma-separated element (case-insensitive).
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Transfer-Encoding includes `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.header_has_token("transfer-encoding", "chunked")
    }

    /// Content-Length, `Ok(None)` if absent, `Err` if present but not a number.
    pub fn content_length(&self) -> Result<Option<u64>, std::num::ParseIntError> {
        self.header("content-length")
            .map(|v| v.trim().parse::<u64>())
            .transpose()
    }

    /// Whether the server allows the connection to stay open after this response.
    pub fn keep_alive(&self, http10: bool) -> bool {
        if self.header_has_token("connection", "close") {
            return false;
        }
        !http10 || self.header_has_token("connection", "keep-alive")
    }
}
