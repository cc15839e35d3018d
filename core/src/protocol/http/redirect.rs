/*
 * redirect.rs
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

//! Redirect following: which responses redirect, how the next request is derived, and the
//! per-exchange hop limit and loop check.

use std::collections::HashSet;

use crate::error::ConnectorError;
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;
use crate::uri::{parse_target, resolve};

/// Statuses the connector follows when the response carries a Location header.
pub fn is_redirect(code: u16) -> bool {
    matches!(code, 301 | 302 | 303 | 307 | 308)
}

/// Absolute URI the response redirects to, or None if it is not a followable redirect.
pub fn location(base: &str, response: &Response) -> Result<Option<String>, ConnectorError> {
    if !is_redirect(response.code) {
        return Ok(None);
    }
    match response.header("location") {
        Some(loc) if !loc.trim().is_empty() => Ok(Some(resolve(base, loc.trim())?)),
        _ => Ok(None),
    }
}

/// Build the request for the next hop.
pub fn follow(
    request: &Request,
    code: u16,
    target: String,
    preserve_method: bool,
) -> Result<Request, ConnectorError> {
    let switch_to_get = match code {
        303 => request.method != Method::Head,
        301 | 302 => {
            !preserve_method && request.method != Method::Get && request.method != Method::Head
        }
        _ => false,
    };
    let same_destination = parse_target(&request.uri)?.destination == parse_target(&target)?.destination;

    let mut next = request.clone();
    next.uri = target;
    if switch_to_get {
        next.method = Method::Get;
        next.body = None;
        next.headers.retain(|k, _| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("content-") && k != "transfer-encoding"
        });
    }
    next.remove_header("Proxy-Authorization");
    if !same_destination {
        next.remove_header("Authorization");
    }
    Ok(next)
}

/// Counts hops and remembers visited URIs for one exchange.
#[derive(Debug)]
pub struct RedirectTracker {
    limit: u32,
    hops: u32,
    visited: HashSet<String>,
}

impl RedirectTracker {
    pub fn new(limit: u32, initial: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(initial.to_string());
        Self {
            limit,
            hops: 0,
            visited,
        }
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// Record a hop to `uri`; fails past the limit or on a revisit.
    pub fn record(&mut self, uri: &str) -> Result<(), ConnectorError> {
        if self.hops >= self.limit {
            return Err(ConnectorError::RedirectLimitExceeded {
                limit: self.limit,
                uri: uri.to_string(),
            });
        }
        if !self.visited.insert(uri.to_string()) {
            return Err(ConnectorError::RedirectLoop(uri.to_string()));
        }
        self.hops += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Request {
        let mut r = Request::new(Method::Post, "http://a.example/form");
        r.header("Content-Type", "text/plain")
            .header("Content-Length", "5")
            .header("Authorization", "Basic eDp5")
            .header("Proxy-Authorization", "Basic cDpx")
            .header("X-Trace", "1")
            .body_slice(b"hello");
        r
    }

    #[test]
    fn see_other_switches_to_get() {
        let next = follow(&post(), 303, "http://a.example/done".into(), true).unwrap();
        assert_eq!(next.method, Method::Get);
        assert!(next.body.is_none());
        assert!(next.header_value("Content-Type").is_none());
        assert!(next.header_value("Content-Length").is_none());
        assert_eq!(next.header_value("X-Trace"), Some("1"));
        assert_eq!(next.header_value("Authorization"), Some("Basic eDp5"));
        assert!(next.header_value("Proxy-Authorization").is_none());
    }

    #[test]
    fn moved_keeps_method_unless_disabled() {
        let kept = follow(&post(), 301, "http://a.example/new".into(), true).unwrap();
        assert_eq!(kept.method, Method::Post);
        assert_eq!(kept.body.as_deref(), Some(&b"hello"[..]));
        let switched = follow(&post(), 302, "http://a.example/new".into(), false).unwrap();
        assert_eq!(switched.method, Method::Get);
        let temporary = follow(&post(), 307, "http://a.example/new".into(), false).unwrap();
        assert_eq!(temporary.method, Method::Post);
    }

    #[test]
    fn head_stays_head_on_see_other() {
        let r = Request::new(Method::Head, "http://a.example/");
        let next = follow(&r, 303, "http://a.example/x".into(), true).unwrap();
        assert_eq!(next.method, Method::Head);
    }

    #[test]
    fn authorization_dropped_across_destinations() {
        let next = follow(&post(), 307, "https://b.example/form".into(), true).unwrap();
        assert!(next.header_value("Authorization").is_none());
    }

    #[test]
    fn location_resolution() {
        let mut r = Response::new(302);
        r.headers.push(("Location".into(), "../b?q=1".into()));
        assert_eq!(
            location("http://h.example/a/c", &r).unwrap().as_deref(),
            Some("http://h.example/b?q=1")
        );
        let ok = Response::new(200);
        assert_eq!(location("http://h.example/", &ok).unwrap(), None);
        let no_header = Response::new(301);
        assert_eq!(location("http://h.example/", &no_header).unwrap(), None);
    }

    #[test]
    fn tracker_limit_and_loop() {
        let mut t = RedirectTracker::new(2, "http://h/0");
        t.record("http://h/1").unwrap();
        assert!(matches!(t.record("http://h/0"), Err(ConnectorError::RedirectLoop(_))));
        t.record("http://h/2").unwrap();
        assert_eq!(t.hops(), 2);
        assert!(matches!(
            t.record("http://h/3"),
            Err(ConnectorError::RedirectLimitExceeded { limit: 2, .. })
        ));
    }

    #[test]
    fn zero_limit_rejects_first_hop() {
        let mut t = RedirectTracker::new(0, "http://h/");
        assert!(t.record("http://h/next").is_err());
    }
}
