/*
 * cookie.rs
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

//! Cookie store shared by a connector's connections.
//!
//! `Set-Cookie` response headers are stored as the cookie policy allows, and matching cookies
//! go out in the `Cookie` header of later requests (including redirect hops).

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::CookiePolicy;
use crate::protocol::http::response::Response;
use crate::uri::{Destination, Scheme};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One cookie as set by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercase, without a leading dot.
    pub domain: String,
    /// Set without a Domain attribute: sent back to the exact host only.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    /// Max-Age in seconds; zero or negative deletes the cookie.
    pub max_age: Option<i64>,
}

/// Path without query or fragment.
fn request_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Directory of the request path, used when Set-Cookie has no Path.
fn default_path(path: &str) -> String {
    let path = request_path(path);
    match path.rfind('/') {
        Some(i) if path.starts_with('/') && i > 0 => path[..i].to_string(),
        _ => "/".to_string(),
    }
}

/// Host equals the domain, or is a subdomain of it. IP addresses match exactly only.
fn domain_matches(host: &str, domain: &str) -> bool {
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    if host.parse::<IpAddr>().is_ok() || host.len() <= domain.len() {
        return false;
    }
    let (prefix, suffix) = host.split_at(host.len() - domain.len());
    suffix.eq_ignore_ascii_case(domain) && prefix.ends_with('.')
}

fn path_matches(path: &str, cookie_path: &str) -> bool {
    let path = request_path(path);
    path == cookie_path
        || (path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || path[cookie_path.len()..].starts_with('/')))
}

impl Cookie {
    /// Parse one `Set-Cookie` value received from `host` for a request to `path`.
    pub fn parse(header: &str, host: &str, path: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            domain: host.to_ascii_lowercase(),
            host_only: true,
            path: default_path(path),
            secure: false,
            max_age: None,
        };
        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr.trim(), ""),
            };
            if key.eq_ignore_ascii_case("domain") {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                if !domain.is_empty() {
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
            } else if key.eq_ignore_ascii_case("path") {
                if val.starts_with('/') {
                    cookie.path = val.to_string();
                }
            } else if key.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if key.eq_ignore_ascii_case("max-age") {
                if let Ok(secs) = val.parse::<i64>() {
                    cookie.max_age = Some(secs);
                }
            }
        }
        Some(cookie)
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches(&self, destination: &Destination, path: &str) -> bool {
        let domain_ok = if self.host_only {
            destination.host.eq_ignore_ascii_case(&self.domain)
        } else {
            domain_matches(&destination.host, &self.domain)
        };
        domain_ok
            && path_matches(path, &self.path)
            && (!self.secure || destination.scheme == Scheme::Https)
    }
}

struct StoredCookie {
    cookie: Cookie,
    expires: Option<Instant>,
}

impl StoredCookie {
    fn expired(&self, now: Instant) -> bool {
        self.expires.map(|at| at <= now).unwrap_or(false)
    }
}

/// Cookies received by one connector.
pub struct CookieStore {
    policy: CookiePolicy,
    cookies: Mutex<Vec<StoredCookie>>,
}

impl CookieStore {
    pub fn new(policy: CookiePolicy) -> Self {
        Self {
            policy,
            cookies: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> CookiePolicy {
        self.policy
    }

    /// Number of unexpired cookies held.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.cookies).iter().filter(|c| !c.expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn accepts(&self, cookie: &Cookie, host: &str) -> bool {
        match self.policy {
            CookiePolicy::AcceptAll => true,
            CookiePolicy::AcceptNone => false,
            CookiePolicy::AcceptOriginalServer => {
                cookie.host_only || domain_matches(host, &cookie.domain)
            }
        }
    }

    /// Store the cookies `response` sets for a request to `path` on `destination`.
    /// Returns how many were accepted.
    pub fn store(&self, destination: &Destination, path: &str, response: &Response) -> usize {
        if self.policy == CookiePolicy::AcceptNone {
            return 0;
        }
        let now = Instant::now();
        let mut accepted = 0;
        let mut cookies = lock(&self.cookies);
        for (_, value) in response
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
        {
            let Some(cookie) = Cookie::parse(value, &destination.host, path) else {
                continue;
            };
            if !self.accepts(&cookie, &destination.host) {
                tracing::debug!(destination = %destination, cookie = %cookie.name, domain = %cookie.domain, "rejected cookie");
                continue;
            }
            cookies.retain(|c| !c.cookie.same_slot(&cookie) && !c.expired(now));
            match cookie.max_age {
                Some(secs) if secs <= 0 => {}
                max_age => {
                    let expires = max_age.map(|secs| now + Duration::from_secs(secs as u64));
                    cookies.push(StoredCookie { cookie, expires });
                }
            }
            accepted += 1;
        }
        accepted
    }

    /// `Cookie` header value for a request to `path` on `destination`, if any cookie matches.
    /// Longer paths come first.
    pub fn header_for(&self, destination: &Destination, path: &str) -> Option<String> {
        if self.policy == CookiePolicy::AcceptNone {
            return None;
        }
        let now = Instant::now();
        let cookies = lock(&self.cookies);
        let mut matching: Vec<&Cookie> = cookies
            .iter()
            .filter(|c| !c.expired(now) && c.cookie.matches(destination, path))
            .map(|c| &c.cookie)
            .collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
