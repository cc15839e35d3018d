/*
 * uri.rs
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

//! Request URIs: scheme resolution, destination keys, and redirect location resolution.
//!
//! Supported schemes are `http`, `https` and unix-domain sockets. Unix socket URIs carry the
//! percent-encoded socket path as authority (e.g. `http+unix://%2Fvar%2Frun%2Fapp.sock/status`).
//! With an empty authority (e.g. `unix:///var/run/app.sock`) the path names the socket and the
//! request goes to `/`; `unix` and `http+unix` are interchangeable scheme names.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Socket path in authority: encode everything that would end or split the authority.
const SOCKET_PATH: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'@')
    .add(b':')
    .add(b'%')
    .add(b' ');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("malformed uri: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("missing host in {0}")]
    MissingHost(String),
    #[error("invalid port in {0}")]
    InvalidPort(String),
}

/// Transport scheme of a request URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    UnixSocket,
}

impl Scheme {
    /// Case-insensitive scheme name lookup.
    pub fn parse(name: &str) -> Result<Self, UriError> {
        match name.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "unix" | "http+unix" => Ok(Scheme::UnixSocket),
            _ => Err(UriError::UnsupportedScheme(name.to_string())),
        }
    }

    /// Scheme of a full URI. Fails on URIs without `scheme://`.
    pub fn from_uri(uri: &str) -> Result<Self, UriError> {
        let (scheme, _) = split_scheme(uri)?;
        Self::parse(scheme)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::UnixSocket => "http+unix",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
            Scheme::UnixSocket => 0,
        }
    }

    pub fn is_secure(&self) -> bool {
        *self == Scheme::Https
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool key: one set of reusable connections per `(host, port, scheme)`.
/// For unix sockets `host` is the socket path and `port` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16, scheme: Scheme) -> Self {
        Self {
            host: host.into(),
            port,
            scheme,
        }
    }

    /// `host:port` for TCP connect, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the Host header: port omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        match self.scheme {
            Scheme::UnixSocket => "localhost".to_string(),
            _ if self.port == self.scheme.default_port() => {
                if self.host.contains(':') {
                    format!("[{}]", self.host)
                } else {
                    self.host.clone()
                }
            }
            _ => self.address(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::UnixSocket => write!(f, "unix:{}", self.host),
            _ => write!(f, "{}://{}", self.scheme, self.address()),
        }
    }
}

/// Parsed request URI: where to connect and what to put in the request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub destination: Destination,
    /// Origin-form path and query (always starts with `/`); fragment removed.
    pub path: String,
}

/// Split `scheme://rest`. The scheme must start with a letter and contain only letters, digits, `+`, `-`, `.`.
fn split_scheme(uri: &str) -> Result<(&str, &str), UriError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| UriError::Malformed(uri.to_string()))?;
    let mut chars = scheme.chars();
    let valid = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    if !valid {
        return Err(UriError::Malformed(uri.to_string()));
    }
    Ok((scheme, rest))
}

/// Split the part after `scheme://` into authority and the rest (path, query, fragment).
fn split_authority(rest: &str) -> (&str, &str) {
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    rest.split_at(end)
}

fn origin_form(path_part: &str) -> String {
    let without_fragment = path_part.split('#').next().unwrap_or("");
    if without_fragment.is_empty() {
        "/".to_string()
    } else if without_fragment.starts_with('?') {
        format!("/{}", without_fragment)
    } else {
        without_fragment.to_string()
    }
}

/// Parse a request URI into its destination and origin-form path.
pub fn parse_target(uri: &str) -> Result<RequestTarget, UriError> {
    let (scheme_str, rest) = split_scheme(uri)?;
    let scheme = Scheme::parse(scheme_str)?;
    let (authority, path_part) = split_authority(rest);
    let path = origin_form(path_part);

    if scheme == Scheme::UnixSocket {
        if authority.is_empty() {
            // unix:///run/app.sock form: the whole path names the socket.
            let end = path_part.find(['?', '#']).unwrap_or(path_part.len());
            let (socket, rest) = path_part.split_at(end);
            let socket_path = percent_decode_str(socket).decode_utf8_lossy().into_owned();
            if socket_path.is_empty() {
                return Err(UriError::MissingHost(uri.to_string()));
            }
            return Ok(RequestTarget {
                destination: Destination::new(socket_path, 0, scheme),
                path: origin_form(rest),
            });
        }
        let socket_path = percent_decode_str(authority).decode_utf8_lossy().into_owned();
        if socket_path.is_empty() {
            return Err(UriError::MissingHost(uri.to_string()));
        }
        return Ok(RequestTarget {
            destination: Destination::new(socket_path, 0, scheme),
            path,
        });
    }

    // Drop userinfo; credentials are not carried in the destination key.
    let host_port = authority.rsplit_once('@').map(|(_, hp)| hp).unwrap_or(authority);
    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| UriError::Malformed(uri.to_string()))?;
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| UriError::Malformed(uri.to_string()))?,
            ),
        };
        (host, port)
    } else {
        match host_port.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (host_port, None),
        }
    };
    if host.is_empty() {
        return Err(UriError::MissingHost(uri.to_string()));
    }
    let port = match port {
        None | Some("") => scheme.default_port(),
        Some(p) => p
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| UriError::InvalidPort(uri.to_string()))?,
    };
    Ok(RequestTarget {
        destination: Destination::new(host.to_ascii_lowercase(), port, scheme),
        path,
    })
}

/// Build a unix socket request URI: `http+unix://<encoded socket path><path>`.
pub fn unix_socket_uri(socket_path: &str, path: &str) -> String {
    let encoded = utf8_percent_encode(socket_path, SOCKET_PATH).to_string();
    if path.starts_with('/') {
        format!("http+unix://{}{}", encoded, path)
    } else {
        format!("http+unix://{}/{}", encoded, path)
    }
}

/// Remove `.` and `..` segments from an absolute path.
fn remove_dot_segments(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    let mut joined = format!("/{}", out.join("/"));
    if trailing_slash && joined.len() > 1 {
        joined.push('/');
    }
    joined
}

/// Resolve a redirect `Location` against the URI that produced it.
pub fn resolve(base: &str, location: &str) -> Result<String, UriError> {
    if split_scheme(location).is_ok() {
        return Ok(location.to_string());
    }
    let (scheme, rest) = split_scheme(base)?;
    if location.starts_with("//") {
        return Ok(format!("{}:{}", scheme, location));
    }
    let (authority, path_part) = split_authority(rest);
    let origin = format!("{}://{}", scheme, authority);
    let base_path = origin_form(path_part);
    let base_path_only = base_path.split('?').next().unwrap_or("/");

    if location.is_empty() {
        return Ok(format!("{}{}", origin, base_path));
    }
    if location.starts_with('?') {
        return Ok(format!("{}{}{}", origin, base_path_only, location));
    }
    if location.starts_with('#') {
        return Ok(format!("{}{}", origin, base_path));
    }
    let (loc_path, loc_query) = match location.find(['?', '#']) {
        Some(i) => location.split_at(i),
        None => (location, ""),
    };
    let merged = if loc_path.starts_with('/') {
        loc_path.to_string()
    } else {
        let dir = match base_path_only.rfind('/') {
            Some(i) => &base_path_only[..=i],
            None => "/",
        };
        format!("{}{}", dir, loc_path)
    };
    Ok(format!("{}{}{}", origin, remove_dot_segments(&merged), loc_query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_from_uri() {
        assert_eq!(Scheme::from_uri("http://a/"), Ok(Scheme::Http));
        assert_eq!(Scheme::from_uri("HTTPS://a/"), Ok(Scheme::Https));
        assert_eq!(Scheme::from_uri("unix:///tmp/s.sock"), Ok(Scheme::UnixSocket));
        assert_eq!(Scheme::from_uri("http+unix://%2Ftmp%2Fs.sock/"), Ok(Scheme::UnixSocket));
        assert!(matches!(Scheme::from_uri("not a uri"), Err(UriError::Malformed(_))));
        assert!(matches!(Scheme::from_uri("ftp://a/"), Err(UriError::UnsupportedScheme(_))));
    }

    #[test]
    fn default_ports_and_path() {
        let t = parse_target("https://Example.com").unwrap();
        assert_eq!(t.destination, Destination::new("example.com", 443, Scheme::Https));
        assert_eq!(t.path, "/");
        let t = parse_target("http://example.com:8080/a/b?x=1#frag").unwrap();
        assert_eq!(t.destination.port, 8080);
        assert_eq!(t.path, "/a/b?x=1");
        let t = parse_target("http://example.com?q").unwrap();
        assert_eq!(t.path, "/?q");
    }

    #[test]
    fn ipv6_and_userinfo() {
        let t = parse_target("http://user:pw@[::1]:9000/x").unwrap();
        assert_eq!(t.destination.host, "::1");
        assert_eq!(t.destination.port, 9000);
        assert_eq!(t.destination.address(), "[::1]:9000");
        assert_eq!(t.destination.host_header(), "[::1]:9000");
    }

    #[test]
    fn bad_ports_and_hosts() {
        assert!(matches!(parse_target("http://h:99999/"), Err(UriError::InvalidPort(_))));
        assert!(matches!(parse_target("http://h:0/"), Err(UriError::InvalidPort(_))));
        assert!(matches!(parse_target("http:///path"), Err(UriError::MissingHost(_))));
    }

    #[test]
    fn unix_socket_target() {
        let uri = unix_socket_uri("/var/run/app.sock", "/status");
        assert_eq!(uri, "http+unix://%2Fvar%2Frun%2Fapp.sock/status");
        let t = parse_target(&uri).unwrap();
        assert_eq!(t.destination, Destination::new("/var/run/app.sock", 0, Scheme::UnixSocket));
        assert_eq!(t.path, "/status");
        assert_eq!(t.destination.host_header(), "localhost");
    }

    #[test]
    fn unix_socket_path_form() {
        let t = parse_target("unix:///tmp/s.sock").unwrap();
        assert_eq!(t.destination, Destination::new("/tmp/s.sock", 0, Scheme::UnixSocket));
        assert_eq!(t.path, "/");
        let t = parse_target("unix:///tmp/s.sock?v=1").unwrap();
        assert_eq!(t.destination.host, "/tmp/s.sock");
        assert_eq!(t.path, "/?v=1");
        assert!(matches!(parse_target("unix://"), Err(UriError::MissingHost(_))));
    }

    #[test]
    fn resolve_locations() {
        let base = "http://h:8080/a/b/c?q=1";
        assert_eq!(resolve(base, "https://other/x").unwrap(), "https://other/x");
        assert_eq!(resolve(base, "//other/x").unwrap(), "http://other/x");
        assert_eq!(resolve(base, "/root").unwrap(), "http://h:8080/root");
        assert_eq!(resolve(base, "d").unwrap(), "http://h:8080/a/b/d");
        assert_eq!(resolve(base, "../d?z").unwrap(), "http://h:8080/a/d?z");
        assert_eq!(resolve(base, "?z=2").unwrap(), "http://h:8080/a/b/c?z=2");
    }
}
