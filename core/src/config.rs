/*
 * config.rs
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

//! Connector configuration: a string-keyed properties map resolved into typed settings with
//! documented defaults. Properties can be loaded from the Java properties XML form
//! (`<properties><entry key="...">value</entry></properties>`); all XML reading uses quick_xml.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tokio::sync::Semaphore;

use crate::error::ConnectorError;

pub const MAX_CONNECTIONS_PER_DESTINATION: &str = "tether.connector.maxConnectionsPerDestination";
pub const CONNECTION_IDLE_TIMEOUT: &str = "tether.connector.connectionIdleTimeout";
pub const CONTAINER_IDLE_TIMEOUT: &str = "tether.connector.containerIdleTimeout";
pub const MAX_HEADER_SIZE: &str = "tether.connector.maxHeaderSize";
pub const MAX_REDIRECTS: &str = "tether.connector.maxRedirects";
pub const COOKIE_POLICY: &str = "tether.connector.cookiePolicy";
pub const HTTP2: &str = "tether.connector.http2";
pub const PRESERVE_METHOD_ON_REDIRECT: &str = "tether.connector.preserveMethodOnRedirect";
pub const FOLLOW_REDIRECTS: &str = "tether.client.followRedirects";
pub const READ_TIMEOUT: &str = "tether.client.readTimeout";
pub const CONNECT_TIMEOUT: &str = "tether.client.connectTimeout";
pub const CHUNKED_ENCODING_SIZE: &str = "tether.client.chunkedEncodingSize";

pub const DEFAULT_MAX_CONNECTIONS_PER_DESTINATION: usize = 20;
pub const DEFAULT_CONNECTION_IDLE_TIMEOUT_MS: u64 = 1_000_000;
pub const DEFAULT_CONTAINER_IDLE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8192;
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Which cookies the connector would accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookiePolicy {
    AcceptAll,
    AcceptNone,
    #[default]
    AcceptOriginalServer,
}

impl CookiePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT_ALL" => Some(CookiePolicy::AcceptAll),
            "ACCEPT_NONE" => Some(CookiePolicy::AcceptNone),
            "ACCEPT_ORIGINAL_SERVER" => Some(CookiePolicy::AcceptOriginalServer),
            _ => None,
        }
    }
}

/// String-keyed configuration map. Values are parsed on lookup.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer property, or `default` when absent.
    pub fn get_int(&self, key: &str, default: i64) -> Result<i64, ConnectorError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse::<i64>().map_err(|_| {
                ConnectorError::InvalidConfig(format!("{} is not an integer: {:?}", key, v))
            }),
        }
    }

    /// Boolean property (`true`/`false`, case-insensitive), or `default` when absent.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConnectorError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.trim().eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.trim().eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(ConnectorError::InvalidConfig(format!(
                "{} is not a boolean: {:?}",
                key, v
            ))),
        }
    }

    /// Load properties from an XML file. A missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        Self::from_xml_str(&content)
    }

    /// Parse `<properties><entry key="k">v</entry>...</properties>`. Later entries win.
    pub fn from_xml_str(content: &str) -> Result<Self, ConnectorError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut out = Self::new();
        let mut current_key: Option<String> = None;
        let mut current_value = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => {
                    return Err(ConnectorError::InvalidConfig(format!("XML parse error: {}", e)))
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) if e.name().as_ref() == b"entry" => {
                    current_key = Some(entry_key(&e)?);
                    current_value.clear();
                }
                Ok(Event::Empty(e)) if e.name().as_ref() == b"entry" => {
                    out.set(entry_key(&e)?, "");
                }
                Ok(Event::Text(e)) => {
                    if current_key.is_some() {
                        let text = e
                            .unescape()
                            .map_err(|e| ConnectorError::InvalidConfig(e.to_string()))?;
                        current_value.push_str(&text);
                    }
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"entry" => {
                    if let Some(key) = current_key.take() {
                        out.set(key, current_value.trim());
                    }
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(out)
    }
}

fn entry_key(e: &BytesStart<'_>) -> Result<String, ConnectorError> {
    let attr = e
        .try_get_attribute("key")
        .map_err(|e| ConnectorError::InvalidConfig(e.to_string()))?
        .ok_or_else(|| ConnectorError::InvalidConfig("entry without key attribute".to_string()))?;
    let key = attr
        .unescape_value()
        .map_err(|e| ConnectorError::InvalidConfig(e.to_string()))?;
    Ok(key.into_owned())
}

/// Timeout in milliseconds where 0 means "not configured".
fn optional_millis(properties: &Properties, key: &str) -> Result<Option<Duration>, ConnectorError> {
    let ms = properties.get_int(key, 0)?;
    if ms < 0 {
        return Err(ConnectorError::InvalidConfig(format!("{} must not be negative", key)));
    }
    Ok((ms > 0).then(|| Duration::from_millis(ms as u64)))
}

fn positive(properties: &Properties, key: &str, default: i64) -> Result<u64, ConnectorError> {
    let v = properties.get_int(key, default)?;
    if v <= 0 {
        return Err(ConnectorError::InvalidConfig(format!("{} must be positive, got {}", key, v)));
    }
    Ok(v as u64)
}

/// Resolved connector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub max_connections_per_destination: usize,
    /// How long a pooled connection may sit idle before it is evicted.
    pub connection_idle_timeout: Duration,
    /// How long the shared idle reaper lingers once no destination has live connections.
    pub container_idle_timeout: Duration,
    /// Limit on status line plus headers of one response.
    pub max_header_size: usize,
    pub max_redirects: u32,
    pub follow_redirects: bool,
    /// Keep the request method (and body) across 301 and 302 redirects.
    pub preserve_method_on_redirect: bool,
    pub cookie_policy: CookiePolicy,
    pub read_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Size of chunks when sending a request body with chunked transfer encoding.
    pub chunk_size: usize,
    /// Offer HTTP/2 during TLS negotiation.
    pub http2: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_connections_per_destination: DEFAULT_MAX_CONNECTIONS_PER_DESTINATION,
            connection_idle_timeout: Duration::from_millis(DEFAULT_CONNECTION_IDLE_TIMEOUT_MS),
            container_idle_timeout: Duration::from_millis(DEFAULT_CONTAINER_IDLE_TIMEOUT_MS),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            follow_redirects: true,
            preserve_method_on_redirect: true,
            cookie_policy: CookiePolicy::default(),
            read_timeout: None,
            connect_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            http2: false,
        }
    }
}

impl ConnectorConfig {
    /// Resolve every setting from `properties`, falling back to defaults for absent keys.
    pub fn from_properties(properties: &Properties) -> Result<Self, ConnectorError> {
        let mut chunk_size = properties.get_int(CHUNKED_ENCODING_SIZE, DEFAULT_CHUNK_SIZE as i64)?;
        if chunk_size <= 0 {
            tracing::warn!(
                chunk_size,
                default = DEFAULT_CHUNK_SIZE,
                "invalid chunk size, using default"
            );
            chunk_size = DEFAULT_CHUNK_SIZE as i64;
        }

        let max_redirects = properties.get_int(MAX_REDIRECTS, DEFAULT_MAX_REDIRECTS as i64)?;
        if max_redirects < 0 || max_redirects > u32::MAX as i64 {
            return Err(ConnectorError::InvalidConfig(format!(
                "{} out of range: {}",
                MAX_REDIRECTS, max_redirects
            )));
        }

        let cookie_policy = match properties.get(COOKIE_POLICY) {
            None => CookiePolicy::default(),
            Some(v) => CookiePolicy::parse(v).ok_or_else(|| {
                ConnectorError::InvalidConfig(format!("unknown cookie policy {:?}", v))
            })?,
        };

        let max_connections = positive(
            properties,
            MAX_CONNECTIONS_PER_DESTINATION,
            DEFAULT_MAX_CONNECTIONS_PER_DESTINATION as i64,
        )?;
        if max_connections > Semaphore::MAX_PERMITS as u64 {
            return Err(ConnectorError::InvalidConfig(format!(
                "{} must be at most {}, got {}",
                MAX_CONNECTIONS_PER_DESTINATION,
                Semaphore::MAX_PERMITS,
                max_connections
            )));
        }

        let config = Self {
            max_connections_per_destination: max_connections as usize,
            connection_idle_timeout: Duration::from_millis(positive(
                properties,
                CONNECTION_IDLE_TIMEOUT,
                DEFAULT_CONNECTION_IDLE_TIMEOUT_MS as i64,
            )?),
            container_idle_timeout: Duration::from_millis(positive(
                properties,
                CONTAINER_IDLE_TIMEOUT,
                DEFAULT_CONTAINER_IDLE_TIMEOUT_MS as i64,
            )?),
            max_header_size: positive(properties, MAX_HEADER_SIZE, DEFAULT_MAX_HEADER_SIZE as i64)?
                as usize,
            max_redirects: max_redirects as u32,
            follow_redirects: properties.get_bool(FOLLOW_REDIRECTS, true)?,
            preserve_method_on_redirect: properties.get_bool(PRESERVE_METHOD_ON_REDIRECT, true)?,
            cookie_policy,
            read_timeout: optional_millis(properties, READ_TIMEOUT)?,
            connect_timeout: optional_millis(properties, CONNECT_TIMEOUT)?,
            chunk_size: chunk_size as usize,
            http2: properties.get_bool(HTTP2, false)?,
        };
        tracing::trace!(?config, "connector configuration");
        Ok(config)
    }

    /// True if a finite read timeout applies to each exchange.
    pub fn read_timeout_configured(&self) -> bool {
        self.read_timeout.is_some()
    }
}
