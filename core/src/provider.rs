/*
 * provider.rs
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

//! Connector providers and the client that owns one connector.
//!
//! The client resolves its configuration and builds the connector on first use, exactly once.
//! Callers that need the HTTP connector's internals ask for it by type; any other connector
//! is reported as a configuration mismatch.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::{ConnectorConfig, Properties};
use crate::error::ConnectorError;
use crate::protocol::http::{Exchange, HttpConnector, Request};

/// A transport that executes requests for a [`Client`].
pub trait Connector: Any + Send + Sync {
    /// Short name used in diagnostics and mismatch errors.
    fn name(&self) -> &'static str;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Release pooled connections. Called when the client is closed.
    fn close(&self);
}

/// Builds the connector for a client from its resolved configuration.
pub trait ConnectorProvider: Send + Sync {
    fn build_transport(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError>;
}

impl HttpConnector {
    pub const NAME: &'static str = "http";
}

impl Connector for HttpConnector {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn close(&self) {
        HttpConnector::close(self);
    }
}

/// Provider of [`HttpConnector`]s, optionally offering HTTP/2 during TLS negotiation.
#[derive(Default)]
pub struct HttpConnectorProvider {
    use_http2: bool,
    prior: Option<Arc<dyn Connector>>,
}

impl HttpConnectorProvider {
    pub fn new(use_http2: bool) -> Self {
        Self {
            use_http2,
            prior: None,
        }
    }

    /// Provider that hands out `prior` instead of building a connector.
    pub fn with_connector(prior: Arc<dyn Connector>) -> Self {
        Self {
            use_http2: false,
            prior: Some(prior),
        }
    }

    pub fn uses_http2(&self) -> bool {
        self.use_http2
    }
}

impl ConnectorProvider for HttpConnectorProvider {
    fn build_transport(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> {
        if let Some(prior) = &self.prior {
            tracing::debug!(connector = prior.name(), "reusing supplied connector");
            return Ok(prior.clone());
        }
        let mut config = config.clone();
        config.http2 |= self.use_http2;
        tracing::debug!(http2 = config.http2, "building HTTP connector");
        Ok(Arc::new(HttpConnector::new(config)))
    }
}

/// Client: configuration properties plus the connector built from them on first use.
pub struct Client {
    properties: Properties,
    provider: Box<dyn ConnectorProvider>,
    connector: OnceCell<Arc<dyn Connector>>,
}

impl Client {
    pub fn new(properties: Properties, provider: impl ConnectorProvider + 'static) -> Self {
        Self {
            properties,
            provider: Box::new(provider),
            connector: OnceCell::new(),
        }
    }

    /// Client with default properties and an HTTP/1.1 connector.
    pub fn http() -> Self {
        Self::new(Properties::new(), HttpConnectorProvider::new(false))
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// True once the connector has been built.
    pub fn is_initialized(&self) -> bool {
        self.connector.get().is_some()
    }

    /// The connector, built on first call. Concurrent first calls build it once.
    pub fn connector(&self) -> Result<&Arc<dyn Connector>, ConnectorError> {
        self.connector.get_or_try_init(|| {
            let config = ConnectorConfig::from_properties(&self.properties)?;
            self.provider.build_transport(&config)
        })
    }

    /// The connector as an [`HttpConnector`]; fails with `ConfigurationMismatch` for any other type.
    pub fn http_connector(&self) -> Result<Arc<HttpConnector>, ConnectorError> {
        let connector = self.connector()?;
        let found = connector.name();
        connector
            .clone()
            .as_any_arc()
            .downcast::<HttpConnector>()
            .map_err(|_| ConnectorError::ConfigurationMismatch {
                expected: HttpConnector::NAME,
                found,
            })
    }

    /// Execute `request` on the HTTP connector.
    pub async fn execute(&self, request: Request) -> Result<Exchange, ConnectorError> {
        self.http_connector()?.execute(request).await
    }

    /// Close the connector if it was built.
    pub fn close(&self) {
        if let Some(connector) = self.connector.get() {
            connector.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_CONNECTIONS_PER_DESTINATION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OtherConnector;

    impl Connector for OtherConnector {
        fn name(&self) -> &'static str {
            "other"
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn close(&self) {}
    }

    struct CountingProvider {
        builds: Arc<AtomicUsize>,
    }

    impl ConnectorProvider for CountingProvider {
        fn build_transport(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            HttpConnectorProvider::new(false).build_transport(config)
        }
    }

    #[test]
    fn connector_built_lazily_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let client = Client::new(Properties::new(), CountingProvider { builds: builds.clone() });
        assert!(!client.is_initialized());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
        let a = client.http_connector().unwrap();
        let b = client.http_connector().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(client.is_initialized());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(Client::new(
            Properties::new(),
            CountingProvider { builds: builds.clone() },
        ));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.connector().map(|c| c.name()).unwrap())
            })
            .collect();
        for t in threads {
            assert_eq!(t.join().unwrap(), "http");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_connector_is_reported() {
        let client = Client::new(
            Properties::new(),
            HttpConnectorProvider::with_connector(Arc::new(OtherConnector)),
        );
        match client.http_connector() {
            Err(ConnectorError::ConfigurationMismatch { expected, found }) => {
                assert_eq!(expected, "http");
                assert_eq!(found, "other");
            }
            other => panic!("expected mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn prior_connector_returned_verbatim() {
        let prior: Arc<dyn Connector> = Arc::new(HttpConnector::new(ConnectorConfig::default()));
        let provider = HttpConnectorProvider::with_connector(prior.clone());
        let built = provider.build_transport(&ConnectorConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&prior, &built));
    }

    #[test]
    fn http2_flag_reaches_connector() {
        let client = Client::new(Properties::new(), HttpConnectorProvider::new(true));
        assert!(client.http_connector().unwrap().offers_http2());
        assert!(!Client::http().http_connector().unwrap().offers_http2());
    }

    #[test]
    fn invalid_properties_fail_initialization() {
        let mut p = Properties::new();
        p.set(MAX_CONNECTIONS_PER_DESTINATION, 0);
        let client = Client::new(p, HttpConnectorProvider::new(false));
        assert!(matches!(client.connector(), Err(ConnectorError::InvalidConfig(_))));
        assert!(!client.is_initialized());
    }
}
