/*
 * executor.rs
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

//! Release executor: apply an [`Action`] to a [`TransportHandle`] so that the response is
//! always closed, whichever earlier step fails.
//!
//! Order is strict: abort (only for [`Action::AbortThenClose`]) happens before the entity stream
//! is closed, which happens before the response is closed. Abort and stream failures are logged
//! and swallowed; a response close failure is returned.

use std::io;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::ReleaseError;
use crate::release::{Action, ClosingStrategy, ExchangeState, TransportHandle};

/// Upper bound on a single abort call.
pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_secs(5);

fn log_recovered(error: &ReleaseError, action: Action) {
    tracing::warn!(%action, %error, "recovered from release failure");
}

/// Release `handle` with `action`. Consumes the handle.
///
/// Must run inside a tokio runtime with the time driver enabled (the abort call is bounded
/// by [`DEFAULT_ABORT_TIMEOUT`]).
pub async fn release<H: TransportHandle>(handle: H, action: Action) -> Result<(), ReleaseError> {
    release_with_abort_timeout(handle, action, DEFAULT_ABORT_TIMEOUT).await
}

/// [`release`] with an explicit bound on the abort call. An abort still running after
/// `abort_timeout` is abandoned and counted as an abort failure.
pub async fn release_with_abort_timeout<H: TransportHandle>(
    mut handle: H,
    action: Action,
    abort_timeout: Duration,
) -> Result<(), ReleaseError> {
    if action == Action::AbortThenClose {
        let aborted = match timeout(abort_timeout, handle.abort()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "abort did not complete in time",
            )),
        };
        if let Err(e) = aborted {
            log_recovered(&ReleaseError::Abort(e), action);
        }
    }

    if let Err(e) = handle.close_stream().await {
        log_recovered(&ReleaseError::Drain(e), action);
    }

    handle
        .close_response()
        .await
        .map_err(ReleaseError::ResponseClose)
}

/// Derive the exchange state from `handle`, let `strategy` pick the action, and release.
pub async fn release_with_strategy<H: TransportHandle>(
    handle: H,
    strategy: &dyn ClosingStrategy,
) -> Result<(), ReleaseError> {
    let state = ExchangeState::of(&handle);
    let action = strategy.decide(&state);
    tracing::trace!(?state, %action, "release decision");
    release(handle, action).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::GracefulClosingStrategy;
    use crate::uri::{Scheme, UriError};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Abort,
        CloseStream,
        CloseResponse,
    }

    /// Records calls and can be told to fail or hang at each step.
    struct StubHandle {
        calls: Arc<Mutex<Vec<Call>>>,
        uri: &'static str,
        chunked: bool,
        read_timeout: bool,
        completed: bool,
        remaining: Arc<Mutex<usize>>,
        fail_abort: bool,
        hang_abort: bool,
        fail_stream: bool,
        fail_response: bool,
    }

    impl StubHandle {
        fn new(uri: &'static str, chunked: bool) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                uri,
                chunked,
                read_timeout: false,
                completed: false,
                remaining: Arc::new(Mutex::new(0)),
                fail_abort: false,
                hang_abort: false,
                fail_stream: false,
                fail_response: false,
            }
        }

        fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
            self.calls.clone()
        }
    }

    impl TransportHandle for StubHandle {
        fn is_chunked(&self) -> bool {
            self.chunked
        }

        fn scheme(&self) -> Result<Scheme, UriError> {
            Scheme::from_uri(self.uri)
        }

        fn read_timeout_configured(&self) -> bool {
            self.read_timeout
        }

        async fn abort(&mut self) -> io::Result<()> {
            self.calls.lock().unwrap().push(Call::Abort);
            if self.hang_abort {
                std::future::pending::<()>().await;
            }
            if self.completed {
                return Ok(());
            }
            if self.fail_abort {
                return Err(io::Error::new(io::ErrorKind::Other, "abort failed"));
            }
            Ok(())
        }

        async fn close_stream(&mut self) -> io::Result<()> {
            self.calls.lock().unwrap().push(Call::CloseStream);
            if self.fail_stream {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset while draining"));
            }
            *self.remaining.lock().unwrap() = 0;
            Ok(())
        }

        async fn close_response(&mut self) -> io::Result<()> {
            self.calls.lock().unwrap().push(Call::CloseResponse);
            if self.fail_response {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "close failed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn response_closed_even_when_stream_close_fails() {
        for action in [Action::GracefulDrain, Action::AbortThenClose] {
            let mut h = StubHandle::new("http://h/", false);
            h.fail_stream = true;
            let calls = h.calls();
            release(h, action).await.unwrap();
            let calls = calls.lock().unwrap();
            assert_eq!(calls.iter().filter(|c| **c == Call::CloseResponse).count(), 1);
            assert_eq!(calls.last(), Some(&Call::CloseResponse));
        }
    }

    #[tokio::test]
    async fn abort_then_close_order() {
        let h = StubHandle::new("https://h/", true);
        let calls = h.calls();
        release(h, Action::AbortThenClose).await.unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Abort, Call::CloseStream, Call::CloseResponse]
        );
    }

    #[tokio::test]
    async fn graceful_drain_never_aborts() {
        let h = StubHandle::new("https://h/", true);
        let calls = h.calls();
        release(h, Action::GracefulDrain).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![Call::CloseStream, Call::CloseResponse]);
    }

    #[tokio::test]
    async fn abort_on_completed_request_is_harmless() {
        let mut h = StubHandle::new("http://h/", true);
        h.completed = true;
        h.fail_abort = true;
        assert!(release(h, Action::AbortThenClose).await.is_ok());
    }

    #[tokio::test]
    async fn abort_failure_is_swallowed() {
        let mut h = StubHandle::new("http://h/", true);
        h.fail_abort = true;
        let calls = h.calls();
        release(h, Action::AbortThenClose).await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn response_close_failure_propagates() {
        let mut h = StubHandle::new("http://h/", false);
        h.fail_stream = true;
        h.fail_response = true;
        let err = release(h, Action::GracefulDrain).await.unwrap_err();
        assert!(matches!(err, ReleaseError::ResponseClose(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_abort_is_bounded() {
        let mut h = StubHandle::new("http://h/", true);
        h.hang_abort = true;
        let calls = h.calls();
        release_with_abort_timeout(h, Action::AbortThenClose, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Abort, Call::CloseStream, Call::CloseResponse]
        );
    }

    #[tokio::test]
    async fn chunked_https_without_timeout_aborts_and_survives_stream_error() {
        let mut h = StubHandle::new("https://api.example.com/feed", true);
        h.fail_stream = true;
        assert_eq!(decide_for(&h), Action::AbortThenClose);
        let calls = h.calls();
        release_with_strategy(h, &GracefulClosingStrategy).await.unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Abort, Call::CloseStream, Call::CloseResponse]
        );
    }

    #[tokio::test]
    async fn known_length_http_drains_without_abort() {
        let h = StubHandle::new("http://api.example.com/doc", false);
        *h.remaining.lock().unwrap() = 512;
        let remaining = h.remaining.clone();
        let calls = h.calls();
        assert_eq!(decide_for(&h), Action::GracefulDrain);
        release_with_strategy(h, &GracefulClosingStrategy).await.unwrap();
        assert_eq!(*remaining.lock().unwrap(), 0);
        assert!(!calls.lock().unwrap().contains(&Call::Abort));
    }

    #[tokio::test]
    async fn malformed_uri_with_chunked_transfer_aborts() {
        let h = StubHandle::new("::not a uri::", true);
        let state = ExchangeState::of(&h);
        assert_eq!(state.scheme, None);
        assert_eq!(decide_for(&h), Action::AbortThenClose);
        let calls = h.calls();
        release_with_strategy(h, &GracefulClosingStrategy).await.unwrap();
        assert_eq!(calls.lock().unwrap().first(), Some(&Call::Abort));
    }

    fn decide_for(h: &StubHandle) -> Action {
        crate::release::decide(&ExchangeState::of(h))
    }
}
