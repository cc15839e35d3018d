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

//! Connection release: decide how a completed exchange gives up its connection, then do it.
//!
//! - `policy`: pure decision from exchange state to [`Action`].
//! - `handle`: the capabilities a transport must expose ([`TransportHandle`]).
//! - `executor`: applies an action with guaranteed response close ([`release`]).

mod executor;
mod handle;
mod policy;

pub use executor::{release, release_with_abort_timeout, release_with_strategy, DEFAULT_ABORT_TIMEOUT};
pub use handle::TransportHandle;
pub use policy::{decide, Action, ClosingStrategy, ExchangeState, GracefulClosingStrategy};
