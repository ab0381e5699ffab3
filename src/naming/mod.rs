// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device naming.
//!
//! - [`NameResolutionService`] - background resolver with escalating retries
//! - [`is_address_like`], [`choose_best_name`] - plausibility rules shared by
//!   discovery and resolution

mod resolver;
mod selection;

pub use resolver::{NameResolutionConfig, NameResolutionService, RetryInfo};
pub use selection::{choose_best_name, is_address_like, is_plausible_name};
