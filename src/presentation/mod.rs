// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod api;
pub mod middleware;

pub use api::{router, AppState};
