// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ops-Core
//!
//! Control plane for a fleet of autonomous agents.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Agent lifecycle tracking, workflow sequencing, task dispatch

pub mod config;
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
