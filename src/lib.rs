// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod message;
pub mod reaper;
pub mod relay;
pub mod server;
pub mod session;
pub(crate) mod sse;
pub mod turn;
pub mod upstream;
