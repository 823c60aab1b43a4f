//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod af;
pub mod attribute;
pub mod config;
pub mod debug;
pub mod error;
pub mod filter;
pub mod instance;
pub mod nexthop;
pub mod peer;
pub mod plumbing;
pub mod policy;
pub mod route;
pub mod table;
pub mod tasks;
