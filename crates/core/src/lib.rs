//! Simone Core - Shared domain library.
//!
//! This crate provides the domain model used by every Simone component:
//! - `storefront` - HTTP service (catalog, checkout, newsletter, webhooks)
//! - `cli` - Operator tooling (newsletter draining, inventory, shipping quotes)
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no storage,
//! no HTTP clients. Every function that depends on the current time takes it
//! as an argument so behavior stays deterministic under test.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, emails and money
//! - [`catalog`] - Products, articles, lookbooks and the category filter
//! - [`cart`] - Cart lines, totals and checkout grouping
//! - [`shipping`] - Weight-bracket rate tables and the shipping quote
//! - [`inventory`] - Stock ledger with time-limited reservations
//! - [`newsletter`] - Subscriber list and resumable send jobs
//! - [`order`] - Paid order records built from payment events

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod catalog;
pub mod inventory;
pub mod newsletter;
pub mod order;
pub mod shipping;
pub mod types;

pub use types::*;
