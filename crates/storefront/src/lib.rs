//! Simone Sixx storefront library.
//!
//! This crate provides the storefront backend as a library (catalog, cart
//! pricing, checkout, payment webhook, newsletter, forms), allowing it to be
//! tested and reused by the CLI.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod signing;
pub mod state;
pub mod store;
pub mod stripe;
