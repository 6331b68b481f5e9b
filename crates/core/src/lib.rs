//! Vitrine Core - Shared domain types.
//!
//! This crate provides the types used across all Vitrine components:
//! - `storefront` - Backend client, cart reconciliation and checkout flow
//! - `cli` - Interactive command-line storefront
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no persistence. Money fields are always server-computed; nothing
//! in this crate does arithmetic on them.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, money, email, orders, addresses, identity

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
