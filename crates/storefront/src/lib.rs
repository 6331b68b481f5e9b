//! Vitrine storefront client library.
//!
//! Talks to the Vitrine order/catalog REST API and keeps the client-side
//! view of the customer's open order consistent with it.
//!
//! # Modules
//!
//! - [`api`] - `Backend` trait and its `reqwest` implementation
//! - [`cart`] - Order reconciliation core
//! - [`checkout`] - Summary → Address → Confirmation flow
//! - [`conflict`] - Account-vs-anonymous cart conflict dialog
//! - [`session`] - Credentials and identity
//! - [`catalog`] - Cached product listing
//! - [`payment`] - PIX charges for placed orders
//! - [`state`] - [`Storefront`], wiring all of the above

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod conflict;
pub mod error;
pub mod payment;
pub mod session;
pub mod state;
pub mod storage;

pub use config::StorefrontConfig;
pub use error::{Result, StorefrontError};
pub use state::Storefront;
