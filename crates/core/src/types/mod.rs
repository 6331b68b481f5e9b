//! Core types for Vitrine.
//!
//! This module provides type-safe wrappers for the storefront domain.

pub mod address;
pub mod email;
pub mod id;
pub mod identity;
pub mod money;
pub mod order;
pub mod payment;
pub mod product;
pub mod status;

pub use address::{AddressError, DeliveryAddress, NewAddress, SavedAddress};
pub use email::{Email, EmailError};
pub use id::*;
pub use identity::{Identity, IdentityError};
pub use money::Money;
pub use order::{ConflictRecord, LineItem, Order};
pub use payment::{CheckoutReceipt, PixCharge};
pub use product::Product;
pub use status::*;
