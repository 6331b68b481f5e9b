//! Delivery addresses.
//!
//! Three shapes exist:
//! - [`DeliveryAddress`] - the snapshot attached to an order
//! - [`SavedAddress`] - an entry in the customer's address book (has an id)
//! - [`NewAddress`] - form input, validated before it is sent anywhere

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::id::AddressId;

/// Errors raised while validating a [`NewAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// A required text field is blank.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// Coordinates were not captured.
    #[error("location coordinates are required")]
    MissingCoordinates,
    /// Coordinates are outside the valid range.
    #[error("invalid coordinates: {latitude}, {longitude}")]
    InvalidCoordinates {
        /// Rejected latitude.
        latitude: String,
        /// Rejected longitude.
        longitude: String,
    },
}

/// Address snapshot attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub number: String,
    pub neighborhood: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl DeliveryAddress {
    /// Whether this snapshot denotes the same place as a saved address.
    ///
    /// Street names compare case-insensitively; coordinates must be equal.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_place_as(&self, saved: &SavedAddress) -> bool {
        self.street.trim().to_lowercase() == saved.street.trim().to_lowercase()
            && self.latitude == saved.latitude
            && self.longitude == saved.longitude
    }

    /// One-line label, in the same shape as [`SavedAddress::label`].
    #[must_use]
    pub fn label(&self) -> String {
        label(&self.street, &self.number, &self.neighborhood, &self.city)
    }

    /// Build the creation payload used to save this snapshot to the
    /// customer's address book.
    #[must_use]
    pub fn to_new_address(&self) -> NewAddress {
        NewAddress {
            street: self.street.clone(),
            number: self.number.clone(),
            neighborhood: self.neighborhood.clone(),
            city: self.city.clone(),
            latitude: Some(self.latitude),
            longitude: Some(self.longitude),
        }
    }
}

/// An address stored in the customer's address book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAddress {
    pub id: AddressId,
    pub street: String,
    pub number: String,
    pub neighborhood: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl SavedAddress {
    /// One-line label for pickers ("Rua A, 10 - Centro, Recife").
    #[must_use]
    pub fn label(&self) -> String {
        label(&self.street, &self.number, &self.neighborhood, &self.city)
    }
}

fn label(street: &str, number: &str, neighborhood: &str, city: &str) -> String {
    format!("{street}, {number} - {neighborhood}, {city}")
}

/// Address form input.
///
/// Coordinates are optional until the location has been captured;
/// [`NewAddress::validate`] rejects input without them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAddress {
    pub street: String,
    pub number: String,
    pub neighborhood: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl NewAddress {
    /// Check that every field is present and coordinates are in range.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, in form order.
    pub fn validate(&self) -> Result<(), AddressError> {
        let fields = [
            ("street", &self.street),
            ("number", &self.number),
            ("neighborhood", &self.neighborhood),
            ("city", &self.city),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(AddressError::MissingField(name));
            }
        }

        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return Err(AddressError::MissingCoordinates);
        };
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(AddressError::InvalidCoordinates {
                latitude: latitude.to_string(),
                longitude: longitude.to_string(),
            });
        }
        Ok(())
    }
}
