//! Wire types for the storefront REST API.
//!
//! Payloads are camelCase JSON. Response DTOs convert into `vitrine-core`
//! types at the edge so nothing past this module sees wire shapes.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use vitrine_core::{
    CheckoutReceipt, ConflictRecord, DeliveryAddress, LineItem, Money, Order, OrderId, PaymentId,
    PixCharge, Product, ProductId, UserId,
};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct CouponRequest<'a> {
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaymentRequest {
    #[serde(rename = "type")]
    pub kind: u8,
}

/// PIX is payment type 1 on the backend.
pub(crate) const PAYMENT_TYPE_PIX: u8 = 1;

/// Account registration form.
#[derive(Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(serialize_with = "expose_password")]
    pub password: SecretString,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn expose_password<S: serde::Serializer>(
    password: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use secrecy::ExposeSecret;
    serializer.serialize_str(password.expose_secret())
}

// =============================================================================
// Responses
// =============================================================================

/// Credentials returned by login and refresh.
#[derive(Debug)]
pub struct LoginGrant {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Returned by some login endpoints next to the token.
    pub user_id: Option<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<i64>,
}

impl From<TokenResponse> for LoginGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: SecretString::from(response.access_token),
            refresh_token: response
                .refresh_token
                .filter(|token| !token.is_empty())
                .map(SecretString::from),
            user_id: response.user_id.filter(|id| *id > 0).map(UserId::new),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatedOrderResponse {
    #[serde(alias = "id")]
    pub order_id: OrderId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderDto {
    pub id: OrderId,
    #[serde(default)]
    pub items: Vec<LineItemDto>,
    #[serde(default)]
    pub total: Money,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub shipping_cost: Money,
    #[serde(default)]
    pub promotional_shipping: bool,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<DeliveryAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LineItemDto {
    pub product_id: ProductId,
    #[serde(default, alias = "name")]
    pub product_name: String,
    #[serde(default)]
    pub unit_price: Money,
    pub quantity: i64,
    #[serde(default)]
    pub subtotal: Money,
}

impl From<OrderDto> for Order {
    fn from(dto: OrderDto) -> Self {
        Self {
            id: dto.id,
            items: dto
                .items
                .into_iter()
                .filter_map(|line| {
                    let quantity = u32::try_from(line.quantity).ok().filter(|q| *q > 0)?;
                    Some(LineItem {
                        product_id: line.product_id,
                        name: line.product_name,
                        unit_price: line.unit_price,
                        quantity,
                        subtotal: line.subtotal,
                    })
                })
                .collect(),
            total: dto.total,
            discount: dto.discount,
            shipping_cost: dto.shipping_cost,
            promotional_shipping: dto.promotional_shipping,
            coupon_code: dto.coupon_code.filter(|code| !code.trim().is_empty()),
            delivery_address: dto.delivery_address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductDto {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub on_sale: bool,
    #[serde(default)]
    pub featured: bool,
}

impl From<ProductDto> for Product {
    fn from(dto: ProductDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            price: dto.price,
            stock: u32::try_from(dto.stock).unwrap_or(0),
            on_sale: dto.on_sale,
            featured: dto.featured,
        }
    }
}

/// Body of a 409 from cart association.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConflictPayload {
    #[serde(default)]
    pub cart_conflict: bool,
    pub user_order_id: OrderId,
    pub anonymous_order_id: OrderId,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConflictPayload {
    pub(crate) fn into_record(self) -> Option<ConflictRecord> {
        self.cart_conflict.then_some(ConflictRecord {
            user_order_id: self.user_order_id,
            anonymous_order_id: self.anonymous_order_id,
            message: self.message.filter(|m| !m.trim().is_empty()),
        })
    }
}

/// Error body. Only `message` is part of the contract; `detail` and `title`
/// cover framework-generated problem responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> Option<String> {
        self.message
            .or(self.detail)
            .or(self.title)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FinalizeResponse {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<String>,
    #[serde(default)]
    pub payment: Option<PixChargeDto>,
}

impl FinalizeResponse {
    pub(crate) fn into_receipt(self, order_id: OrderId) -> CheckoutReceipt {
        CheckoutReceipt {
            order_id: self.order_id.unwrap_or(order_id),
            status: self.status,
            payment: self.payment.and_then(PixChargeDto::into_charge),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PixChargeDto {
    #[serde(default, alias = "id")]
    pub payment_id: Option<PaymentId>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<String>,
    #[serde(default)]
    pub pix: Option<PixDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PixDto {
    #[serde(default, alias = "txId")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub copy_paste: Option<String>,
    #[serde(default)]
    pub qr_code_base64: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PixChargeDto {
    /// A charge is only usable once it carries a copy-paste code.
    pub(crate) fn into_charge(self) -> Option<PixCharge> {
        let pix = self.pix?;
        let copy_paste = pix.copy_paste.filter(|code| !code.is_empty())?;
        Some(PixCharge {
            payment_id: self.payment_id,
            status: self.status,
            transaction_id: pix.transaction_id,
            copy_paste,
            qr_code_base64: pix.qr_code_base64.unwrap_or_default(),
            expires_at: pix.expires_at,
        })
    }
}

/// Statuses arrive as enum names or as their numeric codes.
fn lenient_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Ids arrive as numbers or numeric strings.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
