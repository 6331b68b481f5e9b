//! In-memory [`Backend`] for unit tests.
//!
//! Models the order rules the stores depend on: one open order per owner,
//! anonymous orders bound to a session "cookie", server-computed totals,
//! coupon `SAVE10` (10% off), flat shipping, and 409 conflicts on
//! association. Every call is recorded by name.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use vitrine_core::{
    AddressId, CheckoutReceipt, ConflictRecord, DeliveryAddress, Email, LineItem, Money,
    NewAddress, Order, OrderId, PaymentId, PixCharge, Product, ProductId, SavedAddress, UserId,
};

use super::{Backend, LoginGrant, Registration};
use crate::error::{Result, StorefrontError};

/// Build an unsigned JWT for `user_id` expiring `ttl_secs` from now.
pub(crate) fn jwt(user_id: i64, ttl_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": user_id.to_string(),
        "exp": Utc::now().timestamp() + ttl_secs,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.test-signature")
}

fn bad_request(message: &str) -> StorefrontError {
    StorefrontError::Api {
        status: 400,
        message: Some(message.to_string()),
    }
}

fn order_not_found() -> StorefrontError {
    StorefrontError::NotFound(Some("Order not found".to_string()))
}

#[derive(Debug, Clone)]
struct FakeOrder {
    owner: Option<UserId>,
    lines: Vec<(ProductId, u32)>,
    coupon: Option<String>,
    address: Option<SavedAddress>,
    finalized: bool,
}

#[derive(Default)]
struct State {
    next_id: i64,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, FakeOrder>,
    /// Order bound to the anonymous session cookie.
    anonymous_order: Option<OrderId>,
    /// Caller the backend currently authenticates.
    user: Option<UserId>,
    users: Vec<(String, String, UserId)>,
    addresses: Vec<(UserId, SavedAddress)>,
    failures: HashMap<&'static str, VecDeque<StorefrontError>>,
    calls: Vec<&'static str>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, call: &'static str) -> Result<()> {
        self.calls.push(call);
        match self.failures.get_mut(call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn open_order(&mut self, id: OrderId) -> Result<&mut FakeOrder> {
        self.orders
            .get_mut(&id)
            .filter(|order| !order.finalized)
            .ok_or_else(order_not_found)
    }

    fn user_open_order(&self, user: UserId, except: Option<OrderId>) -> Option<OrderId> {
        self.orders
            .iter()
            .find(|(id, order)| {
                order.owner == Some(user) && !order.finalized && Some(**id) != except
            })
            .map(|(id, _)| *id)
    }

    fn view(&self, id: OrderId) -> Option<Order> {
        let order = self.orders.get(&id).filter(|order| !order.finalized)?;
        let items: Vec<LineItem> = order
            .lines
            .iter()
            .filter_map(|(product_id, quantity)| {
                let product = self.products.get(product_id)?;
                Some(LineItem {
                    product_id: *product_id,
                    name: product.name.clone(),
                    unit_price: product.price,
                    quantity: *quantity,
                    subtotal: Money::new(product.price.amount() * Decimal::from(*quantity)),
                })
            })
            .collect();
        let subtotal: Decimal = items.iter().map(|line| line.subtotal.amount()).sum();
        let discount = if order.coupon.is_some() {
            (subtotal * Decimal::new(10, 2)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let promotional_shipping = order.address.is_some() && subtotal >= Decimal::new(200, 0);
        let shipping = if order.address.is_some() && !promotional_shipping {
            Decimal::new(1500, 2)
        } else {
            Decimal::ZERO
        };

        Some(Order {
            id,
            items,
            total: Money::new(subtotal - discount + shipping),
            discount: Money::new(discount),
            shipping_cost: Money::new(shipping),
            promotional_shipping,
            coupon_code: order.coupon.clone(),
            delivery_address: order.address.as_ref().map(|address| DeliveryAddress {
                street: address.street.clone(),
                number: address.number.clone(),
                neighborhood: address.neighborhood.clone(),
                city: address.city.clone(),
                latitude: address.latitude,
                longitude: address.longitude,
            }),
        })
    }

    fn grant(user_id: UserId) -> LoginGrant {
        LoginGrant {
            access_token: SecretString::from(jwt(user_id.as_i64(), 3600)),
            refresh_token: Some(SecretString::from(FakeBackend::refresh_token_for(
                user_id.as_i64(),
            ))),
            user_id: Some(user_id),
        }
    }
}

/// In-memory backend with a call log.
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Backend with products 1 ("Café", 10.00) and 2 ("Pão", 5.00) in stock.
    pub(crate) fn with_catalog() -> Self {
        let backend = Self::new();
        backend.add_product(1, "Café", 1000, 50);
        backend.add_product(2, "Pão", 500, 50);
        backend
    }

    pub(crate) fn refresh_token_for(user_id: i64) -> String {
        format!("refresh-{user_id}")
    }

    pub(crate) fn add_product(&self, id: i64, name: &str, cents: i64, stock: u32) {
        self.state.lock().unwrap().products.insert(
            ProductId::new(id),
            Product {
                id: ProductId::new(id),
                name: name.to_string(),
                price: Money::from_cents(cents),
                stock,
                on_sale: false,
                featured: false,
            },
        );
    }

    pub(crate) fn add_user(&self, email: &str, password: &str, id: i64) {
        self.state.lock().unwrap().users.push((
            email.to_string(),
            password.to_string(),
            UserId::new(id),
        ));
    }

    /// Make the backend treat subsequent calls as coming from `user`.
    pub(crate) fn authenticate_as(&self, user: Option<i64>) {
        self.state.lock().unwrap().user = user.map(UserId::new);
    }

    /// Create an open order owned by `owner` (anonymous when `None`, in
    /// which case it becomes the session cookie's order).
    pub(crate) fn seed_order(&self, owner: Option<i64>, lines: &[(i64, u32)]) -> OrderId {
        let mut state = self.state.lock().unwrap();
        let id = OrderId::new(state.next_id());
        state.orders.insert(
            id,
            FakeOrder {
                owner: owner.map(UserId::new),
                lines: lines
                    .iter()
                    .map(|(product, qty)| (ProductId::new(*product), *qty))
                    .collect(),
                coupon: None,
                address: None,
                finalized: false,
            },
        );
        if owner.is_none() {
            state.anonymous_order = Some(id);
        }
        id
    }

    pub(crate) fn seed_address(&self, user: i64, street: &str, latitude: f64, longitude: f64) -> AddressId {
        let mut state = self.state.lock().unwrap();
        let id = AddressId::new(state.next_id());
        state.addresses.push((
            UserId::new(user),
            SavedAddress {
                id,
                street: street.to_string(),
                number: "10".to_string(),
                neighborhood: "Centro".to_string(),
                city: "Recife".to_string(),
                latitude,
                longitude,
            },
        ));
        id
    }

    /// Attach a delivery address to an order without going through shipping.
    pub(crate) fn set_delivery_address(&self, id: OrderId, address: SavedAddress) {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state.orders.get_mut(&id) {
            order.address = Some(address);
        }
    }

    /// Delete an order server-side so the client's reference goes stale.
    pub(crate) fn forget_order(&self, id: OrderId) {
        let mut state = self.state.lock().unwrap();
        state.orders.remove(&id);
        if state.anonymous_order == Some(id) {
            state.anonymous_order = None;
        }
    }

    /// Fail the next call named `call` with `err`.
    pub(crate) fn fail_next(&self, call: &'static str, err: StorefrontError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(call)
            .or_default()
            .push_back(err);
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub(crate) fn order(&self, id: OrderId) -> Option<Order> {
        self.state.lock().unwrap().view(id)
    }

    pub(crate) fn saved_addresses(&self, user: i64) -> Vec<SavedAddress> {
        self.state
            .lock()
            .unwrap()
            .addresses
            .iter()
            .filter(|(owner, _)| *owner == UserId::new(user))
            .map(|(_, address)| address.clone())
            .collect()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn get_order(&self, id: OrderId) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        state.record("get_order")?;
        state.view(id).ok_or_else(order_not_found)
    }

    async fn current_order(&self) -> Result<Option<Order>> {
        let mut state = self.state.lock().unwrap();
        state.record("current_order")?;
        let user = state.user.ok_or(StorefrontError::Unauthorized(None))?;
        Ok(state
            .user_open_order(user, None)
            .and_then(|id| state.view(id)))
    }

    async fn create_order(&self) -> Result<OrderId> {
        let mut state = self.state.lock().unwrap();
        state.record("create_order")?;
        let user = state.user;
        if user.is_none()
            && let Some(id) = state.anonymous_order
            && state.view(id).is_some()
        {
            return Ok(id);
        }
        let id = OrderId::new(state.next_id());
        state.orders.insert(
            id,
            FakeOrder {
                owner: user,
                lines: Vec::new(),
                coupon: None,
                address: None,
                finalized: false,
            },
        );
        if user.is_none() {
            state.anonymous_order = Some(id);
        }
        Ok(id)
    }

    async fn add_item(&self, id: OrderId, product_id: ProductId, quantity: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("add_item")?;
        let stock = state
            .products
            .get(&product_id)
            .map(|product| product.stock)
            .ok_or_else(|| bad_request("Product not found"))?;
        let order = state.open_order(id)?;
        match order.lines.iter_mut().find(|(p, _)| *p == product_id) {
            Some((_, existing)) if *existing + quantity > stock => {
                return Err(bad_request("Insufficient stock"));
            }
            Some((_, existing)) => *existing += quantity,
            None => order.lines.push((product_id, quantity)),
        }
        Ok(())
    }

    async fn set_quantity(
        &self,
        id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("set_quantity")?;
        let order = state.open_order(id)?;
        let line = order
            .lines
            .iter_mut()
            .find(|(p, _)| *p == product_id)
            .ok_or_else(|| bad_request("Item not in order"))?;
        line.1 = quantity;
        Ok(())
    }

    async fn remove_item(&self, id: OrderId, product_id: ProductId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("remove_item")?;
        state.open_order(id)?.lines.retain(|(p, _)| *p != product_id);
        Ok(())
    }

    async fn clear_items(&self, id: OrderId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("clear_items")?;
        state.open_order(id)?.lines.clear();
        Ok(())
    }

    async fn apply_coupon(&self, id: OrderId, code: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("apply_coupon")?;
        let order = state.open_order(id)?;
        if order.coupon.is_some() {
            return Err(bad_request("A coupon has already been applied"));
        }
        if code != "SAVE10" {
            return Err(bad_request("Invalid coupon"));
        }
        order.coupon = Some(code.to_string());
        Ok(())
    }

    async fn list_addresses(&self) -> Result<Vec<SavedAddress>> {
        let mut state = self.state.lock().unwrap();
        state.record("list_addresses")?;
        let user = state.user.ok_or(StorefrontError::Unauthorized(None))?;
        Ok(state
            .addresses
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, address)| address.clone())
            .collect())
    }

    async fn create_address(&self, address: &NewAddress) -> Result<SavedAddress> {
        let mut state = self.state.lock().unwrap();
        state.record("create_address")?;
        let user = state.user.ok_or(StorefrontError::Unauthorized(None))?;
        let (Some(latitude), Some(longitude)) = (address.latitude, address.longitude) else {
            return Err(bad_request("Coordinates are required"));
        };
        let saved = SavedAddress {
            id: AddressId::new(state.next_id()),
            street: address.street.clone(),
            number: address.number.clone(),
            neighborhood: address.neighborhood.clone(),
            city: address.city.clone(),
            latitude,
            longitude,
        };
        state.addresses.push((user, saved.clone()));
        Ok(saved)
    }

    async fn apply_shipping(&self, id: OrderId, address_id: AddressId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("apply_shipping")?;
        let address = state
            .addresses
            .iter()
            .find(|(_, address)| address.id == address_id)
            .map(|(_, address)| address.clone())
            .ok_or_else(|| bad_request("Address not found"))?;
        state.open_order(id)?.address = Some(address);
        Ok(())
    }

    async fn finalize(&self, id: OrderId) -> Result<CheckoutReceipt> {
        let mut state = self.state.lock().unwrap();
        state.record("finalize")?;
        if state.user.is_none() {
            return Err(StorefrontError::Unauthorized(None));
        }
        let order = state.open_order(id)?;
        if order.lines.is_empty() {
            return Err(bad_request("Order has no items"));
        }
        if order.address.is_none() {
            return Err(bad_request("Delivery address required"));
        }
        order.finalized = true;
        Ok(CheckoutReceipt {
            order_id: id,
            status: Some("AwaitingPayment".to_string()),
            payment: None,
        })
    }

    async fn associate_cart(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("associate_cart")?;
        let user = state.user.ok_or(StorefrontError::Unauthorized(None))?;
        let Some(anonymous) = state.anonymous_order.filter(|id| state.view(*id).is_some()) else {
            return Ok(());
        };
        if let Some(user_order) = state.user_open_order(user, Some(anonymous)) {
            return Err(StorefrontError::Conflict(ConflictRecord {
                user_order_id: user_order,
                anonymous_order_id: anonymous,
                message: None,
            }));
        }
        if let Some(order) = state.orders.get_mut(&anonymous) {
            order.owner = Some(user);
        }
        state.anonymous_order = None;
        Ok(())
    }

    async fn discard_anonymous(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("discard_anonymous")?;
        if let Some(id) = state.anonymous_order.take() {
            state.orders.remove(&id);
        }
        Ok(())
    }

    async fn replace_with_anonymous(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("replace_with_anonymous")?;
        let user = state.user.ok_or(StorefrontError::Unauthorized(None))?;
        let Some(anonymous) = state.anonymous_order.take() else {
            return Err(bad_request("No anonymous order"));
        };
        state
            .orders
            .retain(|id, order| *id == anonymous || order.owner != Some(user) || order.finalized);
        if let Some(order) = state.orders.get_mut(&anonymous) {
            order.owner = Some(user);
        }
        Ok(())
    }

    async fn login(&self, email: &Email, password: &SecretString) -> Result<LoginGrant> {
        let mut state = self.state.lock().unwrap();
        state.record("login")?;
        let user = state
            .users
            .iter()
            .find(|(e, p, _)| e == email.as_str() && p == password.expose_secret())
            .map(|(_, _, id)| *id)
            .ok_or_else(|| StorefrontError::Unauthorized(Some("Invalid credentials".to_string())))?;
        state.user = Some(user);
        Ok(State::grant(user))
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<LoginGrant> {
        let mut state = self.state.lock().unwrap();
        state.record("refresh")?;
        let user = refresh_token
            .expose_secret()
            .strip_prefix("refresh-")
            .and_then(|id| id.parse::<i64>().ok())
            .map(UserId::new)
            .filter(|id| state.users.iter().any(|(_, _, u)| u == id))
            .ok_or(StorefrontError::Unauthorized(None))?;
        state.user = Some(user);
        Ok(State::grant(user))
    }

    async fn register(&self, form: &Registration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record("register")?;
        if state.users.iter().any(|(email, _, _)| *email == form.email) {
            return Err(bad_request("Email already registered"));
        }
        let id = UserId::new(state.next_id());
        state
            .users
            .push((form.email.clone(), form.password.expose_secret().to_string(), id));
        Ok(())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let mut state = self.state.lock().unwrap();
        state.record("list_products")?;
        Ok(state.products.values().cloned().collect())
    }

    async fn create_pix_payment(&self, id: OrderId) -> Result<PixCharge> {
        let mut state = self.state.lock().unwrap();
        state.record("create_pix_payment")?;
        if !state.orders.get(&id).is_some_and(|order| order.finalized) {
            return Err(bad_request("Order has not been finalized"));
        }
        let payment_id = PaymentId::new(state.next_id());
        Ok(PixCharge {
            payment_id: Some(payment_id),
            status: Some("Pending".to_string()),
            transaction_id: Some(format!("tx-{payment_id}")),
            copy_paste: format!("00020126pix-order-{id}"),
            qr_code_base64: "iVBORw0KGgo=".to_string(),
            expires_at: None,
        })
    }
}
