//! End-to-end test support for the Vitrine storefront client.
//!
//! [`FakeServer`] runs an in-process axum imitation of the storefront REST
//! API on `127.0.0.1:0`. State lives in memory and follows the backend's
//! contract closely enough to drive the real `HttpBackend` over HTTP:
//!
//! - Anonymous carts are bound to a `vitrine_session` cookie set on first contact
//! - Bearer tokens are unsigned JWTs; expiring them forces the client's
//!   refresh-and-retry path
//! - Cart association answers 409 with a conflict payload when the account
//!   already has an open order
//! - Totals, coupons and shipping are computed here, never by the client
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p vitrine-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
// axum handlers are async even when they never await
#![allow(clippy::unused_async)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vitrine_core::{AddressId, DeliveryAddress, OrderId, ProductId, UserId};
use vitrine_storefront::{Storefront, StorefrontConfig};

/// Cookie binding anonymous carts to a client.
pub const SESSION_COOKIE: &str = "vitrine_session";

/// The one coupon the fake accepts: 10% off the items.
pub const COUPON_CODE: &str = "SAVE10";

const COUPON_PERCENT: i64 = 10;
const SHIPPING_CENTS: i64 = 1_500;
/// Orders at or above this (after discount) ship free.
const FREE_SHIPPING_CENTS: i64 = 20_000;
const PAYMENT_TYPE_PIX: u8 = 1;
const ACCESS_TOKEN_TTL_SECS: i64 = 3_600;

// =============================================================================
// Server
// =============================================================================

/// A running fake backend. Shut down on drop.
pub struct FakeServer {
    addr: SocketAddr,
    api: FakeApi,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Bind to an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let api = FakeApi::default();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake backend");
        let addr = listener
            .local_addr()
            .expect("Fake backend has no local address");

        let app = router(api.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                panic!("Fake backend stopped: {e}");
            }
        });

        Self { addr, api, task }
    }

    /// Base URL of the API, as the client expects it.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Client configuration pointing at this server, persisting to
    /// `state_file`.
    ///
    /// # Panics
    ///
    /// Panics if the generated URL is rejected.
    #[must_use]
    pub fn config(&self, state_file: &Path) -> StorefrontConfig {
        let mut config =
            StorefrontConfig::for_api_url(&self.api_url()).expect("Fake backend URL is valid");
        config.state_file = state_file.to_path_buf();
        config
    }

    /// Connect a client persisting to `state_file` and run its startup.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub async fn storefront(&self, state_file: &Path) -> Storefront {
        let mut app =
            Storefront::connect(self.config(state_file)).expect("Failed to build storefront client");
        app.start().await;
        app
    }

    /// Add a catalog product.
    pub fn add_product(&self, id: i64, name: &str, cents: i64, stock: i64) -> ProductId {
        self.api.with(|state| {
            state.products.insert(
                id,
                ProductRow {
                    name: name.to_string(),
                    cents,
                    stock,
                },
            );
        });
        ProductId::new(id)
    }

    /// Register an account directly.
    pub fn add_user(&self, email: &str, password: &str) -> UserId {
        UserId::new(self.api.with(|state| state.add_user(email, password)))
    }

    /// Give `user` an open order holding `lines`, as if placed from another
    /// device.
    pub fn seed_account_order(&self, user: UserId, lines: &[(ProductId, u32)]) -> OrderId {
        let lines = lines
            .iter()
            .map(|(product, quantity)| (product.as_i64(), *quantity))
            .collect();
        OrderId::new(self.api.with(|state| {
            let id = state.insert_order(Some(user.as_i64()), None);
            if let Some(order) = state.orders.get_mut(&id) {
                order.lines = lines;
            }
            id
        }))
    }

    /// Save an address to `user`'s address book.
    pub fn seed_address(&self, user: UserId, address: &DeliveryAddress) -> AddressId {
        AddressId::new(self.api.with(|state| state.save_address(user.as_i64(), address.clone())))
    }

    /// Attach a delivery address snapshot to an order without touching any
    /// address book.
    pub fn set_delivery_address(&self, order: OrderId, address: &DeliveryAddress) {
        self.api.with(|state| {
            if let Some(order) = state.orders.get_mut(&order.as_i64()) {
                order.address = Some(address.clone());
            }
        });
    }

    /// Remove an order's delivery address.
    pub fn clear_delivery_address(&self, order: OrderId) {
        self.api.with(|state| {
            if let Some(order) = state.orders.get_mut(&order.as_i64()) {
                order.address = None;
            }
        });
    }

    /// Forget an order entirely, as an expired cart would be.
    pub fn drop_order(&self, order: OrderId) {
        self.api.with(|state| {
            state.orders.remove(&order.as_i64());
            state.sessions.retain(|_, id| *id != order.as_i64());
        });
    }

    /// Whether the order exists, open or finalized.
    #[must_use]
    pub fn has_order(&self, order: OrderId) -> bool {
        self.api.with(|state| state.orders.contains_key(&order.as_i64()))
    }

    /// Owner of an order, if it has been attributed to an account.
    #[must_use]
    pub fn order_owner(&self, order: OrderId) -> Option<UserId> {
        self.api.with(|state| {
            state
                .orders
                .get(&order.as_i64())
                .and_then(|order| order.owner)
                .map(UserId::new)
        })
    }

    /// Whether the order has been placed.
    #[must_use]
    pub fn is_finalized(&self, order: OrderId) -> bool {
        self.api.with(|state| {
            state
                .orders
                .get(&order.as_i64())
                .is_some_and(|order| order.finalized)
        })
    }

    /// Number of addresses in `user`'s address book.
    #[must_use]
    pub fn saved_addresses(&self, user: UserId) -> usize {
        self.api.with(|state| {
            state
                .addresses
                .values()
                .filter(|(owner, _)| *owner == user.as_i64())
                .count()
        })
    }

    /// Mint a credential pair for `user`. A non-positive `ttl` yields an
    /// access token that is already expired and never accepted.
    #[must_use]
    pub fn issue_tokens(&self, user: UserId, ttl: Duration) -> (String, String) {
        self.api.with(|state| state.issue_tokens(user.as_i64(), ttl))
    }

    /// Reject every access token issued so far; refresh tokens stay valid.
    pub fn expire_access_tokens(&self) {
        self.api.with(|state| state.access_tokens.clear());
    }

    /// Reject every refresh token issued so far.
    pub fn revoke_refresh_tokens(&self) {
        self.api.with(|state| state.refresh_tokens.clear());
    }

    /// Message to include in 409 conflict payloads.
    pub fn set_conflict_message(&self, message: &str) {
        self.api
            .with(|state| state.conflict_message = Some(message.to_string()));
    }

    /// How many requests matched `route`, written as `"POST /api/auth/refresh"`.
    #[must_use]
    pub fn requests(&self, route: &str) -> usize {
        self.api
            .with(|state| state.requests.iter().filter(|seen| *seen == route).count())
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Clone, Default)]
struct FakeApi {
    state: Arc<Mutex<ServerState>>,
}

type Outcome = Result<Response, Response>;

impl FakeApi {
    fn with<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn respond(&self, f: impl FnOnce(&mut ServerState) -> Outcome) -> Response {
        self.with(f).unwrap_or_else(std::convert::identity)
    }
}

/// Anonymous session id from the cookie, attached by [`track`].
#[derive(Clone)]
struct Session(String);

#[derive(Default)]
struct ServerState {
    next_id: i64,
    products: BTreeMap<i64, ProductRow>,
    users: Vec<UserRow>,
    access_tokens: HashMap<String, i64>,
    refresh_tokens: HashMap<String, i64>,
    orders: BTreeMap<i64, OrderRow>,
    /// Anonymous session -> its order
    sessions: HashMap<String, i64>,
    /// Address id -> (owner, address)
    addresses: BTreeMap<i64, (i64, DeliveryAddress)>,
    payments: HashMap<i64, Value>,
    conflict_message: Option<String>,
    requests: Vec<String>,
}

struct ProductRow {
    name: String,
    cents: i64,
    stock: i64,
}

struct UserRow {
    id: i64,
    email: String,
    password: String,
}

struct OrderRow {
    owner: Option<i64>,
    session: Option<String>,
    lines: Vec<(i64, u32)>,
    coupon: Option<String>,
    address: Option<DeliveryAddress>,
    finalized: bool,
}

impl OrderRow {
    fn visible_to(&self, caller: Option<i64>, session: &str) -> bool {
        match self.owner {
            Some(owner) => caller == Some(owner),
            None => self.session.as_deref() == Some(session),
        }
    }
}

impl ServerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn new_session(&mut self) -> String {
        format!("session-{}", self.next_id())
    }

    fn add_user(&mut self, email: &str, password: &str) -> i64 {
        let id = self.next_id();
        self.users.push(UserRow {
            id,
            email: email.to_string(),
            password: password.to_string(),
        });
        id
    }

    fn issue_tokens(&mut self, user: i64, ttl: Duration) -> (String, String) {
        let nonce = self.next_id();
        let email = self
            .users
            .iter()
            .find(|row| row.id == user)
            .map(|row| row.email.clone());
        let access = jwt(user, email.as_deref(), Utc::now() + ttl, nonce);
        let refresh = format!("refresh-{user}-{nonce}");

        if ttl > Duration::zero() {
            self.access_tokens.insert(access.clone(), user);
        }
        self.refresh_tokens.insert(refresh.clone(), user);
        (access, refresh)
    }

    fn insert_order(&mut self, owner: Option<i64>, session: Option<String>) -> i64 {
        let id = self.next_id();
        self.orders.insert(
            id,
            OrderRow {
                owner,
                session,
                lines: Vec::new(),
                coupon: None,
                address: None,
                finalized: false,
            },
        );
        id
    }

    fn save_address(&mut self, user: i64, address: DeliveryAddress) -> i64 {
        let id = self.next_id();
        self.addresses.insert(id, (user, address));
        id
    }

    /// The account's open order, if any.
    fn open_order_of(&self, user: i64) -> Option<i64> {
        self.orders
            .iter()
            .find(|(_, order)| order.owner == Some(user) && !order.finalized)
            .map(|(id, _)| *id)
    }

    /// The session's unattributed open order, if any.
    fn anonymous_order(&self, session: &str) -> Option<i64> {
        self.sessions.get(session).copied().filter(|id| {
            self.orders
                .get(id)
                .is_some_and(|order| order.owner.is_none() && !order.finalized)
        })
    }

    /// Authenticated caller. A missing header is anonymous; an unknown or
    /// expired token is a 401.
    fn caller(&self, headers: &HeaderMap) -> Result<Option<i64>, Response> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Malformed authorization header"))?;
        self.access_tokens
            .get(token)
            .copied()
            .map(Some)
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Token expired"))
    }

    fn require_user(&self, headers: &HeaderMap) -> Result<i64, Response> {
        self.caller(headers)?
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Authentication required"))
    }

    /// An order the caller may modify.
    fn open_order(
        &mut self,
        id: i64,
        caller: Option<i64>,
        session: &str,
    ) -> Result<&mut OrderRow, Response> {
        match self.orders.get_mut(&id) {
            Some(order) if order.visible_to(caller, session) => {
                if order.finalized {
                    Err(fail(StatusCode::BAD_REQUEST, "Order cannot be modified"))
                } else {
                    Ok(order)
                }
            }
            _ => Err(fail(StatusCode::NOT_FOUND, "Order not found")),
        }
    }

    fn order_json(&self, id: i64, order: &OrderRow) -> Value {
        let mut subtotal = Decimal::ZERO;
        let mut items = Vec::with_capacity(order.lines.len());
        for &(product_id, quantity) in &order.lines {
            let (name, price) = self
                .products
                .get(&product_id)
                .map_or((String::new(), Decimal::ZERO), |product| {
                    (product.name.clone(), cents(product.cents))
                });
            let line_total = price * Decimal::from(quantity);
            subtotal += line_total;
            items.push(json!({
                "productId": product_id,
                "productName": name,
                "unitPrice": price.to_string(),
                "quantity": quantity,
                "subtotal": line_total.to_string(),
            }));
        }

        let discount = if order.coupon.is_some() {
            (subtotal * Decimal::from(COUPON_PERCENT) / Decimal::from(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let discounted = subtotal - discount;
        let (shipping, promotional) = match &order.address {
            Some(_) if discounted >= cents(FREE_SHIPPING_CENTS) => (Decimal::ZERO, true),
            Some(_) => (cents(SHIPPING_CENTS), false),
            None => (Decimal::ZERO, false),
        };

        json!({
            "id": id,
            "items": items,
            "total": (discounted + shipping).to_string(),
            "discount": discount.to_string(),
            "shippingCost": shipping.to_string(),
            "promotionalShipping": promotional,
            "couponCode": order.coupon,
            "deliveryAddress": order.address,
        })
    }
}

fn cents(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

fn jwt(user: i64, email: Option<&str>, expires_at: DateTime<Utc>, nonce: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut claims = json!({
        "sub": user.to_string(),
        "exp": expires_at.timestamp(),
        "jti": nonce.to_string(),
    });
    if let Some(email) = email {
        claims["email"] = Value::from(email);
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.fake-signature")
}

fn fail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn done() -> Response {
    StatusCode::OK.into_response()
}

// =============================================================================
// Routing
// =============================================================================

fn router(api: FakeApi) -> Router {
    let routes = Router::new()
        .route("/products", get(list_products))
        .route("/orders", post(create_order))
        .route("/orders/current", get(current_order))
        .route("/orders/associate-cart", post(associate_cart))
        .route("/orders/discard-anonymous", post(discard_anonymous))
        .route("/orders/replace", post(replace_with_anonymous))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/items", post(add_item).delete(clear_items))
        .route("/orders/{id}/items/{product_id}", put(set_quantity))
        .route("/orders/{id}/products/{product_id}", delete(remove_item))
        .route("/orders/{id}/coupon", post(apply_coupon))
        .route("/orders/{id}/shipping/{address_id}", post(apply_shipping))
        .route("/addresses", get(list_addresses).post(create_address))
        .route("/checkout/{id}/finalize", post(finalize))
        .route("/payments/{id}/payment", post(create_payment))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/register", post(register));

    Router::new()
        .nest("/api", routes)
        .layer(middleware::from_fn_with_state(api.clone(), track))
        .with_state(api)
}

/// Record the request and hand out the anonymous session cookie.
async fn track(State(api): State<FakeApi>, mut request: Request, next: Next) -> Response {
    let existing = session_cookie(request.headers());
    let fresh = existing.is_none();
    let session = existing.unwrap_or_else(|| api.with(ServerState::new_session));

    let route = format!("{} {}", request.method(), request.uri().path());
    api.with(|state| state.requests.push(route));
    request.extensions_mut().insert(Session(session.clone()));

    let mut response = next.run(request).await;
    if fresh
        && let Ok(cookie) = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session}; Path=/; HttpOnly"))
    {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
}

// =============================================================================
// Catalog
// =============================================================================

async fn list_products(State(api): State<FakeApi>) -> Response {
    api.respond(|state| {
        let products: Vec<Value> = state
            .products
            .iter()
            .map(|(id, product)| {
                json!({
                    "id": id,
                    "name": product.name,
                    "price": cents(product.cents).to_f64(),
                    "stock": product.stock,
                    "onSale": false,
                    "featured": false,
                })
            })
            .collect();
        Ok(Json(products).into_response())
    })
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemBody {
    product_id: i64,
    quantity: u32,
}

#[derive(Deserialize)]
struct QuantityBody {
    quantity: u32,
}

#[derive(Deserialize)]
struct CouponBody {
    code: String,
}

async fn create_order(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
) -> Response {
    api.respond(|state| {
        let id = match state.caller(&headers)? {
            Some(user) => match state.open_order_of(user) {
                Some(id) => id,
                None => state.insert_order(Some(user), None),
            },
            None => match state.anonymous_order(&session) {
                Some(id) => id,
                None => {
                    let id = state.insert_order(None, Some(session.clone()));
                    state.sessions.insert(session, id);
                    id
                }
            },
        };
        Ok(Json(json!({ "orderId": id })).into_response())
    })
}

async fn current_order(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let Some(id) = state.open_order_of(user) else {
            return Ok(StatusCode::NO_CONTENT.into_response());
        };
        let body = state
            .orders
            .get(&id)
            .map(|order| state.order_json(id, order));
        Ok(Json(body).into_response())
    })
}

async fn get_order(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        match state.orders.get(&id) {
            Some(order) if order.visible_to(caller, &session) && !order.finalized => {
                Ok(Json(state.order_json(id, order)).into_response())
            }
            _ => Err(fail(StatusCode::NOT_FOUND, "Order not found")),
        }
    })
}

async fn add_item(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Json(body): Json<AddItemBody>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        let available = state
            .products
            .get(&body.product_id)
            .is_some_and(|product| product.stock > 0);
        let order = state.open_order(id, caller, &session)?;
        if !available {
            return Err(fail(StatusCode::BAD_REQUEST, "Product unavailable"));
        }
        match order.lines.iter_mut().find(|(product, _)| *product == body.product_id) {
            Some(line) => line.1 += body.quantity,
            None => order.lines.push((body.product_id, body.quantity)),
        }
        Ok(done())
    })
}

async fn set_quantity(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath((id, product_id)): UrlPath<(i64, i64)>,
    Json(body): Json<QuantityBody>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        let order = state.open_order(id, caller, &session)?;
        if body.quantity == 0 {
            order.lines.retain(|(product, _)| *product != product_id);
            return Ok(done());
        }
        match order.lines.iter_mut().find(|(product, _)| *product == product_id) {
            Some(line) => {
                line.1 = body.quantity;
                Ok(done())
            }
            None => Err(fail(StatusCode::NOT_FOUND, "Item not found in order")),
        }
    })
}

async fn remove_item(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath((id, product_id)): UrlPath<(i64, i64)>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        let order = state.open_order(id, caller, &session)?;
        order.lines.retain(|(product, _)| *product != product_id);
        Ok(done())
    })
}

async fn clear_items(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        state.open_order(id, caller, &session)?.lines.clear();
        Ok(done())
    })
}

async fn apply_coupon(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Json(body): Json<CouponBody>,
) -> Response {
    api.respond(|state| {
        let caller = state.caller(&headers)?;
        let order = state.open_order(id, caller, &session)?;
        if order.coupon.is_some() {
            return Err(fail(StatusCode::BAD_REQUEST, "A coupon has already been applied"));
        }
        if !body.code.eq_ignore_ascii_case(COUPON_CODE) {
            return Err(fail(StatusCode::BAD_REQUEST, "Invalid coupon"));
        }
        order.coupon = Some(COUPON_CODE.to_string());
        Ok(done())
    })
}

// =============================================================================
// Addresses and shipping
// =============================================================================

#[derive(Deserialize)]
struct NewAddressBody {
    #[serde(default)]
    street: String,
    #[serde(default)]
    number: String,
    #[serde(default)]
    neighborhood: String,
    #[serde(default)]
    city: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Serialize)]
struct SavedRow<'a> {
    id: i64,
    #[serde(flatten)]
    address: &'a DeliveryAddress,
}

async fn list_addresses(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let saved: Vec<SavedRow<'_>> = state
            .addresses
            .iter()
            .filter(|(_, (owner, _))| *owner == user)
            .map(|(id, (_, address))| SavedRow { id: *id, address })
            .collect();
        Ok(Json(saved).into_response())
    })
}

async fn create_address(
    State(api): State<FakeApi>,
    headers: HeaderMap,
    Json(body): Json<NewAddressBody>,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        if body.street.trim().is_empty() {
            return Err(fail(StatusCode::BAD_REQUEST, "Street is required"));
        }
        let (Some(latitude), Some(longitude)) = (body.latitude, body.longitude) else {
            return Err(fail(StatusCode::BAD_REQUEST, "Coordinates are required"));
        };

        let address = DeliveryAddress {
            street: body.street,
            number: body.number,
            neighborhood: body.neighborhood,
            city: body.city,
            latitude,
            longitude,
        };
        let id = state.save_address(user, address.clone());
        Ok(Json(SavedRow {
            id,
            address: &address,
        })
        .into_response())
    })
}

async fn apply_shipping(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath((id, address_id)): UrlPath<(i64, i64)>,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let address = match state.addresses.get(&address_id) {
            Some((owner, address)) if *owner == user => address.clone(),
            _ => return Err(fail(StatusCode::BAD_REQUEST, "Address not found")),
        };
        state.open_order(id, Some(user), &session)?.address = Some(address);
        Ok(done())
    })
}

// =============================================================================
// Checkout and payment
// =============================================================================

#[derive(Deserialize)]
struct PaymentBody {
    #[serde(rename = "type")]
    kind: u8,
}

async fn finalize(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let order = state.open_order(id, Some(user), &session)?;
        if order.owner != Some(user) {
            return Err(fail(StatusCode::FORBIDDEN, "Order is not linked to your account"));
        }
        if order.lines.is_empty() {
            return Err(fail(StatusCode::BAD_REQUEST, "Order has no items"));
        }
        if order.address.is_none() {
            return Err(fail(StatusCode::BAD_REQUEST, "Delivery address required"));
        }
        order.finalized = true;
        Ok(Json(json!({ "orderId": id, "status": "AwaitingPayment" })).into_response())
    })
}

async fn create_payment(
    State(api): State<FakeApi>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Json(body): Json<PaymentBody>,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        if body.kind != PAYMENT_TYPE_PIX {
            return Err(fail(StatusCode::BAD_REQUEST, "Unsupported payment type"));
        }
        let placed = state
            .orders
            .get(&id)
            .is_some_and(|order| order.owner == Some(user) && order.finalized);
        if !placed {
            return Err(fail(StatusCode::BAD_REQUEST, "Order has not been finalized"));
        }

        let payment_id = state.next_id();
        let charge = state.payments.entry(id).or_insert_with(|| {
            json!({
                "paymentId": payment_id,
                "status": "Pending",
                "pix": {
                    "txId": format!("tx-{id}"),
                    "copyPaste": format!("00020126580014br.gov.bcb.pix-order-{id}"),
                    "qrCodeBase64": "iVBORw0KGgo=",
                    "expiresAt": (Utc::now() + Duration::minutes(30)).to_rfc3339(),
                },
            })
        });
        Ok(Json(charge.clone()).into_response())
    })
}

// =============================================================================
// Cart association
// =============================================================================

async fn associate_cart(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let Some(anonymous) = state.anonymous_order(&session) else {
            return Ok(done());
        };

        if let Some(account) = state.open_order_of(user) {
            let payload = json!({
                "cartConflict": true,
                "userOrderId": account,
                "anonymousOrderId": anonymous,
                "message": state.conflict_message,
            });
            return Err((StatusCode::CONFLICT, Json(payload)).into_response());
        }

        if let Some(order) = state.orders.get_mut(&anonymous) {
            order.owner = Some(user);
        }
        state.sessions.remove(&session);
        Ok(done())
    })
}

async fn discard_anonymous(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
) -> Response {
    api.respond(|state| {
        state.require_user(&headers)?;
        if let Some(anonymous) = state.anonymous_order(&session) {
            state.orders.remove(&anonymous);
        }
        state.sessions.remove(&session);
        Ok(done())
    })
}

async fn replace_with_anonymous(
    State(api): State<FakeApi>,
    Extension(Session(session)): Extension<Session>,
    headers: HeaderMap,
) -> Response {
    api.respond(|state| {
        let user = state.require_user(&headers)?;
        let Some(anonymous) = state.anonymous_order(&session) else {
            return Err(fail(StatusCode::BAD_REQUEST, "No anonymous order to keep"));
        };

        state
            .orders
            .retain(|_, order| order.owner != Some(user) || order.finalized);
        if let Some(order) = state.orders.get_mut(&anonymous) {
            order.owner = Some(user);
        }
        state.sessions.remove(&session);
        Ok(done())
    })
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

#[derive(Deserialize)]
struct RegisterBody {
    email: String,
    password: String,
}

fn grant(access: &str, refresh: &str, user: i64) -> Response {
    Json(json!({
        "accessToken": access,
        "refreshToken": refresh,
        "userId": user,
    }))
    .into_response()
}

async fn login(State(api): State<FakeApi>, Json(body): Json<LoginBody>) -> Response {
    api.respond(|state| {
        let user = state
            .users
            .iter()
            .find(|row| row.email.eq_ignore_ascii_case(&body.email) && row.password == body.password)
            .map(|row| row.id)
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Invalid email or password"))?;
        let (access, refresh) = state.issue_tokens(user, Duration::seconds(ACCESS_TOKEN_TTL_SECS));
        Ok(grant(&access, &refresh, user))
    })
}

async fn refresh(State(api): State<FakeApi>, Json(body): Json<RefreshBody>) -> Response {
    api.respond(|state| {
        let user = state
            .refresh_tokens
            .remove(&body.refresh_token)
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;
        let (access, refresh) = state.issue_tokens(user, Duration::seconds(ACCESS_TOKEN_TTL_SECS));
        Ok(grant(&access, &refresh, user))
    })
}

async fn register(State(api): State<FakeApi>, Json(body): Json<RegisterBody>) -> Response {
    api.respond(|state| {
        if state
            .users
            .iter()
            .any(|row| row.email.eq_ignore_ascii_case(&body.email))
        {
            return Err(fail(StatusCode::BAD_REQUEST, "Email already registered"));
        }
        state.add_user(&body.email, &body.password);
        Ok(done())
    })
}
