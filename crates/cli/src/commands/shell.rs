//! Interactive storefront shell.
//!
//! Reads one command per line, parsed with the same `clap` machinery as the
//! top-level CLI. Words may be quoted with `"` or `'` to include spaces.
//!
//! # Usage
//!
//! ```text
//! vitrine> products café
//! vitrine> add 1
//! vitrine> coupon SAVE10
//! vitrine> login ana@example.com "my password"
//! vitrine> checkout
//! vitrine> next
//! vitrine> select 3
//! vitrine> ship
//! vitrine> finalize
//! vitrine> pix 12
//! ```

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;
use vitrine_core::{AddressId, CheckoutStep, NewAddress, OrderId, ProductId};
use vitrine_storefront::api::Registration;
use vitrine_storefront::cart::ConflictChoice;
use vitrine_storefront::checkout::{CheckoutError, CheckoutFlow, FinalizeOutcome};
use vitrine_storefront::conflict::ConflictDialog;
use vitrine_storefront::{Storefront, StorefrontError, payment};

use super::CliError;
use crate::render;

const PROMPT: &str = "vitrine> ";

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// List products in stock, optionally filtered by name
    Products { query: Vec<String> },
    /// List products on promotion
    Promos,
    /// Show the cart
    Cart,
    /// Re-fetch the cart from the server
    Refresh,
    /// Add one unit of a product
    Add { product: ProductId },
    /// Remove a product from the cart
    Remove { product: ProductId },
    /// Set a product's quantity (0 removes it)
    Qty { product: ProductId, quantity: u32 },
    /// Apply a coupon code
    Coupon { code: String },
    /// Empty the cart
    Clear,
    /// Sign in
    Login { email: String, password: String },
    /// Create an account
    Register {
        name: String,
        email: String,
        phone: String,
        password: String,
    },
    /// Sign out
    Logout,
    /// Show who is signed in
    Whoami,
    /// Show the pending cart conflict
    Conflict,
    /// Keep the account's cart and discard this session's
    Keep,
    /// Replace the account's cart with this session's
    #[command(name = "use")]
    UseSession,
    /// Decide about the cart conflict later
    Dismiss,
    /// Start checkout
    Checkout,
    /// Continue from the summary to the address step
    Next,
    /// Reload saved addresses
    Addresses,
    /// Choose a saved address
    Select { address: AddressId },
    /// Save a new address and select it
    NewAddress {
        street: String,
        number: String,
        neighborhood: String,
        city: String,
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
    /// Calculate shipping and continue to confirmation
    Ship,
    /// Go back to an earlier checkout step
    Back { step: CheckoutStep },
    /// Place the order
    Finalize,
    /// Show the PIX charge for a placed order
    Pix { order: OrderId },
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

enum Next {
    Continue,
    Quit,
}

/// Split a line into words, honoring `"` and `'` quotes.
///
/// Returns `None` for an unterminated quote.
fn split_words(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

/// Interactive session over one [`Storefront`].
pub struct Shell<W> {
    app: Storefront,
    flow: Option<CheckoutFlow>,
    out: W,
}

impl<W: Write> Shell<W> {
    pub const fn new(app: Storefront, out: W) -> Self {
        Self {
            app,
            flow: None,
            out,
        }
    }

    /// Restore state, then run commands from `input` until `quit` or EOF.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading input or writing output fails;
    /// command failures are printed and the shell carries on.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<(), CliError> {
        let outcome = self.app.start().await;
        render::identity(&mut self.out, self.app.identity().as_ref())?;
        render::association(&mut self.out, &outcome)?;

        let mut lines = input.lines();
        loop {
            write!(self.out, "{PROMPT}")?;
            self.out.flush()?;
            let Some(line) = lines.next_line().await? else {
                writeln!(self.out)?;
                break;
            };
            if matches!(self.handle_line(&line).await?, Next::Quit) {
                break;
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<Next, CliError> {
        let Some(words) = split_words(line) else {
            writeln!(self.out, "error: unterminated quote")?;
            return Ok(Next::Continue);
        };
        if words.is_empty() {
            return Ok(Next::Continue);
        }

        match ShellLine::try_parse_from(words) {
            Ok(parsed) => self.execute(parsed.command).await,
            Err(e) => {
                write!(self.out, "{e}")?;
                Ok(Next::Continue)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(&mut self, command: ShellCommand) -> Result<Next, CliError> {
        debug!(?command, "Shell command");
        match command {
            // Catalog
            ShellCommand::Products { query } => {
                match self.app.catalog().search(&query.join(" ")).await {
                    Ok(products) => render::products(&mut self.out, &products)?,
                    Err(e) => self.report(&e, "Could not load products.")?,
                }
            }
            ShellCommand::Promos => match self.app.catalog().promotions().await {
                Ok(products) => render::products(&mut self.out, &products)?,
                Err(e) => self.report(&e, "Could not load products.")?,
            },

            // Cart
            ShellCommand::Cart => render::order(&mut self.out, self.app.cart().order())?,
            ShellCommand::Refresh => {
                let result = self.app.cart_mut().refresh().await;
                self.show_cart(result, "Could not refresh the cart.")?;
            }
            ShellCommand::Add { product } => {
                let result = match self.app.catalog().product(product).await {
                    Ok(Some(item)) => self.app.cart_mut().add_item(&item).await,
                    Ok(None) => Err(StorefrontError::Validation(format!(
                        "product {product} not found"
                    ))),
                    Err(e) => Err(e),
                };
                self.show_cart(result, "Could not add the product.")?;
            }
            ShellCommand::Remove { product } => {
                let result = self.app.cart_mut().remove_item(product).await;
                self.show_cart(result, "Could not remove the product.")?;
            }
            ShellCommand::Qty { product, quantity } => {
                let result = self.app.cart_mut().set_quantity(product, quantity).await;
                self.show_cart(result, "Could not update the quantity.")?;
            }
            ShellCommand::Coupon { code } => {
                let result = self.app.cart_mut().apply_coupon(&code).await;
                self.show_cart(result, "Invalid coupon.")?;
            }
            ShellCommand::Clear => {
                let result = self.app.cart_mut().clear_items().await;
                self.show_cart(result, "Could not clear the cart.")?;
            }

            // Session
            ShellCommand::Login { email, password } => {
                match self.app.login(&email, SecretString::from(password)).await {
                    Ok((identity, outcome)) => {
                        render::identity(&mut self.out, Some(&identity))?;
                        render::association(&mut self.out, &outcome)?;
                    }
                    Err(e) => self.report(&e, "Could not sign in.")?,
                }
            }
            ShellCommand::Register {
                name,
                email,
                phone,
                password,
            } => {
                let form = Registration {
                    name,
                    email,
                    phone,
                    password: SecretString::from(password),
                };
                match self.app.register(form).await {
                    Ok(()) => writeln!(self.out, "Account created. Sign in with `login`.")?,
                    Err(e) => self.report(&e, "Could not create the account.")?,
                }
            }
            ShellCommand::Logout => {
                self.app.logout();
                self.flow = None;
                writeln!(self.out, "Signed out.")?;
            }
            ShellCommand::Whoami => {
                render::identity(&mut self.out, self.app.identity().as_ref())?;
            }

            // Conflict
            ShellCommand::Conflict => {
                let prompt = ConflictDialog::prompt(self.app.cart());
                render::conflict(&mut self.out, prompt.as_ref())?;
            }
            ShellCommand::Keep => self.resolve(ConflictChoice::KeepAccountOrder).await?,
            ShellCommand::UseSession => self.resolve(ConflictChoice::UseAnonymousOrder).await?,
            ShellCommand::Dismiss => {
                ConflictDialog::dismiss(self.app.cart_mut());
                writeln!(self.out, "Conflict dismissed.")?;
            }

            // Checkout
            ShellCommand::Checkout => match self.app.checkout() {
                Ok(flow) => {
                    self.flow = Some(flow);
                    self.show_flow(Ok(()))?;
                }
                Err(redirect) => render::redirect(&mut self.out, &redirect)?,
            },
            ShellCommand::Next => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                let result = flow.proceed_to_address(self.app.cart()).await;
                self.show_flow(result)?;
            }
            ShellCommand::Addresses => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                flow.reload_addresses().await;
                self.show_flow(Ok(()))?;
            }
            ShellCommand::Select { address } => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                let result = flow.select_address(address);
                self.show_flow(result)?;
            }
            ShellCommand::NewAddress {
                street,
                number,
                neighborhood,
                city,
                latitude,
                longitude,
            } => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                let address = NewAddress {
                    street,
                    number,
                    neighborhood,
                    city,
                    latitude: Some(latitude),
                    longitude: Some(longitude),
                };
                let result = flow.register_address(address).await.map(drop);
                self.show_flow(result)?;
            }
            ShellCommand::Ship => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                let result = flow.calculate_shipping(self.app.cart_mut()).await;
                self.show_flow(result)?;
            }
            ShellCommand::Back { step } => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                let result = flow.back_to(step);
                self.show_flow(result)?;
            }
            ShellCommand::Finalize => {
                let Some(flow) = self.flow.as_mut() else {
                    return self.no_checkout();
                };
                match self.app.place_order(flow).await {
                    Ok(outcome) => {
                        render::finalize(&mut self.out, &outcome)?;
                        if matches!(outcome, FinalizeOutcome::Completed(_)) {
                            self.flow = None;
                        }
                    }
                    Err(e) => self.show_flow(Err(e))?,
                }
            }

            // Payment
            ShellCommand::Pix { order } => match self.app.payments().pix_for(order).await {
                Ok(charge) => render::pix(&mut self.out, &charge)?,
                Err(e) => writeln!(self.out, "error: {}", payment::failure_message(&e))?,
            },

            ShellCommand::Quit => return Ok(Next::Quit),
        }
        Ok(Next::Continue)
    }

    async fn resolve(&mut self, choice: ConflictChoice) -> io::Result<()> {
        if ConflictDialog::prompt(self.app.cart()).is_none() {
            return writeln!(self.out, "No cart conflict.");
        }
        ConflictDialog::choose(self.app.cart_mut(), choice).await;
        render::order(&mut self.out, self.app.cart().order())
    }

    fn report(&mut self, err: &StorefrontError, fallback: &str) -> io::Result<()> {
        debug!(error = %err, "Command failed");
        writeln!(self.out, "error: {}", err.user_message(fallback))
    }

    fn show_cart(&mut self, result: Result<(), StorefrontError>, fallback: &str) -> io::Result<()> {
        match result {
            Ok(()) => render::order(&mut self.out, self.app.cart().order()),
            Err(e) => self.report(&e, fallback),
        }
    }

    fn show_flow(&mut self, result: Result<(), CheckoutError>) -> io::Result<()> {
        let Some(flow) = &self.flow else {
            return Ok(());
        };
        if let Err(e) = &result
            && flow.error().is_none()
        {
            writeln!(self.out, "error: {e}")?;
        }
        let summary = flow.summary(self.app.cart());
        render::checkout(&mut self.out, flow, summary.as_ref())
    }

    fn no_checkout(&mut self) -> Result<Next, CliError> {
        writeln!(self.out, "Not in checkout. Run `checkout` first.")?;
        Ok(Next::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vitrine_storefront::StorefrontConfig;

    use super::*;

    fn words(line: &str) -> Vec<String> {
        split_words(line).unwrap()
    }

    fn parse(line: &str) -> ShellCommand {
        ShellLine::try_parse_from(words(line)).unwrap().command
    }

    #[test]
    fn test_split_plain_and_quoted_words() {
        assert_eq!(words("  add   1 "), vec!["add", "1"]);
        assert_eq!(
            words(r#"login ana@example.com "pass word""#),
            vec!["login", "ana@example.com", "pass word"]
        );
        assert_eq!(words("coupon ''"), vec!["coupon", ""]);
        assert_eq!(words("a'b c'd"), vec!["ab cd"]);
        assert!(words("   ").is_empty());
        assert!(split_words("login \"open").is_none());
    }

    #[test]
    fn test_parse_cart_commands() {
        assert!(matches!(
            parse("qty 3 0"),
            ShellCommand::Qty { product, quantity: 0 } if product == ProductId::new(3)
        ));
        assert!(matches!(parse("products pão de queijo"), ShellCommand::Products { query } if query.len() == 3));
        assert!(matches!(parse("use"), ShellCommand::UseSession));
        assert!(matches!(parse("exit"), ShellCommand::Quit));
    }

    #[test]
    fn test_parse_negative_coordinates() {
        let command = parse(r#"new-address "Rua A" 10 Centro Recife -8.05 -34.9"#);
        let ShellCommand::NewAddress {
            street,
            latitude,
            longitude,
            ..
        } = command
        else {
            panic!("expected new-address");
        };
        assert_eq!(street, "Rua A");
        assert!((latitude + 8.05).abs() < f64::EPSILON);
        assert!((longitude + 34.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_checkout_step() {
        assert!(matches!(
            parse("back summary"),
            ShellCommand::Back {
                step: CheckoutStep::Summary
            }
        ));
        assert!(ShellLine::try_parse_from(words("back payment")).is_err());
        assert!(ShellLine::try_parse_from(words("add abc")).is_err());
    }

    #[tokio::test]
    async fn test_offline_session() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let config = StorefrontConfig::from_lookup(|key| match key {
            "VITRINE_API_URL" => Some("http://127.0.0.1:9/api".to_string()),
            "VITRINE_STATE_FILE" => Some(state_file.display().to_string()),
            _ => None,
        })
        .unwrap();
        let app = Storefront::connect(config).unwrap();
        let mut out = Vec::new();

        Shell::new(app, &mut out)
            .run(&b"cart\ncheckout\nnext\nconflict\nbogus\nquit\nwhoami\n"[..])
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Not signed in.\n"));
        assert!(text.contains("Your cart is empty.\n"));
        assert!(text.contains("Browse with `products`"));
        assert!(text.contains("Not in checkout."));
        assert!(text.contains("No cart conflict."));
        assert!(text.contains("unrecognized subcommand 'bogus'"));
        assert_eq!(text.matches(PROMPT).count(), 6);
    }
}
