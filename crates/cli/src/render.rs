//! Text rendering for the shell.
//!
//! Every function writes to any [`Write`] so output can be captured in tests.

use std::io::{self, Write};

use chrono::Utc;
use vitrine_core::{AddressId, CheckoutStep, Identity, Money, Order, PixCharge, Product, SavedAddress};
use vitrine_storefront::cart::AssociationOutcome;
use vitrine_storefront::checkout::{CheckoutFlow, CheckoutSummary, FinalizeOutcome, Redirect};
use vitrine_storefront::conflict::ConflictPrompt;

pub fn products(out: &mut impl Write, products: &[Product]) -> io::Result<()> {
    if products.is_empty() {
        return writeln!(out, "No products found.");
    }
    for product in products {
        writeln!(
            out,
            "{:>5}  {:<32} {:>12}  ({} in stock)",
            product.id, product.name, product.price.to_string(), product.stock
        )?;
    }
    Ok(())
}

pub fn order(out: &mut impl Write, order: Option<&Order>) -> io::Result<()> {
    let Some(order) = order else {
        return writeln!(out, "Your cart is empty.");
    };

    writeln!(out, "Order #{}", order.id)?;
    if order.items.is_empty() {
        writeln!(out, "  (no items)")?;
    }
    for line in &order.items {
        writeln!(
            out,
            "  {:>5}  {:<28} {:>3} x {:>10} = {:>12}",
            line.product_id,
            line.name,
            line.quantity,
            line.unit_price.to_string(),
            line.subtotal.to_string()
        )?;
    }
    totals(
        out,
        order.discount,
        order.coupon_code.as_deref(),
        Some(order.shipping_cost),
        order.promotional_shipping,
        order.total,
    )
}

fn totals(
    out: &mut impl Write,
    discount: Money,
    coupon: Option<&str>,
    shipping: Option<Money>,
    promotional: bool,
    total: Money,
) -> io::Result<()> {
    match (coupon, discount.is_zero()) {
        (Some(code), false) => writeln!(out, "  Discount: -{discount} ({code})")?,
        (None, false) => writeln!(out, "  Discount: -{discount}")?,
        (Some(code), true) => writeln!(out, "  Coupon:   {code}")?,
        (None, true) => {}
    }
    match shipping {
        _ if promotional => writeln!(out, "  Shipping: free (promotion)")?,
        Some(cost) => writeln!(out, "  Shipping: {cost}")?,
        None => writeln!(out, "  Shipping: calculated after choosing an address")?,
    }
    writeln!(out, "  Total:    {total}")
}

pub fn identity(out: &mut impl Write, identity: Option<&Identity>) -> io::Result<()> {
    match identity {
        Some(identity) => match &identity.email {
            Some(email) => writeln!(out, "Signed in as {email} (user {})", identity.user_id),
            None => writeln!(out, "Signed in as user {}", identity.user_id),
        },
        None => writeln!(out, "Not signed in."),
    }
}

pub fn association(out: &mut impl Write, outcome: &AssociationOutcome) -> io::Result<()> {
    match outcome {
        AssociationOutcome::Associated => writeln!(out, "Your cart is now linked to your account."),
        AssociationOutcome::NothingToAssociate => Ok(()),
        AssociationOutcome::Conflict(_) => {
            writeln!(out, "Cart conflict: run `conflict` to see your options.")
        }
        AssociationOutcome::Failed(message) => writeln!(out, "warning: {message}"),
    }
}

pub fn conflict(out: &mut impl Write, prompt: Option<&ConflictPrompt>) -> io::Result<()> {
    let Some(prompt) = prompt else {
        return writeln!(out, "No cart conflict.");
    };
    writeln!(out, "{}", prompt.message)?;
    writeln!(out, "  keep     keep account order #{}", prompt.user_order_id)?;
    writeln!(out, "  use      use this session's order #{}", prompt.anonymous_order_id)?;
    writeln!(out, "  dismiss  decide later")
}

pub fn redirect(out: &mut impl Write, redirect: &Redirect) -> io::Result<()> {
    match redirect {
        Redirect::Catalog => writeln!(out, "Your cart is empty. Browse with `products`."),
        Redirect::Login { return_to } => {
            writeln!(out, "Sign in with `login` to continue to {return_to}.")
        }
    }
}

pub fn checkout(
    out: &mut impl Write,
    flow: &CheckoutFlow,
    summary: Option<&CheckoutSummary>,
) -> io::Result<()> {
    let step = flow.step();
    writeln!(
        out,
        "Checkout step {} of {}: {step}",
        step.position(),
        CheckoutStep::ALL.len()
    )?;

    if let Some(summary) = summary {
        for line in &summary.items {
            writeln!(
                out,
                "  {:<28} {:>3} x {:>10}",
                line.name,
                line.quantity,
                line.unit_price.to_string()
            )?;
        }
        if let Some(to) = &summary.delivery_to {
            writeln!(out, "  Deliver to: {to}")?;
        }
        totals(
            out,
            summary.discount,
            summary.coupon_code.as_deref(),
            (step == CheckoutStep::Confirmation).then_some(summary.shipping_cost),
            summary.promotional_shipping,
            summary.total,
        )?;
    }

    if step == CheckoutStep::Address {
        addresses(out, flow.addresses(), flow.selected_address())?;
    }
    if let Some(error) = flow.error() {
        writeln!(out, "error: {error}")?;
    }
    Ok(())
}

pub fn addresses(
    out: &mut impl Write,
    addresses: &[SavedAddress],
    selected: Option<AddressId>,
) -> io::Result<()> {
    if addresses.is_empty() {
        return writeln!(out, "  No saved addresses. Add one with `new-address`.");
    }
    for address in addresses {
        let marker = if Some(address.id) == selected { '*' } else { ' ' };
        writeln!(out, " {marker}{:>4}  {}", address.id, address.label())?;
    }
    Ok(())
}

pub fn finalize(out: &mut impl Write, outcome: &FinalizeOutcome) -> io::Result<()> {
    match outcome {
        FinalizeOutcome::Completed(receipt) => {
            writeln!(out, "Order #{} placed.", receipt.order_id)?;
            if let Some(status) = &receipt.status {
                writeln!(out, "  Status: {status}")?;
            }
            writeln!(out, "Pay with `pix {}`.", receipt.order_id)
        }
        FinalizeOutcome::LoginRequired { return_to } => {
            writeln!(out, "Your session expired. Sign in again to return to {return_to}.")
        }
        FinalizeOutcome::Rejected(message) => writeln!(out, "error: {message}"),
    }
}

pub fn pix(out: &mut impl Write, charge: &PixCharge) -> io::Result<()> {
    writeln!(out, "PIX copy-paste code:")?;
    writeln!(out, "  {}", charge.copy_paste)?;
    if let Some(id) = &charge.transaction_id {
        writeln!(out, "  Transaction: {id}")?;
    }
    if let Some(status) = &charge.status {
        writeln!(out, "  Status: {status}")?;
    }
    if let Some(expires_at) = charge.expires_at {
        if charge.is_expired_at(Utc::now()) {
            writeln!(out, "  Expired at {expires_at}")?;
        } else {
            writeln!(out, "  Expires at {expires_at}")?;
        }
    }
    Ok(())
}
