use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use utoipa::ToSchema;

use crate::entities::offer::{DiscountKind, Model as OfferModel};
use crate::errors::ServiceError;

/// Pricing rule lifted out of a stored offer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OfferRule {
    /// Percent off the unit price, e.g. 20 for 20% off. May be fractional.
    PercentageOff(Decimal),
    /// Minor currency units subtracted from the unit price, floored at zero.
    FixedAmountOff(i64),
    /// Replacement unit price in minor currency units; the base price is ignored.
    FixedPrice(i64),
}

impl OfferRule {
    /// Converts a stored offer into a rule, rejecting malformed stored values.
    pub fn from_offer(offer: &OfferModel) -> Result<Self, ServiceError> {
        match offer.discount_kind {
            DiscountKind::PercentageOff => {
                if offer.discount_value < Decimal::ZERO
                    || offer.discount_value > Decimal::from(100)
                {
                    return Err(ServiceError::ValidationError(format!(
                        "Offer {} has percentage {} outside 0..=100",
                        offer.id, offer.discount_value
                    )));
                }
                Ok(OfferRule::PercentageOff(offer.discount_value))
            }
            DiscountKind::FixedAmountOff => {
                let amount = minor_units(offer.discount_value).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Offer {} has non-integral discount amount {}",
                        offer.id, offer.discount_value
                    ))
                })?;
                Ok(OfferRule::FixedAmountOff(amount))
            }
            DiscountKind::FixedPrice => {
                let price = minor_units(offer.discount_value).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Offer {} has non-integral fixed price {}",
                        offer.id, offer.discount_value
                    ))
                })?;
                Ok(OfferRule::FixedPrice(price))
            }
        }
    }
}

/// Fixed amounts are stored as whole minor units; anything else is a data bug.
fn minor_units(value: Decimal) -> Option<i64> {
    if value < Decimal::ZERO || !value.fract().is_zero() {
        return None;
    }
    value.to_i64()
}

/// Computed cart snapshot for one variant. All amounts in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PriceQuote {
    pub unit_price: i64,
    pub discounted_unit_price: i64,
    pub subtotal: i64,
    pub discount_total: i64,
    pub total: i64,
}

/// Quotes `quantity` units at `unit_price` under `rule`.
///
/// Percentage math rounds the discounted unit price half-up; the discount is
/// derived by subtraction so `total + discount_total == subtotal` always
/// holds. Quantity must already be validated (>= 1) by the caller.
pub fn quote(unit_price: i64, rule: OfferRule, quantity: i32) -> PriceQuote {
    let discounted_unit_price = match rule {
        OfferRule::PercentageOff(percent) => {
            let keep_rate = (Decimal::from(100) - percent) / Decimal::from(100);
            (Decimal::from(unit_price) * keep_rate)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .unwrap_or(0)
        }
        OfferRule::FixedAmountOff(amount) => (unit_price - amount).max(0),
        OfferRule::FixedPrice(price) => price.max(0),
    };

    let quantity = i64::from(quantity);
    let subtotal = unit_price * quantity;
    let total = discounted_unit_price * quantity;

    PriceQuote {
        unit_price,
        discounted_unit_price,
        subtotal,
        discount_total: subtotal - total,
        total,
    }
}
