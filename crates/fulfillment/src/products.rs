//! Amount-based product detection
//!
//! Pure mapping from a captured amount (paise) to the set of purchased
//! products and delivery flags. The threshold table is checked from the
//! highest tier down so a bundle purchase is never misclassified as a
//! lower tier. Amounts below the lowest tier are a pricing/config anomaly
//! and surface as an error the orchestrator must flag, never a silent
//! empty result.

use serde::Serialize;

use crate::error::{FulfillmentError, FulfillmentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductId {
    /// The main course
    MainCourse,
    /// Order-bump workbook added at checkout
    OrderBump,
    /// 1:1 strategy call upsell
    Upsell,
}

impl ProductId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductId::MainCourse => "main_course",
            ProductId::OrderBump => "order_bump",
            ProductId::Upsell => "upsell",
        }
    }
}

/// Which downstream deliveries the fulfillment layer should trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryFlags {
    pub send_course_access: bool,
    pub send_database: bool,
    /// Calendar booking link, only for purchases including the 1:1 call
    pub send_calendar_link: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedProducts {
    pub products: Vec<ProductId>,
    pub flags: DeliveryFlags,
}

/// Price tiers in paise, highest first. First `amount >= threshold` wins.
const TIERS: &[(i64, &[ProductId])] = &[
    (
        8997,
        &[ProductId::MainCourse, ProductId::OrderBump, ProductId::Upsell],
    ),
    (6998, &[ProductId::MainCourse, ProductId::Upsell]),
    (4998, &[ProductId::MainCourse, ProductId::OrderBump]),
    (2999, &[ProductId::MainCourse]),
];

/// Detect purchased products from a captured amount.
pub fn detect(amount_paise: i64) -> FulfillmentResult<DetectedProducts> {
    for (threshold, products) in TIERS {
        if amount_paise >= *threshold {
            let has_upsell = products.contains(&ProductId::Upsell);
            return Ok(DetectedProducts {
                products: products.to_vec(),
                flags: DeliveryFlags {
                    send_course_access: true,
                    send_database: true,
                    send_calendar_link: has_upsell,
                },
            });
        }
    }

    Err(FulfillmentError::UnmatchedAmount { amount_paise })
}

/// Whether the amount is an exact tier price (checkout only sells these).
pub fn is_tier_price(amount_paise: i64) -> bool {
    TIERS.iter().any(|(threshold, _)| *threshold == amount_paise)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_bundle_detects_all_three_products() {
        let result = detect(8997).unwrap();
        assert_eq!(
            result.products,
            vec![ProductId::MainCourse, ProductId::OrderBump, ProductId::Upsell]
        );
        assert!(result.flags.send_course_access);
        assert!(result.flags.send_database);
        assert!(result.flags.send_calendar_link);
    }

    #[test]
    fn one_paise_below_bundle_falls_to_next_tier() {
        let result = detect(8996).unwrap();
        assert_eq!(
            result.products,
            vec![ProductId::MainCourse, ProductId::Upsell]
        );
        assert!(result.flags.send_calendar_link);
    }

    #[test]
    fn course_plus_bump_tier() {
        let result = detect(4998).unwrap();
        assert_eq!(
            result.products,
            vec![ProductId::MainCourse, ProductId::OrderBump]
        );
        assert!(!result.flags.send_calendar_link);
    }

    #[test]
    fn base_course_tier() {
        let result = detect(2999).unwrap();
        assert_eq!(result.products, vec![ProductId::MainCourse]);
        assert!(result.flags.send_course_access);
        assert!(!result.flags.send_calendar_link);
    }

    #[test]
    fn amounts_between_tiers_round_down() {
        let result = detect(5500).unwrap();
        assert_eq!(
            result.products,
            vec![ProductId::MainCourse, ProductId::OrderBump]
        );
    }

    #[test]
    fn zero_amount_is_explicit_unmatched_error() {
        let result = detect(0);
        assert!(matches!(
            result,
            Err(FulfillmentError::UnmatchedAmount { amount_paise: 0 })
        ));
    }

    #[test]
    fn below_lowest_tier_is_unmatched() {
        assert!(detect(2998).is_err());
        assert!(detect(1).is_err());
        assert!(detect(-100).is_err());
    }

    #[test]
    fn only_exact_tier_prices_are_sellable() {
        assert!(is_tier_price(8997));
        assert!(is_tier_price(2999));
        assert!(!is_tier_price(8996));
        assert!(!is_tier_price(0));
    }

    #[test]
    fn overpayment_maps_to_highest_tier() {
        let result = detect(99_999).unwrap();
        assert_eq!(result.products.len(), 3);
    }
}
