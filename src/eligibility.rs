//! Eligibility evaluator — pure, deterministic rules for whether an order
//! modification is still permitted.
//!
//! Time is injected (`now`) so every rule is unit-testable without mocking a
//! clock. Time-based ineligibility is monotonic: once an order's window has
//! closed, no later `now` reopens it (the deadline depends only on
//! `placed_at` and config).

use chrono::{DateTime, Datelike, Days, Timelike, Utc, Weekday};

use crate::config::EligibilityConfig;
use crate::order::{FulfillmentMethod, Order};

/// Outcome of an eligibility check, with a customer-facing reason.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub reason: String,
}

impl EligibilityResult {
    pub fn eligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: true,
            reason: reason.into(),
        }
    }

    pub fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
        }
    }
}

/// Evaluate whether `order` may still be modified at `now`.
///
/// WarehouseEmail and ThirdPartyLogisticsApi orders are time-barred: a flat
/// window (default 24h), except orders placed Friday afternoon through
/// Sunday, which stay modifiable until the following Monday's cutoff hour —
/// warehouse pick/pack does not run on weekends. SelfFulfillment orders are
/// never time-barred here; their adapter checks the live shipment status.
pub fn evaluate(
    order: &Order,
    method: FulfillmentMethod,
    now: DateTime<Utc>,
    config: &EligibilityConfig,
) -> EligibilityResult {
    match method {
        FulfillmentMethod::WarehouseEmail | FulfillmentMethod::ThirdPartyLogisticsApi => {
            let deadline = modification_deadline(order.placed_at, config);
            if now < deadline {
                EligibilityResult::eligible(format!(
                    "order {} is within its modification window (until {})",
                    order.order_number,
                    deadline.format("%Y-%m-%d %H:%M UTC"),
                ))
            } else {
                EligibilityResult::ineligible(format!(
                    "the modification window for order {} closed at {}",
                    order.order_number,
                    deadline.format("%Y-%m-%d %H:%M UTC"),
                ))
            }
        }
        FulfillmentMethod::SelfFulfillment => EligibilityResult::eligible(
            "self-fulfilled orders are checked against live shipment status",
        ),
    }
}

/// The instant after which automated modification is no longer permitted.
///
/// Deterministic in `placed_at` — this is what makes time-based
/// ineligibility monotonic.
pub fn modification_deadline(
    placed_at: DateTime<Utc>,
    config: &EligibilityConfig,
) -> DateTime<Utc> {
    if let Some(monday) = weekend_grace_deadline(placed_at, config) {
        monday
    } else {
        placed_at + chrono::Duration::hours(config.flat_window_hours)
    }
}

/// Monday-noon deadline for orders placed Friday afternoon through Sunday,
/// or `None` for orders covered by the flat window.
fn weekend_grace_deadline(
    placed_at: DateTime<Utc>,
    config: &EligibilityConfig,
) -> Option<DateTime<Utc>> {
    let days_to_monday = match placed_at.weekday() {
        Weekday::Fri if placed_at.hour() >= config.friday_afternoon_hour => 3,
        Weekday::Sat => 2,
        Weekday::Sun => 1,
        _ => return None,
    };

    let monday = placed_at
        .date_naive()
        .checked_add_days(Days::new(days_to_monday))?
        .and_hms_opt(config.monday_cutoff_hour, 0, 0)?;
    Some(monday.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order_placed_at(placed_at: DateTime<Utc>) -> Order {
        Order {
            order_number: "ORD-1001".into(),
            user_id: "merchant-1".into(),
            customer_email: "customer@example.com".into(),
            placed_at,
            item_summary: "2x widget".into(),
            total: dec!(49.90),
            shipping_address: None,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // 2025-06-02 is a Monday.

    #[test]
    fn weekday_order_within_flat_window() {
        let order = order_placed_at(utc(2025, 6, 3, 10, 0)); // Tuesday
        let result = evaluate(
            &order,
            FulfillmentMethod::WarehouseEmail,
            utc(2025, 6, 3, 12, 0),
            &EligibilityConfig::default(),
        );
        assert!(result.eligible);
    }

    #[test]
    fn weekday_order_past_flat_window() {
        let order = order_placed_at(utc(2025, 6, 3, 10, 0)); // Tuesday
        let result = evaluate(
            &order,
            FulfillmentMethod::WarehouseEmail,
            utc(2025, 6, 4, 10, 1),
            &EligibilityConfig::default(),
        );
        assert!(!result.eligible);
        assert!(result.reason.contains("closed"));
    }

    #[test]
    fn friday_afternoon_order_eligible_on_saturday() {
        // Friday 2025-06-06 15:00 — request arrives Saturday.
        let order = order_placed_at(utc(2025, 6, 6, 15, 0));
        let result = evaluate(
            &order,
            FulfillmentMethod::WarehouseEmail,
            utc(2025, 6, 7, 18, 0),
            &EligibilityConfig::default(),
        );
        assert!(result.eligible, "weekend grace should apply: {}", result.reason);
    }

    #[test]
    fn friday_afternoon_order_eligible_until_monday_noon() {
        let order = order_placed_at(utc(2025, 6, 6, 15, 0)); // Friday 3pm
        let config = EligibilityConfig::default();

        let just_before = evaluate(
            &order,
            FulfillmentMethod::ThirdPartyLogisticsApi,
            utc(2025, 6, 9, 11, 59),
            &config,
        );
        assert!(just_before.eligible);

        let at_noon = evaluate(
            &order,
            FulfillmentMethod::ThirdPartyLogisticsApi,
            utc(2025, 6, 9, 12, 0),
            &config,
        );
        assert!(!at_noon.eligible);
    }

    #[test]
    fn friday_morning_order_gets_flat_window() {
        // Friday 09:00 — before the afternoon cutoff, so flat 24h applies.
        let order = order_placed_at(utc(2025, 6, 6, 9, 0));
        let deadline = modification_deadline(order.placed_at, &EligibilityConfig::default());
        assert_eq!(deadline, utc(2025, 6, 7, 9, 0));
    }

    #[test]
    fn saturday_and_sunday_orders_deadline_monday() {
        let config = EligibilityConfig::default();
        let saturday = modification_deadline(utc(2025, 6, 7, 8, 0), &config);
        let sunday = modification_deadline(utc(2025, 6, 8, 22, 0), &config);
        assert_eq!(saturday, utc(2025, 6, 9, 12, 0));
        assert_eq!(sunday, utc(2025, 6, 9, 12, 0));
    }

    #[test]
    fn time_based_ineligibility_is_monotonic() {
        let order = order_placed_at(utc(2025, 6, 3, 10, 0)); // Tuesday
        let config = EligibilityConfig::default();
        let t1 = utc(2025, 6, 4, 11, 0);

        let at_t1 = evaluate(&order, FulfillmentMethod::WarehouseEmail, t1, &config);
        assert!(!at_t1.eligible);

        // Every later instant must also be ineligible.
        for hours in [1, 6, 24, 24 * 7] {
            let later = t1 + chrono::Duration::hours(hours);
            let result = evaluate(&order, FulfillmentMethod::WarehouseEmail, later, &config);
            assert!(!result.eligible, "reopened at +{hours}h");
        }
    }

    #[test]
    fn self_fulfillment_is_never_time_barred() {
        let order = order_placed_at(utc(2020, 1, 1, 0, 0));
        let result = evaluate(
            &order,
            FulfillmentMethod::SelfFulfillment,
            utc(2025, 6, 3, 10, 0),
            &EligibilityConfig::default(),
        );
        assert!(result.eligible);
    }

    #[test]
    fn custom_cutoff_hours_respected() {
        let config = EligibilityConfig {
            flat_window_hours: 48,
            friday_afternoon_hour: 14,
            monday_cutoff_hour: 9,
        };
        // Friday 13:00 is before the 14:00 cutoff — flat 48h window.
        assert_eq!(
            modification_deadline(utc(2025, 6, 6, 13, 0), &config),
            utc(2025, 6, 8, 13, 0),
        );
        // Friday 14:00 gets weekend grace until Monday 09:00.
        assert_eq!(
            modification_deadline(utc(2025, 6, 6, 14, 0), &config),
            utc(2025, 6, 9, 9, 0),
        );
    }
}
