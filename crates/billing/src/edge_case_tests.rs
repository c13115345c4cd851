// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge case tests for the billing engine
//!
//! Boundary conditions for:
//! - Pricing and rounding (minimum charge, per-step rounding)
//! - Invoice numbering (year scoping, ordering)
//! - Idempotency keys
//! - Period arithmetic (month-end clamping under repeated renewals)
//! - Callback signatures

mod pricing_boundaries {
    use crate::pricing::*;
    use crate::settings::BillingRates;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn rates() -> BillingRates {
        BillingRates {
            plan_a_price: dec!(99.00),
            plan_b_price: dec!(199.00),
            trial_days: 14,
            transaction_fee_rate: dec!(0.005),
            vat_rate: dec!(0.18),
        }
    }

    #[test]
    fn fee_just_under_minimum_is_deferred_by_callers() {
        // 100 transacted -> 0.50 fee + 0.09 VAT = 0.59, under the 1.00 floor
        let f = transaction_fee(dec!(100), None, &rates());
        assert_eq!(f.total_fee, dec!(0.59));
        assert!(f.total_fee < MINIMUM_CHARGE);
    }

    #[test]
    fn fee_at_minimum_boundary() {
        // 169.50 transacted -> fee 0.85 (0.8475 rounded up), VAT 0.15, total 1.00
        let f = transaction_fee(dec!(169.50), None, &rates());
        assert_eq!(f.fee_amount, dec!(0.85));
        assert_eq!(f.vat_amount, dec!(0.15));
        assert_eq!(f.total_fee, dec!(1.00));
        assert!(f.total_fee >= MINIMUM_CHARGE);
    }

    #[test]
    fn per_window_rounding_is_deterministic_across_many_small_windows() {
        // Each small window rounds independently; totals never carry sub-cent
        // residue forward
        let mut settled = Decimal::ZERO;
        for _ in 0..10 {
            let f = transaction_fee(dec!(33.33), None, &rates());
            assert_eq!(f.fee_amount, dec!(0.17));
            assert_eq!(f.vat_amount, dec!(0.03));
            settled += f.total_fee;
        }
        assert_eq!(settled, dec!(2.00));
    }

    #[test]
    fn subtotal_plus_vat_equals_total_across_rates() {
        for (turnover, rate) in [
            (dec!(0.01), dec!(0.005)),
            (dec!(999999.99), dec!(0.005)),
            (dec!(1234.56), dec!(0.02)),
            (dec!(50), dec!(0.1)),
        ] {
            let f = transaction_fee(turnover, Some(rate), &rates());
            assert_eq!(f.fee_amount + f.vat_amount, f.total_fee);
        }
    }
}

mod invoice_numbering {
    use crate::ledger::format_invoice_number;

    #[test]
    fn sequences_are_year_scoped() {
        // The same sequence number is legal in different years
        assert_eq!(format_invoice_number(2025, 17), "QS-2025-000017");
        assert_eq!(format_invoice_number(2026, 17), "QS-2026-000017");
    }

    #[test]
    fn lexicographic_order_matches_numeric_order() {
        let numbers: Vec<String> = (1..=1000).map(|n| format_invoice_number(2026, n)).collect();
        let mut sorted = numbers.clone();
        sorted.sort();
        assert_eq!(numbers, sorted);
    }
}

mod idempotency_keys {
    use crate::gateway::idempotency_key;
    use quickshop_shared::InvoiceType;
    use time::macros::datetime;
    use uuid::Uuid;

    #[test]
    fn adjacent_windows_get_distinct_keys() {
        let store = Uuid::new_v4();
        let a = idempotency_key(
            store,
            InvoiceType::TransactionFee,
            datetime!(2026-01-01 00:00 UTC),
            datetime!(2026-02-01 00:00 UTC),
        );
        let b = idempotency_key(
            store,
            InvoiceType::TransactionFee,
            datetime!(2026-02-01 00:00 UTC),
            datetime!(2026-03-01 00:00 UTC),
        );
        assert_ne!(a, b);
    }
}

mod period_arithmetic {
    use crate::periods::add_one_month;
    use time::macros::datetime;

    #[test]
    fn repeated_renewals_from_month_end_stay_clamped() {
        // Jan 31 -> Feb 28 -> Mar 28: once clamped, the anchor day is lost.
        // Renewal advances from the stored period end, so this is the defined
        // behavior, not drift.
        let jan = datetime!(2026-01-31 00:00 UTC);
        let feb = add_one_month(jan);
        let mar = add_one_month(feb);
        assert_eq!(feb, datetime!(2026-02-28 00:00 UTC));
        assert_eq!(mar, datetime!(2026-03-28 00:00 UTC));
    }

    #[test]
    fn a_year_of_renewals_is_twelve_distinct_periods() {
        let mut end = datetime!(2026-01-15 00:00 UTC);
        let mut seen = vec![end];
        for _ in 0..12 {
            end = add_one_month(end);
            assert!(!seen.contains(&end));
            seen.push(end);
        }
        assert_eq!(end, datetime!(2027-01-15 00:00 UTC));
    }
}

mod callback_signatures {
    use crate::gateway::{sign_callback_body, verify_callback_signature};

    #[test]
    fn empty_body_still_signs_and_verifies() {
        let sig = sign_callback_body(b"", "secret").unwrap();
        assert!(verify_callback_signature(b"", &sig, "secret").is_ok());
        assert!(verify_callback_signature(b"x", &sig, "secret").is_err());
    }

    #[test]
    fn signature_is_over_raw_bytes_not_parsed_json() {
        // Whitespace-differing bodies with identical JSON meaning must not
        // cross-verify
        let compact = br#"{"status":"success"}"#;
        let padded = br#"{ "status": "success" }"#;
        let sig = sign_callback_body(compact, "secret").unwrap();
        assert!(verify_callback_signature(padded, &sig, "secret").is_err());
    }

    #[test]
    fn truncated_signature_rejected() {
        let sig = sign_callback_body(b"body", "secret").unwrap();
        let truncated = &sig[..sig.len() - 4];
        assert!(verify_callback_signature(b"body", truncated, "secret").is_err());
    }
}
