use tracing::warn;

use crate::settings::FeeSchedule;

/// Converts a gateway-reported amount into the ledger's base currency (USD).
/// Runs once per settlement, before any split math, so every downstream
/// amount shares the same unit. An unrecognized currency passes through
/// unconverted; the gap is logged rather than hidden.
pub fn normalize_to_usd(amount: f64, currency: &str, fees: &FeeSchedule) -> f64 {
    match currency.to_ascii_lowercase().as_str() {
        "usd" => amount,
        "cop" => amount / fees.usd_cop_rate,
        other => {
            warn!(
                "No FX rule for currency '{}', passing {} through unconverted",
                other, amount
            );
            amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_is_identity() {
        let fees = FeeSchedule::default();
        assert_eq!(normalize_to_usd(12.5, "usd", &fees), 12.5);
        assert_eq!(normalize_to_usd(12.5, "USD", &fees), 12.5);
    }

    #[test]
    fn cop_round_trips_through_configured_rate() {
        let fees = FeeSchedule {
            usd_cop_rate: 4200.0,
            ..FeeSchedule::default()
        };
        let amount_cop = 84_000.0;
        let usd = normalize_to_usd(amount_cop, "cop", &fees);
        assert!((usd * fees.usd_cop_rate - amount_cop).abs() < 1e-9);
        assert!((usd - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_currency_passes_through() {
        let fees = FeeSchedule::default();
        assert_eq!(normalize_to_usd(99.0, "eur", &fees), 99.0);
    }
}
