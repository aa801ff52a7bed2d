use std::collections::HashMap;

use rust_decimal::Decimal;

pub const BASE_CURRENCY: &str = "USD";

/// Configured currency -> USD conversion table. Live rate lookup is owned by
/// an upstream service; this core only ever applies a rate it was handed.
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    to_usd: HashMap<String, Decimal>,
}

impl ExchangeRates {
    pub fn new(to_usd: HashMap<String, Decimal>) -> Self {
        Self { to_usd }
    }

    /// Parses a `CUR=rate,CUR=rate` table, e.g. `NGN=0.00065,GHS=0.085`.
    /// Malformed entries are skipped.
    pub fn from_table(table: &str) -> Self {
        let mut to_usd = HashMap::new();
        for entry in table.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some((currency, rate)) = entry.split_once('=') {
                if let Ok(rate) = rate.trim().parse::<Decimal>() {
                    to_usd.insert(currency.trim().to_uppercase(), rate);
                }
            }
        }
        Self { to_usd }
    }

    pub fn rate_to_usd(&self, currency: &str) -> Option<Decimal> {
        if currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Some(Decimal::ONE);
        }
        self.to_usd.get(&currency.to_uppercase()).copied()
    }

    /// USD value of `amount` denominated in `currency`.
    pub fn to_usd(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        self.rate_to_usd(currency).map(|rate| amount * rate)
    }

    /// Local value of a USD amount, together with the applied rate.
    pub fn from_usd(&self, amount_usd: Decimal, currency: &str) -> Option<(Decimal, Decimal)> {
        let rate = self.rate_to_usd(currency)?;
        if rate.is_zero() {
            return None;
        }
        Some((amount_usd / rate, rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_table() {
        let rates = ExchangeRates::from_table("NGN=0.00065, GHS=0.085,bogus,X=");
        assert_eq!(rates.rate_to_usd("NGN"), Some(Decimal::new(65, 5)));
        assert_eq!(rates.rate_to_usd("ngn"), Some(Decimal::new(65, 5)));
        assert_eq!(rates.rate_to_usd("KES"), None);
    }

    #[test]
    fn usd_is_identity() {
        let rates = ExchangeRates::from_table("");
        assert_eq!(rates.to_usd(Decimal::new(1000, 2), "USD"), Some(Decimal::new(1000, 2)));
    }

    #[test]
    fn converts_both_directions() {
        let rates = ExchangeRates::from_table("NGN=0.001");
        assert_eq!(
            rates.to_usd(Decimal::from(15000), "NGN"),
            Some(Decimal::from(15))
        );
        let (local, rate) = rates.from_usd(Decimal::from(15), "NGN").unwrap();
        assert_eq!(local, Decimal::from(15000));
        assert_eq!(rate, Decimal::new(1, 3));
    }
}
