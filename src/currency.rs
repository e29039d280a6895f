use serde::{Deserialize, Serialize};

/// The base currency every amount in the ledger is denominated in.
///
/// Amounts are stored as integer minor units (centavos for PHP); this type
/// only converts at the edges, where display amounts come and go as `f64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub decimals: u8,
}

impl Currency {
    pub fn new(code: &str, decimals: u8) -> Self {
        Self {
            code: code.to_string(),
            decimals,
        }
    }

    pub fn php() -> Self {
        Self::new("PHP", 2)
    }

    fn scale(&self) -> f64 {
        10_f64.powi(self.decimals as i32)
    }

    /// Round a display amount to the nearest minor unit.
    pub fn to_minor(&self, display_amount: f64) -> i64 {
        (display_amount * self.scale()).round() as i64
    }

    pub fn to_display(&self, minor_amount: i64) -> f64 {
        minor_amount as f64 / self.scale()
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::php()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_conversion() {
        let php = Currency::php();
        assert_eq!(php.to_minor(100.50), 10050);
        assert_eq!(php.to_display(10050), 100.50);
        assert_eq!(php.to_minor(1000.0), 100_000);
        assert_eq!(php.to_minor(0.019), 2);
        assert_eq!(php.to_minor(-12.5), -1250);
    }
}
