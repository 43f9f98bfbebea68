use thiserror::Error;

/// Largest admin adjustment applied in one call, in credits either way.
pub const ADMIN_ADJUSTMENT_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreditError {
    #[error("amount must be between -{ADMIN_ADJUSTMENT_LIMIT} and {ADMIN_ADJUSTMENT_LIMIT} (excluding 0)")]
    BadAmount,
    #[error("balance would go negative")]
    InsufficientCredits,
}

impl CreditError {
    /// Stable machine-readable code exposed in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            CreditError::BadAmount => "BAD_AMOUNT",
            CreditError::InsufficientCredits => "INSUFFICIENT_CREDITS",
        }
    }
}

pub fn validate_adjustment(amount: i64) -> Result<(), CreditError> {
    if amount == 0 || amount < -ADMIN_ADJUSTMENT_LIMIT || amount > ADMIN_ADJUSTMENT_LIMIT {
        return Err(CreditError::BadAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_bounds() {
        assert_eq!(validate_adjustment(0), Err(CreditError::BadAmount));
        assert_eq!(validate_adjustment(21), Err(CreditError::BadAmount));
        assert_eq!(validate_adjustment(-21), Err(CreditError::BadAmount));
        assert_eq!(validate_adjustment(25), Err(CreditError::BadAmount));
        assert!(validate_adjustment(20).is_ok());
        assert!(validate_adjustment(-20).is_ok());
        assert!(validate_adjustment(1).is_ok());
        assert!(validate_adjustment(-5).is_ok());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CreditError::BadAmount.code(), "BAD_AMOUNT");
        assert_eq!(
            CreditError::InsufficientCredits.code(),
            "INSUFFICIENT_CREDITS"
        );
    }
}
