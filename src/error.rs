use rust_decimal::Decimal;
use thiserror::Error;

pub type TradingResult<T> = Result<T, TradingError>;

#[derive(Debug, Error)]
pub enum TradingError {
    #[error("insufficient funds: order needs {required}, balance is {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("insufficient shares: tried to sell {requested}, only {owned} owned")]
    InsufficientShares { requested: u64, owned: u64 },

    #[error("no market data for {scope}")]
    NoData { scope: String },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl TradingError {
    pub fn no_data(scope: impl Into<String>) -> Self {
        TradingError::NoData {
            scope: scope.into(),
        }
    }

    /// Rejections that the simulator counts as mistakes.
    pub fn is_mistake(&self) -> bool {
        matches!(
            self,
            TradingError::InsufficientFunds { .. } | TradingError::InsufficientShares { .. }
        )
    }

    /// Errors after which a driving loop may skip ahead and keep going.
    pub fn is_recoverable(&self) -> bool {
        self.is_mistake() || matches!(self, TradingError::NoData { .. })
    }
}
