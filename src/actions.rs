use crate::error::{TradingError, TradingResult};
use crate::trader::Trader;
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

pub const ACTION_COUNT: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedLot {
    Ten,
    Hundred,
    Thousand,
}

impl FixedLot {
    pub const ALL: [FixedLot; 3] = [FixedLot::Ten, FixedLot::Hundred, FixedLot::Thousand];

    pub fn shares(self) -> u64 {
        match self {
            FixedLot::Ten => 10,
            FixedLot::Hundred => 100,
            FixedLot::Thousand => 1000,
        }
    }

    fn offset(self) -> usize {
        match self {
            FixedLot::Ten => 0,
            FixedLot::Hundred => 1,
            FixedLot::Thousand => 2,
        }
    }
}

/// Sizing directive produced by a decision source once per tick.
///
/// Actions never carry a price; the caller supplies it when the action is
/// applied. Integer codes are stable so that model outputs can index them:
/// the first five match the historical `HOLD`..`SELL_ALL` layout and the
/// fixed lots follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TradeAction {
    Hold,
    BuyHalf,
    BuyAll,
    Buy(FixedLot),
    SellHalf,
    SellAll,
    Sell(FixedLot),
}

impl TradeAction {
    pub fn all() -> [TradeAction; ACTION_COUNT] {
        let mut actions = [TradeAction::Hold; ACTION_COUNT];
        for (idx, slot) in actions.iter_mut().enumerate() {
            if let Some(action) = TradeAction::from_index(idx) {
                *slot = action;
            }
        }
        actions
    }

    pub fn index(self) -> usize {
        match self {
            TradeAction::Hold => 0,
            TradeAction::BuyHalf => 1,
            TradeAction::BuyAll => 2,
            TradeAction::SellHalf => 3,
            TradeAction::SellAll => 4,
            TradeAction::Buy(lot) => 5 + lot.offset(),
            TradeAction::Sell(lot) => 8 + lot.offset(),
        }
    }

    pub fn from_index(index: usize) -> Option<TradeAction> {
        let action = match index {
            0 => TradeAction::Hold,
            1 => TradeAction::BuyHalf,
            2 => TradeAction::BuyAll,
            3 => TradeAction::SellHalf,
            4 => TradeAction::SellAll,
            5..=7 => TradeAction::Buy(FixedLot::ALL[index - 5]),
            8..=10 => TradeAction::Sell(FixedLot::ALL[index - 8]),
            _ => return None,
        };
        Some(action)
    }

    pub fn name(self) -> &'static str {
        match self {
            TradeAction::Hold => "hold",
            TradeAction::BuyHalf => "buy_half",
            TradeAction::BuyAll => "buy_all",
            TradeAction::Buy(FixedLot::Ten) => "buy_10",
            TradeAction::Buy(FixedLot::Hundred) => "buy_100",
            TradeAction::Buy(FixedLot::Thousand) => "buy_1000",
            TradeAction::SellHalf => "sell_half",
            TradeAction::SellAll => "sell_all",
            TradeAction::Sell(FixedLot::Ten) => "sell_10",
            TradeAction::Sell(FixedLot::Hundred) => "sell_100",
            TradeAction::Sell(FixedLot::Thousand) => "sell_1000",
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(
            self,
            TradeAction::BuyHalf | TradeAction::BuyAll | TradeAction::Buy(_)
        )
    }

    pub fn is_sell(self) -> bool {
        matches!(
            self,
            TradeAction::SellHalf | TradeAction::SellAll | TradeAction::Sell(_)
        )
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TradeAction {
    type Err = TradingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        TradeAction::all()
            .into_iter()
            .find(|action| action.name() == normalized)
            .ok_or_else(|| TradingError::InvalidOrder(format!("unknown trade action '{}'", raw)))
    }
}

impl TryFrom<String> for TradeAction {
    type Error = TradingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TradeAction> for String {
    fn from(action: TradeAction) -> Self {
        action.name().to_string()
    }
}

/// Concrete order an action resolves to for the current account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderIntent {
    Hold,
    Buy(u64),
    Sell(u64),
}

/// Turns a relative action into a share count.
///
/// Halves round down. A relative action with no capacity still resolves to
/// one share so that the trader rejects it and the attempt is counted.
pub fn resolve_order(
    action: TradeAction,
    cash: Decimal,
    shares: u64,
    price: Decimal,
) -> TradingResult<OrderIntent> {
    let intent = match action {
        TradeAction::Hold => OrderIntent::Hold,
        TradeAction::BuyHalf | TradeAction::BuyAll => {
            if price <= Decimal::ZERO {
                return Err(TradingError::InvalidOrder(format!(
                    "relative buy needs a price > 0 (value: {})",
                    price
                )));
            }
            let capacity = if cash <= Decimal::ZERO {
                0
            } else {
                cash.checked_div(price)
                    .ok_or_else(|| {
                        TradingError::InvalidOrder(format!(
                            "buying capacity overflows ({} / {})",
                            cash, price
                        ))
                    })?
                    .floor()
                    .to_u64()
                    .unwrap_or(u64::MAX)
            };
            let count = if action == TradeAction::BuyHalf {
                capacity / 2
            } else {
                capacity
            };
            OrderIntent::Buy(count.max(1))
        }
        TradeAction::Buy(lot) => OrderIntent::Buy(lot.shares()),
        TradeAction::SellHalf => OrderIntent::Sell((shares / 2).max(1)),
        TradeAction::SellAll => OrderIntent::Sell(shares.max(1)),
        TradeAction::Sell(lot) => OrderIntent::Sell(lot.shares()),
    };
    Ok(intent)
}

#[derive(Debug)]
pub enum ActionOutcome {
    Held,
    Bought(u64),
    Sold(u64),
    /// The trader refused the order; the error is one of the mistake kinds.
    Rejected(TradingError),
}

impl ActionOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ActionOutcome::Rejected(_))
    }
}

/// Applies `action` at `price` through any trader.
///
/// Mistakes come back as [`ActionOutcome::Rejected`]; every other error
/// propagates.
pub fn apply_action<T: Trader + ?Sized>(
    trader: &mut T,
    action: TradeAction,
    price: Decimal,
) -> TradingResult<ActionOutcome> {
    let cash = trader.balance()?;
    let shares = trader.shares()?;
    let intent = resolve_order(action, cash, shares, price)?;
    debug!(
        "{}: {} at {} resolved to {:?}",
        trader.symbol(),
        action,
        price,
        intent
    );

    let result = match intent {
        OrderIntent::Hold => {
            trader.hold();
            return Ok(ActionOutcome::Held);
        }
        OrderIntent::Buy(count) => trader.buy(count, price).map(|_| ActionOutcome::Bought(count)),
        OrderIntent::Sell(count) => trader
            .sell(count, price)
            .map(|_| ActionOutcome::Sold(count)),
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_mistake() => Ok(ActionOutcome::Rejected(err)),
        Err(err) => Err(err),
    }
}
