//! Trade signal entity carried on the upstream channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trade action requested by the signal originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    CloseBuy,
    CloseSell,
    Modify,
}

impl Action {
    /// All actions, in wire order.
    pub const ALL: [Action; 5] = [
        Action::Buy,
        Action::Sell,
        Action::CloseBuy,
        Action::CloseSell,
        Action::Modify,
    ];

    /// Wire representation of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::CloseBuy => "CLOSE_BUY",
            Action::CloseSell => "CLOSE_SELL",
            Action::Modify => "MODIFY",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A trade signal published by a master account.
///
/// Produced externally and only ever read by the relay. The JSON form
/// (`serde`) is the structured-text representation sent to subscribers
/// that ask for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Identifier of the signal originator.
    pub master_id: u64,
    /// Instrument identifier (e.g. "EURUSD").
    pub symbol: String,
    /// Requested action.
    pub action: Action,
    /// Price attached to the signal.
    pub price: f64,
}

impl TradeSignal {
    pub fn new(master_id: u64, symbol: impl Into<String>, action: Action, price: f64) -> Self {
        Self {
            master_id,
            symbol: symbol.into(),
            action,
            price,
        }
    }

    /// Render the structured-text form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trips_through_str() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
        }
        assert!("HOLD".parse::<Action>().is_err());
        assert!("buy".parse::<Action>().is_err());
    }

    #[test]
    fn test_json_shape() {
        let signal = TradeSignal::new(7, "EURUSD", Action::CloseBuy, 1.0842);
        let json = signal.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"master_id":7,"symbol":"EURUSD","action":"CLOSE_BUY","price":1.0842}"#
        );

        let parsed: TradeSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, signal);
    }
}
