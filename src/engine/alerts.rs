use crate::error::Rejected;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

pub const MAX_ALERTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    CrossUp,
    CrossDown,
}

impl Direction {
    /// Name used by the alert submission API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CrossUp => "cross_up",
            Direction::CrossDown => "cross_down",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::CrossUp => "UP",
            Direction::CrossDown => "DOWN",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Direction::CrossUp => Direction::CrossDown,
            Direction::CrossDown => Direction::CrossUp,
        }
    }

    /// Threshold test, inclusive on both sides.
    pub fn is_crossed(&self, price: Decimal, target: Decimal) -> bool {
        match self {
            Direction::CrossUp => price >= target,
            Direction::CrossDown => price <= target,
        }
    }
}

impl FromStr for Direction {
    type Err = Rejected;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cross_up" | "up" => Ok(Direction::CrossUp),
            "cross_down" | "down" => Ok(Direction::CrossDown),
            _ => Err(Rejected::InvalidDirection),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CROSS {}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDefinition {
    pub symbol: String,
    pub target_price: Decimal,
    pub direction: Direction,
    pub armed: bool,
}

impl AlertDefinition {
    /// Validates raw user input the same way the entry form does.
    pub fn parse(symbol: &str, price: &str, direction: Direction) -> Result<Self, Rejected> {
        let target_price = parse_price(price).ok_or(Rejected::InvalidPrice)?;
        if target_price <= Decimal::ZERO {
            return Err(Rejected::InvalidPrice);
        }

        let symbol = normalize_symbol(symbol)?;

        Ok(Self {
            symbol,
            target_price,
            direction,
            armed: true,
        })
    }
}

impl fmt::Display for AlertDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.symbol, self.direction, self.target_price)
    }
}

/// Plain decimals, or exponent notation such as `1e5`.
fn parse_price(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

pub fn normalize_symbol(raw: &str) -> Result<String, Rejected> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Rejected::InvalidSymbol);
    }
    Ok(symbol)
}

/// Bounded, insertion-ordered set of alerts for a single instrument.
#[derive(Debug, Clone)]
pub struct AlertStore {
    alerts: Vec<AlertDefinition>,
    capacity: usize,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::with_capacity(MAX_ALERTS)
    }
}

impl AlertStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, def: AlertDefinition) -> Result<(), Rejected> {
        if let Some(expected) = self.symbol() {
            if expected != def.symbol {
                return Err(Rejected::SymbolMismatch {
                    expected: expected.to_string(),
                    found: def.symbol,
                });
            }
        }

        if self.is_full() {
            return Err(Rejected::CapacityExceeded(self.capacity));
        }

        self.alerts.push(def);
        Ok(())
    }

    pub fn all(&self) -> &[AlertDefinition] {
        &self.alerts
    }

    pub fn set_armed(&mut self, index: usize, armed: bool) {
        if let Some(alert) = self.alerts.get_mut(index) {
            alert.armed = armed;
        }
    }

    /// The instrument this store is bound to, taken from the first alert.
    pub fn symbol(&self) -> Option<&str> {
        self.alerts.first().map(|a| a.symbol.as_str())
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.alerts.len() >= self.capacity
    }
}
