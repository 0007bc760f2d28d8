use super::alerts::{AlertDefinition, AlertStore};
use super::tick::PriceTick;
use log::debug;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// When true an alert keeps notifying on every tick that satisfies it.
    /// When false it disarms after the first notification.
    pub refire_on_every_tick: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            refire_on_every_tick: true,
        }
    }
}

pub struct AlertEvaluator {
    config: EvaluatorConfig,
}

impl AlertEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Checks every armed alert against the tick and returns one message per alert that fired.
    pub fn evaluate(&self, tick: &PriceTick, store: &mut AlertStore) -> Vec<String> {
        // Every alert in a store shares one symbol, so a mismatch rules them all out at once.
        if store.symbol() != Some(tick.symbol.as_str()) {
            return Vec::new();
        }

        let mut fired = Vec::new();
        let mut spent = Vec::new();
        for (index, alert) in store.all().iter().enumerate().filter(|(_, a)| a.armed) {
            if !alert.direction.is_crossed(tick.price, alert.target_price) {
                continue;
            }

            debug!("Alert {} fired at {}", alert, tick.price);
            fired.push(alert_message(alert, tick.price));
            if !self.config.refire_on_every_tick {
                spent.push(index);
            }
        }

        for index in spent {
            store.set_armed(index, false);
        }
        fired
    }
}

pub fn alert_message(alert: &AlertDefinition, price: Decimal) -> String {
    format!(
        "{} price crossed {} {}! Current price: {}",
        alert.symbol,
        alert.direction.label(),
        alert.target_price,
        price
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::alerts::Direction;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn store_with(symbol: &str, price: &str, direction: Direction) -> AlertStore {
        let mut store = AlertStore::default();
        store
            .add(AlertDefinition::parse(symbol, price, direction).unwrap())
            .unwrap();
        store
    }

    fn tick(symbol: &str, price: &str) -> PriceTick {
        PriceTick::new(symbol, dec(price))
    }

    #[test]
    fn cross_up_fires_at_or_above_target() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig::default());
        let mut store = store_with("BTCUSDT", "50000", Direction::CrossUp);

        let fired = evaluator.evaluate(&tick("BTCUSDT", "50000"), &mut store);
        assert_eq!(
            fired,
            vec!["BTCUSDT price crossed UP 50000! Current price: 50000".to_string()]
        );

        assert!(evaluator.evaluate(&tick("BTCUSDT", "49999.99"), &mut store).is_empty());
    }

    #[test]
    fn other_symbols_are_ignored() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig::default());
        let mut store = store_with("BTCUSDT", "50000", Direction::CrossUp);

        assert!(evaluator.evaluate(&tick("ETHUSDT", "60000"), &mut store).is_empty());
    }

    #[test]
    fn cross_down_fires_at_or_below_target() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig::default());
        let mut store = store_with("BTCUSDT", "50000", Direction::CrossDown);

        let fired = evaluator.evaluate(&tick("BTCUSDT", "50000"), &mut store);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].contains("crossed DOWN 50000"));

        assert!(evaluator.evaluate(&tick("BTCUSDT", "50000.01"), &mut store).is_empty());
    }

    #[test]
    fn refire_enabled_notifies_on_every_qualifying_tick() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig {
            refire_on_every_tick: true,
        });
        let mut store = store_with("BTCUSDT", "50000", Direction::CrossUp);

        assert_eq!(evaluator.evaluate(&tick("BTCUSDT", "50001"), &mut store).len(), 1);
        assert_eq!(evaluator.evaluate(&tick("BTCUSDT", "50002"), &mut store).len(), 1);
        assert!(store.all()[0].armed);
    }

    #[test]
    fn refire_disabled_notifies_once() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig {
            refire_on_every_tick: false,
        });
        let mut store = store_with("BTCUSDT", "50000", Direction::CrossUp);

        assert_eq!(evaluator.evaluate(&tick("BTCUSDT", "50001"), &mut store).len(), 1);
        assert!(evaluator.evaluate(&tick("BTCUSDT", "50002"), &mut store).is_empty());
        assert!(!store.all()[0].armed);

        store.set_armed(0, true);
        assert_eq!(evaluator.evaluate(&tick("BTCUSDT", "50003"), &mut store).len(), 1);
    }

    #[test]
    fn only_qualifying_alerts_fire_in_store_order() {
        let evaluator = AlertEvaluator::new(EvaluatorConfig::default());
        let mut store = AlertStore::default();
        for (price, direction) in [
            ("100", Direction::CrossUp),
            ("120", Direction::CrossUp),
            ("110", Direction::CrossDown),
            ("90", Direction::CrossUp),
        ] {
            store
                .add(AlertDefinition::parse("SOLUSDT", price, direction).unwrap())
                .unwrap();
        }

        let fired = evaluator.evaluate(&tick("SOLUSDT", "105"), &mut store);
        assert_eq!(fired.len(), 3);
        assert!(fired[0].contains("UP 100!"));
        assert!(fired[1].contains("DOWN 110!"));
        assert!(fired[2].contains("UP 90!"));
    }
}
