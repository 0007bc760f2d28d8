use crate::api::binance::ws::StreamConfig;
use crate::engine::alarm::AlarmConfig;
use crate::engine::alerts::MAX_ALERTS;
use crate::engine::evaluator::EvaluatorConfig;
use log::warn;
use std::str::FromStr;
use std::time::Duration;

const FEED_URL_VAR: &str = "PRICEWATCH_FEED_URL";
const RECONNECT_SECS_VAR: &str = "PRICEWATCH_RECONNECT_SECS";
const REFIRE_VAR: &str = "PRICEWATCH_REFIRE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub stream: StreamConfig,
    pub alarm: AlarmConfig,
    pub evaluator: EvaluatorConfig,
    pub max_alerts: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            alarm: AlarmConfig::default(),
            evaluator: EvaluatorConfig::default(),
            max_alerts: MAX_ALERTS,
        }
    }
}

impl Settings {
    /// Defaults with the shell's environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(FEED_URL_VAR).filter(|u| !u.trim().is_empty()) {
            self.stream.base_url = url.trim().to_string();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, RECONNECT_SECS_VAR) {
            self.stream.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(refire) = parse_var::<bool>(&lookup, REFIRE_VAR) {
            self.evaluator.refire_on_every_tick = refire;
        }
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
