use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriceWatchError {
    #[error("WebSocket error: {0}")]
    WebsocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why an alert submission was refused. Nothing is stored when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("Symbol is required and may only contain letters and digits")]
    InvalidSymbol,

    #[error("Target price must be a positive number")]
    InvalidPrice,

    #[error("Direction must be cross_up or cross_down")]
    InvalidDirection,

    #[error("This session already watches {expected}; {found} needs its own session")]
    SymbolMismatch { expected: String, found: String },

    #[error("Maximum of {0} alerts allowed")]
    CapacityExceeded(usize),
}

impl Rejected {
    /// Capacity problems are corrected by removing alerts, everything else by fixing input.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Rejected::CapacityExceeded(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Please add at least one alert before starting")]
    NoAlerts,

    #[error("Monitoring is already running")]
    AlreadyMonitoring,
}

/// A feed frame that could not be turned into a tick. Logged and dropped.
#[derive(Error, Debug)]
pub enum FeedDecodeError {
    #[error("malformed trade event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty symbol in trade event")]
    EmptySymbol,
}

#[derive(Error, Debug)]
pub enum AudioDeviceError {
    #[error("audio device unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
}
