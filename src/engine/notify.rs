use super::alarm::{Alarm, AlarmKind, AlarmTicket};
use crate::api::binance::ws::ConnectionState;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The presentation layer as seen from the engine.
pub trait Shell: Send + Sync {
    fn on_alert_fired(&self, notification: Notification);
    fn on_connection_state_changed(&self, state: ConnectionState);
}

/// A fired alert waiting for the user. Acknowledging it silences its alarm.
pub struct Notification {
    message: String,
    ack: Acknowledgement,
}

struct Acknowledgement {
    alarm: Arc<Alarm>,
    ticket: AlarmTicket,
}

impl Notification {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn acknowledge(self) {
        self.ack.alarm.stop(self.ack.ticket);
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("message", &self.message)
            .field("ticket", &self.ack.ticket)
            .finish()
    }
}

/// "Tell the user": visual hand-off plus the audible alarm.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: String);
    fn connection_state_changed(&self, state: ConnectionState);
}

/// Drives the shared alarm for one monitoring session and forwards to the shell.
pub struct AlarmNotifier {
    alarm: Arc<Alarm>,
    shell: Arc<dyn Shell>,
    session: CancellationToken,
}

impl AlarmNotifier {
    pub fn new(alarm: Arc<Alarm>, shell: Arc<dyn Shell>, session: CancellationToken) -> Self {
        Self {
            alarm,
            shell,
            session,
        }
    }
}

impl NotificationSink for AlarmNotifier {
    fn notify(&self, message: String) {
        let Some(ticket) = self.alarm.start_within(AlarmKind::PriceAlert, &self.session) else {
            debug!("Session stopped, dropping alert: {}", message);
            return;
        };
        info!("{}", message);
        let ack = Acknowledgement {
            alarm: Arc::clone(&self.alarm),
            ticket,
        };
        self.shell.on_alert_fired(Notification { message, ack });
    }

    fn connection_state_changed(&self, state: ConnectionState) {
        match state {
            ConnectionState::Reconnecting => {
                warn!("Connection lost, sounding alarm until it comes back");
                self.alarm.start_within(AlarmKind::ConnectionLoss, &self.session);
            }
            ConnectionState::Connected | ConnectionState::Disconnected => {
                self.alarm.stop_kind(AlarmKind::ConnectionLoss)
            }
            ConnectionState::Connecting => {}
        }
        self.shell.on_connection_state_changed(state);
    }
}
