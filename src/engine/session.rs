use super::alarm::{Alarm, AlarmKind, AudioDevice};
use super::alerts::{AlertDefinition, AlertStore, Direction};
use super::evaluator::AlertEvaluator;
use super::notify::{AlarmNotifier, NotificationSink, Shell};
use super::tick::PriceTick;
use crate::api::binance::ws::{ConnectionState, StreamClient, StreamHandler};
use crate::config::Settings;
use crate::error::{Rejected, SessionError};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Glue between the feed and the alert engine for one running session.
struct TickRouter {
    store: Arc<Mutex<AlertStore>>,
    evaluator: AlertEvaluator,
    sink: Box<dyn NotificationSink>,
}

impl StreamHandler for TickRouter {
    fn on_tick(&self, tick: PriceTick) {
        let fired = {
            let mut store = self.store.lock();
            self.evaluator.evaluate(&tick, &mut store)
        };
        for message in fired {
            self.sink.notify(message);
        }
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.sink.connection_state_changed(state);
    }
}

/// Everything the shell drives: alert entry, start/stop, shutdown.
pub struct MonitorSession {
    settings: Settings,
    store: Arc<Mutex<AlertStore>>,
    alarm: Arc<Alarm>,
    shell: Arc<dyn Shell>,
    client: Option<StreamClient>,
}

impl MonitorSession {
    /// Must be called inside a tokio runtime; the alarm task starts here.
    pub fn new(settings: Settings, shell: Arc<dyn Shell>, device: Arc<dyn AudioDevice>) -> Self {
        let alarm = Alarm::spawn(settings.alarm, device);
        Self::with_alarm(settings, shell, alarm)
    }

    pub fn with_alarm(settings: Settings, shell: Arc<dyn Shell>, alarm: Arc<Alarm>) -> Self {
        let store = Arc::new(Mutex::new(AlertStore::with_capacity(settings.max_alerts)));
        Self {
            settings,
            store,
            alarm,
            shell,
            client: None,
        }
    }

    pub fn add_alert(&self, symbol: &str, price: &str, direction: &str) -> Result<(), Rejected> {
        let direction: Direction = direction.parse()?;
        self.add(AlertDefinition::parse(symbol, price, direction)?)
    }

    pub fn add(&self, alert: AlertDefinition) -> Result<(), Rejected> {
        let mut store = self.store.lock();
        store.add(alert.clone())?;
        info!("Added alert {} ({}/{})", alert, store.len(), self.settings.max_alerts);
        Ok(())
    }

    pub fn alerts(&self) -> Vec<AlertDefinition> {
        self.store.lock().all().to_vec()
    }

    pub fn clear_alerts(&self) -> Result<(), SessionError> {
        if self.is_monitoring() {
            return Err(SessionError::AlreadyMonitoring);
        }
        self.store.lock().clear();
        Ok(())
    }

    pub fn has_alerts(&self) -> bool {
        !self.store.lock().is_empty()
    }

    /// The alarm currently sounding, if any.
    pub fn alarm_sounding(&self) -> Option<AlarmKind> {
        self.alarm.current().map(|t| t.kind())
    }

    pub fn is_monitoring(&self) -> bool {
        self.client
            .as_ref()
            .map_or(false, |c| !c.is_stopped() && c.is_running())
    }

    /// Subscribes to the instrument of the first alert. A previous run that is
    /// still winding down is awaited first so its events cannot interleave.
    pub async fn start_monitoring(&mut self) -> Result<(), SessionError> {
        if self.is_monitoring() {
            return Err(SessionError::AlreadyMonitoring);
        }
        if let Some(previous) = self.client.take() {
            previous.join().await;
        }

        let symbol = self
            .store
            .lock()
            .symbol()
            .map(str::to_string)
            .ok_or(SessionError::NoAlerts)?;

        let cancel = CancellationToken::new();
        let router = TickRouter {
            store: Arc::clone(&self.store),
            evaluator: AlertEvaluator::new(self.settings.evaluator),
            sink: Box::new(AlarmNotifier::new(
                Arc::clone(&self.alarm),
                Arc::clone(&self.shell),
                cancel.clone(),
            )),
        };

        info!("Monitoring {}", symbol);
        self.client = Some(StreamClient::start(
            self.settings.stream.clone(),
            &symbol,
            Arc::new(router),
            cancel,
        ));
        Ok(())
    }

    /// Idempotent. The stream winds down in the background.
    pub fn stop_monitoring(&mut self) {
        if let Some(client) = self.client.as_ref() {
            client.stop();
        }
        self.alarm.stop_all();
    }

    /// Stops monitoring, waits for the stream to finish and ends the alarm task.
    pub async fn shutdown(mut self) {
        self.stop_monitoring();
        if let Some(client) = self.client.take() {
            client.join().await;
        }
        self.alarm.shutdown();
        info!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::alarm::tests::{fast_config, RecordingDevice};
    use crate::engine::notify::tests::RecordingShell;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    struct Harness {
        session: MonitorSession,
        shell: Arc<RecordingShell>,
        alarm: Arc<Alarm>,
    }

    fn harness(base_url: String, reconnect_delay: Duration) -> Harness {
        let mut settings = Settings::default();
        settings.stream.base_url = base_url;
        settings.stream.reconnect_delay = reconnect_delay;

        let alarm = Alarm::spawn(fast_config(), Arc::new(RecordingDevice::default()));
        let shell = Arc::new(RecordingShell::new(Arc::clone(&alarm)));
        let session = MonitorSession::with_alarm(settings, shell.clone(), Arc::clone(&alarm));
        Harness {
            session,
            shell,
            alarm,
        }
    }

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Serves `frames` on every connection after the first `drop_first`, which
    /// are closed straight away.
    async fn feed_server(frames: Vec<String>, drop_first: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok((stream, _)) = listener.accept().await {
                accepted += 1;
                let frames = frames.clone();
                let drop_now = accepted <= drop_first;
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    if drop_now {
                        let _ = ws.close(None).await;
                        return;
                    }
                    for frame in frames {
                        ws.send(Message::Text(frame)).await.unwrap();
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        format!("ws://{addr}/ws")
    }

    fn trade(symbol: &str, price: &str) -> String {
        format!(r#"{{"e":"trade","s":"{symbol}","p":"{price}","q":"1"}}"#)
    }

    #[tokio::test]
    async fn validates_input_before_storing() {
        let h = harness("ws://127.0.0.1:9/ws".to_string(), Duration::from_secs(5));

        assert_eq!(
            h.session.add_alert("BTCUSDT", "fifty", "cross_up"),
            Err(Rejected::InvalidPrice)
        );
        assert_eq!(
            h.session.add_alert("", "50000", "cross_up"),
            Err(Rejected::InvalidSymbol)
        );
        assert_eq!(
            h.session.add_alert("BTCUSDT", "50000", "north"),
            Err(Rejected::InvalidDirection)
        );
        assert!(!h.session.has_alerts());

        for i in 0..10 {
            h.session
                .add_alert("btcusdt", &format!("{}", 50000 + i), "cross_up")
                .unwrap();
        }
        assert_eq!(
            h.session.add_alert("BTCUSDT", "1", "cross_down"),
            Err(Rejected::CapacityExceeded(10))
        );
        assert_eq!(h.session.alerts().len(), 10);
    }

    #[tokio::test]
    async fn start_requires_an_alert() {
        let mut h = harness("ws://127.0.0.1:9/ws".to_string(), Duration::from_secs(5));
        assert_eq!(h.session.start_monitoring().await, Err(SessionError::NoAlerts));
        assert!(!h.session.is_monitoring());
    }

    #[tokio::test]
    async fn fired_alert_reaches_shell_and_alarm() {
        let url = feed_server(
            vec![
                trade("BTCUSDT", "49999.99"),
                trade("ETHUSDT", "60000"),
                trade("BTCUSDT", "50000"),
            ],
            0,
        )
        .await;
        let mut h = harness(url, Duration::from_millis(50));
        h.session.add_alert("BTCUSDT", "50000", "cross_up").unwrap();
        h.session.start_monitoring().await.unwrap();
        assert!(h.session.is_monitoring());
        assert_eq!(
            h.session.start_monitoring().await,
            Err(SessionError::AlreadyMonitoring)
        );
        assert_eq!(h.session.clear_alerts(), Err(SessionError::AlreadyMonitoring));

        wait_for("alert", || !h.shell.fired.lock().is_empty()).await;
        let notification = h.shell.fired.lock().remove(0);
        assert_eq!(
            notification.message(),
            "BTCUSDT price crossed UP 50000! Current price: 50000"
        );
        assert_eq!(h.session.alarm_sounding(), Some(AlarmKind::PriceAlert));

        notification.acknowledge();
        assert_eq!(h.session.alarm_sounding(), None);

        h.session.shutdown().await;
        assert_eq!(h.shell.state_log().last(), Some(&ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn drop_sounds_connection_alarm_until_reconnected() {
        let url = feed_server(Vec::new(), 1).await;
        let mut h = harness(url, Duration::from_millis(100));
        h.session.add_alert("BTCUSDT", "50000", "cross_down").unwrap();
        h.session.start_monitoring().await.unwrap();

        wait_for("second connect", || {
            h.shell
                .state_log()
                .iter()
                .filter(|s| **s == ConnectionState::Connected)
                .count()
                == 2
        })
        .await;

        let states = h.shell.states.lock().clone();
        assert_eq!(
            states,
            vec![
                (ConnectionState::Connecting, None),
                (ConnectionState::Connected, None),
                (ConnectionState::Reconnecting, Some(AlarmKind::ConnectionLoss)),
                (ConnectionState::Connecting, Some(AlarmKind::ConnectionLoss)),
                (ConnectionState::Connected, None),
            ]
        );

        h.session.shutdown().await;
    }

    #[tokio::test]
    async fn stop_during_backoff_is_prompt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut h = harness(format!("ws://{addr}/ws"), Duration::from_secs(30));
        h.session.add_alert("BTCUSDT", "50000", "cross_up").unwrap();
        h.session.start_monitoring().await.unwrap();

        wait_for("reconnecting", || {
            h.shell.state_log().contains(&ConnectionState::Reconnecting)
        })
        .await;
        assert_eq!(h.alarm.current().map(|t| t.kind()), Some(AlarmKind::ConnectionLoss));

        h.session.stop_monitoring();
        assert_eq!(h.alarm.current(), None);

        let shell = Arc::clone(&h.shell);
        tokio::time::timeout(Duration::from_secs(1), h.session.shutdown())
            .await
            .expect("shutdown should not wait out the backoff");
        assert_eq!(shell.state_log().last(), Some(&ConnectionState::Disconnected));
        assert_eq!(h.alarm.current(), None);
    }
}
