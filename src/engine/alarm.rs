use crate::error::AudioDeviceError;
use log::{debug, info, warn};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Something that can make a noise. `pulse` starts a tone and returns without
/// waiting for it to finish.
pub trait AudioDevice: Send + Sync {
    fn pulse(&self, duration: Duration) -> Result<(), AudioDeviceError>;
}

/// Rings the terminal bell.
pub struct TerminalBell;

impl AudioDevice for TerminalBell {
    fn pulse(&self, _duration: Duration) -> Result<(), AudioDeviceError> {
        let mut out = std::io::stdout().lock();
        out.write_all(b"\x07")?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmConfig {
    pub pulse: Duration,
    pub gap: Duration,
    pub ceiling: Duration,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            pulse: Duration::from_millis(500),
            gap: Duration::from_millis(100),
            ceiling: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    PriceAlert,
    ConnectionLoss,
}

/// Identifies one alarm run. Stopping with an outdated ticket is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTicket {
    generation: u64,
    kind: AlarmKind,
}

impl AlarmTicket {
    pub fn kind(&self) -> AlarmKind {
        self.kind
    }
}

/// The one audible alarm of the process.
///
/// A background task owns the sound loop; callers only ever change the
/// desired ticket. A new start replaces whatever was sounding, except that a
/// connection-loss alarm leaves an already running connection-loss alarm alone.
/// A price alarm replacing a running price alarm takes over its pulse schedule
/// and ceiling instead of restarting them.
pub struct Alarm {
    desired: Arc<watch::Sender<Option<AlarmTicket>>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Alarm {
    /// Spawns the supervising task on the current tokio runtime.
    pub fn spawn(config: AlarmConfig, device: Arc<dyn AudioDevice>) -> Arc<Self> {
        let (tx, rx) = watch::channel(None);
        let desired = Arc::new(tx);
        let shutdown = CancellationToken::new();

        tokio::spawn(supervise(
            config,
            device,
            Arc::clone(&desired),
            rx,
            shutdown.clone(),
        ));

        Arc::new(Self {
            desired,
            next_generation: AtomicU64::new(1),
            shutdown,
        })
    }

    /// Starts an alarm unless `session` has been cancelled. The check happens
    /// under the same lock a concurrent `stop_all` takes, so an alarm can never
    /// outlive the session that raised it.
    pub fn start_within(
        &self,
        kind: AlarmKind,
        session: &CancellationToken,
    ) -> Option<AlarmTicket> {
        let mut started = self.fresh_ticket(kind);
        let mut allowed = false;
        self.desired.send_if_modified(|current| {
            if session.is_cancelled() {
                return false;
            }
            allowed = true;
            Self::replace(current, &mut started)
        });
        allowed.then_some(started)
    }

    fn fresh_ticket(&self, kind: AlarmKind) -> AlarmTicket {
        AlarmTicket {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Installs `ticket` as the desired alarm, or swaps it for the running
    /// connection-loss ticket when both are connection-loss alarms.
    fn replace(current: &mut Option<AlarmTicket>, ticket: &mut AlarmTicket) -> bool {
        if ticket.kind == AlarmKind::ConnectionLoss {
            if let Some(existing) = current.filter(|t| t.kind == AlarmKind::ConnectionLoss) {
                *ticket = existing;
                return false;
            }
        }
        *current = Some(*ticket);
        true
    }

    pub fn stop(&self, ticket: AlarmTicket) {
        clear(&self.desired, ticket);
    }

    pub fn stop_kind(&self, kind: AlarmKind) {
        self.desired.send_if_modified(|current| {
            if current.map(|t| t.kind()) == Some(kind) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    pub fn stop_all(&self) {
        self.desired.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<AlarmTicket> {
        *self.desired.borrow()
    }

    pub fn shutdown(&self) {
        self.stop_all();
        self.shutdown.cancel();
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn clear(desired: &watch::Sender<Option<AlarmTicket>>, ticket: AlarmTicket) {
    desired.send_if_modified(|current| {
        if *current == Some(ticket) {
            *current = None;
            true
        } else {
            false
        }
    });
}

enum RunEnd {
    Changed,
    Finished(AlarmTicket),
    Shutdown,
}

async fn supervise(
    config: AlarmConfig,
    device: Arc<dyn AudioDevice>,
    desired: Arc<watch::Sender<Option<AlarmTicket>>>,
    mut rx: watch::Receiver<Option<AlarmTicket>>,
    shutdown: CancellationToken,
) {
    loop {
        let wanted = *rx.borrow_and_update();
        let end = match wanted {
            Some(ticket) => sound(&config, device.as_ref(), ticket, &mut rx, &shutdown).await,
            None => tokio::select! {
                _ = shutdown.cancelled() => RunEnd::Shutdown,
                changed = rx.changed() => match changed {
                    Ok(()) => RunEnd::Changed,
                    Err(_) => RunEnd::Shutdown,
                },
            },
        };

        match end {
            RunEnd::Changed => {}
            RunEnd::Finished(ticket) => clear(&desired, ticket),
            RunEnd::Shutdown => {
                debug!("Alarm supervisor stopped");
                return;
            }
        }
    }
}

async fn sound(
    config: &AlarmConfig,
    device: &dyn AudioDevice,
    mut ticket: AlarmTicket,
    rx: &mut watch::Receiver<Option<AlarmTicket>>,
    shutdown: &CancellationToken,
) -> RunEnd {
    info!("{:?} alarm started", ticket.kind);
    let deadline = Instant::now() + config.ceiling;

    loop {
        let now = Instant::now();
        if now >= deadline {
            info!("{:?} alarm reached its {:?} ceiling", ticket.kind, config.ceiling);
            return RunEnd::Finished(ticket);
        }

        if let Err(e) = device.pulse(config.pulse) {
            warn!("Sound error: {}", e);
            return RunEnd::Finished(ticket);
        }

        let next = (now + config.pulse + config.gap).min(deadline);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return RunEnd::Shutdown,
                _ = sleep_until(next) => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return RunEnd::Shutdown;
                    }
                }
            }

            // Same kind keeps sounding on the current schedule under the newer ticket.
            match *rx.borrow_and_update() {
                Some(newer) if newer.kind == ticket.kind => ticket = newer,
                _ => {
                    debug!("{:?} alarm interrupted", ticket.kind);
                    return RunEnd::Changed;
                }
            }
        }
    }
}
