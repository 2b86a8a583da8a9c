//! Periodic polling of one device, with reconnects.

use crate::connection::{self, Session};
use crate::status::{self, StatusSnapshot};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_AFTER_FAILURES: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the device is not ready yet")]
    NotReady(#[source] connection::Error),
    #[error("could not poll the device status")]
    Poll(#[source] status::Error),
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "coordinator::Args")]
pub struct Args {
    /// How often to poll the device status.
    #[arg(long, default_value_t = DEFAULT_INTERVAL.into())]
    interval: humantime::Duration,
    /// How long to wait before retrying a connection that could not be established.
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.into())]
    retry_delay: humantime::Duration,
    /// Re-establish the session after this many consecutive failed polls.
    ///
    /// Some Modbus gateways keep a stale TCP session open after the unit power cycles.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_AFTER_FAILURES)]
    reconnect_after_failures: usize,
}

impl Args {
    pub fn to_settings(&self) -> Settings {
        Settings {
            interval: *self.interval,
            retry_delay: *self.retry_delay,
            reconnect_after_failures: self.reconnect_after_failures,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub interval: Duration,
    pub retry_delay: Duration,
    pub reconnect_after_failures: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            reconnect_after_failures: DEFAULT_RECONNECT_AFTER_FAILURES,
        }
    }
}

/// Owns the session to one device and keeps the last good status around.
///
/// Everything goes through `&mut self`, so a control write issued between two polls can never
/// overlap with a poll.
pub struct Coordinator<S> {
    session: S,
    settings: Settings,
    snapshot: Option<StatusSnapshot>,
    consecutive_failures: usize,
}

impl<S: Session> Coordinator<S> {
    pub fn new(session: S, settings: Settings) -> Self {
        Self { session, settings, snapshot: None, consecutive_failures: 0 }
    }

    /// Connect and take the first snapshot.
    ///
    /// A failure here is reported as [`Error::NotReady`]: devices are routinely offline for a
    /// while, e.g. when they are powered up together with the host.
    pub async fn setup(&mut self) -> Result<&StatusSnapshot, Error> {
        self.session.connect().await.map_err(Error::NotReady)?;
        self.refresh().await
    }

    /// Keep trying to connect, waiting `retry_delay` in between attempts.
    ///
    /// Returns `false` if cancelled before a session could be established.
    pub async fn connect_until_ready(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            match self.session.connect().await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    return true;
                }
                Err(e) => warn!(
                    message = "device not ready, will retry",
                    retry_in = %humantime::format_duration(self.settings.retry_delay),
                    error = (&e as &dyn std::error::Error)
                ),
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.retry_delay) => {}
            }
        }
    }

    /// Poll the device now.
    ///
    /// On failure the previous snapshot is kept. After `reconnect_after_failures` failed polls in
    /// a row the session is torn down so that the next poll starts over with a fresh one.
    pub async fn refresh(&mut self) -> Result<&StatusSnapshot, Error> {
        match status::read_status(&mut self.session).await {
            Ok(snapshot) => {
                self.consecutive_failures = 0;
                Ok(&*self.snapshot.insert(snapshot))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.settings.reconnect_after_failures
                    && self.session.is_connected()
                {
                    info!(
                        message = "dropping the session after repeated poll failures",
                        failures = self.consecutive_failures
                    );
                    self.session.disconnect().await;
                }
                Err(Error::Poll(e))
            }
        }
    }

    /// The most recent successfully polled status.
    pub fn snapshot(&self) -> Option<&StatusSnapshot> {
        self.snapshot.as_ref()
    }

    /// Access to the session, for control writes between polls.
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    /// Poll every `interval` until cancelled, reconnecting as necessary.
    ///
    /// `on_update` is called with every fresh snapshot; an error from it ends the loop.
    pub async fn run<E>(
        &mut self,
        cancel: &CancellationToken,
        mut on_update: impl FnMut(&StatusSnapshot) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.session.is_connected() && !self.connect_until_ready(cancel).await {
                break;
            }
            match self.refresh().await {
                Ok(snapshot) => on_update(snapshot)?,
                Err(e) => warn!(
                    message = "poll failed, keeping the previous status",
                    error = (&e as &dyn std::error::Error)
                ),
            }
        }
        debug!(message = "polling stopped");
        Ok(())
    }

    pub async fn shutdown(mut self) {
        self.session.disconnect().await;
    }
}
