//! Connection manager for a headset. A [`Session`] walks a [`Headset`]
//! through `Idle → Connecting → Connected → Streaming` and hands out the
//! reading subscriptions once the device is streaming.
//!
//! There is no way back from `Streaming`: a session ends when its
//! subscriptions end or when it is dropped.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, info, warn};

use crate::comm::{AccelerometerData, EegReading};
use crate::error::{Error, Result};

/// Lifecycle and subscription API of an EEG headset client.
///
/// Readings are delivered through streams driven by the device's own
/// cadence; the consumer never polls the hardware.
#[async_trait]
pub trait Headset: Send {
    /// Establishes a session with the device.
    async fn connect(&mut self) -> Result<()>;

    /// Begins the data stream. Fails with [`Error::NotConnected`] if called
    /// before a successful [`Headset::connect`].
    async fn start(&mut self) -> Result<()>;

    /// Takes the EEG reading stream.
    fn eeg_readings(&mut self) -> Result<BoxStream<'static, EegReading>>;

    /// Takes the accelerometer stream.
    fn accelerometer_data(&mut self) -> Result<BoxStream<'static, AccelerometerData>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Streaming,
}

/// Both subscriptions of a streaming session.
pub struct Subscriptions {
    pub eeg: BoxStream<'static, EegReading>,
    pub accelerometer: BoxStream<'static, AccelerometerData>,
}

pub struct Session<H> {
    headset: H,
    state: SessionState,
}

impl<H: Headset> Session<H> {
    pub fn new(headset: H) -> Self {
        Self {
            headset,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn headset(&self) -> &H {
        &self.headset
    }

    /// Connects the headset. On failure the session goes back to `Idle`
    /// and the cause is returned as [`Error::Connect`]. Nothing is retried
    /// automatically, but the caller may call `connect` again.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            debug!(state = ?self.state, "connect called on an active session");
            return Ok(());
        }
        self.transition(SessionState::Connecting);
        match self.headset.connect().await {
            Ok(()) => {
                self.transition(SessionState::Connected);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "connection failed");
                self.transition(SessionState::Idle);
                Err(Error::Connect(Box::new(err)))
            }
        }
    }

    /// Starts streaming. Only valid once connected.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => {}
            SessionState::Streaming => return Ok(()),
            _ => return Err(Error::Start(Box::new(Error::NotConnected))),
        }
        self.headset
            .start()
            .await
            .map_err(|err| Error::Start(Box::new(err)))?;
        self.transition(SessionState::Streaming);
        Ok(())
    }

    /// Registers both subscriptions.
    pub fn subscribe(&mut self) -> Result<Subscriptions> {
        if !matches!(
            self.state,
            SessionState::Connected | SessionState::Streaming
        ) {
            return Err(Error::NotConnected);
        }
        Ok(Subscriptions {
            eeg: self.headset.eeg_readings()?,
            accelerometer: self.headset.accelerometer_data()?,
        })
    }

    /// Connects, starts, and subscribes in one call.
    pub async fn open(&mut self) -> Result<Subscriptions> {
        self.connect().await?;
        self.start().await?;
        self.subscribe()
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session state changed");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHeadset;

    #[tokio::test]
    async fn walks_through_every_state() {
        let (headset, _emitter) = MockHeadset::new();
        let mut session = Session::new(headset);
        assert_eq!(session.state(), SessionState::Idle);
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.headset().is_connected());
        assert!(!session.headset().is_started());
        session.start().await.unwrap();
        assert!(session.headset().is_started());
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.subscribe().is_ok());
    }

    #[tokio::test]
    async fn start_before_connect_is_rejected() {
        let (headset, _emitter) = MockHeadset::new();
        let mut session = Session::new(headset);
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, Error::Start(_)));
        assert!(matches!(err.root(), Error::NotConnected));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.headset().is_started());
    }

    #[tokio::test]
    async fn failed_connect_returns_to_idle() {
        let (headset, _emitter) = MockHeadset::new();
        let mut session = Session::new(headset.failing_connect("headset unreachable"));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connect(_)));
        assert_eq!(err.root().to_string(), "device error: headset unreachable");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.headset().is_connected());

        // Idle again, so a second attempt reaches the headset and fails the same way
        assert!(matches!(session.connect().await, Err(Error::Connect(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn subscriptions_are_taken_once() {
        let (headset, _emitter) = MockHeadset::new();
        let mut session = Session::new(headset);
        assert!(matches!(session.subscribe(), Err(Error::NotConnected)));
        session.open().await.unwrap();
        assert!(matches!(session.subscribe(), Err(Error::AlreadySubscribed)));
    }
}
