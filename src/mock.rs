//! In-process headset used by tests and by the `--mock` flag of the binary.
//!
//! [`MockHeadset::new`] returns the headset together with a [`MockEmitter`]
//! that pushes readings into its subscriptions. Readings emitted before the
//! subscription is taken are buffered. Dropping the emitter ends both
//! streams.

use std::f64::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::comm::{
    AccelerometerData, EEG_FREQUENCY, EEG_SAMPLES_PER_READING, EegReading, Electrode, XyzSample,
};
use crate::error::{Error, Result};
use crate::session::Headset;

pub struct MockHeadset {
    eeg_rx: Option<UnboundedReceiver<EegReading>>,
    accelerometer_rx: Option<UnboundedReceiver<AccelerometerData>>,
    connect_error: Option<String>,
    start_error: Option<String>,
    connected: bool,
    started: bool,
}

#[derive(Clone)]
pub struct MockEmitter {
    eeg_tx: UnboundedSender<EegReading>,
    accelerometer_tx: UnboundedSender<AccelerometerData>,
    next_index: u16,
}

impl MockHeadset {
    pub fn new() -> (MockHeadset, MockEmitter) {
        let (eeg_tx, eeg_rx) = unbounded();
        let (accelerometer_tx, accelerometer_rx) = unbounded();
        let headset = MockHeadset {
            eeg_rx: Some(eeg_rx),
            accelerometer_rx: Some(accelerometer_rx),
            connect_error: None,
            start_error: None,
            connected: false,
            started: false,
        };
        let emitter = MockEmitter {
            eeg_tx,
            accelerometer_tx,
            next_index: 0,
        };
        (headset, emitter)
    }

    /// Makes `connect()` fail with `message`.
    pub fn failing_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    /// Makes `start()` fail with `message`.
    pub fn failing_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

#[async_trait]
impl Headset for MockHeadset {
    async fn connect(&mut self) -> Result<()> {
        if let Some(message) = &self.connect_error {
            return Err(Error::Device(message.clone()));
        }
        self.connected = true;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if let Some(message) = &self.start_error {
            return Err(Error::Device(message.clone()));
        }
        self.started = true;
        Ok(())
    }

    fn eeg_readings(&mut self) -> Result<BoxStream<'static, EegReading>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.eeg_rx
            .take()
            .map(|rx| rx.boxed())
            .ok_or(Error::AlreadySubscribed)
    }

    fn accelerometer_data(&mut self) -> Result<BoxStream<'static, AccelerometerData>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.accelerometer_rx
            .take()
            .map(|rx| rx.boxed())
            .ok_or(Error::AlreadySubscribed)
    }
}

impl MockEmitter {
    /// Emits one TP9 reading with the given samples. Returns `false` once the
    /// headset has been dropped.
    pub fn emit(&mut self, samples: Vec<f64>) -> bool {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.emit_reading(EegReading {
            index,
            electrode: Some(Electrode::Tp9),
            samples,
        })
    }

    pub fn emit_reading(&self, reading: EegReading) -> bool {
        self.eeg_tx.unbounded_send(reading).is_ok()
    }

    pub fn emit_accelerometer(&self, data: AccelerometerData) -> bool {
        self.accelerometer_tx.unbounded_send(data).is_ok()
    }

    /// Feeds the headset with a 10 Hz sine on the four EEG electrodes at the
    /// real sampling cadence, until the headset goes away.
    pub fn spawn_synthetic(self) -> JoinHandle<()> {
        let period = Duration::from_secs_f64(EEG_SAMPLES_PER_READING as f64 / EEG_FREQUENCY as f64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut index: u16 = 0;
            loop {
                ticker.tick().await;
                let base = index as usize * EEG_SAMPLES_PER_READING;
                for electrode in &Electrode::ALL[..4] {
                    let phase = *electrode as usize as f64 * 0.25;
                    let samples = (0..EEG_SAMPLES_PER_READING)
                        .map(|i| {
                            let t = (base + i) as f64 / EEG_FREQUENCY as f64;
                            50.0 * (TAU * 10.0 * t + phase).sin()
                        })
                        .collect();
                    let reading = EegReading {
                        index,
                        electrode: Some(*electrode),
                        samples,
                    };
                    if !self.emit_reading(reading) {
                        debug!("synthetic headset dropped, stopping generator");
                        return;
                    }
                }
                let _ = self.emit_accelerometer(AccelerometerData {
                    index,
                    samples: vec![
                        XyzSample {
                            x: 0.0,
                            y: 0.0,
                            z: 1.0,
                        };
                        3
                    ],
                });
                index = index.wrapping_add(1);
            }
        })
    }
}
