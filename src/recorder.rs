//! Drives a streaming session into a [`CsvSink`].
//!
//! Both subscriptions are consumed by a single task, so records are written
//! one at a time in the order readings arrive and the sink needs no lock.

use std::future::{Future, pending};
use std::io::Write;

use futures::{StreamExt, pin_mut};
use tracing::{debug, info};

use crate::comm::AccelerometerData;
use crate::error::Result;
use crate::session::{Headset, Session, Subscriptions};
use crate::sink::CsvSink;

type AccelerometerHook = Box<dyn FnMut(&AccelerometerData) + Send>;

pub struct Recorder<W: Write> {
    sink: CsvSink<W>,
    on_accelerometer: AccelerometerHook,
}

impl<W: Write> Recorder<W> {
    pub fn new(sink: CsvSink<W>) -> Self {
        Self {
            sink,
            on_accelerometer: Box::new(|_| {}),
        }
    }

    /// Installs a handler for accelerometer events. By default they are
    /// received and discarded.
    pub fn on_accelerometer<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&AccelerometerData) + Send + 'static,
    {
        self.on_accelerometer = Box::new(hook);
        self
    }

    pub fn sink(&self) -> &CsvSink<W> {
        &self.sink
    }

    pub fn into_sink(self) -> CsvSink<W> {
        self.sink
    }

    /// Connects and starts `session`, then records until the EEG stream
    /// ends. Returns the number of records written by this call.
    pub async fn run<H: Headset>(&mut self, session: &mut Session<H>) -> Result<u64> {
        self.run_until(session, pending()).await
    }

    /// Like [`Recorder::run`], but also stops when `shutdown` resolves.
    pub async fn run_until<H, S>(&mut self, session: &mut Session<H>, shutdown: S) -> Result<u64>
    where
        H: Headset,
        S: Future<Output = ()>,
    {
        let subscriptions = session.open().await?;
        self.drain(subscriptions, shutdown).await
    }

    /// Records from already-open subscriptions.
    pub async fn drain<S>(&mut self, subscriptions: Subscriptions, shutdown: S) -> Result<u64>
    where
        S: Future<Output = ()>,
    {
        let Subscriptions {
            mut eeg,
            accelerometer,
        } = subscriptions;
        let mut accelerometer = accelerometer.fuse();
        pin_mut!(shutdown);
        let before = self.sink.records();

        let outcome = loop {
            tokio::select! {
                reading = eeg.next() => match reading {
                    Some(reading) => {
                        if let Err(err) = self.sink.write_reading(&reading) {
                            break Err(err);
                        }
                    }
                    None => {
                        info!("EEG stream ended");
                        break Ok(());
                    }
                },
                Some(event) = accelerometer.next() => (self.on_accelerometer)(&event),
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
            }
        };

        let written = self.sink.records() - before;
        debug!(written, "recording stopped");
        // a failed write takes precedence over a failed flush
        let flushed = self.sink.flush();
        outcome?;
        flushed?;
        Ok(written)
    }
}

/// Records everything `headset` emits into `sink` until its EEG stream ends.
pub async fn record<H: Headset, W: Write>(headset: H, sink: CsvSink<W>) -> Result<CsvSink<W>> {
    let mut session = Session::new(headset);
    let mut recorder = Recorder::new(sink);
    recorder.run(&mut session).await?;
    Ok(recorder.into_sink())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::XyzSample;
    use crate::error::Error;
    use crate::mock::MockHeadset;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn writes_one_line_per_reading() {
        let (headset, mut emitter) = MockHeadset::new();
        emitter.emit(vec![1.0, 2.0, 3.0]);
        emitter.emit(vec![4.0]);
        drop(emitter);

        let sink = record(headset, CsvSink::new(Vec::new())).await.unwrap();
        assert_eq!(sink.records(), 2);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("Z,1,2,3"));
        assert!(lines[1].ends_with("Z,4"));
    }

    #[tokio::test]
    async fn accelerometer_events_reach_the_hook_only() {
        let (headset, mut emitter) = MockHeadset::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        emitter.emit_accelerometer(AccelerometerData {
            index: 0,
            samples: vec![XyzSample::default(); 3],
        });
        emitter.emit(vec![0.5]);

        let mut session = Session::new(headset);
        let mut recorder = Recorder::new(CsvSink::new(Vec::new())).on_accelerometer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let written = recorder.run_until(&mut session, shutdown).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        drop(emitter);
    }

    /// Rejects every write and every flush.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "flush failed"))
        }
    }

    #[tokio::test]
    async fn write_failure_stops_recording_with_the_write_error() {
        let (headset, mut emitter) = MockHeadset::new();
        emitter.emit(vec![1.0]);
        emitter.emit(vec![2.0]);

        let mut session = Session::new(headset);
        let mut recorder = Recorder::new(CsvSink::new(FullDisk));
        let err = recorder.run(&mut session).await.unwrap_err();
        assert!(
            matches!(err, Error::Write(ref e) if e.kind() == io::ErrorKind::StorageFull),
            "unexpected error {err:?}"
        );
        assert_eq!(recorder.sink().records(), 0);
        drop(emitter);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_stream() {
        let (headset, mut emitter) = MockHeadset::new();
        emitter.emit(vec![7.0]);
        let mut session = Session::new(headset);
        let mut recorder = Recorder::new(CsvSink::new(Vec::new()));
        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        let written = recorder.run_until(&mut session, shutdown).await.unwrap();
        assert_eq!(written, 1);
        drop(emitter);
    }
}
