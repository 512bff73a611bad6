//! Muse readings relayed as OSC over UDP, as sent by phone apps such as
//! Mind Monitor or by Muse Direct.
//!
//! `/muse/eeg` messages carry one sample per channel and become one
//! [`EegReading`] each. `/muse/acc` messages become accelerometer events.
//! `/Marker/N` messages are not written to the log; the configured stop
//! marker (2 by default) ends the EEG stream, which ends the recording.
//! Bundles are flattened and anything else is ignored.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::BoxStream;
use rosc::{OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::comm::{AccelerometerData, EegReading, XyzSample};
use crate::error::{Error, Result};
use crate::session::Headset;

pub const DEFAULT_OSC_PORT: u16 = 5001;
pub const EEG_ADDRESS: &str = "/muse/eeg";
pub const ACCELEROMETER_ADDRESS: &str = "/muse/acc";
pub const MARKER_PREFIX: &str = "/Marker/";
pub const DEFAULT_STOP_MARKER: u32 = 2;

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_536;

/// A decoded OSC message this crate cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum OscEvent {
    Eeg(Vec<f64>),
    Accelerometer(XyzSample),
    Marker(u32),
}

fn numeric(arg: &OscType) -> Option<f64> {
    match *arg {
        OscType::Float(v) => Some(v as f64),
        OscType::Double(v) => Some(v),
        OscType::Int(v) => Some(v as f64),
        OscType::Long(v) => Some(v as f64),
        _ => None,
    }
}

fn collect(packet: OscPacket, events: &mut Vec<OscEvent>) {
    match packet {
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                collect(packet, events);
            }
        }
        OscPacket::Message(msg) => {
            let values: Vec<f64> = msg.args.iter().filter_map(numeric).collect();
            if msg.addr == EEG_ADDRESS {
                events.push(OscEvent::Eeg(values));
            } else if msg.addr == ACCELEROMETER_ADDRESS {
                if let [x, y, z, ..] = values[..] {
                    events.push(OscEvent::Accelerometer(XyzSample { x, y, z }));
                }
            } else if let Some(marker) = msg
                .addr
                .strip_prefix(MARKER_PREFIX)
                .and_then(|n| n.parse().ok())
            {
                events.push(OscEvent::Marker(marker));
            } else {
                debug!(addr = %msg.addr, "ignoring OSC message");
            }
        }
    }
}

/// Decodes one datagram. Malformed datagrams are logged and yield nothing.
pub fn decode_datagram(buf: &[u8]) -> Vec<OscEvent> {
    let mut events = Vec::new();
    match rosc::decoder::decode_udp(buf) {
        Ok((_, packet)) => collect(packet, &mut events),
        Err(err) => warn!(?err, len = buf.len(), "dropping malformed OSC datagram"),
    }
    events
}

#[derive(Debug, Clone)]
pub struct OscConfig {
    /// Address the UDP socket binds to. Default: 0.0.0.0:5001.
    pub bind: SocketAddr,
    /// Marker that ends the recording. Default: 2.
    pub stop_marker: Option<u32>,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_OSC_PORT)),
            stop_marker: Some(DEFAULT_STOP_MARKER),
        }
    }
}

impl OscConfig {
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Listens on every interface at `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind.set_port(port);
        self
    }

    pub fn with_stop_marker(mut self, stop_marker: Option<u32>) -> Self {
        self.stop_marker = stop_marker;
        self
    }
}

/// Headset fed by OSC datagrams. `connect()` binds the socket, `start()`
/// spawns the listener.
pub struct OscHeadset {
    config: OscConfig,
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    eeg_tx: Option<UnboundedSender<EegReading>>,
    accelerometer_tx: Option<UnboundedSender<AccelerometerData>>,
    eeg_rx: Option<UnboundedReceiver<EegReading>>,
    accelerometer_rx: Option<UnboundedReceiver<AccelerometerData>>,
    listener: Option<JoinHandle<()>>,
}

impl OscHeadset {
    pub fn new(config: OscConfig) -> Self {
        Self {
            config,
            socket: None,
            local_addr: None,
            eeg_tx: None,
            accelerometer_tx: None,
            eeg_rx: None,
            accelerometer_rx: None,
            listener: None,
        }
    }

    /// Address the socket is bound to, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for OscHeadset {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[async_trait]
impl Headset for OscHeadset {
    async fn connect(&mut self) -> Result<()> {
        let addr = self.config.bind;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;
        info!(%local_addr, "listening for OSC");

        let (eeg_tx, eeg_rx) = unbounded();
        let (accelerometer_tx, accelerometer_rx) = unbounded();
        self.socket = Some(socket);
        self.local_addr = Some(local_addr);
        self.eeg_tx = Some(eeg_tx);
        self.accelerometer_tx = Some(accelerometer_tx);
        self.eeg_rx = Some(eeg_rx);
        self.accelerometer_rx = Some(accelerometer_rx);
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let (Some(socket), Some(eeg_tx), Some(accelerometer_tx)) = (
            self.socket.take(),
            self.eeg_tx.take(),
            self.accelerometer_tx.take(),
        ) else {
            return Err(Error::NotConnected);
        };
        let stop_marker = self.config.stop_marker;
        self.listener = Some(tokio::spawn(listen(
            socket,
            eeg_tx,
            accelerometer_tx,
            stop_marker,
        )));
        Ok(())
    }

    fn eeg_readings(&mut self) -> Result<BoxStream<'static, EegReading>> {
        if self.local_addr.is_none() {
            return Err(Error::NotConnected);
        }
        self.eeg_rx
            .take()
            .map(|rx| rx.boxed())
            .ok_or(Error::AlreadySubscribed)
    }

    fn accelerometer_data(&mut self) -> Result<BoxStream<'static, AccelerometerData>> {
        if self.local_addr.is_none() {
            return Err(Error::NotConnected);
        }
        self.accelerometer_rx
            .take()
            .map(|rx| rx.boxed())
            .ok_or(Error::AlreadySubscribed)
    }
}

/// Receives datagrams until the stop marker arrives, the EEG subscriber
/// goes away, or the socket fails. Dropping the senders ends both streams.
async fn listen(
    socket: UdpSocket,
    eeg_tx: UnboundedSender<EegReading>,
    accelerometer_tx: UnboundedSender<AccelerometerData>,
    stop_marker: Option<u32>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut eeg_index: u16 = 0;
    let mut accelerometer_index: u16 = 0;
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(err) => {
                warn!(error = %err, "OSC socket failed");
                return;
            }
        };
        for event in decode_datagram(&buf[..len]) {
            match event {
                OscEvent::Eeg(samples) => {
                    let reading = EegReading {
                        index: eeg_index,
                        electrode: None,
                        samples,
                    };
                    eeg_index = eeg_index.wrapping_add(1);
                    if eeg_tx.unbounded_send(reading).is_err() {
                        debug!("EEG subscriber gone, stopping OSC listener");
                        return;
                    }
                }
                OscEvent::Accelerometer(sample) => {
                    let _ = accelerometer_tx.unbounded_send(AccelerometerData {
                        index: accelerometer_index,
                        samples: vec![sample],
                    });
                    accelerometer_index = accelerometer_index.wrapping_add(1);
                }
                OscEvent::Marker(marker) if Some(marker) == stop_marker => {
                    info!(marker, "stop marker received");
                    return;
                }
                OscEvent::Marker(marker) => info!(marker, "marker received"),
            }
        }
    }
}
