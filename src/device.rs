//! Provides functionality to configure and connect to a Muse headset over
//! Bluetooth LE. It includes a `DeviceConfig` struct for specifying the
//! bluetooth adapter, the advertised name prefix and the channel preset, and
//! `MuseClient`, which discovers the headset, subscribes to its GATT
//! notifications and sends the control commands that start streaming.
//!
//! # Examples
//!
//! ```no_run
//! use futures::StreamExt;
//! use musecsv::device::{DeviceConfig, MuseClient};
//! use musecsv::session::Headset;
//!
//! #[tokio::main]
//! async fn main() -> musecsv::error::Result<()> {
//!     let config = DeviceConfig::default()
//!         .with_adapter("hci0".to_string())
//!         .with_name_prefix("Muse".to_string());
//!
//!     let mut client = MuseClient::new(config);
//!     client.connect().await?;
//!     client.start().await?;
//!     let mut readings = client.eeg_readings()?;
//!     while let Some(reading) = readings.next().await {
//!         println!("{:?}", reading.samples);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Methods in this module may return errors related to Bluetooth session
//! creation, adapter retrieval, device discovery, GATT resolution and
//! command writes. BlueZ failures are wrapped in `Error::Bluetooth`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, Address, Device, Session, Uuid,
    gatt::remote::Characteristic,
};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, pin_mut};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::comm::{
    ACCELEROMETER_CHARACTERISTIC, AccelerometerData, CMD_HALT, CMD_PRESET_EEG,
    CMD_PRESET_EEG_AUX, CMD_RESUME, CMD_START, CONTROL_CHARACTERISTIC, EegReading, Electrode,
    MUSE_SERVICE, encode_command, parse_accelerometer_packet, parse_eeg_packet,
};
use crate::error::{Error, Result};
use crate::session::Headset;

/// Configuration for connecting to a Muse headset over Bluetooth LE.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// The name of the Bluetooth adapter to use.
    /// If not provided, the default adapter is used.
    pub adapter: Option<String>,
    /// Prefix of the advertised device name. Default: "Muse".
    pub name_prefix: String,
    /// Stream the AUX electrode as a fifth channel. Default: false.
    pub aux: bool,
    /// How long to wait for the headset to show up. Default: 10s.
    pub discovery_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            name_prefix: "Muse".to_string(),
            aux: false,
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

impl DeviceConfig {
    /// Updates the Bluetooth adapter name.
    ///
    /// # Arguments
    ///
    /// * `adapter` - The name of the Bluetooth adapter.
    ///
    /// # Returns
    ///
    /// * `Self` - The updated configuration.
    pub fn with_adapter(mut self, adapter: String) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Updates the prefix used to recognise the headset by name.
    /// If not provided, the default prefix is "Muse", which matches
    /// names such as "Muse-1A2B" and "MuseS-4F01".
    ///
    /// # Arguments
    ///
    /// * `prefix` - The advertised name prefix.
    ///
    /// # Returns
    ///
    /// * `Self` - The updated configuration.
    pub fn with_name_prefix(mut self, prefix: String) -> Self {
        self.name_prefix = prefix;
        self
    }

    /// Enables or disables the AUX electrode.
    pub fn with_aux(mut self, aux: bool) -> Self {
        self.aux = aux;
        self
    }

    /// Updates the discovery timeout.
    pub fn with_discovery_timeout(mut self, discovery_timeout: Duration) -> Self {
        self.discovery_timeout = discovery_timeout;
        self
    }

    /// Electrodes whose characteristics are subscribed to.
    pub fn electrodes(&self) -> &'static [Electrode] {
        if self.aux {
            &Electrode::ALL
        } else {
            &Electrode::ALL[..4]
        }
    }

    /// Gets the configured (or default) Bluetooth adapter and powers it on.
    ///
    /// # Errors
    ///
    /// This function will return an error if the session creation, adapter
    /// retrieval, or powering on the adapter fails.
    pub async fn get_adapter(&self) -> Result<Adapter> {
        let session = Session::new().await?;
        let adapter = if let Some(name) = &self.adapter {
            session.adapter(name)?
        } else {
            session.default_adapter().await?
        };
        adapter.set_powered(true).await?;
        debug!(adapter = adapter.name(), "adapter powered");
        Ok(adapter)
    }

    /// Whether a discovered device is a Muse headset: it advertises the Muse
    /// service, or its name starts with the configured prefix.
    pub fn is_muse(&self, name: Option<&str>, uuids: Option<&HashSet<Uuid>>) -> bool {
        uuids.is_some_and(|uuids| uuids.contains(&MUSE_SERVICE))
            || name.is_some_and(|name| name.starts_with(&self.name_prefix))
    }

    /// Discovers the first Muse headset (see [`DeviceConfig::is_muse`])
    /// using the provided adapter.
    ///
    /// # Errors
    ///
    /// This function will return an error if device discovery fails or if no
    /// matching device shows up within the discovery timeout.
    pub async fn try_find_device(&self, adapter: &Adapter) -> Result<Address> {
        let device_events = adapter.discover_devices().await?;
        pin_mut!(device_events);

        let search = async {
            while let Some(event) = device_events.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    let device = adapter.device(addr)?;
                    let name = device.name().await?;
                    let uuids = device.uuids().await?;
                    if self.is_muse(name.as_deref(), uuids.as_ref()) {
                        info!(%addr, ?name, "found headset");
                        return Ok(Some(addr));
                    }
                    debug!(%addr, ?name, "skipping device");
                }
            }
            Ok::<_, Error>(None)
        };

        match timeout(self.discovery_timeout, search).await {
            Ok(Ok(Some(addr))) => Ok(addr),
            Ok(Err(err)) => Err(err),
            Ok(Ok(None)) | Err(_) => Err(Error::DeviceNotFound {
                prefix: self.name_prefix.clone(),
                timeout_secs: self.discovery_timeout.as_secs(),
            }),
        }
    }
}

/// Bluetooth LE client for a Muse headset.
pub struct MuseClient {
    config: DeviceConfig,
    device: Option<Device>,
    control: Option<Characteristic>,
    eeg: Option<BoxStream<'static, EegReading>>,
    accelerometer: Option<BoxStream<'static, AccelerometerData>>,
}

impl MuseClient {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            device: None,
            control: None,
            eeg: None,
            accelerometer: None,
        }
    }

    /// Address of the connected headset, if any.
    pub fn address(&self) -> Option<Address> {
        self.device.as_ref().map(Device::address)
    }

    /// Writes one encoded command to the control characteristic.
    pub async fn send_command(&self, cmd: &str) -> Result<()> {
        let control = self.control.clone().ok_or(Error::NotConnected)?;
        write_command(&control, cmd).await
    }

    async fn characteristics(device: &Device) -> Result<HashMap<Uuid, Characteristic>> {
        let mut found = HashMap::new();
        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                found.insert(characteristic.uuid().await?, characteristic);
            }
        }
        Ok(found)
    }

    async fn subscribe_channels(config: &DeviceConfig, device: &Device) -> Result<Channels> {
        let mut found = Self::characteristics(device).await?;
        let control = take(&mut found, CONTROL_CHARACTERISTIC)?;

        let mut channels = Vec::new();
        for &electrode in config.electrodes() {
            let notifications = take(&mut found, electrode.characteristic())?
                .notify()
                .await?;
            channels.push(
                notifications
                    .filter_map(move |data| async move {
                        let reading = parse_eeg_packet(electrode, &data);
                        if reading.is_none() {
                            warn!(
                                electrode = electrode.name(),
                                len = data.len(),
                                "dropping short EEG packet"
                            );
                        }
                        reading
                    })
                    .boxed(),
            );
        }

        let accelerometer = take(&mut found, ACCELEROMETER_CHARACTERISTIC)?
            .notify()
            .await?
            .filter_map(|data| async move {
                let parsed = parse_accelerometer_packet(&data);
                if parsed.is_none() {
                    warn!(len = data.len(), "dropping short accelerometer packet");
                }
                parsed
            })
            .boxed();

        Ok(Channels {
            control,
            eeg: stream::select_all(channels).boxed(),
            accelerometer,
        })
    }
}

fn take(found: &mut HashMap<Uuid, Characteristic>, uuid: Uuid) -> Result<Characteristic> {
    found.remove(&uuid).ok_or(Error::MissingCharacteristic(uuid))
}

async fn write_command(control: &Characteristic, cmd: &str) -> Result<()> {
    debug!(cmd, "sending command");
    control.write(&encode_command(cmd)).await?;
    Ok(())
}

/// Runs `cleanup` when `result` is an error, then hands `result` back. A
/// failing cleanup is logged; the original error is kept.
async fn cleanup_on_error<T, F, Fut>(result: Result<T>, cleanup: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if result.is_err() {
        if let Err(err) = cleanup().await {
            warn!(error = %err, "cleanup after failed setup also failed");
        }
    }
    result
}

/// EEG and accelerometer streams plus the control characteristic of a
/// connected headset.
struct Channels {
    control: Characteristic,
    eeg: BoxStream<'static, EegReading>,
    accelerometer: BoxStream<'static, AccelerometerData>,
}

#[async_trait]
impl Headset for MuseClient {
    /// Discovers and connects the headset, then enables notifications on
    /// the EEG and accelerometer characteristics. If the notifications cannot
    /// be set up the headset is disconnected again.
    async fn connect(&mut self) -> Result<()> {
        let adapter = self.config.get_adapter().await?;
        let addr = self.config.try_find_device(&adapter).await?;
        let device = adapter.device(addr)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }
        info!(%addr, "connected");

        let channels = Self::subscribe_channels(&self.config, &device).await;
        let channels = cleanup_on_error(channels, || async {
            warn!(%addr, "disconnecting after failed setup");
            device.disconnect().await.map_err(Error::from)
        })
        .await?;

        self.eeg = Some(channels.eeg);
        self.accelerometer = Some(channels.accelerometer);
        self.control = Some(channels.control);
        self.device = Some(device);
        Ok(())
    }

    /// Pauses the headset, selects the channel preset, then starts and
    /// resumes streaming.
    async fn start(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Err(Error::NotConnected);
        }
        let preset = if self.config.aux {
            CMD_PRESET_EEG_AUX
        } else {
            CMD_PRESET_EEG
        };
        let control = self.control.clone().ok_or(Error::NotConnected)?;
        for cmd in [CMD_HALT, preset, CMD_START, CMD_RESUME] {
            write_command(&control, cmd).await?;
        }
        info!(preset, "streaming started");
        Ok(())
    }

    fn eeg_readings(&mut self) -> Result<BoxStream<'static, EegReading>> {
        if self.device.is_none() {
            return Err(Error::NotConnected);
        }
        self.eeg.take().ok_or(Error::AlreadySubscribed)
    }

    fn accelerometer_data(&mut self) -> Result<BoxStream<'static, AccelerometerData>> {
        if self.device.is_none() {
            return Err(Error::NotConnected);
        }
        self.accelerometer.take().ok_or(Error::AlreadySubscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aux_adds_a_fifth_electrode() {
        let config = DeviceConfig::default();
        assert_eq!(config.electrodes().len(), 4);
        let config = config
            .with_aux(true)
            .with_discovery_timeout(Duration::from_secs(3));
        assert_eq!(config.electrodes().last(), Some(&Electrode::Aux));
        assert_eq!(config.discovery_timeout, Duration::from_secs(3));
    }

    #[test]
    fn headsets_match_by_service_or_name() {
        let config = DeviceConfig::default().with_name_prefix("MuseS".to_string());
        let muse_service: HashSet<Uuid> = [MUSE_SERVICE].into_iter().collect();
        let other_service: HashSet<Uuid> = [CONTROL_CHARACTERISTIC].into_iter().collect();
        assert!(config.is_muse(None, Some(&muse_service)));
        assert!(config.is_muse(Some("Headband"), Some(&muse_service)));
        assert!(config.is_muse(Some("MuseS-4F01"), Some(&other_service)));
        assert!(!config.is_muse(Some("Muse-1A2B"), Some(&other_service)));
        assert!(!config.is_muse(None, None));
    }

    #[tokio::test]
    async fn failed_setup_runs_cleanup_and_keeps_the_error() {
        let mut cleaned = false;
        let result: Result<()> = Err(Error::MissingCharacteristic(CONTROL_CHARACTERISTIC));
        let result = cleanup_on_error(result, || {
            cleaned = true;
            async { Err(Error::NotConnected) }
        })
        .await;
        assert!(cleaned);
        assert!(matches!(
            result,
            Err(Error::MissingCharacteristic(uuid)) if uuid == CONTROL_CHARACTERISTIC
        ));
    }

    #[tokio::test]
    async fn successful_setup_skips_cleanup() {
        let mut cleaned = false;
        let result = cleanup_on_error(Ok(5), || {
            cleaned = true;
            async { Ok(()) }
        })
        .await;
        assert!(!cleaned);
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn client_refuses_to_start_before_connecting() {
        let mut client = MuseClient::new(DeviceConfig::default());
        assert!(matches!(client.start().await, Err(Error::NotConnected)));
        assert!(matches!(client.eeg_readings(), Err(Error::NotConnected)));
        assert!(matches!(
            client.send_command(CMD_RESUME).await,
            Err(Error::NotConnected)
        ));
        assert!(client.address().is_none());
    }

    /// NOTE: This test requires a powered Muse headset in range of the
    /// default Bluetooth adapter.
    #[tokio::test]
    #[ignore]
    async fn test_connect_and_read_one_reading() {
        let mut client = MuseClient::new(DeviceConfig::default());
        client.connect().await.expect("Failed to connect to headset");
        client.start().await.expect("Failed to start streaming");
        println!("Remote address: {:?}", client.address());
        let reading = client
            .eeg_readings()
            .unwrap()
            .next()
            .await
            .expect("EEG stream ended");
        println!("{:?}", reading);
    }
}
