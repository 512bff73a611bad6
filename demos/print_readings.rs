use futures::StreamExt;
use musecsv::{
    device::{DeviceConfig, MuseClient},
    session::Session,
};

use std::time::Instant;

#[tokio::main]
async fn main() -> musecsv::Result<()> {
    // Using the default configurations
    let config = DeviceConfig::default();
    // Connect to the first headset whose name starts with "Muse" (make sure
    // it is switched on and not paired with a phone)
    let mut session = Session::new(MuseClient::new(config));
    let mut subscriptions = session.open().await?;
    // Print readings as they arrive
    let start_time = Instant::now();
    while let Some(reading) = subscriptions.eeg.next().await {
        println!(
            "[{:.02?}s] {:>4} #{:<5} {:?}",
            start_time.elapsed().as_secs_f64(),
            reading.electrode.map_or("-", |e| e.name()),
            reading.index,
            reading.samples
        );
    }
    Ok(())
}
