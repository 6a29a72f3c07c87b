//! Enroll a finger on an emulated MAFP module, then verify and identify it.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p fprint --example enroll_verify
//! ```

use anyhow::Context;
use fprint::mafp::emulator::{SensorEmulator, Touch};
use fprint::mafp::{MafpConfig, MafpDriver};
use fprint::{CancellationToken, Device, EnrollProgressFn, Error, Finger, Print};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (transport, sensor) = SensorEmulator::new()
        .with_name("ttyDEMO0")
        .spawn();
    let config = MafpConfig::from_env();
    let device = Device::new(Box::new(MafpDriver::new(Box::new(transport), config)));
    let cancel = CancellationToken::new();

    let info = device.probe(&cancel).await.context("probe")?;
    println!(
        "Found {} ({})",
        device.name(),
        info.device_id.as_deref().unwrap_or("no serial")
    );
    device.open(&cancel).await.context("open")?;

    let stages = device.nr_enroll_stages();
    sensor.touch(Touch::finger(7).messy());
    sensor.touch_times(7, stages as usize);

    let progress: EnrollProgressFn = Box::new(move |stage, _print, error| match error {
        Some(error) => println!("  stage {stage}/{stages}: {error}, touch again"),
        None => println!("  stage {stage}/{stages} done"),
    });
    let template = Print::new()
        .with_finger(Finger::RightIndex)
        .with_username("demo");
    let print = device
        .enroll(template, &cancel, Some(progress))
        .await
        .context("enroll")?;
    println!("Enrolled {print}");

    sensor.touch(Touch::finger(7));
    let result = device.verify(&print, &cancel, None).await?;
    println!("Verify with the same finger: match = {}", result.is_match());

    sensor.touch(Touch::finger(3));
    let result = device.identify(&[print.clone()], &cancel, None).await?;
    println!("Identify with another finger: match = {}", result.is_match());

    for stored in device.list_prints(&cancel).await? {
        println!("Stored: {stored}");
    }

    match device.delete_print(&print, &cancel).await {
        Ok(()) | Err(Error::DataNotFound) => {}
        Err(e) => return Err(e).context("delete"),
    }
    device.close(&cancel).await.context("close")?;
    Ok(())
}
