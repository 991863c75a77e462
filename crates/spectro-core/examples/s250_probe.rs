//! S250 Spectrophotometer Probe Tool
//!
//! A standalone tool to check serial communication with a Secomam S250 or Prim.
//! Initializes the instrument, prints its identity, then takes a reading.
//!
//! Usage:
//!   cargo run --example s250_probe -- [OPTIONS]
//!
//! Options:
//!   --port PORT         Serial port (default: first port found)
//!   --demo              Talk to the built-in simulator instead of hardware
//!   --wavelength NM     Wavelength for the absorbance reading (default: 540)
//!   --spectrum START END
//!                       Also acquire a spectrum over START..=END nm
//!   --list              List serial ports and exit
//!
//! Set RUST_LOG=spectro_core=debug to see the raw frames.

use anyhow::{anyhow, bail, Context, Result};
use spectro_core::prelude::*;
use spectro_core::protocol::list_ports;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut demo = false;
    let mut wavelength = 540u16;
    let mut spectrum: Option<(u16, u16)> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_name = args.get(i).cloned();
            }
            "--demo" => {
                demo = true;
            }
            "--wavelength" | "-w" => {
                i += 1;
                if let Some(value) = args.get(i) {
                    wavelength = value.parse().context("invalid wavelength")?;
                }
            }
            "--spectrum" | "-s" => {
                let start = args.get(i + 1).context("--spectrum needs START END")?;
                let end = args.get(i + 2).context("--spectrum needs START END")?;
                spectrum = Some((start.parse()?, end.parse()?));
                i += 2;
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    println!(
                        "{}  {}",
                        port.name,
                        port.product.as_deref().unwrap_or("")
                    );
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let config = match DriverConfig::default_path() {
        Some(path) => DriverConfig::load_or_default(path)?,
        None => DriverConfig::default(),
    };

    let (delivery, mut inbox) = ChannelDelivery::new();
    let (spectro, port_name) = if demo {
        let opener = SimulatedOpener::new(SimulatorControl::new());
        (Spectrometer::with_opener(opener, config), "sim0".to_string())
    } else {
        let port_name = match port_name {
            Some(name) => name,
            None => Spectrometer::available_ports()
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no serial port found, use --port or --demo"))?,
        };
        (Spectrometer::new(config), port_name)
    };
    let spectro = spectro.with_delivery(delivery);

    println!("Connecting to {}...", port_name);
    spectro.connect(&port_name)?;

    let ready = wait::<bool>(&mut inbox, |done| spectro.start_device(done))?;
    if !ready {
        bail!("instrument refused initialization");
    }
    let model = wait::<DeviceModel>(&mut inbox, |done| spectro.get_model_name(done))?;
    let version = wait::<u8>(&mut inbox, |done| spectro.get_firmware_version(done))?;
    println!("Model: {}  firmware: {}", model, version);

    let report = wait::<AutotestReport>(&mut inbox, |done| spectro.perform_autotest(done))?;
    println!(
        "Autotest: {}",
        if report.passed {
            "passed".to_string()
        } else {
            format!("failed (code {:#04x})", report.code)
        }
    );

    wait::<bool>(&mut inbox, |done| spectro.set_wavelength(wavelength, done))?;
    let zero = wait::<DeviceReading>(&mut inbox, |done| spectro.get_absorbance_zero(done))?;
    let reading = wait::<DeviceReading>(&mut inbox, |done| spectro.get_absorbance(done))?;
    println!(
        "Absorbance at {} nm: {:.4} (blank {:.4})",
        wavelength, reading.value, zero.value
    );

    if let Some((start, end)) = spectrum {
        wait::<bool>(&mut inbox, |done| spectro.make_baseline(start, end, done))?;
        let points = wait::<Vec<SpectrumPoint>>(&mut inbox, |done| {
            spectro.get_spectrum(
                |progress| {
                    if progress.percent % 10 == 0 {
                        println!("  {:3}%  {} nm", progress.percent, progress.wavelength_nm);
                    }
                },
                done,
            )
        })?;
        for point in &points {
            println!("{}\t{:.4}", point.wavelength_nm, point.absorbance);
        }
    }

    spectro.stop_device()?;
    spectro.disconnect();
    Ok(())
}

type Done<T> = Box<dyn FnOnce(Result<T, ProtocolError>) + Send>;

/// Issue one verb and pump the inbox until its outcome arrives
fn wait<T: Send + 'static>(
    inbox: &mut Inbox,
    issue: impl FnOnce(Done<T>) -> Result<(), ProtocolError>,
) -> Result<T> {
    let slot = Arc::new(Mutex::new(None));
    let s = Arc::clone(&slot);
    issue(Box::new(move |r| {
        if let Ok(mut slot) = s.lock() {
            *slot = Some(r);
        }
    }))?;
    if !inbox.pump_until(WAIT, || slot.lock().map(|s| s.is_some()).unwrap_or(true)) {
        bail!("no answer within {:?}", WAIT);
    }
    let outcome = slot
        .lock()
        .map_err(|_| anyhow!("result slot poisoned"))?
        .take()
        .ok_or_else(|| anyhow!("no answer"))?;
    Ok(outcome?)
}

fn print_help() {
    println!("S250 Spectrophotometer Probe Tool");
    println!();
    println!("Usage: cargo run --example s250_probe -- [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port PORT           Serial port (default: first port found)");
    println!("  --demo                Use the built-in simulator");
    println!("  --wavelength NM       Absorbance wavelength (default: 540)");
    println!("  --spectrum START END  Acquire a spectrum over START..=END nm");
    println!("  --list                List serial ports and exit");
}
