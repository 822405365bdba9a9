//! Poll an RTU slave over a real serial port.
//!
//! Usage: `cargo run --example rtu_serial_master -- /dev/ttyUSB0 9600 1`

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serimod_engine::{Config, FrameMode, Master};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud: u32 = args.next().as_deref().unwrap_or("9600").parse()?;
    let address: u8 = args.next().as_deref().unwrap_or("1").parse()?;

    let port = tokio_serial::new(path.as_str(), baud).open_native_async()?;
    let (mut reader, mut writer) = tokio::io::split(port);
    info!(%path, baud, address, "port open");

    // Frames leave the poll loop through a channel; a writer task owns
    // the transmit half of the port.
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let master = Arc::new(Mutex::new(Master::new(
        Config::new(address, FrameMode::Rtu).with_bit_rate(baud),
        move |frame: &[u8]| {
            let _ = tx.send(frame.to_vec());
        },
    )));
    let feeder = master.lock().unwrap().feeder();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = writer.write_all(&frame).await {
                error!(%err, "serial write failed");
                break;
            }
        }
    });

    let started = Instant::now();
    let reader_started = started;
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let now_ms = reader_started.elapsed().as_millis() as u32;
                    for byte in &buf[..n] {
                        feeder.push(*byte, now_ms);
                    }
                }
                Err(err) => {
                    error!(%err, "serial read failed");
                    break;
                }
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    loop {
        {
            let mut master = master.lock().unwrap();
            if master.queue_len() == 0 {
                master.read_registers(0, 4, |values| {
                    if values.is_empty() {
                        error!("read timed out");
                    } else {
                        info!(?values, "registers");
                    }
                })?;
            }
            master.poll(started.elapsed().as_millis() as u32);
        }
        ticker.tick().await;
    }
}
