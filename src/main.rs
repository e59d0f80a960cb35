use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lora_link::clock::{Clock, SystemClock};
use lora_link::config::AppConfig;
use lora_link::gateway::{DownlinkBatch, Gateway, UdpTransport};
use lora_link::radio::hal::{RegisterBus, SimulatedRadio};
use lora_link::{init_logger_with_default, send_to_wait, LoRa, MacFrame, DEFAULT_RETRIES};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lora-link")]
#[command(about = "LoRa point-to-point link and single-channel gateway")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, default_value = "lora-link.json")]
    config: PathBuf,

    /// Use the simulated chip instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive continuously and log every packet for this node
    Listen,
    /// Send a message periodically with acknowledged delivery
    Send {
        destination: u8,
        message: String,
        #[arg(short, long, default_value = "10")]
        interval_secs: u64,
        #[arg(short, long, default_value_t = DEFAULT_RETRIES)]
        retries: u8,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<u32>,
    },
    /// Forward received frames to a network server and send its downlinks
    Gateway,
    /// Decode a LoRaWAN MAC frame given as hex
    Inspect { frame: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger_with_default("info");
    let cli = Cli::parse();

    if let Commands::Inspect { frame } = &cli.command {
        return inspect(frame);
    }

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Loading configuration {}", cli.config.display()))?;
    if matches!(cli.command, Commands::Gateway) {
        config.radio.forward_raw = true;
    }

    if cli.simulate {
        let (sim, irq) = SimulatedRadio::new();
        let radio = LoRa::new(sim, irq, SystemClock, &config.radio)
            .context("Initializing simulated radio")?;
        return run(cli.command, radio, config).await;
    }

    #[cfg(feature = "raspberry-pi")]
    {
        use lora_link::radio::hal::RaspberryPiBus;

        let (bus, irq) = RaspberryPiBus::open(&config.bus).context("Opening radio bus")?;
        let radio =
            LoRa::new(bus, irq, SystemClock, &config.radio).context("Initializing radio")?;
        run(cli.command, radio, config).await
    }

    #[cfg(not(feature = "raspberry-pi"))]
    {
        bail!("No radio bus available: build with --features raspberry-pi or pass --simulate")
    }
}

fn inspect(frame: &str) -> anyhow::Result<()> {
    let raw = hex::decode(frame.trim()).context("Frame must be hex")?;
    let frame = MacFrame::parse(&raw)?;
    println!("{}", frame);
    Ok(())
}

/// Flag set once Ctrl-C is received
fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            setter.store(true, Ordering::Relaxed);
        }
    });
    flag
}

async fn run<B>(
    command: Commands,
    mut radio: LoRa<B, SystemClock>,
    config: AppConfig,
) -> anyhow::Result<()>
where
    B: RegisterBus + Send + 'static,
{
    let stop = shutdown_flag();

    match command {
        Commands::Listen => {
            radio.on_recv(Box::new(|packet| {
                info!(
                    "From {} id {} (RSSI {} dBm, SNR {} dB): {}",
                    packet.header.source,
                    packet.header.id,
                    packet.quality.rssi,
                    packet.quality.snr,
                    String::from_utf8_lossy(&packet.payload)
                );
            }));
            tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                radio.listen()?;
                info!("Listening as node {}", radio.this_address());
                while !stop.load(Ordering::Relaxed) {
                    radio.service_interrupts()?;
                    radio.clock().sleep(radio.timing().poll_interval());
                }
                radio.sleep()?;
                Ok(())
            })
            .await??;
        }
        Commands::Send {
            destination,
            message,
            interval_secs,
            retries,
            count,
        } => {
            let interval = Duration::from_secs(interval_secs);
            tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                let mut sent = 0u32;
                while !stop.load(Ordering::Relaxed) && count.map_or(true, |c| sent < c) {
                    let delivered = send_to_wait(&mut radio, message.as_bytes(), destination, retries)?;
                    sent += 1;
                    if delivered {
                        info!("Message {} delivered to {}", sent, destination);
                    } else {
                        warn!("Message {} to {} not acknowledged", sent, destination);
                    }

                    // Keep servicing the radio between messages
                    let until = radio.clock().now() + interval;
                    while radio.clock().now() < until && !stop.load(Ordering::Relaxed) {
                        radio.service_interrupts()?;
                        radio.clock().sleep(radio.timing().poll_interval());
                    }
                }
                radio.sleep()?;
                Ok(())
            })
            .await??;
        }
        Commands::Gateway => {
            let Some(gateway_config) = config.gateway else {
                bail!("The gateway command needs a \"gateway\" configuration section");
            };
            let transport = UdpTransport::connect(&gateway_config.server_addr())?;
            let mut gateway = Gateway::new(radio, transport, &gateway_config)?;

            let (batch_tx, batch_rx) = mpsc::channel();
            if let Some(listen) = &gateway_config.downlink_listen {
                let socket = tokio::net::UdpSocket::bind(listen)
                    .await
                    .with_context(|| format!("Binding downlink listener {}", listen))?;
                info!("Accepting downlink batches on {}", socket.local_addr()?);
                tokio::spawn(receive_downlinks(socket, batch_tx));
            }

            tokio::task::spawn_blocking(move || gateway.run(batch_rx, &stop)).await??;
        }
        Commands::Inspect { .. } => unreachable!("handled before the radio is opened"),
    }

    Ok(())
}

async fn receive_downlinks(socket: tokio::net::UdpSocket, batches: mpsc::Sender<DownlinkBatch>) {
    let mut buf = vec![0u8; 65_536];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Downlink listener failed: {}", e);
                return;
            }
        };
        match DownlinkBatch::from_json(&buf[..n]) {
            Ok(batch) => {
                if batches.send(batch).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Ignoring malformed downlink batch from {}: {}", from, e),
        }
    }
}
