//! Entry point for `thermal-link`.
//!
//! Parses CLI arguments and runs either the air-unit **send** side or the
//! ground-station **receive** side.  All protocol work is delegated to the
//! library; `main.rs` owns only process setup (logging, signal handling,
//! argument parsing) and the stand-ins for the camera and the database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use thermal_link::config::{AIR_UDP_ADDR, DEFAULT_BAUD_RATE, DEFAULT_BYTE_TIMEOUT, GROUND_UDP_ADDR};
use thermal_link::diagnostics::{Diagnostics, LinkEvent};
use thermal_link::simulator::{Simulator, SimulatorConfig};
use thermal_link::{
    open_link, CallSign, Link, ProtocolConfig, ReceiverConfig, ReceiverPipeline, RecordSink,
    SenderConfig, SenderPipeline, SessionId, SinkError, TelemetryRecord, ThermalSample,
    TransportConfig,
};

/// Thermal telemetry over a lossy radio link.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the air unit: sample, packetize and transmit.
    Send {
        #[command(flatten)]
        link: LinkArgs,
        /// Flight identifier (random 12 digits when omitted).
        #[arg(long)]
        session: Option<String>,
        /// Interval between synthetic camera samples.
        #[arg(long, default_value_t = 1_000)]
        sample_ms: u64,
        /// Seed for the resend draw.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run the ground station: receive, acknowledge and store.
    Receive {
        #[command(flatten)]
        link: LinkArgs,
        /// Call sign written into every ACK.
        #[arg(long, default_value = "KK72PA")]
        call_sign: String,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Serial device of the radio modem; UDP loopback when omitted.
    #[arg(long)]
    serial: Option<String>,
    /// Serial line rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Local UDP address (defaults to this role's development port).
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Peer UDP address (defaults to the other role's development port).
    #[arg(long)]
    peer: Option<SocketAddr>,
    #[arg(long, default_value_t = 10_000)]
    ack_timeout_ms: u64,
    #[arg(long, default_value_t = 20)]
    dispatch_ms: u64,
    /// Development only: drop this fraction of outgoing frames.
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,
    /// Development only: flip one bit in this fraction of outgoing frames.
    #[arg(long, default_value_t = 0.0)]
    corrupt_rate: f64,
}

impl LinkArgs {
    fn transport(&self, bind: &str, peer: &str) -> Result<TransportConfig> {
        if let Some(device) = &self.serial {
            return Ok(TransportConfig::Serial {
                device: device.clone(),
                baud_rate: self.baud,
                byte_timeout: DEFAULT_BYTE_TIMEOUT,
            });
        }
        Ok(TransportConfig::Udp {
            bind: match self.bind {
                Some(addr) => addr,
                None => bind.parse().context("default bind address")?,
            },
            peer: match self.peer {
                Some(addr) => addr,
                None => peer.parse().context("default peer address")?,
            },
        })
    }

    fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            dispatch_interval: Duration::from_millis(self.dispatch_ms.max(1)),
            ..ProtocolConfig::default()
        }
    }

    fn fault_model(&self) -> Option<SimulatorConfig> {
        (self.loss_rate > 0.0 || self.corrupt_rate > 0.0).then(|| SimulatorConfig {
            loss_rate: self.loss_rate,
            corrupt_rate: self.corrupt_rate,
            ..SimulatorConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            link,
            session,
            sample_ms,
            seed,
        } => {
            let transport = link.transport(AIR_UDP_ADDR, GROUND_UDP_ADDR)?;
            let config = SenderConfig {
                session_id: session
                    .as_deref()
                    .map(SessionId::new)
                    .unwrap_or_else(SessionId::generate),
                rng_seed: seed,
                protocol: link.protocol(),
                ..SenderConfig::default()
            };
            let opened = open_link(&transport)
                .await
                .with_context(|| format!("opening {} link", transport.label()))?;
            let sample_every = Duration::from_millis(sample_ms.max(1));
            match link.fault_model() {
                Some(faults) => {
                    log::warn!("[main] fault injection enabled: {faults:?}");
                    run_send(Arc::new(Simulator::new(opened, faults)), config, sample_every).await
                }
                None => run_send(Arc::new(opened), config, sample_every).await,
            }
        }
        Mode::Receive { link, call_sign } => {
            let transport = link.transport(GROUND_UDP_ADDR, AIR_UDP_ADDR)?;
            let config = ReceiverConfig {
                call_sign: CallSign::new(&call_sign),
                protocol: link.protocol(),
            };
            let opened = open_link(&transport)
                .await
                .with_context(|| format!("opening {} link", transport.label()))?;
            match link.fault_model() {
                Some(faults) => {
                    log::warn!("[main] fault injection enabled: {faults:?}");
                    run_receive(Arc::new(Simulator::new(opened, faults)), config).await
                }
                None => run_receive(Arc::new(opened), config).await,
            }
        }
    }
}

/// Stand-in for the thermal camera: a slow random walk.
fn synthetic_sample(rng: &mut StdRng, last: ThermalSample) -> ThermalSample {
    let high = (last.high_temp + rng.gen_range(-2..=2)).clamp(20, 90);
    let low = (last.low_temp + rng.gen_range(-1..=1)).clamp(-20, high);
    ThermalSample {
        high_temp: high,
        low_temp: low,
    }
}

async fn run_send<L: Link>(
    link: Arc<L>,
    config: SenderConfig,
    sample_every: Duration,
) -> Result<()> {
    let diagnostics = spawn_event_log();
    let handle = SenderPipeline::spawn(config, link, diagnostics);
    let stats = handle.stats();

    let mut rng = StdRng::from_entropy();
    let mut sample = ThermalSample {
        high_temp: 45,
        low_temp: 10,
    };
    let mut ticker = tokio::time::interval(sample_every);
    let mut count: u64 = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                sample = synthetic_sample(&mut rng, sample);
                let altitude = 1_200 + rng.gen_range(0..50);
                handle.ingest(sample, None, altitude);
                count += 1;
                if count % 30 == 0 {
                    log::info!("[main] {:?}", *stats.borrow());
                }
            }
        }
    }

    log::info!("[main] shutting down; final {:?}", *stats.borrow());
    handle.shutdown().await;
    Ok(())
}

/// Stand-in for the database: log each accepted record.
struct LogSink;

impl RecordSink for LogSink {
    async fn store(&mut self, record: TelemetryRecord) -> Result<(), SinkError> {
        log::info!(
            "[sink] session={} seq={} lat={:.6} lon={:.6} alt={} high={} low={} t={}",
            record.session_id,
            record.sequence_id,
            record.latitude,
            record.longitude,
            record.altitude,
            record.high_temp,
            record.low_temp,
            record.capture_time
        );
        Ok(())
    }
}

async fn run_receive<L: Link>(link: Arc<L>, config: ReceiverConfig) -> Result<()> {
    let diagnostics = spawn_event_log();
    let handle = ReceiverPipeline::spawn(config, link, LogSink, diagnostics);
    let stats = handle.stats();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    log::info!("[main] shutting down; final {:?}", *stats.borrow());
    handle.shutdown().await;
    Ok(())
}

/// Drain link events into the log.
fn spawn_event_log() -> Diagnostics {
    let (diagnostics, mut events) = Diagnostics::channel(256);
    tokio::spawn(async move {
        while let Some(LinkEvent {
            session_id,
            sequence_id,
            role,
            kind,
            attempt_count,
            corrupted,
            ..
        }) = events.recv().await
        {
            log::info!(
                "[event] {role:?} {kind:?} session={} seq={} attempt={attempt_count} \
                 corrupted={corrupted}",
                session_id.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                sequence_id.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            );
        }
    });
    diagnostics
}
