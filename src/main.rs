use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use redaudio::cli::{parse_args, print_help};
use redaudio::config::RedConfig;
use redaudio::red::container;
use redaudio::red::policy::{AudioMetricsSample, RedundancyController};
use redaudio::stats::{LossReport, NoopStatsSink};
use redaudio::transform::{EncodedFrame, FrameMetadata};
use redaudio::worker::{frame_pipe, FramePipeEnds, RedWorker};

const DEFAULT_RED_PAYLOAD_TYPE: u8 = 63;
const DEFAULT_OPUS_PAYLOAD_TYPE: u8 = 111;
const SIMULATED_SSRC: u32 = 0x5eed_0001;
/// Frames between receiver reports fed to the redundancy controller (one second)
const METRICS_INTERVAL: u32 = 50;
const PIPE_CAPACITY: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redaudio=info".parse()?),
        )
        .init();

    info!("redaudio loopback v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; fall back to the usual dynamic payload types
    let mut config = RedConfig::from_env()?;
    if config.red_payload_type == 0 || config.opus_payload_type == 0 {
        let negotiated = HashMap::from([
            ("red".to_string(), DEFAULT_RED_PAYLOAD_TYPE),
            ("opus".to_string(), DEFAULT_OPUS_PAYLOAD_TYPE),
        ]);
        config = config.with_payload_types(&negotiated);
    }
    info!("Configuration loaded");
    info!(
        "  Payload types: red={} opus={}",
        config.red_payload_type, config.opus_payload_type
    );
    info!(
        "  Redundant encodings: {} (enabled: {})",
        config.num_redundant_encodings, config.redundancy_enabled
    );
    info!("  Max audio payload: {} bytes", config.max_audio_payload_size);

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            shutdown.cancel();
        }
    });

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    run_loopback(&config, args.packets, args.loss_percent, rng, cancel_token).await
}

/// Send synthetic Opus frames through a sending worker, a lossy link, and a
/// receiving worker, adjusting redundancy from the observed loss.
async fn run_loopback(
    config: &RedConfig,
    packets: u32,
    loss_percent: f64,
    mut rng: StdRng,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!(
        "Sending {} frames over a link with {:.1}% loss",
        packets, loss_percent
    );

    // Sending side: only its send pipe carries traffic.
    let (send_pipe, mut sender) = frame_pipe(PIPE_CAPACITY);
    let (idle_pipe, idle_ends) = frame_pipe(1);
    let (control_tx, control_rx) = mpsc::channel(PIPE_CAPACITY);
    let sender_handle = RedWorker::spawn(
        config,
        Box::new(NoopStatsSink),
        send_pipe,
        idle_pipe,
        control_rx,
        cancel_token.clone(),
    );
    drop(idle_ends);

    // Receiving side: only its receive pipe carries traffic.
    let (idle_pipe, idle_ends) = frame_pipe(1);
    let (receive_pipe, mut receiver) = frame_pipe(PIPE_CAPACITY);
    let (receiver_control_tx, receiver_control_rx) = mpsc::channel(1);
    let (stats_tx, mut stats_rx) = mpsc::unbounded_channel::<LossReport>();
    let receiver_handle = RedWorker::spawn(
        config,
        Box::new(stats_tx),
        idle_pipe,
        receive_pipe,
        receiver_control_rx,
        cancel_token.clone(),
    );
    drop(idle_ends);
    drop(receiver_control_tx);

    let mut controller = RedundancyController::new();
    let mut packets_lost: u64 = 0;

    for n in 0..packets {
        if cancel_token.is_cancelled() {
            break;
        }

        let timestamp = n.wrapping_mul(config.packetization_time);
        let frame = synthetic_frame(config, n, timestamp, &mut rng)?;

        let Some(frame) = round_trip(&mut sender, frame).await else {
            warn!("Sending worker stopped early");
            break;
        };

        if rng.gen_bool(loss_percent / 100.0) {
            packets_lost += 1;
            debug!("Dropped frame seq={} ts={}", n as u16, timestamp);
        } else if round_trip(&mut receiver, frame).await.is_none() {
            warn!("Receiving worker stopped early");
            break;
        }

        while let Ok(report) = stats_rx.try_recv() {
            info!("Loss report: {}", report);
        }

        let sent = n + 1;
        if sent % METRICS_INTERVAL == 0 {
            let now_ms = i64::from(sent) * 20;
            let sample = AudioMetricsSample {
                timestamp_ms: now_ms,
                total_packets_sent: u64::from(sent),
                total_packets_lost: packets_lost,
            };
            for message in controller.on_metrics(now_ms, sample) {
                info!("Controller: {:?}", message);
                if control_tx.send(message).await.is_err() {
                    warn!("Sending worker no longer accepts control messages");
                }
            }
        }
    }

    drop(sender);
    drop(receiver);
    drop(control_tx);

    let sent_summary = sender_handle.await.context("sending worker panicked")?;
    let received_summary = receiver_handle.await.context("receiving worker panicked")?;
    while let Some(report) = stats_rx.recv().await {
        info!("Loss report: {}", report);
    }

    info!(
        "Done: {} frames sent, {} dropped by the link, {} received",
        sent_summary.frames_sent, packets_lost, received_summary.frames_received
    );
    Ok(())
}

/// Feed one frame into a worker pipe and wait for its transformed output.
async fn round_trip(ends: &mut FramePipeEnds, frame: EncodedFrame) -> Option<EncodedFrame> {
    ends.input.send(frame).await.ok()?;
    ends.output.recv().await
}

/// A 20 ms SILK wideband frame wrapped as a primary-only RED payload.
///
/// Every tenth frame is silence so the history skips it.
fn synthetic_frame(
    config: &RedConfig,
    n: u32,
    timestamp: u32,
    rng: &mut StdRng,
) -> Result<EncodedFrame> {
    let mut opus = BytesMut::with_capacity(64);
    opus.put_u8(9 << 3);
    if n % 10 == 9 {
        opus.put_u8(0x00);
    } else {
        // VAD and LBRR flags set
        opus.put_u8(0xc0);
        for _ in 0..rng.gen_range(20..60) {
            opus.put_u8(rng.gen());
        }
    }

    let payload: Bytes = container::build(
        config.opus_payload_type,
        config.max_audio_payload_size,
        timestamp,
        &opus,
        &[],
    )?;

    Ok(EncodedFrame::new(
        timestamp,
        payload,
        FrameMetadata {
            payload_type: config.red_payload_type,
            sequence_number: Some(n as u16),
            synchronization_source: Some(SIMULATED_SSRC),
        },
    ))
}
