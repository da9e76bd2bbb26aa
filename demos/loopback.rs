//! Loopback example.
//!
//! Plays a tone through a simulated renderer inside this process, captures it
//! with the probe, and receives the mixed output through a channel sink.
//! Every piece except the audio engine is the real thing: the channel, the
//! producer session, the mixer and the output task.
//!
//! Run with: cargo run --example loopback

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use app_audio_capture::discovery::{Application, StaticDiscovery};
use app_audio_capture::format::WaveFormat;
use app_audio_capture::probe::{CaptureContext, CaptureProbe, SimulatedRenderer};
use app_audio_capture::{AppAudioCapture, CaptureConfig, CaptureEvent, ChannelSink, OutputChunk};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const TONE_HZ: f32 = 440.0;
const RENDER_RATE: u32 = 48_000;
/// 10 ms render periods, like a shared-mode client.
const PERIOD_FRAMES: usize = 480;

fn tone_period(start_frame: usize) -> Vec<u8> {
    (start_frame..start_frame + PERIOD_FRAMES)
        .flat_map(|n| {
            let sample = (TAU * TONE_HZ * n as f32 / RENDER_RATE as f32).sin() * 0.5;
            let bytes = sample.to_le_bytes();
            [bytes, bytes]
        })
        .flatten()
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pid = std::process::id();
    let config = CaptureConfig::default();

    let discovery = StaticDiscovery::new();
    discovery.insert("loopback", Application::new("Loopback").with_process(pid, true));

    let (tx, mut rx) = mpsc::channel::<OutputChunk>(64);
    let session = AppAudioCapture::builder()
        .target("loopback")
        .discovery(discovery)
        .config(config.clone())
        .add_sink(ChannelSink::new(tx))
        .on_event(|event| match event {
            CaptureEvent::ProducerAttached { pid } => println!("Producer attached: {pid}"),
            CaptureEvent::FormatChanged { current, .. } => println!("Producer format: {current}"),
            CaptureEvent::ChunkDropped { reason, .. } => eprintln!("Dropped chunk: {reason:?}"),
            _ => {}
        })
        .start()
        .await?;

    // Give the first discovery pass time to open our channel
    tokio::time::sleep(Duration::from_millis(100)).await;

    let renderer = SimulatedRenderer::new();
    renderer.initialize(WaveFormat::extensible(
        2,
        RENDER_RATE,
        32,
        0x3,
        app_audio_capture::format::WaveSubFormat::IeeeFloat,
    ));
    let context = Arc::new(CaptureContext::for_current_process(&config.transport));
    let probe = CaptureProbe::attach(renderer.interceptor(), Arc::clone(&context));

    let render = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        for period in 0..300 {
            ticker.tick().await;
            renderer.render(&tone_period(period * PERIOD_FRAMES));
        }
        drop(probe);
    });

    println!("Capturing for 3 seconds...");
    let listen = async {
        while let Some(chunk) = rx.recv().await {
            let energy: f32 = chunk
                .frames
                .iter()
                .map(|f| f.samples[0] * f.samples[0])
                .sum();
            let rms = (energy / chunk.frame_count().max(1) as f32).sqrt();
            println!(
                "segment @ {} ns: {} frames, rms {rms:.3}",
                chunk.timestamp,
                chunk.frame_count()
            );
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(3), listen).await;
    render.await?;

    println!("Probe: {:?}", context.stats());
    println!("Session: {:?}", session.stats());
    session.stop().await;
    Ok(())
}
