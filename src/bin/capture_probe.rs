//! capture_probe - drive a frame provider the way the compositor does
//!
//! This tool:
//! 1. Loads capture configuration (CAPTURE_CONFIG + env overrides)
//! 2. Builds the configured provider
//! 3. Polls `initialize` until the device delivers or the wait expires
//! 4. Runs render ticks of `update` + `timestamp` at the capture rate
//! 5. Disposes the provider on exit or Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use spectator_capture::{
    provider, CaptureConfig, FrameProvider, InitStatus, ProviderType, NO_TIMESTAMP,
    TICKS_PER_SECOND,
};

#[derive(Parser, Debug)]
#[command(name = "capture_probe", about = "Exercise a capture frame provider")]
struct Args {
    /// Render ticks to run once the device is delivering
    #[arg(long, env = "CAPTURE_PROBE_FRAMES", default_value_t = 90)]
    frames: u32,

    /// Override the configured provider (elgato, blackmagic)
    #[arg(long)]
    provider: Option<ProviderType>,

    /// Override the requested frame height
    #[arg(long)]
    height: Option<u32>,

    /// Seconds to wait for the first frame
    #[arg(long, env = "CAPTURE_PROBE_WAIT_SECS", default_value_t = 5)]
    wait_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = CaptureConfig::load()?;
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(height) = args.height {
        config.frame_height = height;
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut provider = provider::from_config(&config)?;
    let result = probe(provider.as_mut(), &args, &running);
    provider.dispose();
    log::info!("capture_probe: provider disposed");
    result
}

fn probe(provider: &mut dyn FrameProvider, args: &Args, running: &AtomicBool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        match provider.initialize(None, None) {
            Ok(InitStatus::Ready) => break,
            Ok(InitStatus::Pending) => {
                if Instant::now() >= deadline || !running.load(Ordering::SeqCst) {
                    return Err(anyhow!(
                        "{} provider still pending after {}s",
                        provider.provider_type(),
                        args.wait_secs
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                return Err(anyhow!(
                    "{} provider failed to initialize (code {}): {}",
                    provider.provider_type(),
                    err.code(),
                    err
                ));
            }
        }
    }

    let period = Duration::from_nanos((provider.duration_hns() * 100) as u64);
    log::info!(
        "capture_probe: {} enabled, frame period {:?}, yuv={}",
        provider.provider_type(),
        period,
        provider.output_yuv()
    );

    let mut last = NO_TIMESTAMP;
    let mut fresh = 0u32;
    for tick in 0..args.frames {
        if !running.load(Ordering::SeqCst) {
            log::info!("capture_probe: interrupted after {} ticks", tick);
            break;
        }
        let frame = tick as i32;
        provider.update(frame);
        let timestamp = provider.timestamp(frame);
        if timestamp != last {
            fresh += 1;
            log::debug!(
                "tick {}: timestamp {} ({:.3}s)",
                tick,
                timestamp,
                timestamp as f64 / TICKS_PER_SECOND as f64
            );
            last = timestamp;
        }
        std::thread::sleep(period);
    }

    log::info!(
        "capture_probe: {} ticks, {} fresh frames, last timestamp {}",
        args.frames,
        fresh,
        last
    );
    Ok(())
}
