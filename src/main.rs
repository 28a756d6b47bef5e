//! animated-play - headless GIF playback through the adaptive frame cache
//!
//! Usage: animated-play <file.gif> [--cache N] [--max N] [--no-predraw] [--seconds S] [--low-memory F]

use animated_image::{
    AnimatedImage, AnimatedImageOptions, MemoryPressureMonitor, SystemMemoryWatcher, WeakAnimatedImage, DEFAULT_DELAY,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How often a missing frame is re-polled
const STALL_POLL: Duration = Duration::from_millis(5);

/// Give up on a frame that stays missing this long (it most likely failed)
const STALL_LIMIT: Duration = Duration::from_secs(2);

/// How often `--low-memory` samples system memory
const MEMORY_POLL: Duration = Duration::from_millis(500);

struct Args {
    path: PathBuf,
    cache: usize,
    max: usize,
    predraw: bool,
    seconds: f64,
    low_memory: Option<f64>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    let mut parsed = Args {
        path: PathBuf::new(),
        cache: 0,
        max: 0,
        predraw: true,
        seconds: 10.0,
        low_memory: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cache" => parsed.cache = flag_value(&mut args, "--cache")?,
            "--max" => parsed.max = flag_value(&mut args, "--max")?,
            "--seconds" => parsed.seconds = flag_value(&mut args, "--seconds")?,
            "--low-memory" => parsed.low_memory = Some(flag_value(&mut args, "--low-memory")?),
            "--no-predraw" => parsed.predraw = false,
            other if other.starts_with("--") => bail!("Unknown option {}", other),
            other => path = Some(PathBuf::from(other)),
        }
    }

    parsed.path = path.context("Usage: animated-play <file.gif> [--cache N] [--max N] [--no-predraw] [--seconds S] [--low-memory F]")?;
    Ok(parsed)
}

fn flag_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = args.next().with_context(|| format!("{} needs a value", flag))?;
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", flag, value))
}

#[derive(Debug, Default)]
struct PlaybackReport {
    frames_shown: u64,
    stalls: u64,
    stalled_for: Duration,
    skipped: u64,
    loops: u64,
}

/// Drive playback through a weak handle, the way a display timer would
async fn play(image: WeakAnimatedImage, loop_count: u32, duration: Duration) -> PlaybackReport {
    let start = Instant::now();
    let mut report = PlaybackReport::default();
    let mut index = 0;

    while start.elapsed() < duration {
        let Some(frame_count) = image.frame_count() else {
            break;
        };

        let frame = match image.image_lazily_cached_at_index(index) {
            Some(frame) => Some(frame),
            None => {
                // Pause and re-poll instead of blocking on the decode
                report.stalls += 1;
                let stall_start = Instant::now();
                let mut frame = None;
                while frame.is_none() && stall_start.elapsed() < STALL_LIMIT {
                    smol::Timer::after(STALL_POLL).await;
                    frame = image.image_lazily_cached_at_index(index);
                }
                report.stalled_for += stall_start.elapsed();
                frame
            }
        };

        match frame {
            Some(frame) => {
                if let Err(e) = frame.render_pixels() {
                    log::warn!("Could not draw frame {}: {}", index, e);
                }
                report.frames_shown += 1;
                let delay = image.delay_time_at(index).unwrap_or(DEFAULT_DELAY);
                smol::Timer::after(delay).await;
            }
            None => {
                log::warn!("Skipping frame {}, not available after {:?}", index, STALL_LIMIT);
                report.skipped += 1;
            }
        }

        index += 1;
        if index == frame_count {
            index = 0;
            report.loops += 1;
            if loop_count > 0 && report.loops >= loop_count as u64 {
                break;
            }
        }
    }

    report
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;

    // Images subscribe to the shared monitor unless given another one
    let _watcher = match args.low_memory {
        Some(fraction) => {
            log::info!("Signalling memory pressure below {:.0}% available", fraction * 100.0);
            Some(
                SystemMemoryWatcher::spawn(MemoryPressureMonitor::shared().clone(), fraction, MEMORY_POLL)
                    .context("Failed to start memory watcher")?,
            )
        }
        None => None,
    };
    let bytes = std::fs::read(&args.path).with_context(|| format!("Failed to read {}", args.path.display()))?;
    log::info!("Loaded {} ({} bytes)", args.path.display(), bytes.len());

    let options = AnimatedImageOptions::default()
        .with_optimal_frame_cache_size(args.cache)
        .with_frame_cache_size_max(args.max)
        .with_predrawing(args.predraw);
    let image = AnimatedImage::try_build(bytes, options)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    let loop_duration: Duration = image.delay_times().iter().sum();
    log::info!(
        "{}: {} frames, {:?} per loop, loop count {}, window {}",
        image.size(),
        image.frame_count(),
        loop_duration,
        image.loop_count(),
        image.frame_cache_size_current()
    );

    let report = smol::block_on(play(
        image.downgrade(),
        image.loop_count(),
        Duration::try_from_secs_f64(args.seconds).unwrap_or(Duration::ZERO),
    ));

    let stats = image.stats();
    log::info!(
        "Played {} frame(s) over {} loop(s): {} stall(s) totalling {:?}, {} skipped",
        report.frames_shown,
        report.loops,
        report.stalls,
        report.stalled_for,
        report.skipped
    );
    log::info!(
        "Cache: hit rate {:.1}%, {} decoded, {} evicted, {} failed, {} resident ({} KB), window {}",
        stats.hit_rate() * 100.0,
        stats.insertions,
        stats.evictions,
        stats.failures,
        stats.resident_frames,
        stats.resident_bytes / 1024,
        image.frame_cache_size_current()
    );

    Ok(())
}
