//! spikestream-overlay: follows one match on the score server and keeps its
//! scoreboard overlay rendered to disk for an external compositor.
//!
//! Usage: spikestream-overlay <match-id> <team-a> <team-b> [out-dir]
//!
//! With `SPIKESTREAM_TOKEN` set and a system battery present, low-battery
//! reports are sent to the server as the app does while streaming.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spikestream::metrics::SessionMetrics;
use spikestream::model::HIGH_TIER;
use spikestream::notifications::{Notice, Notifier, TracingNotifier};
use spikestream::score_channel::{battery_percent, BatteryReporter};
use spikestream::{ChannelEvent, CoreConfig, MatchIdentity, OverlayCache, ScoreEventChannel, ScoreOverlayRenderer, ScoreState};

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";
const BATTERY_POLL_INTERVAL: Duration = Duration::from_secs(60);

struct Args {
    match_id: String,
    team_a: String,
    team_b: String,
    out_dir: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let (Some(match_id), Some(team_a), Some(team_b)) = (args.next(), args.next(), args.next()) else {
        bail!("usage: spikestream-overlay <match-id> <team-a> <team-b> [out-dir]");
    };
    let out_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    Ok(Args {
        match_id,
        team_a,
        team_b,
        out_dir,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let identity = MatchIdentity::new(args.match_id.as_str(), &args.team_a, &args.team_b)?;
    let config = CoreConfig::load()?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    info!(
        "[Overlay] Match {}: {} vs {} -> {}",
        identity.match_id,
        identity.team_a,
        identity.team_b,
        args.out_dir.display()
    );

    let (channel, mut events) = ScoreEventChannel::connect(config.channel.clone(), &identity.match_id)?;

    match (std::env::var("SPIKESTREAM_TOKEN").ok(), find_battery()) {
        (Some(token), Some(capacity)) => {
            let reporter = BatteryReporter::new(
                channel.emitter(),
                identity.match_id.clone(),
                token,
                config.low_battery_threshold,
            );
            tokio::spawn(reporter.run(battery_levels(capacity, BATTERY_POLL_INTERVAL)));
        }
        (None, _) => debug!("[Battery] No token, low-battery reports disabled"),
        (_, None) => debug!("[Battery] No battery found"),
    }

    let notifier = TracingNotifier;
    let metrics = SessionMetrics::new();
    let mut renderer = ScoreOverlayRenderer::new(identity.team_a.as_str(), identity.team_b.as_str());
    let mut cache = OverlayCache::new();

    let initial = ScoreState::default();
    let image = cache.render_now(&mut renderer, HIGH_TIER, &initial);
    write_overlay(&args.out_dir, &image, &initial)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[Overlay] Shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(ChannelEvent::ScoreUpdated(score)) => {
                    metrics.record_score_update();
                    match cache.update(&mut renderer, HIGH_TIER, &score) {
                        Some(image) => {
                            metrics.record_overlay(true);
                            write_overlay(&args.out_dir, &image, &score)?;
                        }
                        None => metrics.record_overlay(false),
                    }
                }
                Some(ChannelEvent::Connected) => notifier.notify(Notice::channel_connecting()),
                Some(ChannelEvent::ConnectError(reason)) => notifier.notify(Notice::channel_error(&reason)),
                Some(ChannelEvent::Disconnected) => notifier.notify(Notice::channel_disconnected()),
                None => {
                    warn!("[Overlay] Score channel closed");
                    break;
                }
            }
        }
    }

    channel.close().await;
    info!("[Overlay] Stats: {}", serde_json::to_string(&metrics.snapshot())?);
    Ok(())
}

#[derive(Serialize)]
struct ScoreRecord<'a> {
    score: &'a ScoreState,
    rendered_at: DateTime<Utc>,
}

/// Writes `overlay-latest.png` and `score.json`, replacing both atomically.
fn write_overlay(dir: &Path, image: &RgbaImage, score: &ScoreState) -> Result<()> {
    let staging = dir.join(".overlay-latest.png.tmp");
    image
        .save_with_format(&staging, image::ImageFormat::Png)
        .context("Failed to encode overlay PNG")?;
    std::fs::rename(&staging, dir.join("overlay-latest.png")).context("Failed to publish overlay PNG")?;

    let record = ScoreRecord {
        score,
        rendered_at: Utc::now(),
    };
    let staging = dir.join(".score.json.tmp");
    std::fs::write(&staging, serde_json::to_vec_pretty(&record)?).context("Failed to write score.json")?;
    std::fs::rename(&staging, dir.join("score.json")).context("Failed to publish score.json")?;

    info!("[Overlay] Rendered {:?}", score.as_array());
    Ok(())
}

/// Capacity file of the first battery under the power-supply class.
fn find_battery() -> Option<PathBuf> {
    let entries = std::fs::read_dir(POWER_SUPPLY_DIR).ok()?;
    entries.flatten().map(|entry| entry.path()).find_map(|supply| {
        let kind = std::fs::read_to_string(supply.join("type")).ok()?;
        let capacity = supply.join("capacity");
        (kind.trim() == "Battery" && capacity.exists()).then_some(capacity)
    })
}

fn battery_levels(capacity: PathBuf, every: Duration) -> Pin<Box<dyn Stream<Item = u8> + Send>> {
    Box::pin(async_stream::stream! {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match tokio::fs::read_to_string(&capacity).await {
                Ok(text) => match text.trim().parse::<i32>().ok().and_then(|level| battery_percent(level, 100)) {
                    Some(percent) => {
                        yield percent;
                    }
                    None => debug!("[Battery] Unreadable capacity {:?}", text.trim()),
                },
                Err(e) => {
                    warn!("[Battery] Failed to read {}: {}", capacity.display(), e);
                    break;
                }
            }
        }
    })
}
