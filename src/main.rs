// src/main.rs

use anyhow::Result;
use cardscan::{
    Config, DirectoryFrameSource, HttpRecognizer, ScanError, SessionController, SystemClock,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("CARDSCAN_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "cardscan={},tokio_tungstenite=warn",
            config.logging.level
        ))
        .init();

    info!("🃏 Card Detection Session Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Capture: {} fps, conf={:.2}, iou={:.2}, max={}, cooldown={}s",
        config.capture.rate_fps,
        config.capture.confidence,
        config.capture.iou,
        config.capture.max_detections,
        config.cache.cooldown_secs
    );

    let recognizer = HttpRecognizer::new(
        &config.backend.base_url,
        Duration::from_secs(config.backend.request_timeout_secs),
    )?;

    match recognizer.health().await {
        Ok(health) if health.ok => info!(
            "✓ Backend healthy (device: {})",
            health.device.as_deref().unwrap_or("unknown")
        ),
        Ok(_) => warn!("⚠️  Backend reachable but not ready"),
        Err(e) => warn!("⚠️  Backend health check failed: {} — capture will retry", e),
    }

    let source = match DirectoryFrameSource::open(&config.capture.input_dir, config.capture.rate_fps)
    {
        Ok(source) => source,
        Err(e @ ScanError::Permission(_)) => {
            error!("🎥 {}", e);
            error!("Capture not started — check capture.input_dir in {}", config_path);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let output_dir = config.capture.output_dir.clone();
    let save_annotated = config.capture.save_annotated;

    let mut session = SessionController::new(
        config,
        Arc::new(recognizer),
        Box::new(source),
        Arc::new(SystemClock),
    );

    let stats = session
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("\n📊 Session Report:");
    info!("  Frames submitted: {}", stats.frames_submitted);
    info!("  Ticks dropped (busy): {}", stats.ticks_dropped_busy);
    info!(
        "  Responses: {} ok / {} failed ({} stale dropped)",
        stats.responses_ok, stats.responses_failed, stats.stale_responses_dropped
    );
    info!("  Detections seen: {}", stats.detections_seen);
    info!(
        "  Cards collected: {} ({} duplicates suppressed)",
        stats.cards_inserted, stats.duplicates_skipped
    );
    if stats.channel_events > 0 {
        info!("  Channel events: {}", stats.channel_events);
    }

    if !session.cache().is_empty() {
        info!("\n🃏 Collection:");
        for entity in session.cache().entities() {
            info!(
                "  {} [{}/{}] d={} kept={}",
                entity.name,
                entity.set_id,
                entity.card_id,
                entity
                    .confidence
                    .map(|d| format!("{:.1}", d))
                    .unwrap_or_else(|| "?".to_string()),
                entity.kept
            );
        }
    }

    let recent = session.event_log().recent(10);
    if !recent.is_empty() {
        info!("\nRecent events:");
        for entry in recent {
            info!("  [{}] {}", entry.timestamp_ms, entry.message);
        }
    }

    if save_annotated {
        if let Some(snapshot) = session.annotated_snapshot() {
            std::fs::create_dir_all(&output_dir)?;
            let path = Path::new(&output_dir).join("last_frame_annotated.png");
            snapshot.save(&path)?;
            info!("💾 Annotated snapshot written to {}", path.display());
        }
    }

    Ok(())
}
