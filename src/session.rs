// src/session.rs
//
// The detection session controller: one logical task owning the
// capture scheduler, recognition dispatch, collection cache, overlay
// renderer, and event log, with the notification channel running as a
// separate task feeding in over mpsc. Recognition requests are tagged
// with the session epoch; a response from a previous epoch is
// discarded without touching the cache.

use crate::cache::{DetectionCache, InsertOutcome};
use crate::channel::{run_channel, ChannelNotice, ChannelState, ServerEvent};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::ScanError;
use crate::event_log::EventLog;
use crate::frame_source::{encode_rgb_to_jpeg, FrameSource};
use crate::overlay::OverlayRenderer;
use crate::recognition::Recognizer;
use crate::scheduler::{CaptureScheduler, TickDecision, SETTLE_DELAY_MS};
use crate::types::{DetectionParams, Frame, RawDetection};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const EVENT_LOG_CAPACITY: usize = 256;

struct RecognitionOutcome {
    epoch: u64,
    latency_ms: u128,
    result: Result<Vec<RawDetection>, ScanError>,
}

#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub frames_submitted: u64,
    pub ticks_dropped_busy: u64,
    pub responses_ok: u64,
    pub responses_failed: u64,
    pub detections_seen: u64,
    pub cards_inserted: u64,
    pub duplicates_skipped: u64,
    pub stale_responses_dropped: u64,
    pub channel_events: u64,
}

pub struct SessionController<R: Recognizer> {
    config: Config,
    params: DetectionParams,
    recognizer: Arc<R>,
    source: Box<dyn FrameSource>,
    scheduler: CaptureScheduler,
    cache: DetectionCache,
    renderer: OverlayRenderer,
    event_log: EventLog,
    clock: Arc<dyn Clock>,
    epoch: u64,
    channel_state: ChannelState,
    last_frame: Option<Frame>,
    last_detections: Vec<RawDetection>,
    stats: SessionStats,
}

impl<R: Recognizer> SessionController<R> {
    pub fn new(
        config: Config,
        recognizer: Arc<R>,
        source: Box<dyn FrameSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let params = config.detection_params();
        let cooldown_ms = config.cache.cooldown_secs * 1000;
        let mut scheduler = CaptureScheduler::new(config.capture.rate_fps);
        scheduler.set_source_present(true);

        let mut renderer = OverlayRenderer::new();
        let (width, height) = source.dimensions();
        renderer.resize_to(width, height);

        Self {
            config,
            params,
            recognizer,
            source,
            scheduler,
            cache: DetectionCache::new(cooldown_ms, clock.clone()),
            renderer,
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            clock,
            epoch: 0,
            channel_state: ChannelState::Disconnected,
            last_frame: None,
            last_detections: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Drive the session until the frame source is exhausted or the
    /// shutdown future resolves. Errors never escape this loop; a
    /// failed cycle never halts subsequent cycles.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> SessionStats {
        let (resp_tx, mut resp_rx) = mpsc::channel::<RecognitionOutcome>(4);
        let (chan_tx, mut chan_rx) = mpsc::channel::<ChannelNotice>(32);

        let channel_task = if self.config.channel.enabled {
            Some(tokio::spawn(run_channel(
                self.config.channel.clone(),
                self.config.backend.ws_url.clone(),
                chan_tx,
            )))
        } else {
            drop(chan_tx);
            None
        };

        self.scheduler.start(self.config.capture.rate_fps);
        info!(
            "▶️  Capture started: {} fps, conf={:.2}, iou={:.2}, max={}",
            self.scheduler.rate_fps(),
            self.params.confidence,
            self.params.iou,
            self.params.max_detections
        );
        self.log(format!(
            "Capture started at {} fps",
            self.scheduler.rate_fps()
        ));

        let mut interval_ms = self.scheduler.interval_ms();
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut source_done = false;
        tokio::pin!(shutdown);

        loop {
            if source_done && !self.scheduler.in_flight() {
                break;
            }

            tokio::select! {
                _ = &mut shutdown => {
                    self.log("Shutdown requested");
                    break;
                }
                _ = ticker.tick(), if !source_done => {
                    source_done = self.on_tick(&resp_tx).await;
                }
                Some(outcome) = resp_rx.recv() => {
                    self.handle_outcome(outcome);
                    while let Ok(more) = resp_rx.try_recv() {
                        self.handle_outcome(more);
                    }
                }
                Some(notice) = chan_rx.recv() => {
                    self.handle_channel_notice(notice);
                    while let Ok(more) = chan_rx.try_recv() {
                        self.handle_channel_notice(more);
                    }
                }
            }

            // One render pass per batch of events; a pass scheduled and
            // replaced before this point never runs.
            self.renderer.flush();

            // A restart may have replaced the capture rate.
            if self.scheduler.interval_ms() != interval_ms {
                interval_ms = self.scheduler.interval_ms();
                ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
        }

        self.stop();
        if let Some(task) = channel_task {
            task.abort();
        }
        self.renderer.flush();

        self.stats.clone()
    }

    /// Cancel capture and invalidate outstanding requests. A request
    /// already in flight is not aborted; its response is dropped by the
    /// epoch check.
    pub fn stop(&mut self) {
        if self.scheduler.is_running() {
            self.log("Capture stopped");
        }
        self.scheduler.stop();
        self.epoch += 1;
    }

    /// Replace the capture rate; takes effect at the next loop turn
    /// without losing an in-flight request.
    pub fn set_capture_rate(&mut self, rate_fps: u32) {
        if self.scheduler.start(rate_fps) {
            self.log(format!("Capture rate set to {} fps", rate_fps));
        }
    }

    // ------------------------------------------------------------------
    // tick / response handling
    // ------------------------------------------------------------------

    /// Returns true once the frame source is exhausted.
    async fn on_tick(&mut self, resp_tx: &mpsc::Sender<RecognitionOutcome>) -> bool {
        match self.scheduler.on_tick() {
            TickDecision::Capture => {
                // Let the source settle so we never grab mid-update.
                tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS)).await;
                match self.source.grab() {
                    Ok(Some(frame)) => {
                        self.dispatch(frame, resp_tx);
                        false
                    }
                    Ok(None) => {
                        self.scheduler.clear_in_flight();
                        self.scheduler.stop();
                        info!("⏹️  Frame source exhausted — capture stopped");
                        self.log("Frame source exhausted");
                        true
                    }
                    Err(e) => {
                        self.scheduler.clear_in_flight();
                        self.handle_error(e);
                        false
                    }
                }
            }
            TickDecision::DroppedBusy => {
                self.stats.ticks_dropped_busy += 1;
                debug!("Tick dropped — recognition still in flight");
                false
            }
            TickDecision::DroppedNoSource | TickDecision::Idle => false,
        }
    }

    fn dispatch(&mut self, frame: Frame, resp_tx: &mpsc::Sender<RecognitionOutcome>) {
        self.renderer.resize_to(frame.width, frame.height);

        let Some(jpeg) = encode_rgb_to_jpeg(&frame.data, frame.width, frame.height) else {
            self.scheduler.clear_in_flight();
            warn!("Failed to encode frame at {:.0}ms — skipped", frame.timestamp_ms);
            return;
        };

        self.stats.frames_submitted += 1;
        debug!(
            "📸 Submitting frame at {:.0}ms ({} bytes)",
            frame.timestamp_ms,
            jpeg.len()
        );
        self.last_frame = Some(frame);

        let epoch = self.epoch;
        let recognizer = self.recognizer.clone();
        let params = self.params.clone();
        let tx = resp_tx.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = recognizer.submit(jpeg, params).await;
            let _ = tx
                .send(RecognitionOutcome {
                    epoch,
                    latency_ms: started.elapsed().as_millis(),
                    result,
                })
                .await;
        });
    }

    fn handle_outcome(&mut self, outcome: RecognitionOutcome) {
        // The physical request is done either way; release backpressure.
        self.scheduler.clear_in_flight();

        if outcome.epoch != self.epoch {
            self.stats.stale_responses_dropped += 1;
            debug!(
                "Dropping response from epoch {} (current {})",
                outcome.epoch, self.epoch
            );
            return;
        }

        match outcome.result {
            Ok(detections) => {
                self.stats.responses_ok += 1;
                self.stats.detections_seen += detections.len() as u64;
                debug!(
                    "Response: {} detection(s) in {}ms",
                    detections.len(),
                    outcome.latency_ms
                );
                self.ingest_detections(detections.iter().cloned(), "camera");
                self.last_detections = detections.clone();
                self.renderer.schedule(detections);
            }
            Err(e) => {
                self.stats.responses_failed += 1;
                let malformed = matches!(e, ScanError::MalformedResponse(_));
                self.handle_error(e);
                if malformed {
                    // Zero detections for this cycle.
                    self.last_detections.clear();
                    self.renderer.schedule(Vec::new());
                }
            }
        }
    }

    fn ingest_detections(&mut self, detections: impl Iterator<Item = RawDetection>, origin: &str) {
        for raw in detections {
            match self.cache.add_or_skip(&raw) {
                InsertOutcome::Inserted(id) => {
                    self.stats.cards_inserted += 1;
                    if let Some(entity) = self.cache.get(&id) {
                        info!(
                            "🃏 New card: {} [{}/{}] d={} via {}",
                            entity.name,
                            entity.set_id,
                            entity.card_id,
                            entity
                                .confidence
                                .map(|d| format!("{:.1}", d))
                                .unwrap_or_else(|| "?".to_string()),
                            origin
                        );
                        let line = format!("New card: {}", entity.name);
                        self.log(line);
                    }
                }
                InsertOutcome::Skipped { existing_id } => {
                    self.stats.duplicates_skipped += 1;
                    debug!("Duplicate suppressed (existing entity {})", existing_id);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // channel handling
    // ------------------------------------------------------------------

    fn handle_channel_notice(&mut self, notice: ChannelNotice) {
        match notice {
            ChannelNotice::StateChanged(state) => {
                self.channel_state = state;
                info!("🔌 Channel {}", state.as_str());
                self.log(format!("Channel {}", state.as_str()));
            }
            ChannelNotice::Event(event) => {
                self.stats.channel_events += 1;
                self.handle_server_event(event);
            }
            ChannelNotice::Fault(message) => {
                self.handle_error(ScanError::Channel(message));
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { message } => {
                self.log(format!("Server: {}", message));
            }
            ServerEvent::Processing { message } => {
                debug!("Server processing: {}", message);
            }
            ServerEvent::Detection { cards } => {
                info!("📨 {} card(s) pushed over the channel", cards.len());
                self.ingest_detections(cards.into_iter().map(|c| c.into_detection()), "channel");
            }
            ServerEvent::Error { message } => {
                warn!("Server error: {}", message);
                self.log(format!("Server error: {}", message));
            }
            ServerEvent::Ping | ServerEvent::Pong => {
                debug!("heartbeat answered");
            }
            ServerEvent::Unknown { kind } => {
                debug!("Ignoring unknown channel message type '{}'", kind);
                self.log(format!("Unknown channel message type '{}'", kind));
            }
        }
    }

    // ------------------------------------------------------------------
    // errors, collection ops, accessors
    // ------------------------------------------------------------------

    fn handle_error(&mut self, err: ScanError) {
        match &err {
            ScanError::Network(_) => warn!("📡 {}", err),
            ScanError::MalformedResponse(_) => warn!("📡 {}", err),
            ScanError::Permission(_) => error!("🎥 {}", err),
            ScanError::Channel(_) => warn!("🔌 {}", err),
        }
        let line = err.to_string();
        self.log(line);
    }

    fn log(&mut self, message: impl Into<String>) {
        self.event_log.push(self.clock.now_ms(), message);
    }

    pub fn toggle_keep(&mut self, id: &str) -> Option<bool> {
        let kept = self.cache.toggle_keep(id);
        if let Some(kept) = kept {
            self.log(format!("Card {} {}", id, if kept { "kept" } else { "unkept" }));
        }
        kept
    }

    pub fn remove_card(&mut self, id: &str) -> bool {
        let removed = self.cache.remove(id);
        if removed {
            self.log(format!("Card {} removed", id));
        }
        removed
    }

    pub fn clear_collection(&mut self) -> usize {
        let count = self.cache.remove_all();
        info!("🗑️  Collection cleared ({} card(s) removed)", count);
        self.log(format!("Collection cleared ({} removed)", count));
        count
    }

    /// Overlay composited onto the most recent frame.
    pub fn annotated_snapshot(&self) -> Option<image::RgbImage> {
        let frame = self.last_frame.as_ref()?;
        self.renderer
            .surface()
            .composite_over(&frame.data, frame.width, frame.height)
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    pub fn last_detections(&self) -> &[RawDetection] {
        &self.last_detections
    }
}
