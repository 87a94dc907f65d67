// src/lib.rs
//
// Client-side detection session controller for live trading-card
// recognition: capture scheduling with single-in-flight backpressure,
// a remote recognition client, a dedup/cooldown collection cache,
// frame-space overlay rendering, and a self-healing notification
// channel, all funneling status into a bounded session event log.

pub mod cache;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod frame_source;
pub mod overlay;
pub mod recognition;
pub mod scheduler;
pub mod session;
pub mod types;

pub use cache::{CardEntity, DetectionCache, InsertOutcome};
pub use channel::{ChannelController, ChannelState, ClientMessage, ServerEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::ScanError;
pub use event_log::EventLog;
pub use frame_source::{DirectoryFrameSource, FrameSource};
pub use overlay::{OverlayRenderer, OverlaySurface};
pub use recognition::{HttpRecognizer, Recognizer};
pub use scheduler::{CaptureScheduler, TickDecision};
pub use session::{SessionController, SessionStats};
pub use types::{CandidateMatch, DetectionParams, Frame, RawDetection};
