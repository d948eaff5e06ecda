//! Huddle session core
//!
//! Client-side core of a multi-party video call. It decides which remote
//! participants occupy the limited "stage", lays the stage out as a grid,
//! keeps remote media subscriptions in line with what is shown, and
//! broadcasts the local participant's presence to everyone else.
//!
//! ## Architecture
//!
//! - **`ParticipantRoster`**: Remote participants in join order, with their last known flags
//! - **`ActivityTracker`**: Last-activity instants that rank stage candidates
//! - **`StageSelector`**: Bounded, churn-free choice of who is on stage
//! - **`LayoutEngine`**: Grid geometry whose cells approach a target aspect ratio
//! - **`TrackSubscriptionManager`**: Reference-counted remote track subscriptions
//! - **`PresenceBroadcaster`**: Debounced, heartbeated local presence
//! - **`Session`**: Applies events through the pipeline in a fixed order
//! - **`SessionDriver`**: Runs a `Session` on a tokio task
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use huddle_core::{CoreConfig, MediaFlags, Session, SessionDriver, SessionEvent, SystemClock};
//!
//! let config = CoreConfig::load(Some("huddle.toml"))?;
//! let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = Session::new(
//!     "me".into(),
//!     MediaFlags::default(),
//!     config,
//!     Box::new(outbound_tx),
//!     Arc::new(SystemClock),
//! );
//!
//! let (handle, join) = SessionDriver::spawn(session);
//! handle.send(SessionEvent::ViewportResized { width: 1280.0, height: 720.0 })?;
//! ```

pub mod activity;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod layout;
pub mod logging;
pub mod participant;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod stage;
pub mod subscription;
pub mod types;

pub use activity::ActivityTracker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CoreConfig, LayoutConfig, LoggingConfig, PresenceConfig, SessionConfig, StageConfig,
    SubscriptionConfig,
};
pub use driver::{SessionDriver, SessionHandle};
pub use error::{Error, Result};
pub use layout::{compute_layout, LayoutEngine, LayoutGeometry, LayoutInput};
pub use logging::{init_logging, LogFormat};
pub use participant::{
    ActivityTransition, Participant, ParticipantRoster, PresenceOutcome, TrackHandles,
};
pub use presence::{BroadcastState, PresenceBroadcaster, PresenceMessage};
pub use session::{Session, SessionEvent, SessionStats, SessionView};
pub use signaling::{OutboundSignal, SignalingChannel};
pub use stage::{select_stage, StagePolicy, StageSelector, StageSet, ViewportClass};
pub use subscription::{
    desired_tracks, ReconcileOutcome, SubscriptionHandle, SubscriptionStats, TrackKey,
    TrackSubscriptionManager,
};
pub use types::{MediaFlags, ParticipantId, TrackId, TrackKind};
