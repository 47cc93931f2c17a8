//! C1-C9: the console-facing half of the Remote Play bridge.
//!
//! Every module here corresponds to one subsystem from the design doc --
//! crypto primitives, discovery, wake, registration, session handshake,
//! takion transport, media pipeline, feedback channel, and the orchestrator
//! that binds them behind a single `RemoteSession` handle. The browser-facing
//! side (WebRTC signaling, the device database, the web UI) lives outside
//! this crate; it only sees the `AVSink`, `InputSource`, and `DeviceStore`
//! trait boundaries.

pub mod av_sink;
pub mod crypto;
pub mod device_store;
pub mod discovery;
pub mod feedback_channel;
pub mod handshake;
pub mod http_lite;
pub mod input_source;
pub mod media_pipeline;
pub mod registration;
pub mod session;
pub mod takion;
pub mod wake;

pub use av_sink::{AVSink, StreamStats};
pub use device_store::{DeviceStore, DeviceStoreError, InMemoryDeviceStore};
pub use feedback_channel::FeedbackHandle;
pub use input_source::InputSource;
pub use media_pipeline::MediaPipeline;
pub use session::{FailureKind, RemoteSession, SessionError, SessionState, StartParams};
