//! Conversation Coordinator and Session Store & Playback Manager (§4.6, §4.7).
//!
//! This crate owns everything about *one call's* runtime state once it
//! exists: the per-session gate/barge-in authority, the process-wide
//! session map, and the playback-handle lifecycle. It knows nothing about
//! ARI, transports, or providers beyond the `voxrelay_core::Provider`
//! trait object a session holds.

pub mod coordinator;
pub mod playback;
pub mod session;

pub use coordinator::{BargeInDecision, ConversationCoordinator, CoordinatorConfig, Gate, RearmAction};
pub use playback::PlaybackManager;
pub use session::{CallSession, SessionManager};
