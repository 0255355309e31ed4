//! Per-call orchestration engine (§1-§9): telephony control (ARI),
//! audio transports (RTP/AudioSocket), the call lifecycle controller,
//! and the health/admission HTTP surface around them.

pub mod ari;
pub mod call;
pub mod call_control;
pub mod error;
pub mod http;
pub mod metrics;
pub mod negotiator;
pub mod providers;
pub mod state;
pub mod transport_broker;

pub use ari::{AriClient, AriEvent};
pub use call::{handle_inbound_call, CallDeps, CallHandle, CallRegistry, CallState, CallTimeouts};
pub use call_control::AriCallControl;
pub use error::{Result, ServerError};
pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;
pub use transport_broker::TransportBroker;
