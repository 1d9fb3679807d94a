//! Real-time cross-client synchronization.
//!
//! Change notifications arrive over a push connection, echoes of this
//! session's own mutations are dropped, bursts are coalesced per entity type
//! and each settled burst triggers exactly one refresh callback.

pub mod connection;
pub mod engine;
mod error;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod reconnect;
pub mod registry;
pub mod router;

pub use connection::{
	ChannelFeed, ChannelTransport, ConnectionError, ConnectionSignal, EventStreamConnection, Frame,
	SseTransport, Transport,
};
pub use engine::{
	ConnectionState, EngineConfig, EngineHandle, Subscription, SyncEngine, subscribe,
};
pub use error::SyncError;
pub use event::{SyncEvent, entity};
pub use filter::OriginFilter;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use reconnect::ReconnectPolicy;
pub use registry::{CallbackRegistry, Dispatch, RefreshFn};
pub use router::{DEFAULT_QUIET_WINDOW, DebounceRouter, Scheduled};
