//! Upstream Exchange Adapter
//!
//! A single combined-stream WebSocket session carrying every tracked
//! symbol's ticker, trade, candle and depth channels.
//!
//! - `messages`: Wire payload types
//! - `codec`: Routing-key based frame decoder
//! - `heartbeat`: Keepalive tracking
//! - `reconnect`: Opt-in reconnect backoff
//! - `rest`: Polled 24h ticker statistics
//! - `session`: Connection lifecycle and read loop

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod session;

pub use codec::{CodecError, StreamCodec};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_REST_URL, RestTickerClient};
pub use session::{DEFAULT_BASE_URL, SessionConfig, SessionError, UpstreamEvent, UpstreamSession};
