//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `MarketEventRouter`: Type-specific handling of decoded upstream events
//! - `PersistenceFlusher`: Periodic snapshot persistence
//! - `TickerRefresher`: Opt-in polling that seeds the state cache
//! - `MarketDataService`: Lifecycle facade used by the control surface

pub mod flusher;
pub mod market_data;
pub mod refresher;
pub mod router;

pub use flusher::{DEFAULT_FLUSH_INTERVAL, FlushReport, PersistenceFlusher};
pub use market_data::{MarketDataService, MarketDataServiceConfig, ServiceError};
pub use refresher::{RefreshReport, TickerRefresher};
pub use router::{MarketEventRouter, RouteOutcome};
