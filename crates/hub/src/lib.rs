pub mod authorization;
pub mod batcher;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod event_log;
pub mod heartbeat;
pub mod hub;
pub mod maintenance;
pub mod ring_buffer;

pub use authorization::{authorize, AuthDecision, Intent};
pub use batcher::ThrottledBatcher;
pub use connection::{Connection, ConnectionState, OutboundItem};
pub use cursor::{Cursor, CursorGenerator};
pub use error::HubError;
pub use event_log::{DurableEventLog, NullEventLog, PostgresEventLog};
pub use heartbeat::CLOSE_CODE_STALE;
pub use hub::{Hub, SubscribeOutcome};
pub use maintenance::{MaintenanceCoordinator, MaintenanceState, CLOSE_CODE_DRAINING, CLOSE_CODE_MAINTENANCE};
pub use ring_buffer::RingBuffer;
