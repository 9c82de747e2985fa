pub mod engine;
pub mod error;
pub mod reservation;

pub use engine::{spawn_expiry_sweep_task, NoopPublisher, ReleaseCause, ReservationEngine, ReservationEventPublisher};
pub use error::ReservationError;
pub use reservation::{Conflict, ConflictStatus, Reservation, ReservationMode, ReservationStatus};
