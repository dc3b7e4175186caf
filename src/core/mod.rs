pub mod events;
pub mod return_value;
pub mod status;

pub use events::{EventBus, EventKind, EventListener, ServerEvent, TracingEventListener};
pub use return_value::{InvalidUnit, PerformanceData, ReturnValue, UnitOfMeasure};
pub use status::{InvalidStatus, Status};
