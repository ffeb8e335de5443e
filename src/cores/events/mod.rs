pub mod bus;
pub mod event;
pub mod feed;

pub use bus::{DEFAULT_BACKLOG, EventBus, EventStream};
pub use event::{Event, EventKind};
