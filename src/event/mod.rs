// =============================================================================
// event — the in-process pub/sub backbone shared by every module manager
// =============================================================================

pub mod bus;
pub mod glob;
pub mod model;
pub mod store;

pub use bus::{EventBus, Handler};
pub use model::Event;
pub use store::{EventStore, InMemoryEventStore, SqliteEventStore};
