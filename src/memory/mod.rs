//! In-process implementations of the broker collaborators
//!
//! These back the test suite and make it possible to embed a session engine
//! without a real post office, journal or transport. None of them persist
//! anything.

mod persistence;
mod post_office;
mod queue;
mod security;
mod transport;

pub use persistence::InMemoryPersistence;
pub use post_office::InMemoryPostOffice;
pub use queue::MemoryQueue;
pub use security::StaticSecurityStore;
pub use transport::{ChannelDeliverySender, DeliveredMessage, LocalConnection, RecordingDispatcher};
