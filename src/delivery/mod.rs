//! Result delivery: admission control and inline/chunked routing.

pub mod pool;
pub mod router;

pub use pool::{Ticket, WorkerPermit, WorkerPool};
pub use router::{Delivery, DeliveryRouter};
