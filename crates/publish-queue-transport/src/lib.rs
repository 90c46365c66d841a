//! # publish-queue-transport
//!
//! [`Publisher`](publish_queue_core::Publisher) that delivers events to a
//! cloud endpoint over HTTP from a background tokio task.

mod cloud;
mod error;

pub use cloud::{CloudPublisher, CloudPublisherConfig};
pub use error::{TransportError, TransportResult};
