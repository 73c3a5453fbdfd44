//! launchpad-webhook: pushes newly indexed pools and trades to an HTTP receiver.

pub mod delivery;
pub mod dispatcher;

pub use delivery::{Deliver, Envelope, EventType, HttpDelivery};
pub use dispatcher::{DispatchReport, Dispatcher, WebhookConfig};
