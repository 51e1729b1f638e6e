//! In-process message bus for `Event`/`Action`/`ActionDone` envelopes.

pub mod bus;
pub mod envelope;

pub mod prelude {
    pub use crate::bus::{Handler, MessageBus, SubscriptionId};
    pub use crate::envelope::{Action, ActionDone, Event, Message};
}
