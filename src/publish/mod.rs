//! Reliable publish channel
//!
//! Delivers discovered items to an AMQP broker with confirms and automatic
//! reconnection:
//! - [`PublishMachine`]: the sans-io connection/channel state machine
//! - [`PublishChannel`]: the lapin-backed driver that interprets it

mod channel;
mod machine;

pub use channel::PublishChannel;
pub use machine::{Action, BrokerEvent, ChannelState, PublishMachine, PublishSummary};
