//! Publish channel state machine
//!
//! The connection lifecycle is modeled as an explicit state machine with a
//! single transition function, [`PublishMachine::handle`]. The machine
//! performs no I/O: it consumes broker events and emits the actions the
//! driver should take next, which makes every transition testable by
//! feeding synthetic events.
//!
//! Confirmation bookkeeping lives here too: monotonically increasing
//! sequence numbers, the unconfirmed-delivery table, and the acked/nacked
//! counters. The unconfirmed table is reset on every reconnect; in-flight
//! deliveries at that point are unresolved, which is a known at-least-once
//! risk, logged rather than recovered.

use std::collections::BTreeSet;

/// Connection/channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    ChannelOpening,
    ExchangeDeclaring,
    QueueDeclaring,
    QueueBinding,
    ConfirmsEnabling,
    Ready,
    Publishing,
    Draining,
    Closing,
    Closed,
}

/// Events the broker (or the driver observing it) reports to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Begin a connection attempt (initial start or after a reconnect delay)
    Start,
    ConnectionOpened,
    ConnectionFailed(String),
    ChannelOpened,
    ExchangeDeclared,
    QueueDeclared,
    QueueBound,
    ConfirmsEnabled,
    /// Ack or Nack for a previously published delivery tag; may arrive in
    /// any order relative to publish order
    Confirm { tag: u64, ack: bool },
    /// The item sequence is exhausted
    ItemsExhausted,
    /// Outstanding confirms have been drained (or timed out)
    ConfirmsDrained,
    /// The channel closed, deliberately or not
    ChannelClosed(String),
    /// The connection closed, deliberately or not
    ConnectionClosed(String),
    /// Operator cancellation
    Stop,
}

/// Actions the driver must perform in response to a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    EnableConfirms,
    /// Start (or resume) consuming the item sequence
    BeginPublishing,
    /// Wait for outstanding confirms before closing
    DrainConfirms,
    /// Wait the fixed reconnect delay, then feed [`BrokerEvent::Start`]
    ScheduleReconnect,
    CloseChannel,
    CloseConnection,
    /// Terminate the run
    Exit,
}

/// Final accounting for one publish run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Items handed to the broker
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Items dropped because the channel was down when they arrived
    pub dropped: u64,
    /// Deliveries never confirmed (lost confirms or reconnect resets)
    pub unconfirmed: u64,
}

/// The publish channel's state and confirmation table
#[derive(Debug)]
pub struct PublishMachine {
    state: ChannelState,
    stopping: bool,
    message_number: u64,
    unconfirmed: BTreeSet<u64>,
    acked: u64,
    nacked: u64,
    dropped: u64,
    /// Deliveries abandoned by reconnect resets
    abandoned: u64,
}

impl PublishMachine {
    pub fn new() -> Self {
        PublishMachine {
            state: ChannelState::Disconnected,
            stopping: false,
            message_number: 0,
            unconfirmed: BTreeSet::new(),
            acked: 0,
            nacked: 0,
            dropped: 0,
            abandoned: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Number of deliveries awaiting confirmation
    pub fn unconfirmed_len(&self) -> usize {
        self.unconfirmed.len()
    }

    /// The single transition function
    ///
    /// Consumes one broker event, moves the machine, and returns the
    /// actions the driver must perform next, in order.
    pub fn handle(&mut self, event: BrokerEvent) -> Vec<Action> {
        use ChannelState as S;

        match event {
            BrokerEvent::Start => {
                self.state = S::Connecting;
                vec![Action::Connect]
            }

            BrokerEvent::ConnectionOpened => {
                tracing::debug!("Connection opened");
                self.state = S::ChannelOpening;
                vec![Action::OpenChannel]
            }

            BrokerEvent::ConnectionFailed(reason) => {
                if self.stopping {
                    self.state = S::Closed;
                    vec![Action::Exit]
                } else {
                    tracing::error!("Connection open failed, reopening shortly: {}", reason);
                    self.state = S::Disconnected;
                    vec![Action::ScheduleReconnect]
                }
            }

            BrokerEvent::ChannelOpened => {
                tracing::debug!("Channel opened");
                self.state = S::ExchangeDeclaring;
                vec![Action::DeclareExchange]
            }

            BrokerEvent::ExchangeDeclared => {
                self.state = S::QueueDeclaring;
                vec![Action::DeclareQueue]
            }

            BrokerEvent::QueueDeclared => {
                self.state = S::QueueBinding;
                vec![Action::BindQueue]
            }

            BrokerEvent::QueueBound => {
                self.state = S::ConfirmsEnabling;
                vec![Action::EnableConfirms]
            }

            BrokerEvent::ConfirmsEnabled => {
                self.state = S::Ready;
                vec![Action::BeginPublishing]
            }

            BrokerEvent::Confirm { tag, ack } => {
                self.confirm(tag, ack);
                vec![]
            }

            BrokerEvent::ItemsExhausted => {
                tracing::debug!(
                    "Item sequence exhausted after {} publishes, draining",
                    self.message_number
                );
                self.stopping = true;
                self.state = S::Draining;
                vec![Action::DrainConfirms]
            }

            BrokerEvent::ConfirmsDrained => {
                if !self.unconfirmed.is_empty() {
                    tracing::warn!(
                        "{} deliveries never confirmed",
                        self.unconfirmed.len()
                    );
                }
                vec![Action::CloseChannel]
            }

            BrokerEvent::ChannelClosed(reason) => {
                if self.stopping {
                    self.state = S::Closing;
                    vec![Action::CloseConnection]
                } else {
                    tracing::warn!("Channel was closed: {}", reason);
                    vec![Action::CloseConnection]
                }
            }

            BrokerEvent::ConnectionClosed(reason) => {
                if self.stopping {
                    self.state = S::Closed;
                    vec![Action::Exit]
                } else {
                    tracing::warn!("Connection closed, reopening shortly: {}", reason);
                    self.state = S::Disconnected;
                    vec![Action::ScheduleReconnect]
                }
            }

            BrokerEvent::Stop => {
                tracing::info!("Stop requested");
                self.stopping = true;
                match self.state {
                    S::Disconnected | S::Closed => {
                        self.state = S::Closed;
                        vec![Action::Exit]
                    }
                    S::Connecting => {
                        self.state = S::Closing;
                        vec![Action::CloseConnection]
                    }
                    S::Draining | S::Closing => vec![],
                    _ => {
                        self.state = S::Closing;
                        vec![Action::CloseChannel]
                    }
                }
            }
        }
    }

    /// Assigns the next sequence number to a publish and records it as
    /// unconfirmed
    ///
    /// Sequence numbers are monotonic for the whole run, across reconnects.
    pub fn record_publish(&mut self) -> u64 {
        if self.state == ChannelState::Ready {
            self.state = ChannelState::Publishing;
        }
        self.message_number += 1;
        self.unconfirmed.insert(self.message_number);
        tracing::debug!("Published item #{}", self.message_number);
        self.message_number
    }

    /// Records an item dropped because the channel was not open
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Discards per-connection state ahead of a reconnect
    ///
    /// In-flight deliveries are abandoned: their confirms will never arrive
    /// on the new channel, so keeping them would only pin the table.
    pub fn reset_connection(&mut self) {
        if !self.unconfirmed.is_empty() {
            tracing::warn!(
                "Discarding {} in-flight deliveries on reconnect; their fate is unresolved",
                self.unconfirmed.len()
            );
            self.abandoned += self.unconfirmed.len() as u64;
            self.unconfirmed.clear();
        }
        self.state = ChannelState::Disconnected;
    }

    fn confirm(&mut self, tag: u64, ack: bool) {
        if ack {
            self.acked += 1;
        } else {
            self.nacked += 1;
        }

        if !self.unconfirmed.remove(&tag) {
            tracing::warn!("Confirm for unknown delivery tag {}", tag);
        }

        tracing::debug!(
            "Published {} messages, {} have yet to be confirmed, {} were acked and {} were nacked",
            self.message_number,
            self.unconfirmed.len(),
            self.acked,
            self.nacked
        );
    }

    /// Final accounting for the run
    pub fn summary(&self) -> PublishSummary {
        PublishSummary {
            published: self.message_number,
            acked: self.acked,
            nacked: self.nacked,
            dropped: self.dropped,
            unconfirmed: self.abandoned + self.unconfirmed.len() as u64,
        }
    }
}

impl Default for PublishMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds the full happy-path setup sequence and returns the machine in
    /// the Publishing state
    fn setup_machine() -> PublishMachine {
        let mut machine = PublishMachine::new();
        assert_eq!(machine.handle(BrokerEvent::Start), vec![Action::Connect]);
        assert_eq!(
            machine.handle(BrokerEvent::ConnectionOpened),
            vec![Action::OpenChannel]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ChannelOpened),
            vec![Action::DeclareExchange]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ExchangeDeclared),
            vec![Action::DeclareQueue]
        );
        assert_eq!(
            machine.handle(BrokerEvent::QueueDeclared),
            vec![Action::BindQueue]
        );
        assert_eq!(
            machine.handle(BrokerEvent::QueueBound),
            vec![Action::EnableConfirms]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ConfirmsEnabled),
            vec![Action::BeginPublishing]
        );
        assert_eq!(machine.state(), ChannelState::Ready);
        machine
    }

    #[test]
    fn test_happy_path_setup() {
        setup_machine();
    }

    #[test]
    fn test_connect_failure_schedules_reconnect() {
        let mut machine = PublishMachine::new();
        machine.handle(BrokerEvent::Start);

        let actions = machine.handle(BrokerEvent::ConnectionFailed("refused".to_string()));
        assert_eq!(actions, vec![Action::ScheduleReconnect]);
        assert_eq!(machine.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let mut machine = setup_machine();
        assert_eq!(machine.record_publish(), 1);
        assert_eq!(machine.state(), ChannelState::Publishing);
        assert_eq!(machine.record_publish(), 2);
        assert_eq!(machine.record_publish(), 3);
        assert_eq!(machine.unconfirmed_len(), 3);
    }

    #[test]
    fn test_out_of_order_confirm_accounting() {
        let mut machine = setup_machine();
        for _ in 0..3 {
            machine.record_publish();
        }

        // Confirms arrive as Ack(2), Nack(1), Ack(3)
        machine.handle(BrokerEvent::Confirm { tag: 2, ack: true });
        machine.handle(BrokerEvent::Confirm { tag: 1, ack: false });
        machine.handle(BrokerEvent::Confirm { tag: 3, ack: true });

        let summary = machine.summary();
        assert_eq!(summary.acked, 2);
        assert_eq!(summary.nacked, 1);
        assert_eq!(summary.unconfirmed, 0);
        assert_eq!(summary.acked + summary.nacked, summary.published);
    }

    #[test]
    fn test_normal_completion_sequence() {
        let mut machine = setup_machine();
        machine.record_publish();
        machine.handle(BrokerEvent::Confirm { tag: 1, ack: true });

        assert_eq!(
            machine.handle(BrokerEvent::ItemsExhausted),
            vec![Action::DrainConfirms]
        );
        assert_eq!(machine.state(), ChannelState::Draining);
        assert_eq!(
            machine.handle(BrokerEvent::ConfirmsDrained),
            vec![Action::CloseChannel]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ChannelClosed("normal".to_string())),
            vec![Action::CloseConnection]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ConnectionClosed("normal".to_string())),
            vec![Action::Exit]
        );
        assert_eq!(machine.state(), ChannelState::Closed);
    }

    #[test]
    fn test_unexpected_channel_closure_restarts_connection() {
        let mut machine = setup_machine();
        machine.record_publish();

        // Channel dies mid-publish: tear down the whole connection
        assert_eq!(
            machine.handle(BrokerEvent::ChannelClosed("heartbeat lost".to_string())),
            vec![Action::CloseConnection]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ConnectionClosed("closed".to_string())),
            vec![Action::ScheduleReconnect]
        );
        assert_eq!(machine.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_reconnect_resets_unconfirmed_table() {
        let mut machine = setup_machine();
        machine.record_publish();
        machine.record_publish();
        assert_eq!(machine.unconfirmed_len(), 2);

        machine.handle(BrokerEvent::ChannelClosed("lost".to_string()));
        machine.handle(BrokerEvent::ConnectionClosed("lost".to_string()));
        machine.reset_connection();

        assert_eq!(machine.unconfirmed_len(), 0);
        // The abandoned deliveries stay visible in the summary
        assert_eq!(machine.summary().unconfirmed, 2);

        // Sequence numbers keep climbing after the reconnect
        machine.handle(BrokerEvent::Start);
        machine.handle(BrokerEvent::ConnectionOpened);
        machine.handle(BrokerEvent::ChannelOpened);
        machine.handle(BrokerEvent::ExchangeDeclared);
        machine.handle(BrokerEvent::QueueDeclared);
        machine.handle(BrokerEvent::QueueBound);
        machine.handle(BrokerEvent::ConfirmsEnabled);
        assert_eq!(machine.record_publish(), 3);
    }

    #[test]
    fn test_setup_sequence_is_repeatable() {
        // Declaring topology twice (fresh machine against already-declared
        // broker state) walks the same transitions without error
        let mut machine = setup_machine();
        machine.handle(BrokerEvent::ChannelClosed("lost".to_string()));
        machine.handle(BrokerEvent::ConnectionClosed("lost".to_string()));
        machine.reset_connection();

        let mut second = setup_machine();
        assert_eq!(second.state(), ChannelState::Ready);
        assert_eq!(machine.handle(BrokerEvent::Start), vec![Action::Connect]);
    }

    #[test]
    fn test_stop_while_publishing() {
        let mut machine = setup_machine();
        assert_eq!(machine.handle(BrokerEvent::Stop), vec![Action::CloseChannel]);
        assert!(machine.is_stopping());

        // The close cascade still runs to completion
        assert_eq!(
            machine.handle(BrokerEvent::ChannelClosed("stop".to_string())),
            vec![Action::CloseConnection]
        );
        assert_eq!(
            machine.handle(BrokerEvent::ConnectionClosed("stop".to_string())),
            vec![Action::Exit]
        );
    }

    #[test]
    fn test_stop_while_disconnected_exits_immediately() {
        let mut machine = PublishMachine::new();
        assert_eq!(machine.handle(BrokerEvent::Stop), vec![Action::Exit]);
        assert_eq!(machine.state(), ChannelState::Closed);
    }

    #[test]
    fn test_connect_failure_while_stopping_exits() {
        let mut machine = PublishMachine::new();
        machine.handle(BrokerEvent::Start);
        machine.stopping = true;

        let actions = machine.handle(BrokerEvent::ConnectionFailed("refused".to_string()));
        assert_eq!(actions, vec![Action::Exit]);
    }

    #[test]
    fn test_dropped_items_are_counted() {
        let mut machine = setup_machine();
        machine.record_publish();
        machine.record_drop();
        machine.record_drop();

        let summary = machine.summary();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.dropped, 2);
    }

    #[test]
    fn test_confirm_for_unknown_tag_still_counts() {
        let mut machine = setup_machine();
        machine.handle(BrokerEvent::Confirm { tag: 99, ack: true });
        assert_eq!(machine.summary().acked, 1);
    }
}
