//! AMQP publish channel driver
//!
//! Interprets the actions emitted by [`PublishMachine`] against a real
//! broker through lapin. The driver owns the connection, the channel, and
//! the in-flight confirm futures; every observable outcome is translated
//! back into a [`BrokerEvent`] and fed through the machine's single
//! transition function.
//!
//! Delivery semantics, preserved deliberately:
//! - items arriving while the channel is down are dropped and counted,
//!   never buffered (at-most-once during reconnect windows)
//! - nacked deliveries are counted, never republished
//! - reconnects discard all in-flight delivery records

use crate::config::{BrokerParams, RECONNECT_DELAY};
use crate::item::Item;
use crate::publish::machine::{Action, BrokerEvent, PublishMachine, PublishSummary};
use crate::PublishError;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Delay between initial connection attempts within one connect action
const ATTEMPT_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for outstanding confirms at normal completion
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// In-flight confirms, resolved in whatever order the broker reports them
type ConfirmStream = FuturesUnordered<BoxFuture<'static, (u64, lapin::Result<Confirmation>)>>;

enum ConnectFailure {
    Cancelled,
    Failed(String),
}

/// Reliable publish channel for one run
///
/// Consumes the item stream, publishes each item with confirms enabled,
/// and reconnects on failure with a fixed delay until cancelled.
pub struct PublishChannel {
    params: BrokerParams,
    machine: PublishMachine,
}

impl PublishChannel {
    pub fn new(params: BrokerParams) -> Self {
        PublishChannel {
            params,
            machine: PublishMachine::new(),
        }
    }

    /// Runs the channel until the item stream is exhausted or the run is
    /// cancelled
    ///
    /// A broker that cannot be reached blocks here, retrying on the fixed
    /// delay, rather than failing the run.
    ///
    /// # Arguments
    ///
    /// * `items` - Ordered stream of items to publish
    /// * `cancel` - Operator cancellation
    ///
    /// # Returns
    ///
    /// * `Ok(PublishSummary)` - Final delivery accounting
    /// * `Err(PublishError)` - An unrecoverable driver failure
    pub async fn run(
        mut self,
        mut items: mpsc::Receiver<Item>,
        cancel: CancellationToken,
    ) -> Result<PublishSummary, PublishError> {
        let uri = self.params.amqp_uri();
        let mut conn: Option<Connection> = None;
        let mut channel: Option<Channel> = None;
        let mut confirms: ConfirmStream = FuturesUnordered::new();

        let mut pending: VecDeque<Action> =
            self.machine.handle(BrokerEvent::Start).into_iter().collect();

        while let Some(action) = pending.pop_front() {
            let events: Vec<BrokerEvent> = match action {
                Action::Connect => match self.connect(&uri, &cancel).await {
                    Ok(c) => {
                        conn = Some(c);
                        vec![BrokerEvent::ConnectionOpened]
                    }
                    Err(ConnectFailure::Cancelled) => vec![BrokerEvent::Stop],
                    Err(ConnectFailure::Failed(reason)) => {
                        vec![BrokerEvent::ConnectionFailed(reason)]
                    }
                },

                Action::OpenChannel => match conn.as_ref() {
                    Some(c) => match c.create_channel().await {
                        Ok(ch) => {
                            channel = Some(ch);
                            vec![BrokerEvent::ChannelOpened]
                        }
                        Err(e) => vec![BrokerEvent::ChannelClosed(e.to_string())],
                    },
                    None => vec![BrokerEvent::ConnectionClosed("no connection".to_string())],
                },

                Action::DeclareExchange => match channel.as_ref() {
                    Some(ch) => {
                        tracing::debug!("Declaring exchange {}", self.params.exchange);
                        match ch
                            .exchange_declare(
                                &self.params.exchange,
                                ExchangeKind::Direct,
                                ExchangeDeclareOptions::default(),
                                FieldTable::default(),
                            )
                            .await
                        {
                            Ok(()) => vec![BrokerEvent::ExchangeDeclared],
                            Err(e) => vec![BrokerEvent::ChannelClosed(e.to_string())],
                        }
                    }
                    None => vec![BrokerEvent::ChannelClosed("no channel".to_string())],
                },

                Action::DeclareQueue => match channel.as_ref() {
                    Some(ch) => {
                        tracing::debug!("Declaring queue {}", self.params.queue);
                        match ch
                            .queue_declare(
                                &self.params.queue,
                                QueueDeclareOptions::default(),
                                FieldTable::default(),
                            )
                            .await
                        {
                            Ok(_) => vec![BrokerEvent::QueueDeclared],
                            Err(e) => vec![BrokerEvent::ChannelClosed(e.to_string())],
                        }
                    }
                    None => vec![BrokerEvent::ChannelClosed("no channel".to_string())],
                },

                Action::BindQueue => match channel.as_ref() {
                    Some(ch) => {
                        tracing::debug!(
                            "Binding {} to {} with {}",
                            self.params.queue,
                            self.params.exchange,
                            self.params.routing_key
                        );
                        match ch
                            .queue_bind(
                                &self.params.queue,
                                &self.params.exchange,
                                &self.params.routing_key,
                                QueueBindOptions::default(),
                                FieldTable::default(),
                            )
                            .await
                        {
                            Ok(()) => vec![BrokerEvent::QueueBound],
                            Err(e) => vec![BrokerEvent::ChannelClosed(e.to_string())],
                        }
                    }
                    None => vec![BrokerEvent::ChannelClosed("no channel".to_string())],
                },

                Action::EnableConfirms => match channel.as_ref() {
                    Some(ch) => match ch.confirm_select(ConfirmSelectOptions::default()).await {
                        Ok(()) => vec![BrokerEvent::ConfirmsEnabled],
                        Err(e) => vec![BrokerEvent::ChannelClosed(e.to_string())],
                    },
                    None => vec![BrokerEvent::ChannelClosed("no channel".to_string())],
                },

                Action::BeginPublishing => {
                    self.publish_loop(channel.as_ref(), &mut items, &mut confirms, &cancel)
                        .await
                }

                Action::DrainConfirms => {
                    self.drain_confirms(&mut confirms, &cancel).await;
                    vec![BrokerEvent::ConfirmsDrained]
                }

                Action::CloseChannel => {
                    if let Some(ch) = channel.take() {
                        if let Err(e) = ch.close(200, "normal shutdown").await {
                            tracing::debug!("Channel close failed: {}", e);
                        }
                    }
                    vec![BrokerEvent::ChannelClosed("closed by publisher".to_string())]
                }

                Action::CloseConnection => {
                    channel = None;
                    confirms.clear();
                    if let Some(c) = conn.take() {
                        if let Err(e) = c.close(200, "normal shutdown").await {
                            tracing::debug!("Connection close failed: {}", e);
                        }
                    }
                    vec![BrokerEvent::ConnectionClosed(
                        "closed by publisher".to_string(),
                    )]
                }

                Action::ScheduleReconnect => {
                    tokio::select! {
                        _ = cancel.cancelled() => vec![BrokerEvent::Stop],
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {
                            self.machine.reset_connection();
                            vec![BrokerEvent::Start]
                        }
                    }
                }

                Action::Exit => break,
            };

            for event in events {
                pending.extend(self.machine.handle(event));
            }
        }

        Ok(self.machine.summary())
    }

    /// Attempts the initial connection, up to the configured attempt count
    async fn connect(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Connection, ConnectFailure> {
        let attempts = self.params.connection_attempts.max(1);
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ConnectFailure::Cancelled);
            }
            tracing::debug!(
                "Connecting to {} (attempt {}/{})",
                self.params.display_uri(),
                attempt,
                attempts
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectFailure::Cancelled),
                result = Connection::connect(uri, ConnectionProperties::default()) => {
                    match result {
                        Ok(conn) => return Ok(conn),
                        Err(e) => {
                            last_error = e.to_string();
                            if attempt < attempts {
                                tokio::time::sleep(ATTEMPT_DELAY).await;
                            }
                        }
                    }
                }
            }
        }

        Err(ConnectFailure::Failed(last_error))
    }

    /// Consumes the item stream, interleaving confirm processing
    ///
    /// Returns the terminal event: the stream ran dry, the channel died, or
    /// the run was cancelled.
    async fn publish_loop(
        &mut self,
        channel: Option<&Channel>,
        items: &mut mpsc::Receiver<Item>,
        confirms: &mut ConfirmStream,
        cancel: &CancellationToken,
    ) -> Vec<BrokerEvent> {
        let channel = match channel {
            Some(ch) => ch,
            None => return vec![BrokerEvent::ChannelClosed("no channel".to_string())],
        };

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return vec![BrokerEvent::Stop];
                }

                Some((tag, result)) = confirms.next(), if !confirms.is_empty() => {
                    self.machine.handle(confirm_event(tag, result));
                }

                item = items.recv() => match item {
                    Some(item) => {
                        if !channel.status().connected() {
                            tracing::warn!("Channel not open, dropping item");
                            self.machine.record_drop();
                            return vec![BrokerEvent::ChannelClosed(
                                "channel no longer open".to_string(),
                            )];
                        }
                        match self.publish_item(channel, &item, confirms).await {
                            Ok(()) => {}
                            Err(PublishError::Serialize(e)) => {
                                tracing::warn!("Skipping unserializable item: {}", e);
                            }
                            Err(e) => {
                                tracing::warn!("Publish failed, dropping item: {}", e);
                                self.machine.record_drop();
                                return vec![BrokerEvent::ChannelClosed(e.to_string())];
                            }
                        }
                    }
                    None => return vec![BrokerEvent::ItemsExhausted],
                }
            }
        }
    }

    /// Publishes one item and registers its confirm future
    async fn publish_item(
        &mut self,
        channel: &Channel,
        item: &Item,
        confirms: &mut ConfirmStream,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(item)?;
        let properties = BasicProperties::default()
            .with_app_id(self.params.app_id.clone().into())
            .with_content_type("application/json".to_string().into())
            .with_delivery_mode(2);

        let confirm = channel
            .basic_publish(
                &self.params.exchange,
                &self.params.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &payload,
                properties,
            )
            .await?;

        let tag = self.machine.record_publish();
        confirms.push(async move { (tag, confirm.await) }.boxed());
        Ok(())
    }

    /// Waits for outstanding confirms at normal completion
    ///
    /// Bounded by a timeout and by cancellation; whatever is still
    /// unconfirmed afterwards is reported in the summary, not retried.
    async fn drain_confirms(&mut self, confirms: &mut ConfirmStream, cancel: &CancellationToken) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;

        while !confirms.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Timed out waiting for {} confirms", confirms.len());
                    break;
                }
                Some((tag, result)) = confirms.next() => {
                    self.machine.handle(confirm_event(tag, result));
                }
            }
        }
    }
}

/// Translates a resolved confirm future into a machine event
fn confirm_event(tag: u64, result: lapin::Result<Confirmation>) -> BrokerEvent {
    let ack = match result {
        Ok(Confirmation::Ack(_)) | Ok(Confirmation::NotRequested) => true,
        Ok(Confirmation::Nack(_)) => false,
        Err(e) => {
            tracing::warn!("Confirm for tag {} failed: {}", tag, e);
            false
        }
    };
    BrokerEvent::Confirm { tag, ack }
}
