use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use tokio::{
    sync::watch,
    task::{self, JoinSet},
    time::sleep,
};
use tracing::{error, info, warn};

use crate::{
    clients::rbmq::QueueConnector,
    config::Config,
    consumer::{ChannelConsumer, Disposition},
    models::message::InboundMessage,
    utils::shutdown_requested,
};

/// Long-lived consumer for one channel queue.
///
/// Opens its own broker session, runs up to `worker_concurrency` messages at a
/// time and settles each finished message itself. Connection failures lead to
/// a reconnect after `reconnect_delay_seconds`.
pub struct ConsumerWorker {
    config: Config,
    consumer: Arc<ChannelConsumer>,
    connector: Arc<dyn QueueConnector>,
    consumer_tag: String,
}

impl ConsumerWorker {
    pub fn new(
        config: Config,
        consumer: Arc<ChannelConsumer>,
        connector: Arc<dyn QueueConnector>,
    ) -> Self {
        let consumer_tag = format!("{}-worker-{}", consumer.channel(), uuid::Uuid::new_v4());

        Self {
            config,
            consumer,
            connector,
            consumer_tag,
        }
    }

    /// Consumes until `shutdown` turns `true` (or its sender goes away), then
    /// stops intake and waits for in-flight messages to settle.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let channel = self.consumer.channel();
        info!(channel = %channel, "Consumer worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.consume(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    error!(
                        channel = %channel,
                        error = %e,
                        delay_secs = self.config.reconnect_delay_seconds,
                        "Consumer connection lost, reconnecting"
                    );

                    tokio::select! {
                        biased;

                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }

        info!(channel = %channel, "Consumer worker stopped");
    }

    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), Error> {
        let channel = self.consumer.channel();
        let queue = self.config.queue_name(channel);
        let (session, mut deliveries) = self.connector.open(queue, &self.consumer_tag).await?;

        let limit = self.config.worker_concurrency;
        let mut in_flight: JoinSet<(InboundMessage, Disposition)> = JoinSet::new();
        let mut delivery_tags: HashMap<task::Id, u64> = HashMap::new();
        let mut draining = false;

        info!(channel = %channel, queue, concurrency = limit, "Consuming messages");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown), if !draining => {
                    draining = true;
                    info!(in_flight = in_flight.len(), "Shutdown requested, draining in-flight messages");

                    if let Err(e) = session.cancel(&self.consumer_tag).await {
                        warn!(error = %e, "Failed to cancel consumer, draining anyway");
                    }
                }

                Some(joined) = in_flight.join_next_with_id() => {
                    match joined {
                        Ok((id, (message, disposition))) => {
                            delivery_tags.remove(&id);
                            if let Err(e) = session.settle(&message, &disposition).await {
                                in_flight.abort_all();
                                return Err(e);
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Message processing task failed, returning message to queue");

                            if let Some(delivery_tag) = delivery_tags.remove(&e.id()) {
                                if let Err(e) = session.release(delivery_tag).await {
                                    in_flight.abort_all();
                                    return Err(e);
                                }
                            }
                        }
                    }
                }

                delivery = deliveries.next(), if !draining && in_flight.len() < limit => {
                    match delivery {
                        Some(Ok(message)) => {
                            let delivery_tag = message.delivery_tag;
                            let consumer = self.consumer.clone();

                            let handle = in_flight.spawn(async move {
                                let disposition = consumer.handle(&message).await;
                                (message, disposition)
                            });
                            delivery_tags.insert(handle.id(), delivery_tag);
                        }
                        Some(Err(e)) => {
                            in_flight.abort_all();
                            return Err(e);
                        }
                        None => {
                            in_flight.abort_all();
                            return Err(anyhow!("Delivery stream closed by broker"));
                        }
                    }
                }

                else => break,
            }

            if draining && in_flight.is_empty() {
                break;
            }
        }

        info!(channel = %channel, "Consumer drained");
        Ok(())
    }
}
