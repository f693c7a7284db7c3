use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, ShortString},
};
use futures_util::{StreamExt, stream::BoxStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    consumer::Disposition,
    models::message::{Channel as NotificationChannel, InboundMessage, QueueMessage, RETRY_COUNT_HEADER},
};

const DEAD_LETTER_ROUTING_KEY: &str = "failed";
const FAILURE_REASON_HEADER: &str = "x-failure-reason";

/// Publishes admitted notifications onto the broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, channel: NotificationChannel, message: &QueueMessage) -> Result<(), Error>;
}

/// Deliveries of one consumer, already decoded into `InboundMessage`s. The
/// stream ends when the broker closes the consumer.
pub type DeliveryStream = BoxStream<'static, Result<InboundMessage, Error>>;

/// Opens a consuming session on a queue. Each call is a fresh connection.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn open(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<(Arc<dyn QueueSession>, DeliveryStream), Error>;
}

/// Broker-side operations a worker needs while consuming.
#[async_trait]
pub trait QueueSession: Send + Sync {
    async fn cancel(&self, consumer_tag: &str) -> Result<(), Error>;

    async fn settle(&self, message: &InboundMessage, disposition: &Disposition) -> Result<(), Error>;

    /// Hands an unprocessed delivery back to the queue unchanged.
    async fn release(&self, delivery_tag: u64) -> Result<(), Error>;
}

pub struct RabbitMqClient {
    _connection: Connection,
    channel: Channel,
    exchange_name: String,
    failed_queue_name: String,
}

impl RabbitMqClient {
    /// Connects, enables publisher confirms, and declares the full topology:
    /// the direct exchange, one durable queue per channel, and the DLQ.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        channel
            .exchange_declare(
                &config.exchange_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare exchange: {}", e))?;

        for notification_channel in NotificationChannel::ALL {
            let queue = config.queue_name(notification_channel);
            Self::declare_bound_queue(
                &channel,
                &config.exchange_name,
                queue,
                notification_channel.routing_key(),
            )
            .await?;
        }

        Self::declare_bound_queue(
            &channel,
            &config.exchange_name,
            &config.failed_queue_name,
            DEAD_LETTER_ROUTING_KEY,
        )
        .await?;

        info!(
            exchange = %config.exchange_name,
            prefetch = config.prefetch_count,
            "RabbitMQ topology declared"
        );

        Ok(Self {
            _connection: connection,
            channel,
            exchange_name: config.exchange_name.clone(),
            failed_queue_name: config.failed_queue_name.clone(),
        })
    }

    async fn declare_bound_queue(
        channel: &Channel,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), Error> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;

        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to bind queue {}: {}", queue, e))?;

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }

    pub fn failed_queue_name(&self) -> &str {
        &self.failed_queue_name
    }

    pub async fn create_consumer(&self, queue: &str, consumer_tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(consumer)
    }

    /// Stops the broker from handing out further deliveries to `consumer_tag`.
    pub async fn cancel_consumer(&self, consumer_tag: &str) -> Result<(), Error> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to cancel consumer: {}", e))?;
        Ok(())
    }

    pub async fn publish_message(
        &self,
        channel: NotificationChannel,
        message: &QueueMessage,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;
        self.publish_raw(channel.routing_key(), &payload, retry_headers(0, None))
            .await?;

        debug!(
            request_id = %message.request_id,
            routing_key = channel.routing_key(),
            "Message published"
        );
        Ok(())
    }

    /// Applies the consumer's decision for one delivery. Exactly one broker
    /// settlement happens per call.
    pub async fn settle(&self, message: &InboundMessage, disposition: &Disposition) -> Result<(), Error> {
        match disposition {
            Disposition::Ack => self.acknowledge(message.delivery_tag).await,
            Disposition::Requeue { retry_count } => {
                // A nack-requeue would redeliver the unchanged headers, so the
                // incremented copy is published first and the original acked.
                self.publish_raw(
                    &message.routing_key,
                    &message.body,
                    retry_headers(*retry_count, None),
                )
                .await?;
                self.acknowledge(message.delivery_tag).await
            }
            Disposition::DeadLetter { reason } => {
                let headers = retry_headers(message.retry_count, Some(reason));
                match self
                    .publish_raw(DEAD_LETTER_ROUTING_KEY, &message.body, headers)
                    .await
                {
                    Ok(()) => self.reject(message.delivery_tag, false).await,
                    Err(e) => {
                        warn!(
                            delivery_tag = message.delivery_tag,
                            error = %e,
                            "Dead-letter publish failed, returning message to queue"
                        );
                        self.reject(message.delivery_tag, true).await
                    }
                }
            }
        }
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    async fn publish_raw(&self, routing_key: &str, payload: &[u8], headers: FieldTable) -> Result<(), Error> {
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type(ShortString::from("application/json"))
            .with_headers(headers);

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publish: {}", e))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(anyhow!("Broker nacked publish to {}", routing_key));
        }

        Ok(())
    }
}

#[async_trait]
impl QueueSession for RabbitMqClient {
    async fn cancel(&self, consumer_tag: &str) -> Result<(), Error> {
        self.cancel_consumer(consumer_tag).await
    }

    async fn settle(&self, message: &InboundMessage, disposition: &Disposition) -> Result<(), Error> {
        RabbitMqClient::settle(self, message, disposition).await
    }

    async fn release(&self, delivery_tag: u64) -> Result<(), Error> {
        self.reject(delivery_tag, true).await
    }
}

pub struct RabbitMqConnector {
    config: Config,
}

impl RabbitMqConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueConnector for RabbitMqConnector {
    async fn open(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<(Arc<dyn QueueSession>, DeliveryStream), Error> {
        let client = RabbitMqClient::connect(&self.config).await?;
        let consumer = client.create_consumer(queue, consumer_tag).await?;

        let deliveries = consumer
            .map(|delivery| {
                delivery
                    .map(|d| InboundMessage::from(&d))
                    .map_err(|e| anyhow!("Delivery stream failed: {}", e))
            })
            .boxed();

        Ok((Arc::new(client), deliveries))
    }
}

impl From<&Delivery> for InboundMessage {
    fn from(delivery: &Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_string(),
            body: delivery.data.clone(),
            retry_count: read_retry_count(delivery.properties.headers().as_ref()),
            redelivered: delivery.redelivered,
        }
    }
}

fn retry_headers(retry_count: u32, failure_reason: Option<&str>) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(i64::from(retry_count)),
    );
    if let Some(reason) = failure_reason {
        headers.insert(
            ShortString::from(FAILURE_REASON_HEADER),
            AMQPValue::LongString(reason.into()),
        );
    }
    headers
}

/// Missing or unreadable headers count as a first delivery.
pub fn read_retry_count(headers: Option<&FieldTable>) -> u32 {
    let Some(value) = headers.and_then(|h| h.inner().get(&ShortString::from(RETRY_COUNT_HEADER))) else {
        return 0;
    };

    let count = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        _ => 0,
    };

    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Publisher used by the Ingress Gate. Reconnects lazily when the broker
/// connection has gone away since the last publish.
pub struct RabbitMqPublisher {
    config: Config,
    client: Mutex<Option<RabbitMqClient>>,
}

impl RabbitMqPublisher {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqPublisher {
    async fn publish(&self, channel: NotificationChannel, message: &QueueMessage) -> Result<(), Error> {
        let mut guard = self.client.lock().await;

        let reconnect = guard.as_ref().is_none_or(|client| !client.is_connected());
        if reconnect {
            *guard = Some(RabbitMqClient::connect(&self.config).await?);
        }

        let client = guard
            .as_ref()
            .ok_or_else(|| anyhow!("RabbitMQ publisher is not connected"))?;

        if let Err(e) = client.publish_message(channel, message).await {
            *guard = None;
            return Err(e);
        }

        info!(
            request_id = %message.request_id,
            channel = %channel,
            "Notification published"
        );
        Ok(())
    }
}
