use super::{
    Acknowledge, Broker, Delivery, DeliveryStream, QueueError, QueueMessage, JSON_CONTENT_TYPE,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker, options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties, Consumer,
};

const PERSISTENT_DELIVERY: u8 = 2;
const CONSUMER_TAG: &str = "receipt-consumer";

/// RabbitMQ broker. Publishes go through the default exchange straight to the
/// named queue, with publisher confirms so a broker-side nack is reported.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    durable: bool,
}

impl AmqpBroker {
    pub async fn connect(url: &str, queues: &[&str], durable: bool) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to RabbitMQ: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to create channel: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                QueueError::Connection(format!("Failed to enable publisher confirms: {e}"))
            })?;

        let broker = Self {
            connection,
            channel,
            durable,
        };
        for queue in queues {
            let ready = broker.declare(queue, false).await?;
            log::info!("Declared queue '{queue}' ({ready} messages ready)");
        }

        log::info!("Connected to RabbitMQ");
        Ok(broker)
    }

    async fn declare(&self, queue: &str, passive: bool) -> Result<u32, QueueError> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive,
                    durable: self.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to declare queue {queue}: {e}")))?;
        Ok(declared.message_count())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let publish_error = |reason: String| QueueError::Publish {
            queue: queue.to_string(),
            reason,
        };

        let properties = BasicProperties::default()
            .with_content_type(message.content_type.clone().into())
            .with_delivery_mode(PERSISTENT_DELIVERY);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(publish_error("broker rejected the message".to_string()));
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u32, QueueError> {
        self.declare(queue, true).await
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, QueueError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to create channel: {e}")))?;

        // One unacknowledged message at a time
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to set prefetch: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to consume {queue}: {e}")))?;

        log::info!("Consuming from queue '{queue}'");
        Ok(Box::new(AmqpSubscription {
            _channel: channel,
            consumer,
        }))
    }
}

struct AmqpSubscription {
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(QueueError::Connection(e.to_string()))),
        };

        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string())
            .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

        Some(Ok(Delivery::new(
            QueueMessage {
                payload: delivery.data,
                content_type,
            },
            delivery.redelivered,
            Box::new(AmqpAcker {
                acker: delivery.acker,
            }),
        )))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))
    }
}
