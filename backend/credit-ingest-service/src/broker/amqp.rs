//! AMQP 0-9-1 session over `lapin`.

use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::debug;

use super::{BrokerConnector, BrokerError, BrokerSession, DeliveryHandle, QueuedMessage};
use crate::config::BrokerEndpoint;

const PERSISTENT: u8 = 2;
const CONNECTION_NAME: &str = "credit-ingest-service";

#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    type Session = AmqpSession;

    async fn open(&self, endpoint: &BrokerEndpoint) -> Result<AmqpSession, BrokerError> {
        let uri = endpoint.amqp_uri();
        let properties =
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());

        let connection =
            tokio::time::timeout(endpoint.connect_timeout, Connection::connect(&uri, properties))
                .await
                .map_err(|_| {
                    BrokerError::ConnectionUnavailable(format!(
                        "timed out after {:?} connecting to {}:{}",
                        endpoint.connect_timeout, endpoint.host, endpoint.port
                    ))
                })?
                .map_err(|e| BrokerError::ConnectionUnavailable(e.to_string()))?;

        let channel = match open_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(0, "channel setup failed").await;
                return Err(e);
            }
        };

        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(AmqpSession {
            connection,
            channel,
        })
    }
}

async fn open_channel(connection: &Connection) -> Result<Channel, BrokerError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| BrokerError::ConnectionUnavailable(e.to_string()))?;

    // Publisher confirms, so a publish only succeeds once the broker has it.
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| BrokerError::ConnectionUnavailable(e.to_string()))?;

    Ok(channel)
}

fn channel_error(err: lapin::Error) -> BrokerError {
    BrokerError::Channel(err.to_string())
}

#[async_trait]
impl BrokerSession for AmqpSession {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(channel_error)
    }

    async fn fetch(&self, queue: &str) -> Result<Option<QueuedMessage>, BrokerError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(channel_error)?;

        Ok(message.map(|message| {
            let mut delivery = message.delivery;
            QueuedMessage {
                handle: DeliveryHandle(delivery.delivery_tag),
                payload: std::mem::take(&mut delivery.data),
                redelivered: delivery.redelivered,
            }
        }))
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(handle.0, BasicAckOptions { multiple: false })
            .await
            .map_err(channel_error)
    }

    async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                handle.0,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(channel_error)
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(channel_error)?
            .await
            .map_err(channel_error)?;

        if confirmation.is_nack() {
            return Err(BrokerError::Channel(format!(
                "broker refused message for queue {queue}"
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let channel_result = if self.channel.status().connected() {
            self.channel.close(200, "Bye").await.map_err(channel_error)
        } else {
            Ok(())
        };

        if self.connection.status().connected() {
            self.connection
                .close(200, "Bye")
                .await
                .map_err(|e| BrokerError::ConnectionUnavailable(e.to_string()))?;
        }

        channel_result
    }
}
