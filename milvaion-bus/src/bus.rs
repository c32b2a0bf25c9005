use crate::error::{BusError, BusResult};
use crate::messages::DispatchMessage;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use milvaion_common::config::BusConfig;
use tracing::info;

pub const JOB_EXCHANGE: &str = "milvaion.job";
pub const STATUS_EXCHANGE: &str = "milvaion.status";
pub const STATUS_QUEUE: &str = "milvaion.status";
pub const LOGS_EXCHANGE: &str = "milvaion.logs";
pub const LOGS_QUEUE: &str = "milvaion.logs";
pub const DLX_EXCHANGE: &str = "milvaion.dlx";
pub const DLQ_QUEUE: &str = "milvaion.dlq";

/// Thin transport layer over one AMQP connection: topology declaration, publish, and
/// raw consumer handles. Batching and business semantics live in the components that
/// consume these streams.
pub struct MessageBus {
    connection: Connection,
    channel: Channel,
}

impl MessageBus {
    pub async fn connect(config: &BusConfig) -> BusResult<Self> {
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(&config.url, options).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(config.prefetch_count, Default::default())
            .await?;
        info!("connected to message bus");
        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn new_channel(&self) -> BusResult<Channel> {
        Ok(self.connection.create_channel().await?)
    }

    /// Declares the full topology: job topic exchange, status/log direct exchanges with
    /// their bound queues, and the dead-letter fanout + queue every other queue routes
    /// into after bounded redelivery.
    pub async fn declare_topology(&self) -> BusResult<()> {
        let channel = &self.channel;

        channel
            .exchange_declare(
                JOB_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .exchange_declare(
                DLX_EXCHANGE,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                DLQ_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                DLQ_QUEUE,
                DLX_EXCHANGE,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.declare_dead_lettered_direct_queue(STATUS_EXCHANGE, STATUS_QUEUE)
            .await?;
        self.declare_dead_lettered_direct_queue(LOGS_EXCHANGE, LOGS_QUEUE)
            .await?;

        Ok(())
    }

    async fn declare_dead_lettered_direct_queue(
        &self,
        exchange: &str,
        queue: &str,
    ) -> BusResult<()> {
        let channel = &self.channel;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            lapin::types::AMQPValue::LongString(DLX_EXCHANGE.into()),
        );
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;
        channel
            .queue_bind(
                queue,
                exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Declares and binds a worker class's queue on the job exchange. Called once
    /// per known worker class (when a class first registers, or at startup for every
    /// class already on record).
    pub async fn declare_worker_class_queue(
        &self,
        worker_class: &str,
        routing_patterns: &[String],
    ) -> BusResult<()> {
        let queue = format!("milvaion.job.{worker_class}");
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            lapin::types::AMQPValue::LongString(DLX_EXCHANGE.into()),
        );
        self.channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;
        let patterns = if routing_patterns.is_empty() {
            vec![format!("job.{worker_class}.*")]
        } else {
            routing_patterns.to_vec()
        };
        for pattern in patterns {
            self.channel
                .queue_bind(
                    &queue,
                    JOB_EXCHANGE,
                    &pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn publish_dispatch(
        &self,
        message: &DispatchMessage,
        routing_key: &str,
    ) -> BusResult<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| BusError::Protocol(e.to_string()))?;
        self.channel
            .basic_publish(
                JOB_EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;
        Ok(())
    }

    pub async fn consume_status(&self, consumer_tag: &str) -> BusResult<Consumer> {
        Ok(self
            .channel
            .basic_consume(
                STATUS_QUEUE,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?)
    }

    pub async fn consume_logs(&self, consumer_tag: &str) -> BusResult<Consumer> {
        Ok(self
            .channel
            .basic_consume(
                LOGS_QUEUE,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?)
    }
}
