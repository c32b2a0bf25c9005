use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use milvaion_bus::{LogMessage, MessageBus};
use milvaion_catalog::repo::OccurrenceRepo;
use milvaion_common::config::{LogCollectorConfig, StatusTrackerConfig};
use milvaion_common::model::OccurrenceId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Consumes the logs queue and appends each entry to its occurrence's bounded log
/// slice. Within one batch, entries for the same correlation id are sorted by the
/// worker-reported timestamp before being written, since the batch itself may arrive
/// out of order relative to when the worker produced the lines.
pub struct LogCollector {
    config: LogCollectorConfig,
    max_redelivery_attempts: u32,
    execution_log_max_count: usize,
    bus: Arc<MessageBus>,
    occurrences: Arc<dyn OccurrenceRepo>,
}

impl LogCollector {
    pub fn new(
        config: LogCollectorConfig,
        status_tracker_config: &StatusTrackerConfig,
        bus: Arc<MessageBus>,
        occurrences: Arc<dyn OccurrenceRepo>,
    ) -> Arc<Self> {
        Arc::new(Self {
            max_redelivery_attempts: status_tracker_config.max_redelivery_attempts,
            execution_log_max_count: status_tracker_config.execution_log_max_count,
            config,
            bus,
            occurrences,
        })
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut consumer = match self.bus.consume_logs("log-collector").await {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(error = %err, "log collector failed to start consuming");
                return;
            }
        };

        let mut batch: Vec<Delivery> = Vec::with_capacity(self.config.batch_size);
        let mut flush = tokio::time::interval(std::time::Duration::from_millis(
            self.config.batch_interval_ms,
        ));

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    self.process_batch(std::mem::take(&mut batch)).await;
                    break;
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            batch.push(delivery);
                            if batch.len() >= self.config.batch_size {
                                self.process_batch(std::mem::take(&mut batch)).await;
                            }
                        }
                        Some(Err(err)) => error!(error = %err, "log consumer delivery error"),
                        None => break,
                    }
                }
                _ = flush.tick() => {
                    if !batch.is_empty() {
                        self.process_batch(std::mem::take(&mut batch)).await;
                    }
                }
            }
        }
    }

    async fn process_batch(&self, batch: Vec<Delivery>) {
        let mut by_correlation: HashMap<OccurrenceId, Vec<(LogMessage, Delivery)>> = HashMap::new();
        let mut malformed = Vec::new();

        for delivery in batch {
            match serde_json::from_slice::<LogMessage>(&delivery.data) {
                Ok(message) => by_correlation
                    .entry(message.correlation_id)
                    .or_default()
                    .push((message, delivery)),
                Err(err) => {
                    warn!(error = %err, "discarding malformed log message");
                    malformed.push(delivery);
                }
            }
        }

        for delivery in malformed {
            if let Err(err) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                error!(error = %err, "failed to reject malformed log delivery");
            }
        }

        for (correlation_id, mut entries) in by_correlation {
            entries.sort_by_key(|(message, _)| message.log.timestamp);
            let mut retryable = false;
            for (message, _) in &entries {
                if let Err(err) = self
                    .occurrences
                    .append_log(correlation_id, message.log.clone(), self.execution_log_max_count)
                    .await
                {
                    error!(error = %err, "catalog error appending log entry");
                    retryable = true;
                    break;
                }
            }

            for (_, delivery) in entries {
                let exhausted = crate::redelivery::death_count(&delivery) >= self.max_redelivery_attempts;
                let result = if !retryable {
                    delivery.ack(BasicAckOptions::default()).await
                } else if exhausted {
                    delivery.reject(BasicRejectOptions { requeue: false }).await
                } else {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                };
                if let Err(err) = result {
                    error!(error = %err, "failed to ack/nack log delivery");
                }
            }
        }
    }
}
