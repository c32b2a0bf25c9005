use crate::auto_disable;
use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use milvaion_bus::{MessageBus, StatusUpdateMessage};
use milvaion_catalog::repo::{JobRepo, OccurrenceRepo, StatusReport};
use milvaion_common::config::StatusTrackerConfig;
use milvaion_common::model::OccurrenceStatus;
use milvaion_coordination::{RedisCancellationBus, RunningSet, ScheduleIndex, WorkerRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn status_from_i32(value: i32) -> OccurrenceStatus {
    match value {
        0 => OccurrenceStatus::Queued,
        1 => OccurrenceStatus::Running,
        2 => OccurrenceStatus::Completed,
        3 => OccurrenceStatus::Failed,
        4 => OccurrenceStatus::Cancelled,
        5 => OccurrenceStatus::TimedOut,
        _ => OccurrenceStatus::Unknown,
    }
}

/// Consumes the status queue, advances occurrence state through the lifecycle
/// machine, releases the [`RunningSet`]/consumer counter on terminal status, and
/// invokes [`auto_disable::evaluate`] on failures.
pub struct StatusTracker {
    config: StatusTrackerConfig,
    bus: Arc<MessageBus>,
    occurrences: Arc<dyn OccurrenceRepo>,
    jobs: Arc<dyn JobRepo>,
    running_set: Arc<dyn RunningSet>,
    worker_registry: Arc<dyn WorkerRegistry>,
    schedule_index: Arc<dyn ScheduleIndex>,
    cancellation_bus: Arc<RedisCancellationBus>,
}

impl StatusTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StatusTrackerConfig,
        bus: Arc<MessageBus>,
        occurrences: Arc<dyn OccurrenceRepo>,
        jobs: Arc<dyn JobRepo>,
        running_set: Arc<dyn RunningSet>,
        worker_registry: Arc<dyn WorkerRegistry>,
        schedule_index: Arc<dyn ScheduleIndex>,
        cancellation_bus: Arc<RedisCancellationBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            occurrences,
            jobs,
            running_set,
            worker_registry,
            schedule_index,
            cancellation_bus,
        })
    }

    /// Subscribes to the cancellation channel purely for bookkeeping (a log line);
    /// routing the cancellation to the worker executing it is the worker SDK's job,
    /// not ours.
    async fn bookkeep_cancellations(&self, cancellation: CancellationToken) {
        let mut pubsub = match self.cancellation_bus.subscribe().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                error!(error = %err, "status tracker could not subscribe to cancellation channel");
                return;
            }
        };
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                message = stream.next() => {
                    let Some(message) = message else { break };
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(error = %err, "malformed cancellation payload");
                            continue;
                        }
                    };
                    match serde_json::from_str::<milvaion_coordination::CancellationSignal>(&payload) {
                        Ok(signal) => info!(
                            correlation_id = %signal.correlation_id,
                            job_id = %signal.job_id,
                            reason = %signal.reason,
                            "cancellation signal observed"
                        ),
                        Err(err) => warn!(error = %err, "could not parse cancellation signal"),
                    }
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let bookkeeper = self.clone();
        let bookkeeper_token = cancellation.clone();
        tokio::spawn(async move { bookkeeper.bookkeep_cancellations(bookkeeper_token).await });

        let mut consumer = match self.bus.consume_status("status-tracker").await {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(error = %err, "status tracker failed to start consuming");
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
                        Some(Err(err)) => error!(error = %err, "status consumer delivery error"),
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
        for delivery in batch {
            let outcome = self.process_one(&delivery.data).await;
            let exhausted = crate::redelivery::death_count(&delivery)
                >= self.config.max_redelivery_attempts;
            let ack_result = match outcome {
                MessageOutcome::Handled => delivery.ack(BasicAckOptions::default()).await,
                MessageOutcome::Malformed => {
                    delivery.reject(BasicRejectOptions { requeue: false }).await
                }
                MessageOutcome::Retryable if exhausted => {
                    delivery.reject(BasicRejectOptions { requeue: false }).await
                }
                MessageOutcome::Retryable => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                }
            };
            if let Err(err) = ack_result {
                error!(error = %err, "failed to ack/nack status delivery");
            }
        }
    }

    async fn process_one(&self, payload: &[u8]) -> MessageOutcome {
        let message: StatusUpdateMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "discarding malformed status message");
                return MessageOutcome::Malformed;
            }
        };

        let occurrence = match self.occurrences.find(message.correlation_id).await {
            Ok(Some(occurrence)) => occurrence,
            Ok(None) => {
                warn!(correlation_id = %message.correlation_id, "status message for unknown occurrence, discarding");
                return MessageOutcome::Malformed;
            }
            Err(err) => {
                error!(error = %err, "catalog error loading occurrence for status update");
                return MessageOutcome::Retryable;
            }
        };

        let new_status = status_from_i32(message.status);
        if !occurrence.status.can_transition_to(new_status) {
            warn!(
                correlation_id = %message.correlation_id,
                from = %occurrence.status,
                to = %new_status,
                "rejecting illegal occurrence status transition"
            );
            return MessageOutcome::Handled;
        }

        let report = StatusReport {
            occurrence_id: occurrence.id,
            new_status,
            worker_instance_id: Some(message.worker_instance_id.clone()),
            start_time: message.start_time,
            end_time: message.end_time,
            result: message.result.clone(),
            exception: message.exception.clone(),
            reason: "status update".to_string(),
        };

        let updated = match self.occurrences.apply_status_report(report).await {
            Ok(Some(updated)) => updated,
            Ok(None) => return MessageOutcome::Handled,
            Err(err) => {
                error!(error = %err, "catalog error applying status report");
                return MessageOutcome::Retryable;
            }
        };

        if updated.status.is_terminal() {
            self.running_set.mark_completed(updated.job_id).await;
            if let Ok(job) = self.jobs.get(updated.job_id).await {
                self.worker_registry
                    .decrement_consumer_counter(&job.worker_class, &job.job_kind)
                    .await;

                let outcome = auto_disable::evaluate(
                    &job.auto_disable_config,
                    &job.auto_disable_state,
                    Utc::now(),
                    updated.status,
                );
                let _ = self
                    .jobs
                    .record_auto_disable_outcome(
                        job.id,
                        outcome.state.consecutive_failure_count,
                        outcome.state.last_failure_time,
                        outcome.state.disabled_at,
                        outcome.disable,
                    )
                    .await;
                if outcome.disable {
                    self.schedule_index.remove(job.id).await;
                }
            }
        }

        MessageOutcome::Handled
    }
}

enum MessageOutcome {
    Handled,
    Malformed,
    Retryable,
}
