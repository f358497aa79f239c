//! Signal delivery: per-execution mailboxes, a first-arrival selector over
//! several channels, and the gate stages suspend on.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use onboarding_core::SignalPayload;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::context::{SignalDelivery, WorkflowContext};
use crate::error::JourneyError;

/// Buffered, ordered signal queues for one execution.
///
/// Every delivery gets a sequence number; a receive over several channels
/// takes the queued signal with the lowest one.
#[derive(Default)]
pub struct SignalMailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
}

#[derive(Default)]
struct MailboxState {
    next_seq: u64,
    queues: HashMap<String, VecDeque<(u64, Value)>>,
}

impl SignalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a payload and wakes any waiting receiver. Returns the delivery
    /// sequence number.
    pub fn deliver(&self, channel: &str, payload: Value) -> u64 {
        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .queues
                .entry(channel.to_string())
                .or_default()
                .push_back((seq, payload));
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    pub fn try_take(&self, channels: &[String]) -> Option<SignalDelivery> {
        let mut state = self.state.lock();
        let channel = channels
            .iter()
            .filter_map(|c| {
                state
                    .queues
                    .get(c)
                    .and_then(|q| q.front())
                    .map(|(seq, _)| (*seq, c))
            })
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, c)| c.clone())?;
        let (_, payload) = state.queues.get_mut(&channel)?.pop_front()?;
        Some(SignalDelivery { channel, payload })
    }

    /// Waits until one of `channels` has a queued signal and takes it.
    pub async fn take(&self, channels: &[String]) -> SignalDelivery {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(delivery) = self.try_take(channels) {
                return delivery;
            }
            notified.await;
        }
    }

    pub fn pending(&self, channel: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(channel)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

type Continuation<'a, T> = Box<dyn FnOnce(Value) -> T + Send + 'a>;

/// A set of `(channel, continuation)` arms. `select` runs the continuation
/// of whichever channel's signal was delivered first.
pub struct Selector<'a, T> {
    arms: Vec<(String, Continuation<'a, T>)>,
}

impl<'a, T> Default for Selector<'a, T> {
    fn default() -> Self {
        Self { arms: Vec::new() }
    }
}

impl<'a, T> Selector<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_receive<F>(mut self, channel: impl Into<String>, continuation: F) -> Self
    where
        F: FnOnce(Value) -> T + Send + 'a,
    {
        self.arms.push((channel.into(), Box::new(continuation)));
        self
    }

    pub fn channels(&self) -> Vec<String> {
        self.arms.iter().map(|(c, _)| c.clone()).collect()
    }

    pub async fn select(
        self,
        ctx: &dyn WorkflowContext,
        timeout: Option<Duration>,
    ) -> Result<T, JourneyError> {
        if self.arms.is_empty() {
            return Err(JourneyError::InvalidDefinition(
                "selector has no channels".into(),
            ));
        }
        let channels = self.channels();
        let delivery = ctx
            .receive_signal(&channels, timeout)
            .await?
            .ok_or_else(|| JourneyError::SignalTimeout {
                channels: channels.clone(),
                timeout: timeout.unwrap_or_default(),
            })?;

        let (_, continuation) = self
            .arms
            .into_iter()
            .find(|(c, _)| *c == delivery.channel)
            .ok_or_else(|| {
                JourneyError::NonDeterministic(format!(
                    "signal delivered on unarmed channel '{}'",
                    delivery.channel
                ))
            })?;
        Ok(continuation(delivery.payload))
    }
}

/// Suspends a stage until a valid `SignalPayload` arrives on a channel.
pub struct SignalGate<'a> {
    ctx: &'a dyn WorkflowContext,
    timeout: Option<Duration>,
}

impl<'a> SignalGate<'a> {
    pub fn new(ctx: &'a dyn WorkflowContext, timeout: Option<Duration>) -> Self {
        Self { ctx, timeout }
    }

    /// Malformed payloads are consumed and logged; the gate then re-arms on
    /// the same channel, so the execution keeps waiting for a valid one.
    /// The timeout, if any, restarts on each re-arm.
    pub async fn await_signal(&self, channel: &str) -> Result<SignalPayload, JourneyError> {
        let identity = self.ctx.identity();
        loop {
            if !self.ctx.is_replaying() {
                info!(
                    execution_id = %identity.execution_id,
                    channel = %channel,
                    "Waiting for signal on channel"
                );
            }

            let decoded = Selector::new()
                .add_receive(channel, |raw| SignalPayload::decode(&raw))
                .select(self.ctx, self.timeout)
                .await?;

            match decoded {
                Ok(signal) => {
                    if !self.ctx.is_replaying() {
                        info!(
                            execution_id = %identity.execution_id,
                            channel = %channel,
                            applicant_id = %signal.applicant_id,
                            "Received the signal"
                        );
                    }
                    return Ok(signal);
                }
                Err(err) => {
                    if !self.ctx.is_replaying() {
                        warn!(
                            execution_id = %identity.execution_id,
                            channel = %channel,
                            error = %err,
                            "Discarding malformed signal payload"
                        );
                        metrics::counter!("signal.decode_failures").increment(1);
                    }
                }
            }
        }
    }
}
