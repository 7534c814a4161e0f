use std::fmt::Display;

use futures::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use teloxide::{prelude::*, types::ChatId};
use tokio::{sync::watch, task::JoinSet};

use crate::{RelayError, Subscription, wait_for_shutdown};

/// Sends relayed text to a chat.
pub trait Forwarder: Clone + Send + Sync + 'static {
    type Error: Display + Send;

    fn forward(
        &self,
        chat: ChatId,
        text: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl Forwarder for teloxide::Bot {
    type Error = teloxide::RequestError;

    async fn forward(&self, chat: ChatId, text: String) -> Result<(), Self::Error> {
        self.send_message(chat, text).await.map(|_| ())
    }
}

/// One message pulled from a queue, settled exactly once.
pub trait Inbound: Send {
    type Error: Display + Send;

    fn payload(&self) -> &[u8];

    fn confirm(self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Hands the message back to the broker for redelivery.
    fn requeue(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl Inbound for Delivery {
    type Error = lapin::Error;

    fn payload(&self) -> &[u8] {
        &self.data
    }

    async fn confirm(self) -> Result<(), Self::Error> {
        self.acker.ack(BasicAckOptions::default()).await.map(|_| ())
    }

    async fn requeue(self) -> Result<(), Self::Error> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await
            .map(|_| ())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Forwarded,
    Dropped,
    Requeued,
}

/// Forwards one message and settles it according to the result.
pub(crate) async fn deliver<F, M>(forwarder: &F, sub: &Subscription, message: M) -> Outcome
where
    F: Forwarder,
    M: Inbound,
{
    let text = String::from_utf8_lossy(message.payload()).into_owned();

    // Telegram refuses blank messages, requeueing them would loop forever.
    if text.trim().is_empty() {
        tracing::warn!("dropping blank message from queue `{}`", sub.queue);
        if let Err(err) = message.confirm().await {
            tracing::error!("ack failed on queue `{}`: {err}", sub.queue);
        }
        return Outcome::Dropped;
    }

    match forwarder.forward(sub.chat, text).await {
        Ok(()) => {
            tracing::debug!("forwarded message from `{}` to chat {}", sub.queue, sub.chat.0);
            if let Err(err) = message.confirm().await {
                tracing::error!("ack failed on queue `{}`: {err}", sub.queue);
            }
            Outcome::Forwarded
        }
        Err(err) => {
            tracing::warn!(
                "forwarding from `{}` to chat {} failed: {err}",
                sub.queue,
                sub.chat.0
            );
            if let Err(err) = message.requeue().await {
                tracing::error!("nack failed on queue `{}`: {err}", sub.queue);
            }
            Outcome::Requeued
        }
    }
}

/// Drains `deliveries` one message at a time until shutdown.
///
/// Returns an error when the stream fails or ends while the relay is still
/// supposed to be running.
pub(crate) async fn consume<F, S, M, E>(
    forwarder: F,
    sub: Subscription,
    deliveries: S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError>
where
    F: Forwarder,
    S: Stream<Item = Result<M, E>>,
    M: Inbound,
    E: Display,
{
    let mut deliveries = std::pin::pin!(deliveries);
    tracing::info!("consuming queue `{}` into chat {}", sub.queue, sub.chat.0);

    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::info!("consumer for `{}` stopped", sub.queue);
                return Ok(());
            }
            next = deliveries.next() => match next {
                Some(Ok(message)) => {
                    deliver(&forwarder, &sub, message).await;
                }
                Some(Err(err)) => {
                    return Err(RelayError::Stream {
                        queue: sub.queue.clone(),
                        reason: err.to_string(),
                    });
                }
                None => return Err(RelayError::Ended(sub.queue.clone())),
            }
        }
    }
}

/// Runs one [`consume`] task per stream.
///
/// Returns once `shutdown` flips and every consumer has stopped, or as soon
/// as the first consumer fails: the remaining ones are then told to stop and
/// the failure is returned.
pub(crate) async fn run_consumers<F, S, M, E>(
    forwarder: F,
    streams: Vec<(Subscription, S)>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError>
where
    F: Forwarder,
    S: Stream<Item = Result<M, E>> + Send + 'static,
    M: Inbound + 'static,
    E: Display + Send + 'static,
{
    if streams.is_empty() {
        wait_for_shutdown(&mut shutdown).await;
        return Ok(());
    }

    let (stop, stopped) = watch::channel(false);
    let mut tasks = JoinSet::new();
    for (sub, stream) in streams {
        tasks.spawn(consume(forwarder.clone(), sub, stream, stopped.clone()));
    }

    let mut failure = None;
    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown), if !*stop.borrow() => {
                stop.send_replace(true);
            }
            joined = tasks.join_next() => {
                let err = match joined {
                    None => break,
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(err))) => err,
                    Some(Err(err)) => RelayError::Task(err.to_string()),
                };
                tracing::error!("{err}");
                if failure.is_none() {
                    tracing::warn!("stopping the remaining consumers");
                    stop.send_replace(true);
                    failure = Some(err);
                }
            }
        }
    }

    failure.map_or(Ok(()), Err)
}
