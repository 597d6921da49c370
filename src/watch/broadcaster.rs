// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Fans one upstream event stream out to many independently paced subscribers.

use crate::constants::SUBSCRIBER_BUFFER;
use crate::error::Result;
use crate::types::{Event, EventChannel};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

struct Subscriber {
    tx: mpsc::Sender<Event>,
    /// Cancelled once the subscriber is removed, releasing its cleanup task
    done: CancellationToken,
}

impl Subscriber {
    fn close(self) {
        self.done.cancel();
    }
}

#[derive(Default)]
struct State {
    running: bool,
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

impl State {
    fn remove(&mut self, id: u64) -> bool {
        match self.subscribers.remove(&id) {
            Some(sub) => {
                sub.close();
                true
            }
            None => false,
        }
    }
}

/// Multiplexes a single upstream stream to any number of subscriber channels.
///
/// The upstream is connected lazily on the first subscription and at most
/// once at a time. A subscriber whose buffer is full when an event arrives
/// is closed instead of slowing down the others. When the upstream ends,
/// every subscriber is closed and the next subscription connects again.
#[derive(Clone)]
pub struct Broadcaster {
    state: Arc<Mutex<State>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber, connecting upstream first if nothing is running.
    ///
    /// `cancel` scopes this subscriber only; it never tears down the upstream.
    /// A failed `connect` is returned to the caller and leaves the
    /// broadcaster idle, so the next call tries again.
    pub async fn subscribe<F, Fut>(
        &self,
        cancel: CancellationToken,
        connect: F,
    ) -> Result<EventChannel>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<EventChannel>> + Send,
    {
        let mut state = self.state.lock().await;

        if !state.running {
            let upstream = connect().await?;
            state.running = true;
            info!("Upstream connected, starting fan-out");
            tokio::spawn(stream(self.state.clone(), upstream).in_current_span());
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::channel(self.capacity);
        let done = CancellationToken::new();
        state.subscribers.insert(
            id,
            Subscriber {
                tx,
                done: done.clone(),
            },
        );
        debug!(subscriber = id, total = state.subscribers.len(), "Subscriber added");
        drop(state);

        let broadcaster = self.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => broadcaster.unsubscribe(id).await,
                    _ = done.cancelled() => {}
                }
            }
            .in_current_span(),
        );

        Ok(rx)
    }

    /// Close and remove one subscriber. Removing an unknown id is a no-op.
    async fn unsubscribe(&self, id: u64) {
        if self.state.lock().await.remove(id) {
            debug!(subscriber = id, "Subscriber cancelled");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }
}

async fn stream(state: Arc<Mutex<State>>, mut upstream: EventChannel) {
    while let Some(event) = upstream.recv().await {
        let mut state = state.lock().await;
        let mut evicted = Vec::new();
        for (id, sub) in &state.subscribers {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id, "Subscriber buffer full, evicting");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in evicted {
            state.remove(id);
        }
    }

    let mut state = state.lock().await;
    for (_, sub) in state.subscribers.drain() {
        sub.close();
    }
    state.running = false;
    info!("Upstream closed, all subscribers released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::test_utils::event;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn numbered(n: usize) -> Event {
        event(json!({ "id": format!("default:item-{}", n), "n": n }))
    }

    /// Connect factory that counts invocations and hands the upstream sender back
    struct Upstream {
        connects: Arc<AtomicUsize>,
        senders: Arc<std::sync::Mutex<Vec<mpsc::Sender<Event>>>>,
    }

    impl Upstream {
        fn new() -> Self {
            Self {
                connects: Arc::new(AtomicUsize::new(0)),
                senders: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }

        fn connect(&self) -> impl Future<Output = Result<EventChannel>> + Send {
            let connects = self.connects.clone();
            let senders = self.senders.clone();
            async move {
                connects.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::channel(1000);
                senders.lock().unwrap().push(tx);
                Ok(rx)
            }
        }

        fn sender(&self) -> mpsc::Sender<Event> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }

        fn close(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_share_one_upstream() {
        let broadcaster = Broadcaster::new();
        let upstream = Upstream::new();

        let subscriptions = futures::future::join_all((0..10).map(|_| {
            broadcaster.subscribe(CancellationToken::new(), || upstream.connect())
        }))
        .await;
        let mut channels: Vec<_> = subscriptions.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(upstream.connects.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count().await, 10);

        upstream.sender().send(numbered(1)).await.unwrap();
        for rx in channels.iter_mut() {
            assert_eq!(rx.recv().await.unwrap()["n"], 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_subscribers_share_one_upstream() {
        let broadcaster = Broadcaster::new();
        let upstream = Arc::new(Upstream::new());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let broadcaster = broadcaster.clone();
                let upstream = upstream.clone();
                tokio::spawn(async move {
                    broadcaster
                        .subscribe(CancellationToken::new(), || upstream.connect())
                        .await
                })
            })
            .collect();
        let mut channels = Vec::new();
        for handle in handles {
            channels.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(upstream.connects.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count().await, 64);

        upstream.sender().send(numbered(5)).await.unwrap();
        for rx in channels.iter_mut() {
            assert_eq!(rx.recv().await.unwrap()["n"], 5);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_evicted() {
        let broadcaster = Broadcaster::new();
        let upstream = Upstream::new();

        let mut slow = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();
        let mut fast = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();

        let tx = upstream.sender();
        for n in 0..150 {
            tx.send(numbered(n)).await.unwrap();
            assert_eq!(fast.recv().await.unwrap()["n"], n);
        }

        assert_eq!(broadcaster.subscriber_count().await, 1);

        let mut buffered = 0;
        while slow.recv().await.is_some() {
            buffered += 1;
        }
        assert_eq!(buffered, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn test_upstream_end_closes_subscribers_and_allows_restart() {
        let broadcaster = Broadcaster::new();
        let upstream = Upstream::new();

        let mut rx = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();
        assert!(broadcaster.is_running().await);

        upstream.close();
        assert!(rx.recv().await.is_none());
        assert!(!broadcaster.is_running().await);
        assert_eq!(broadcaster.subscriber_count().await, 0);

        let mut rx = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();
        assert_eq!(upstream.connects.load(Ordering::SeqCst), 2);

        upstream.sender().send(numbered(7)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()["n"], 7);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_and_retried() {
        let broadcaster = Broadcaster::new();
        let attempts = AtomicUsize::new(0);

        let result = broadcaster
            .subscribe(CancellationToken::new(), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<EventChannel, _>(StoreError::Backend("connection refused".to_string()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(!broadcaster.is_running().await);
        assert_eq!(broadcaster.subscriber_count().await, 0);

        let upstream = Upstream::new();
        broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.connects.load(Ordering::SeqCst), 1);
        assert!(broadcaster.is_running().await);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_leaves_upstream_running() {
        let broadcaster = Broadcaster::new();
        let upstream = Upstream::new();

        let cancel = CancellationToken::new();
        let mut cancelled = broadcaster
            .subscribe(cancel.clone(), || upstream.connect())
            .await
            .unwrap();
        let mut other = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();

        cancel.cancel();
        assert!(cancelled.recv().await.is_none());
        assert!(broadcaster.is_running().await);
        assert_eq!(broadcaster.subscriber_count().await, 1);

        upstream.sender().send(numbered(3)).await.unwrap();
        assert_eq!(other.recv().await.unwrap()["n"], 3);
        assert_eq!(upstream.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let upstream = Upstream::new();
        let _rx = broadcaster
            .subscribe(CancellationToken::new(), || upstream.connect())
            .await
            .unwrap();

        broadcaster.unsubscribe(0).await;
        broadcaster.unsubscribe(0).await;
        broadcaster.unsubscribe(42).await;
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
