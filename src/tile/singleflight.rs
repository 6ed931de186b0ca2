//! Collapse concurrent computations of the same key into one.
//!
//! The first caller for a key spawns the computation as a detached tokio task;
//! every caller, the first included, then waits for that task's result. A
//! caller that gives up (timeout, dropped connection) stops waiting but the
//! task runs to completion, so whatever side effects it has, such as filling
//! a cache, still happen. A computation that panics still settles its key:
//! waiters get the value [`FromPanic`] builds and the next caller starts over.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::TileError;

/// Values that can stand in for a computation that died without producing one.
pub trait FromPanic {
    fn from_panic(message: String) -> Self;
}

impl<T> FromPanic for Result<T, TileError> {
    fn from_panic(message: String) -> Self {
        Err(TileError::Internal { message })
    }
}

struct Call<V> {
    result: Mutex<Option<V>>,
    done: Notify,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Call {
            result: Mutex::new(None),
            done: Notify::new(),
        }
    }

    fn get(&self) -> Option<V> {
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn wait(&self) -> V {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            // Arm before checking so a completion in between still wakes us.
            notified.as_mut().enable();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }
}

/// Outcome of [`SingleFlight::run`].
#[derive(Debug, Clone)]
pub struct Flight<V> {
    pub value: V,
    /// Whether this caller started the computation.
    pub leader: bool,
}

pub struct SingleFlight<K, V> {
    in_flight: Arc<Mutex<HashMap<K, Arc<Call<V>>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        SingleFlight {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + FromPanic + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key` unless a run is already in flight, and wait for
    /// the shared result. `compute` is only called by the leader.
    pub async fn run<F, Fut>(&self, key: K, compute: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (call, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(&key) {
                Some(call) => (Arc::clone(call), false),
                None => {
                    let call = Arc::new(Call::new());
                    in_flight.insert(key.clone(), Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if leader {
            let work = tokio::spawn(compute());
            let call = Arc::clone(&call);
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                let value = match work.await {
                    Ok(value) => value,
                    Err(e) => V::from_panic(e.to_string()),
                };
                *call.result.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
                in_flight
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&key);
                call.done.notify_waiters();
            });
        }

        Flight {
            value: call.wait().await,
            leader,
        }
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
