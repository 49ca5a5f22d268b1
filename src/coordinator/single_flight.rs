//! Per-key de-duplication of concurrent work.
//!
//! The first caller for a key becomes the leader and runs its work; callers
//! that arrive while the leader is running subscribe to its result instead
//! of running their own. If the leader is cancelled before finishing, its
//! sender is dropped and one of the waiting followers takes over with its
//! own work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// How a caller obtained its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<V> {
    /// This caller ran the work.
    Led(V),
    /// This caller waited on another caller's work.
    Joined(V),
}

impl<V> Flight<V> {
    pub fn into_inner(self) -> V {
        match self {
            Flight::Led(v) | Flight::Joined(v) => v,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Flight::Joined(_))
    }
}

/// Tracks in-flight work by key.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or wait for the caller already running it.
    pub async fn run<F, Fut>(&self, key: &K, work: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let tx = loop {
            let mut rx = {
                let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
                match inflight.get(key) {
                    Some(tx) => tx.subscribe(),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        inflight.insert(key.clone(), tx.clone());
                        break tx;
                    }
                }
            };
            match rx.recv().await {
                Ok(value) => return Flight::Joined(value),
                // Leader dropped without a result; contend to lead.
                Err(_) => continue,
            }
        };

        let cleanup = Cleanup {
            inflight: &self.inflight,
            key,
        };
        let value = work().await;
        drop(cleanup);
        // Followers subscribed before the key was removed still receive this.
        let _ = tx.send(value.clone());
        Flight::Led(value)
    }

    /// Keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the leader's entry on completion or cancellation.
struct Cleanup<'a, K: Eq + Hash, V> {
    inflight: &'a Mutex<HashMap<K, broadcast::Sender<V>>>,
    key: &'a K,
}

impl<K: Eq + Hash, V> Drop for Cleanup<'_, K, V> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let flight: SingleFlight<&str, u32> = SingleFlight::new();
        let runs = AtomicU32::new(0);
        let counter = &runs;
        let work = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            7
        };

        let (a, b, c) = tokio::join!(
            flight.run(&"k", work),
            flight.run(&"k", work),
            flight.run(&"k", work),
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!([a.is_joined(), b.is_joined(), c.is_joined()], [false, true, true]);
        assert_eq!([a.into_inner(), b.into_inner(), c.into_inner()], [7, 7, 7]);
        assert_eq!(flight.in_flight(), 0);
    }

    #[test]
    fn follower_waits_for_leader_result() {
        let flight: SingleFlight<&str, u32> = SingleFlight::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();

        let mut leader = tokio_test::task::spawn(flight.run(&"k", || async {
            rx.await.unwrap_or_default()
        }));
        let mut follower = tokio_test::task::spawn(flight.run(&"k", || async { 0 }));

        tokio_test::assert_pending!(leader.poll());
        tokio_test::assert_pending!(follower.poll());
        assert_eq!(flight.in_flight(), 1);

        tx.send(42).unwrap();
        assert_eq!(tokio_test::assert_ready!(leader.poll()), Flight::Led(42));
        assert!(follower.is_woken());
        assert_eq!(tokio_test::assert_ready!(follower.poll()), Flight::Joined(42));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_run_independently() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flight.run(&1, || async { 1 }),
            flight.run(&2, || async { 2 }),
        );
        assert_eq!(a, Flight::Led(1));
        assert_eq!(b, Flight::Led(2));
    }

    #[tokio::test(start_paused = true)]
    async fn follower_takes_over_when_leader_cancelled() {
        let flight: Arc<SingleFlight<String, &'static str>> = Arc::new(SingleFlight::new());

        let leader = tokio::spawn({
            let flight = Arc::clone(&flight);
            async move {
                flight
                    .run(&"k".to_string(), || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        "leader"
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(flight.in_flight(), 1);

        let follower = tokio::spawn({
            let flight = Arc::clone(&flight);
            async move {
                flight
                    .run(&"k".to_string(), || async { "follower" })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(follower.await.unwrap(), Flight::Led("follower"));
        assert_eq!(flight.in_flight(), 0);
    }
}
