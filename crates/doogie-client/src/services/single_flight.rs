use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::error::{ApiError, ApiResult};

type Slot<T> = Mutex<Option<broadcast::Sender<ApiResult<T>>>>;

/// At most one in-flight instance of an operation; concurrent callers wait
/// for the leader's result instead of issuing their own.
///
/// The first caller to arrive becomes the leader, runs the operation, and
/// broadcasts the outcome (success or error) to every waiter. The slot is
/// cleared before the broadcast, so the next arrival after completion starts
/// a fresh operation. If the leader's future is dropped mid-operation, a
/// guard clears the slot anyway: waiters observe the closed channel as a
/// cancellation error instead of hanging, and the next caller leads a fresh
/// flight.
pub struct SingleFlight<T> {
    inflight: Slot<T>,
}

/// Releases the slot when the leader is dropped without completing.
struct FlightGuard<'a, T> {
    slot: &'a Slot<T>,
    armed: bool,
}

impl<T> FlightGuard<'_, T> {
    /// Normal completion: take the sender for broadcasting.
    fn complete(&mut self) -> Option<broadcast::Sender<ApiResult<T>>> {
        self.armed = false;
        self.slot.lock().take()
    }
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            // Dropping the sender closes every waiter's receiver.
            self.slot.lock().take();
        }
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    pub async fn run<F, Fut>(&self, op: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        // The lock scope must end before any await so the returned future
        // stays `Send` (parking_lot guards are not).
        let rx = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(tx) => {
                    debug!("Joining in-flight operation");
                    Some(tx.subscribe())
                }
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *slot = Some(tx);
                    None
                }
            }
        };

        match rx {
            Some(mut rx) => match rx.recv().await {
                Ok(result) => result,
                // Leader dropped without broadcasting (task aborted, shutdown).
                Err(_) => Err(ApiError::Unknown("operation cancelled".to_string())),
            },
            None => {
                let mut guard = FlightGuard {
                    slot: &self.inflight,
                    armed: true,
                };
                let result = op().await;

                // Clear the slot before waking waiters so a caller woken
                // by the broadcast can immediately start a new flight.
                if let Some(tx) = guard.complete() {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
