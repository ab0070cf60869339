use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

/// Shared handle to an in-flight operation
pub type Flight<V> = Shared<LocalBoxFuture<'static, V>>;

/// At most one outstanding operation per key. Callers arriving while an
/// operation is pending get the same operation; the entry is dropped as
/// soon as it settles, whatever the outcome, so nothing is negatively cached.
pub struct SingleFlight<K, V: Clone> {
    pending: Rc<RefCell<HashMap<K, Flight<V>>>>,
}

impl<K, V: Clone> Default for SingleFlight<K, V> {
    fn default() -> Self {
        SingleFlight {
            pending: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    /// Join the pending operation for `key`, or start one with `factory`
    pub fn run<F, Fut>(&self, key: K, factory: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + 'static,
    {
        let existing = self.pending.borrow().get(&key).cloned();
        if let Some(flight) = existing {
            return flight;
        }

        let pending = Rc::clone(&self.pending);
        let settle_key = key.clone();
        let operation = factory();
        let flight = async move {
            let out = operation.await;
            pending.borrow_mut().remove(&settle_key);
            out
        }
        .boxed_local()
        .shared();

        self.pending.borrow_mut().insert(key, flight.clone());
        flight
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.borrow().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::yield_now;
    use futures::executor::block_on;
    use futures::future::join;
    use std::cell::Cell;

    #[test]
    fn test_concurrent_callers_share_one_run() {
        let flights: SingleFlight<String, u32> = SingleFlight::default();
        let runs = Rc::new(Cell::new(0));

        let start = |runs: Rc<Cell<u32>>| {
            flights.run("k".to_string(), move || async move {
                runs.set(runs.get() + 1);
                yield_now().await;
                7
            })
        };
        let a = start(Rc::clone(&runs));
        let b = start(Rc::clone(&runs));
        assert!(flights.is_pending(&"k".to_string()));

        let (x, y) = block_on(join(a, b));
        assert_eq!((x, y), (7, 7));
        assert_eq!(runs.get(), 1);
        assert!(!flights.is_pending(&"k".to_string()));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let flights: SingleFlight<&'static str, Result<u32, String>> = SingleFlight::default();
        let first = block_on(flights.run("k", || async { Err("boom".to_string()) }));
        assert!(first.is_err());
        let second = block_on(flights.run("k", || async { Ok(1) }));
        assert_eq!(second, Ok(1));
    }
}
