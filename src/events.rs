use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Emitted after a memory has been saved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStored {
    pub memory_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives "stored" notifications from a `MemoryStore`
pub trait MemoryListener: Send + Sync {
    fn on_stored(&self, event: &MemoryStored) -> Result<(), String>;
}

impl<F> MemoryListener for F
where
    F: Fn(&MemoryStored) + Send + Sync,
{
    fn on_stored(&self, event: &MemoryStored) -> Result<(), String> {
        self(event);
        Ok(())
    }
}

/// Deliver `event` to every listener, in registration order.
///
/// Errors and panics are logged and never reach the caller.
pub fn notify(listeners: &[Arc<dyn MemoryListener>], event: &MemoryStored) {
    for listener in listeners {
        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_stored(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(memory_id = %event.memory_id, error = %e, "memory listener failed")
            }
            Err(_) => tracing::error!(memory_id = %event.memory_id, "memory listener panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Failing;

    impl MemoryListener for Failing {
        fn on_stored(&self, _event: &MemoryStored) -> Result<(), String> {
            Err("listener is broken".to_string())
        }
    }

    fn event() -> MemoryStored {
        MemoryStored {
            memory_id: "general_1".to_string(),
            content: "hello".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_failures_do_not_stop_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let listeners: Vec<Arc<dyn MemoryListener>> = vec![
            Arc::new(Failing),
            Arc::new(|_: &MemoryStored| panic!("boom")),
            Arc::new(move |e: &MemoryStored| sink.lock().unwrap().push(e.memory_id.clone())),
        ];

        notify(&listeners, &event());
        assert_eq!(*seen.lock().unwrap(), vec!["general_1".to_string()]);
    }
}
