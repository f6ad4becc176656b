//! Event dispatch
//!
//! Walks a snapshot in order and hands each active binding to its
//! thread-mode's strategy. Direct bindings run here, on the posting thread;
//! async and custom bindings are only submitted. Subscriber failures never
//! leave this module except through the exception handler.

use crate::error::{EventError, InvocationError, Result};
use crate::executor::{Executor, WorkerPool};
use crate::handler::{ExceptionHandler, SubscriberExceptionContext};
use crate::subscriber::{panic_message, Subscriber};
use crate::types::{Event, ThreadMode};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Delivers events to bindings according to their thread-mode
pub(crate) struct Dispatcher {
    delivery: Delivery,
    pool: Arc<WorkerPool>,
}

/// What a queued task needs to invoke one binding and report its failure
#[derive(Clone)]
struct Delivery {
    bus: Arc<str>,
    handler: Arc<dyn ExceptionHandler>,
}

impl Dispatcher {
    pub(crate) fn new(
        bus: Arc<str>,
        handler: Arc<dyn ExceptionHandler>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            delivery: Delivery { bus, handler },
            pool,
        }
    }

    /// Hand `event` to every binding in `snapshot`, in order
    ///
    /// Returns once all bindings are handed off. A refused submission does
    /// not stop the remaining bindings; the first refusal is returned.
    pub(crate) fn dispatch(&self, event: &Arc<dyn Event>, snapshot: &[Arc<Subscriber>]) -> Result<()> {
        let mut refused: Option<EventError> = None;

        for subscriber in snapshot {
            if !subscriber.is_active() {
                tracing::trace!(
                    bus = %self.delivery.bus,
                    target = subscriber.name(),
                    "Skipping unregistered subscriber"
                );
                continue;
            }

            let submitted = match subscriber.thread_mode() {
                ThreadMode::Direct => {
                    self.delivery.deliver(subscriber, event.as_ref());
                    Ok(())
                }
                ThreadMode::Async => self.submit(self.pool.as_ref(), subscriber, event),
                ThreadMode::Custom => match subscriber.executor() {
                    Some(executor) => self.submit(executor.as_ref(), subscriber, event),
                    None => Err(EventError::Precondition(format!(
                        "Custom subscriber '{}' has no executor",
                        subscriber.name()
                    ))),
                },
            };

            if let Err(e) = submitted {
                tracing::warn!(
                    bus = %self.delivery.bus,
                    listener = %subscriber.listener(),
                    target = subscriber.name(),
                    error = %e,
                    "Failed to submit event to subscriber"
                );
                refused.get_or_insert(e);
            }
        }

        match refused {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn submit(
        &self,
        executor: &dyn Executor,
        subscriber: &Arc<Subscriber>,
        event: &Arc<dyn Event>,
    ) -> Result<()> {
        let delivery = self.delivery.clone();
        let subscriber = Arc::clone(subscriber);
        let event = Arc::clone(event);
        executor.execute(Box::new(move || {
            delivery.deliver(&subscriber, event.as_ref());
        }))
    }
}

impl Delivery {
    /// Invoke one binding, routing any failure to the exception handler
    fn deliver(&self, subscriber: &Subscriber, event: &dyn Event) {
        // Re-checked here: queued tasks may start after unregistration
        if !subscriber.is_active() {
            return;
        }
        if let Err(error) = subscriber.invoke(event) {
            self.handle_exception(subscriber, event, &error);
        }
    }

    fn handle_exception(&self, subscriber: &Subscriber, event: &dyn Event, error: &InvocationError) {
        let context = SubscriberExceptionContext {
            bus: &self.bus,
            event,
            listener: subscriber.listener(),
            target: subscriber.name(),
            event_type: subscriber.event_type(),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(error, &context)));
        let secondary = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => format!("handler panicked: {}", panic_message(&*payload)),
        };

        tracing::error!(
            bus = %self.bus,
            listener = %subscriber.listener(),
            target = subscriber.name(),
            "Exception {} thrown while handling exception: {}",
            secondary,
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::subscriber::{HandlerResult, SubscriberMethod};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
    }

    impl Journal {
        fn first(&self, value: &u32) -> HandlerResult {
            self.entries.lock().push(format!("first:{}", value));
            Ok(())
        }

        fn second(&self, value: &u32) -> HandlerResult {
            self.entries.lock().push(format!("second:{}", value));
            Ok(())
        }

        fn broken(&self, _value: &u32) -> HandlerResult {
            anyhow::bail!("broken subscriber")
        }
    }

    /// Counts failures; panics on request
    #[derive(Default)]
    struct CountingHandler {
        failures: Mutex<Vec<String>>,
        panic: bool,
    }

    impl ExceptionHandler for CountingHandler {
        fn handle(
            &self,
            error: &InvocationError,
            _context: &SubscriberExceptionContext<'_>,
        ) -> anyhow::Result<()> {
            self.failures.lock().push(error.target().to_string());
            if self.panic {
                panic!("handler exploded");
            }
            Ok(())
        }
    }

    fn pool() -> Arc<WorkerPool> {
        let config = PoolConfig {
            core_workers: 1,
            max_workers: 2,
            queue_capacity: 8,
            keep_alive_secs: 60,
            thread_name_prefix: "dispatch-test".to_string(),
        };
        Arc::new(WorkerPool::new(&config).unwrap())
    }

    fn dispatcher(handler: Arc<dyn ExceptionHandler>) -> Dispatcher {
        Dispatcher::new(Arc::from("test"), handler, pool())
    }

    fn bind(journal: &Arc<Journal>, method: SubscriberMethod<Journal>) -> Arc<Subscriber> {
        Arc::new(Subscriber::new(method.bind(journal), None))
    }

    #[test]
    fn test_direct_runs_in_snapshot_order() {
        let journal = Arc::new(Journal::default());
        let snapshot = vec![
            bind(&journal, SubscriberMethod::new("first", Journal::first)),
            bind(&journal, SubscriberMethod::new("second", Journal::second)),
        ];
        let event: Arc<dyn Event> = Arc::new(7u32);

        dispatcher(Arc::new(CountingHandler::default()))
            .dispatch(&event, &snapshot)
            .unwrap();

        assert_eq!(*journal.entries.lock(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn test_failure_does_not_abort_remaining() {
        let journal = Arc::new(Journal::default());
        let handler = Arc::new(CountingHandler::default());
        let snapshot = vec![
            bind(&journal, SubscriberMethod::new("broken", Journal::broken)),
            bind(&journal, SubscriberMethod::new("second", Journal::second)),
        ];
        let event: Arc<dyn Event> = Arc::new(1u32);

        dispatcher(handler.clone()).dispatch(&event, &snapshot).unwrap();

        assert_eq!(*journal.entries.lock(), vec!["second:1"]);
        assert_eq!(*handler.failures.lock(), vec!["broken"]);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let journal = Arc::new(Journal::default());
        let handler = Arc::new(CountingHandler {
            panic: true,
            ..Default::default()
        });
        let snapshot = vec![
            bind(&journal, SubscriberMethod::new("broken", Journal::broken)),
            bind(&journal, SubscriberMethod::new("first", Journal::first)),
        ];
        let event: Arc<dyn Event> = Arc::new(2u32);

        dispatcher(handler.clone()).dispatch(&event, &snapshot).unwrap();

        assert_eq!(*journal.entries.lock(), vec!["first:2"]);
        assert_eq!(handler.failures.lock().len(), 1);
    }

    #[test]
    fn test_inactive_binding_skipped() {
        let journal = Arc::new(Journal::default());
        let skipped = bind(&journal, SubscriberMethod::new("first", Journal::first));
        skipped.deactivate();
        let snapshot = vec![
            skipped,
            bind(&journal, SubscriberMethod::new("second", Journal::second)),
        ];
        let event: Arc<dyn Event> = Arc::new(3u32);

        dispatcher(Arc::new(CountingHandler::default()))
            .dispatch(&event, &snapshot)
            .unwrap();

        assert_eq!(*journal.entries.lock(), vec!["second:3"]);
    }

    #[test]
    fn test_async_runs_on_pool() {
        struct Reporter {
            tx: Mutex<mpsc::Sender<Option<String>>>,
        }
        impl Reporter {
            fn report(&self, _value: &u32) -> HandlerResult {
                let name = std::thread::current().name().map(str::to_string);
                self.tx.lock().send(name)?;
                Ok(())
            }
        }

        let (tx, rx) = mpsc::channel();
        let reporter = Arc::new(Reporter { tx: Mutex::new(tx) });
        let binding = Arc::new(Subscriber::new(
            SubscriberMethod::new("report", Reporter::report)
                .thread_mode(ThreadMode::Async)
                .bind(&reporter),
            None,
        ));
        let event: Arc<dyn Event> = Arc::new(4u32);

        dispatcher(Arc::new(CountingHandler::default()))
            .dispatch(&event, &[binding])
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("dispatch-test-pool-"));
    }

    #[test]
    fn test_async_after_shutdown_is_refused_but_direct_still_runs() {
        let journal = Arc::new(Journal::default());
        let snapshot = vec![
            bind(
                &journal,
                SubscriberMethod::new("first", Journal::first).thread_mode(ThreadMode::Async),
            ),
            bind(&journal, SubscriberMethod::new("second", Journal::second)),
        ];
        let dispatcher = dispatcher(Arc::new(CountingHandler::default()));
        dispatcher.pool.shutdown();
        let event: Arc<dyn Event> = Arc::new(5u32);

        let err = dispatcher.dispatch(&event, &snapshot).unwrap_err();
        assert!(matches!(err, EventError::Rejected { .. }));
        assert_eq!(*journal.entries.lock(), vec!["second:5"]);
    }
}
