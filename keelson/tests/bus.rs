//! Integration tests for the event delivery pipeline.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::executor::block_on;
use pretty_assertions::assert_eq;

use keelson::{
    AggregateCatalogue, AggregateId, Error, Event, EventType, Result, StreamTimestamp, Tuple,
    VersionedName, async_trait,
    bus::{
        BatchSink, BatchSinkExt, ConcurrencyLimit, EventBatch, EventBus, EventLog, EventLogExt,
        EventPublisher, EventPublisherExt, LogAndPublish, LoggingBatchSink, LoggingEventLog,
        LoggingEventPublisher, PublishFailurePolicy, RetryingPublisher, StoreEventLog,
    },
    store::in_memory::InMemoryEventStore,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn event(aggregate_id: &AggregateId, name: &str) -> Event {
    EventType::new(aggregate_id.aggregate_type(), VersionedName::new(name, "0"))
        .make_event(
            aggregate_id.instance_id(),
            StreamTimestamp::now("test"),
            Tuple::empty(),
        )
        .expect("event")
}

fn names(events: &[Event]) -> String {
    events
        .iter()
        .map(|e| e.name().name().to_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Records every write into a shared journal.
struct SpyLog {
    journal: Journal,
    fail: bool,
}

#[async_trait]
impl EventLog for SpyLog {
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        if self.fail {
            return Err(Error::Store("disk full".into()));
        }
        self.journal
            .lock()
            .unwrap()
            .push(format!("log:{}", names(batch.events())));
        Ok(())
    }
}

/// Records every publish into a shared journal.
struct SpyPublisher {
    journal: Journal,
    tag: &'static str,
    fail: bool,
}

#[async_trait]
impl EventPublisher for SpyPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.tag, event.name().name()));
        if self.fail {
            return Err(Error::Publish(format!("{} unavailable", self.tag)));
        }
        Ok(())
    }
}

fn spy_bus(journal: &Journal, log_fails: bool, publish_fails: bool) -> LogAndPublish {
    LogAndPublish::new(SpyLog {
        journal: journal.clone(),
        fail: log_fails,
    })
    .and_publish(SpyPublisher {
        journal: journal.clone(),
        tag: "first",
        fail: publish_fails,
    })
    .and_publish(SpyPublisher {
        journal: journal.clone(),
        tag: "second",
        fail: false,
    })
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[test]
fn batch_is_logged_whole_before_any_publish() {
    let journal = Journal::default();
    let bus = EventBus::new(spy_bus(&journal, false, false).filter(LoggingBatchSink::new));
    let id = AggregateId::random("widget").expect("id");

    block_on(bus.dispatch(|batch| {
        batch.accept(event(&id, "e1"));
        batch.accept(event(&id, "e2"));
    }))
    .expect("delivered");

    assert_eq!(
        entries(&journal),
        vec!["log:e1,e2", "first:e1", "second:e1", "first:e2", "second:e2"]
    );
}

#[test]
fn single_event_matches_one_event_batch() {
    let id = AggregateId::random("widget").expect("id");
    let e = event(&id, "e1");

    let single = Journal::default();
    block_on(EventBus::new(spy_bus(&single, false, false)).accept(e.clone())).expect("single");

    let batched = Journal::default();
    block_on(EventBus::new(spy_bus(&batched, false, false)).deliver([e].into_iter().collect()))
        .expect("batch");

    assert_eq!(entries(&single), entries(&batched));
}

#[test]
fn failed_log_write_publishes_nothing() {
    let journal = Journal::default();
    let bus = EventBus::new(spy_bus(&journal, true, false));
    let id = AggregateId::random("widget").expect("id");

    let err = block_on(bus.accept(event(&id, "e1"))).expect_err("log fails");
    assert!(matches!(err, Error::Store(_)));
    assert!(entries(&journal).is_empty());
}

#[test]
fn publish_failure_is_reported_after_logging() {
    let journal = Journal::default();
    let bus = EventBus::new(spy_bus(&journal, false, true));
    let id = AggregateId::random("widget").expect("id");

    let err = block_on(bus.dispatch(|batch| {
        batch.accept(event(&id, "e1"));
        batch.accept(event(&id, "e2"));
    }))
    .expect_err("publish fails");

    assert!(matches!(err, Error::Publish(_)));
    assert_eq!(entries(&journal), vec!["log:e1,e2", "first:e1"]);
}

#[test]
fn continue_policy_keeps_publishing() {
    let journal = Journal::default();
    let bus = EventBus::new(
        spy_bus(&journal, false, true).with_failure_policy(PublishFailurePolicy::Continue),
    );
    let id = AggregateId::random("widget").expect("id");

    block_on(bus.dispatch(|batch| {
        batch.accept(event(&id, "e1"));
        batch.accept(event(&id, "e2"));
    }))
    .expect("failures are tolerated");

    assert_eq!(
        entries(&journal),
        vec!["log:e1,e2", "first:e1", "second:e1", "first:e2", "second:e2"]
    );
}

#[test]
fn empty_batch_is_not_delivered() {
    let journal = Journal::default();
    let bus = EventBus::new(spy_bus(&journal, true, true));

    block_on(bus.dispatch(|_| {})).expect("nothing to deliver");
    block_on(bus.deliver(EventBatch::new())).expect("nothing to deliver");
    assert!(entries(&journal).is_empty());
}

/// Tags each write on its way through.
struct Tagging<L> {
    inner: L,
    tag: &'static str,
    journal: Journal,
}

#[async_trait]
impl<L: EventLog> EventLog for Tagging<L> {
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        self.journal.lock().unwrap().push(self.tag.to_owned());
        self.inner.write(batch).await
    }
}

#[test]
fn later_filters_run_outermost() {
    let journal = Journal::default();
    let log = SpyLog {
        journal: journal.clone(),
        fail: false,
    }
    .filter(|l| Tagging {
        inner: l,
        tag: "inner",
        journal: journal.clone(),
    })
    .filter(|l| Tagging {
        inner: l,
        tag: "outer",
        journal: journal.clone(),
    })
    .filter(LoggingEventLog::new);
    let id = AggregateId::random("widget").expect("id");

    block_on(log.write(&[event(&id, "e1")].into_iter().collect::<EventBatch>())).expect("written");
    assert_eq!(entries(&journal), vec!["outer", "inner", "log:e1"]);
}

#[test]
fn store_log_observes_unreserved_aggregates() {
    let store = Arc::new(InMemoryEventStore::default());
    let catalogue = Arc::new(AggregateCatalogue::new());
    let bus = EventBus::new(StoreEventLog::new(store.clone(), catalogue.clone()).and_publish(
        LoggingEventPublisher::new(SpyPublisher {
            journal: Journal::default(),
            tag: "sub",
            fail: false,
        }),
    ));
    let widget = AggregateId::random("widget").expect("id");
    let gadget = AggregateId::random("gadget").expect("id");

    block_on(bus.dispatch(|batch| {
        batch.accept(event(&widget, "created"));
        batch.accept(event(&gadget, "created"));
        batch.accept(event(&widget, "renamed"));
    }))
    .expect("delivered");

    assert_eq!(store.version(&widget), 2);
    assert_eq!(store.version(&gadget), 1);
    assert_eq!(catalogue.current_version(&widget), 2);
    assert_eq!(catalogue.current_version(&gadget), 1);
    assert_eq!(catalogue.aggregate_ids("widget"), vec![widget.instance_id()]);
    assert_eq!(names(&store.events(&widget)), "created,renamed");
}

#[test]
fn store_log_appends_at_the_reserved_version() {
    let store = Arc::new(InMemoryEventStore::default());
    let catalogue = Arc::new(AggregateCatalogue::new());
    let log = StoreEventLog::new(store.clone(), catalogue.clone());
    let id = AggregateId::random("widget").expect("id");

    // Reserved against version 1, but the stream is empty.
    let batch: EventBatch = [event(&id, "renamed")].into_iter().collect();
    catalogue.observe(&id, 1);
    catalogue.reserve(&id, 1, batch.id()).expect("reserve");

    let err = block_on(log.write(&batch)).expect_err("stale");
    assert!(matches!(err, Error::StoreConflict { .. }));
    assert_eq!(store.version(&id), 0);
}

#[test]
fn store_log_commits_the_batch_reservation_with_the_store_version() {
    let store = Arc::new(InMemoryEventStore::default());
    let catalogue = Arc::new(AggregateCatalogue::new());
    let log = StoreEventLog::new(store.clone(), catalogue.clone());
    let id = AggregateId::random("widget").expect("id");

    let batch: EventBatch = [event(&id, "created"), event(&id, "renamed")]
        .into_iter()
        .collect();
    catalogue.reserve(&id, 0, batch.id()).expect("reserve");

    block_on(log.write(&batch)).expect("written");
    assert_eq!(store.version(&id), 2);
    assert_eq!(catalogue.current_version(&id), 2);
    assert_eq!(catalogue.reservation(&id), None);
}

#[test]
fn batches_cannot_write_through_a_reservation_they_do_not_own() {
    let store = Arc::new(InMemoryEventStore::default());
    let catalogue = Arc::new(AggregateCatalogue::new());
    let bus = EventBus::new(LogAndPublish::new(StoreEventLog::new(
        store.clone(),
        catalogue.clone(),
    )));
    let reserved = AggregateId::random("widget").expect("id");
    let free = AggregateId::random("widget").expect("id");

    catalogue.check_and_reserve(&reserved, 0).expect("another writer");
    let err = block_on(bus.dispatch(|batch| {
        batch.accept(event(&free, "created"));
        batch.accept(event(&reserved, "created"));
    }))
    .expect_err("reserved elsewhere");
    assert!(matches!(err, Error::Conflict { .. }));
    assert!(err.is_retryable());
    assert_eq!(store.version(&free), 0);
    assert_eq!(store.version(&reserved), 0);

    // Once the holder gives up the aggregate is writable again, and the
    // catalogue follows the store.
    catalogue.rollback(&reserved).expect("holder rolls back");
    block_on(bus.accept(event(&reserved, "created"))).expect("written");
    assert_eq!(store.version(&reserved), 1);
    assert_eq!(catalogue.current_version(&reserved), store.version(&reserved));
}

/// Records the events that pass through a log or publisher.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventLog for Recorder {
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        self.events.lock().unwrap().extend_from_slice(batch.events());
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for Recorder {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Records what reaches it, then forwards to `inner`.
struct Tap<T> {
    inner: T,
    seen: Recorder,
}

#[async_trait]
impl<L: EventLog> EventLog for Tap<L> {
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        EventLog::write(&self.seen, batch).await?;
        self.inner.write(batch).await
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for Tap<P> {
    async fn publish(&self, event: &Event) -> Result<()> {
        EventPublisher::publish(&self.seen, event).await?;
        self.inner.publish(event).await
    }
}

/// What a bus wired with logging filters saw, before and after the filters.
#[derive(Default)]
struct Recordings {
    logged: Recorder,
    published: Recorder,
    logged_before_filter: Recorder,
    published_before_filter: Recorder,
}

fn recording_bus(r: &Recordings) -> EventBus {
    // `Recorder` is both a log and a publisher, so name the capability.
    let log = EventLogExt::filter(r.logged.clone(), LoggingEventLog::new).filter(|l| Tap {
        inner: l,
        seen: r.logged_before_filter.clone(),
    });
    let publisher = EventPublisherExt::filter(r.published.clone(), LoggingEventPublisher::new)
        .filter(|p| Tap {
            inner: p,
            seen: r.published_before_filter.clone(),
        });
    EventBus::new(log.and_publish(publisher).filter(LoggingBatchSink::new))
}

#[test]
fn events_reach_log_and_publisher_the_same_singly_or_batched() {
    let e1 = event(&AggregateId::random("widget").expect("id"), "created");
    let e2 = event(&AggregateId::random("widget").expect("id"), "created");

    let singly = Recordings::default();
    let bus = recording_bus(&singly);
    block_on(bus.accept(e1.clone())).expect("e1");
    block_on(bus.accept(e2.clone())).expect("e2");

    let batched = Recordings::default();
    block_on(recording_bus(&batched).dispatch(|batch| {
        batch.accept(e1.clone());
        batch.accept(e2.clone());
    }))
    .expect("batch");

    let expected = vec![e1, e2];
    for r in [&singly, &batched] {
        assert_eq!(r.logged.events(), expected);
        assert_eq!(r.published.events(), expected);
        assert_eq!(r.logged_before_filter.events(), r.logged.events());
        assert_eq!(r.published_before_filter.events(), r.published.events());
    }
}

/// Panics on every publish.
struct Panicking;

#[async_trait]
impl EventPublisher for Panicking {
    async fn publish(&self, _event: &Event) -> Result<()> {
        panic!("subscriber bug");
    }
}

#[test]
fn panicking_publisher_is_reported_as_a_publish_failure() {
    let store = Arc::new(InMemoryEventStore::default());
    let catalogue = Arc::new(AggregateCatalogue::new());
    let bus = EventBus::new(StoreEventLog::new(store.clone(), catalogue.clone()).and_publish(Panicking));
    let id = AggregateId::random("widget").expect("id");

    let err = block_on(bus.accept(event(&id, "created"))).expect_err("publisher panicked");
    assert!(matches!(err, Error::Publish(_)));
    assert_eq!(store.version(&id), 1);
    assert_eq!(catalogue.current_version(&id), 1);
}

/// Fails a fixed number of times before succeeding.
struct Flaky {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl EventPublisher for Flaky {
    async fn publish(&self, _event: &Event) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(Error::Publish("transient".into()));
        }
        Ok(())
    }
}

#[test]
fn retrying_publisher_retries_until_success() {
    let flaky = Arc::new(Flaky {
        failures_left: AtomicUsize::new(2),
        calls: AtomicUsize::new(0),
    });
    let publisher = flaky
        .clone()
        .filter(|p| RetryingPublisher::new(p, 3, Duration::ZERO));
    let id = AggregateId::random("widget").expect("id");

    block_on(publisher.publish(&event(&id, "e1"))).expect("third attempt succeeds");
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn retrying_publisher_gives_up() {
    let flaky = Arc::new(Flaky {
        failures_left: AtomicUsize::new(5),
        calls: AtomicUsize::new(0),
    });
    let publisher = RetryingPublisher::new(flaky.clone(), 2, Duration::ZERO);
    let id = AggregateId::random("widget").expect("id");

    assert!(block_on(publisher.publish(&event(&id, "e1"))).is_err());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
}

/// Tracks how many deliveries run at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl BatchSink for Gauge {
    async fn deliver(&self, _batch: &EventBatch) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_bounds_deliveries() {
    let gauge = Arc::new(Gauge::default());
    let bus = EventBus::new(gauge.clone().filter(|s| ConcurrencyLimit::new(s, 2)));
    let id = AggregateId::random("widget").expect("id");

    let deliveries = (0..8).map(|i| {
        let bus = bus.clone();
        let e = event(&id, &format!("e{i}"));
        tokio::spawn(async move { bus.accept(e).await })
    });
    for handle in futures::future::join_all(deliveries).await {
        handle.expect("task").expect("delivered");
    }

    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}
