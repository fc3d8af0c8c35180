use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::attempt::AttemptContext;
use crate::backoff::BackoffPolicy;
use crate::client::{Client, Request};
use crate::error::{Error, ErrorCode, Failure};
use crate::mock::{
    FaultCondition, FaultInjector, OutcomeDescriptor, OutcomeMatcher, ScriptedTransport,
    provider_fn,
};
use crate::observe::Observer;
use crate::sse::{EventRecord, StreamConfig};
use crate::util::{join_base_path, resolve_uri};

#[derive(Default)]
struct CountingObserver {
    starts: AtomicUsize,
    retries: AtomicUsize,
}

impl Observer for CountingObserver {
    fn on_attempt_start(&self, _context: &AttemptContext) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retry_scheduled(&self, _context: &AttemptContext, _failure: &Failure, _delay: Duration) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}

fn policy(max_attempts: usize) -> BackoffPolicy {
    BackoffPolicy::standard()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(30))
        .jitter(false)
}

fn scripted_client(
    transport: ScriptedTransport,
    max_attempts: usize,
    observer: Arc<CountingObserver>,
) -> Client {
    Client::builder("https://api.example.com")
        .backoff_policy(policy(max_attempts))
        .request_timeout(Duration::from_secs(60))
        .transport(transport)
        .observer(observer)
        .try_build()
        .expect("scripted client should build")
}

#[test]
fn join_base_path_handles_slashes() {
    assert_eq!(
        join_base_path("https://api.example.com/v1/", "/users"),
        "https://api.example.com/v1/users"
    );
}

#[test]
fn resolve_uri_keeps_absolute_uri_with_uppercase_scheme() {
    let (uri_text, uri) = resolve_uri("https://api.example.com/v1", "HTTPS://x.test/a")
        .expect("absolute uri with uppercase scheme should parse");
    assert_eq!(uri_text, "HTTPS://x.test/a");
    assert_eq!(uri.host().expect("host should be present"), "x.test");
}

#[test]
fn resolve_uri_rejects_non_http_absolute_uri() {
    let error = resolve_uri("https://api.example.com/v1", "ftp://x.test/a")
        .expect_err("non-http absolute uri should be rejected");
    assert_eq!(error.code(), ErrorCode::InvalidUri);
}

#[tokio::test(start_paused = true)]
async fn scripted_failures_are_consumed_in_order_until_success() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.extend([
        OutcomeDescriptor::get("/v1/items").fail("Connection refused"),
        OutcomeDescriptor::get("/v1/items").fail("Connection refused"),
        OutcomeDescriptor::get("/v1/items").body("third time lucky"),
    ]);
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(
        ScriptedTransport::new(matcher.clone()),
        3,
        Arc::clone(&observer),
    );

    let response = client
        .get("/v1/items")
        .expect("handle")
        .await
        .expect("settled")
        .expect("third attempt resolves");
    assert_eq!(response.text_lossy(), "third time lucky");
    assert_eq!(observer.retries.load(Ordering::SeqCst), 2);
    assert_eq!(observer.starts.load(Ordering::SeqCst), 3);
    assert!(matcher.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reusable_failure_exhausts_every_attempt_and_stays_in_pool() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.push(
        OutcomeDescriptor::get("/v1/items")
            .fail("Connection reset by peer")
            .reusable(true),
    );
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(
        ScriptedTransport::new(matcher.clone()),
        5,
        Arc::clone(&observer),
    );

    let error = client
        .get("/v1/items")
        .expect("handle")
        .await
        .expect("settled")
        .expect_err("every attempt fails");
    assert!(matches!(error, Error::Exhausted { attempts: 5, .. }));
    assert!(error.to_string().contains("5 attempt(s)"));
    assert!(error.to_string().contains("Connection reset by peer"));
    assert_eq!(observer.starts.load(Ordering::SeqCst), 5);
    assert_eq!(matcher.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn running_out_of_scripted_outcomes_reports_attempts_made() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.extend([
        OutcomeDescriptor::get("/v1/items").fail("Connection reset by peer"),
        OutcomeDescriptor::get("/v1/items").fail("Connection reset by peer"),
    ]);
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(
        ScriptedTransport::new(matcher.clone()),
        5,
        Arc::clone(&observer),
    );

    let error = client
        .get("/v1/items")
        .expect("handle")
        .await
        .expect("settled")
        .expect_err("third attempt finds an empty pool");
    assert!(matches!(error, Error::NoMatchingOutcome { attempts: 3, .. }));
    assert_eq!(error.attempts(), Some(3));
    assert!(error.to_string().contains("3 attempt(s)"));
    assert_eq!(observer.starts.load(Ordering::SeqCst), 3);
    assert!(matcher.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_never_settles() {
    let matcher = OutcomeMatcher::new();
    matcher.push(
        OutcomeDescriptor::get("/v1/items")
            .delay(Duration::from_secs(2))
            .body("late"),
    );
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(
        ScriptedTransport::new(matcher.clone()),
        3,
        Arc::clone(&observer),
    );

    let handle = client.get("/v1/items").expect("handle");
    handle.cancel();
    handle.cancel();
    let settled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&settled);
    tokio::spawn(async move {
        if handle.await.is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::advance(Duration::from_secs(3600)).await;
    tokio::task::yield_now().await;
    assert_eq!(settled.load(Ordering::SeqCst), 0);
    assert_eq!(observer.retries.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_stream_delivers_nothing() {
    let matcher = OutcomeMatcher::new();
    matcher.push(OutcomeDescriptor::get("/events").stream(StreamConfig::fixed(
        (0..5).map(|index| EventRecord::message(format!("tick {index}"))),
        Duration::from_secs(1),
    )));
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher), 3, observer);

    let delivered = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let event_counter = Arc::clone(&delivered);
    let error_counter = Arc::clone(&errors);
    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_event(move |_record| {
            event_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |_message| {
            error_counter.fetch_add(1, Ordering::SeqCst);
        })
        .spawn();
    handle.cancel();

    tokio::time::advance(Duration::from_secs(3600)).await;
    tokio::task::yield_now().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(handle.await.is_none());
}

#[tokio::test(start_paused = true)]
async fn server_retry_interval_applies_to_exactly_one_reconnect() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.extend([
        OutcomeDescriptor::get("/events")
            .events([EventRecord::message("a").with_id("1").with_retry_ms(5000)])
            .fail("Connection reset by peer"),
        OutcomeDescriptor::get("/events").fail("Connection refused"),
        OutcomeDescriptor::get("/events").events([EventRecord::message("b").with_id("2")]),
    ]);
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher), 3, observer);

    let reconnects = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&reconnects);
    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_reconnect(move |retry, delay, message| {
            record
                .lock()
                .expect("reconnect log")
                .push((retry, delay, message.to_owned()));
        })
        .spawn();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        *reconnects.lock().expect("reconnect log"),
        vec![
            (1, Duration::from_secs(5), "Connection reset by peer".to_owned()),
            (2, Duration::from_secs(2), "Connection refused".to_owned()),
        ]
    );

    handle.close();
    let summary = handle.await.expect("settled").expect("closed normally");
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.events_delivered, 2);
    assert_eq!(summary.last_event_id.as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn last_event_id_reaches_the_next_attempts_provider() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let provider = provider_fn(move |attempt, last_event_id| {
        record
            .lock()
            .expect("provider log")
            .push((attempt, last_event_id.map(ToOwned::to_owned)));
        Ok(match attempt {
            1 => OutcomeDescriptor::any()
                .events([
                    EventRecord::message("first").with_id("41"),
                    EventRecord::message("second").with_id("42"),
                ])
                .fail("Connection reset by peer"),
            _ => OutcomeDescriptor::any().events([EventRecord::message("resumed")]),
        })
    });
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(provider), 3, observer);

    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .spawn();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        *seen.lock().expect("provider log"),
        vec![(1, None), (2, Some("42".to_owned()))]
    );
    assert_eq!(handle.last_event_id().as_deref(), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn last_event_id_header_is_sent_on_reconnect() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.extend([
        OutcomeDescriptor::get("/events")
            .match_header("last-event-id", "7")
            .events([EventRecord::message("after 7")]),
        OutcomeDescriptor::get("/events")
            .events([EventRecord::message("hello").with_id("7")])
            .fail("Connection reset by peer"),
    ]);
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher.clone()), 3, observer);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let _handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_event(move |record| {
            sink.lock()
                .expect("event log")
                .push(record.data().to_owned())
        })
        .spawn();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        *delivered.lock().expect("event log"),
        vec!["hello".to_owned(), "after 7".to_owned()]
    );
    assert!(matcher.is_empty());
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_restores_the_retry_budget() {
    let matcher = OutcomeMatcher::new().strict(true);
    for index in 0..4 {
        matcher.push(
            OutcomeDescriptor::get("/events")
                .events([EventRecord::message(format!("batch {index}"))])
                .fail("Connection reset by peer"),
        );
    }
    matcher.push(OutcomeDescriptor::get("/events").events([EventRecord::message("steady")]));
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher.clone()), 2, observer);

    let retries = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&retries);
    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_reconnect(move |retry, _delay, _message| {
            record.lock().expect("retry log").push(retry);
        })
        .spawn();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(*retries.lock().expect("retry log"), vec![1, 1, 1, 1]);
    assert!(matcher.is_empty());
    handle.close();
    let summary = handle.await.expect("settled").expect("closed");
    assert_eq!(summary.attempts, 5);
    assert_eq!(summary.events_delivered, 5);
}

#[tokio::test(start_paused = true)]
async fn fixed_stream_failure_fires_after_last_tick() {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.push(
        OutcomeDescriptor::get("/events")
            .stream(StreamConfig::fixed(
                [EventRecord::message("one"), EventRecord::message("two")],
                Duration::from_millis(500),
            ))
            .fail_terminal("stream revoked"),
    );
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher), 3, observer);

    let events = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let event_counter = Arc::clone(&events);
    let error_log = Arc::clone(&errors);
    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_event(move |_record| {
            event_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |message| error_log.lock().expect("errors").push(message.to_owned()))
        .spawn();

    let started = tokio::time::Instant::now();
    let error = handle.await.expect("settled").expect_err("terminal");
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(error.code(), ErrorCode::Terminal);
    assert_eq!(events.load(Ordering::SeqCst), 2);
    assert_eq!(
        *errors.lock().expect("errors"),
        vec!["stream revoked".to_owned()]
    );
}

#[tokio::test(start_paused = true)]
async fn injected_disconnect_drops_a_generated_stream() {
    let matcher = OutcomeMatcher::new();
    matcher.push(
        OutcomeDescriptor::get("/events")
            .stream(
                StreamConfig::generated(Duration::from_millis(100), |index| {
                    EventRecord::message(format!("n{index}")).with_id(index.to_string())
                })
                .max_events(10),
            )
            .reusable(true),
    );
    let faults = FaultInjector::scripted([FaultCondition::none().disconnect_after(3)]);
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(
        ScriptedTransport::new(matcher).faults(faults),
        3,
        Arc::clone(&observer),
    );

    let handle = client
        .stream(Request::get("/events"))
        .expect("stream")
        .spawn();
    let summary = handle.await.expect("settled").expect("second connection completes");
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.events_delivered, 13);
    assert_eq!(summary.last_event_id.as_deref(), Some("9"));
    assert_eq!(observer.retries.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_records_update_state_without_delivery() {
    let matcher = OutcomeMatcher::new();
    matcher.push(OutcomeDescriptor::get("/events").stream(StreamConfig::fixed(
        [
            EventRecord::new().with_id("ka-1"),
            EventRecord::message("payload").with_id("2"),
            EventRecord::new().with_id("ka-3"),
        ],
        Duration::from_millis(10),
    )));
    let observer = Arc::new(CountingObserver::default());
    let client = scripted_client(ScriptedTransport::new(matcher), 3, observer);

    let data = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&data);
    let summary = client
        .stream(Request::get("/events"))
        .expect("stream")
        .on_event(move |record| sink.lock().expect("data").push(record.data().to_owned()))
        .spawn()
        .await
        .expect("settled")
        .expect("auto-closed");

    assert_eq!(*data.lock().expect("data"), vec!["payload".to_owned()]);
    assert_eq!(summary.events_delivered, 1);
    assert_eq!(summary.last_event_id.as_deref(), Some("ka-3"));
}
