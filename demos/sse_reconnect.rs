use std::time::Duration;

use rebound::mock::{OutcomeDescriptor, OutcomeMatcher, ScriptedTransport};
use rebound::prelude::{BackoffPolicy, Client, EventRecord, Request};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matcher = OutcomeMatcher::new();
    matcher.extend([
        OutcomeDescriptor::get("/v1/events")
            .events([
                EventRecord::message("first").with_id("1").with_retry_ms(250),
                EventRecord::message("second").with_id("2"),
            ])
            .fail("Connection reset by peer"),
        OutcomeDescriptor::get("/v1/events")
            .match_header("last-event-id", "2")
            .events([EventRecord::message("third")
                .with_id("3")
                .with_event_type("update")]),
    ]);

    let client = Client::builder("https://api.example.com")
        .client_name("rebound-example-sse-reconnect")
        .backoff_policy(BackoffPolicy::standard().max_attempts(3))
        .transport(ScriptedTransport::new(matcher))
        .try_build()?;

    let stream = client
        .stream(Request::get("/v1/events"))?
        .on_event(|event| {
            println!(
                "event id={} type={} data={}",
                event.id.as_deref().unwrap_or("-"),
                event.event_type(),
                event.data()
            );
        })
        .on_reconnect(|retry, delay, error| {
            println!("reconnect #{retry} in {delay:?}: {error}");
        })
        .spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("last_event_id={:?}", stream.last_event_id());
    stream.close();

    let summary = stream.await.ok_or("cancelled")??;
    println!(
        "closed after {} attempt(s), {} event(s)",
        summary.attempts, summary.events_delivered
    );

    Ok(())
}
