use std::time::Duration;

use rebound::mock::{
    FaultCondition, FaultInjector, OutcomeDescriptor, OutcomeMatcher, ScriptedTransport,
};
use rebound::prelude::{BackoffPolicy, Client};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matcher = OutcomeMatcher::new().strict(true);
    matcher.extend([
        OutcomeDescriptor::get("/v1/items").fail("Connection refused"),
        OutcomeDescriptor::get("/v1/items")
            .status(503)
            .header("retry-after", "1"),
        OutcomeDescriptor::get("/v1/items")
            .header("content-type", "application/json")
            .body(r#"[{"id":1},{"id":2}]"#),
    ]);
    let transport = ScriptedTransport::new(matcher.clone()).faults(FaultInjector::scripted([
        FaultCondition::latency(Duration::from_millis(80)),
    ]));

    let client = Client::builder("https://api.example.com")
        .client_name("rebound-example-scripted-retry")
        .backoff_policy(
            BackoffPolicy::standard()
                .max_attempts(4)
                .initial_delay(Duration::from_millis(100))
                .jitter(false),
        )
        .transport(transport)
        .try_build()?;

    let response = client.get("/v1/items")?.await.ok_or("cancelled")??;
    println!(
        "status={} body={} outcomes_left={}",
        response.status(),
        response.text_lossy(),
        matcher.len()
    );

    match client.get("/v1/items")?.await.ok_or("cancelled")? {
        Ok(response) => println!("unexpected success: status={}", response.status()),
        Err(error) => println!("pool exhausted: code={} {error}", error.code().as_str()),
    }

    Ok(())
}
