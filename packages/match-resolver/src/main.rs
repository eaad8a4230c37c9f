use lambda_runtime::{run, service_fn, Error};

mod processor;

use processor::MatchResolverProcessor;
use shared::config::{dynamodb_client, DuelConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = DuelConfig::from_env()?;
    let client = dynamodb_client().await;
    let processor = MatchResolverProcessor::new(client, &config);

    run(service_fn(
        move |event: lambda_runtime::LambdaEvent<aws_lambda_events::event::dynamodb::Event>| {
            let processor = processor.clone();
            async move { processor.process_event(event.payload).await }
        },
    ))
    .await
}
