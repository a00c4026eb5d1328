//! NATS connection and JetStream stream declaration.
//!
//! Transactions live in a file-backed stream with work-queue retention:
//! messages survive a broker restart and are removed once acknowledged.

use crate::config::NatsConfig;
use anyhow::{Context as _, Result};
use async_nats::jetstream::{self, stream, Context};
use async_nats::{Client, ConnectOptions, Event};
use tracing::{debug, info, warn};

/// Connect to NATS.
///
/// The client keeps retrying in the background when the server is not
/// reachable yet, and reconnects on its own after a connection loss.
pub async fn connect(config: &NatsConfig, client_name: &str) -> Result<Client> {
    let client = ConnectOptions::new()
        .name(client_name)
        .retry_on_initial_connect()
        .event_callback(|event| async move {
            match event {
                Event::Connected => info!("Connected to NATS"),
                Event::Disconnected => warn!("Disconnected from NATS, reconnecting"),
                other => debug!(event = %other, "NATS client event"),
            }
        })
        .connect(&config.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;

    Ok(client)
}

/// Stream definition for the transaction queue
pub fn stream_config(config: &NatsConfig) -> stream::Config {
    stream::Config {
        name: config.stream.clone(),
        subjects: vec![config.subject.clone()],
        retention: stream::RetentionPolicy::WorkQueue,
        storage: stream::StorageType::File,
        ..Default::default()
    }
}

/// Declare the durable transaction stream.
///
/// Idempotent: an existing stream with the same name is returned as is.
pub async fn declare_stream(js: &Context, config: &NatsConfig) -> Result<stream::Stream> {
    let stream = js
        .get_or_create_stream(stream_config(config))
        .await
        .with_context(|| format!("Failed to declare stream {}", config.stream))?;
    debug!(stream = %config.stream, subject = %config.subject, "Stream declared");
    Ok(stream)
}

/// Passive declare: succeeds only if the stream already exists
pub async fn check_stream(js: &Context, config: &NatsConfig) -> Result<()> {
    js.get_stream(&config.stream)
        .await
        .with_context(|| format!("Stream {} is not available", config.stream))?;
    Ok(())
}

/// Number of messages currently waiting in the stream
pub async fn queue_depth(js: &Context, config: &NatsConfig) -> Result<u64> {
    let mut stream = js
        .get_stream(&config.stream)
        .await
        .with_context(|| format!("Stream {} is not available", config.stream))?;
    let info = stream.info().await.context("Failed to read stream info")?;
    Ok(info.state.messages)
}

/// JetStream context for a connected client
pub fn jetstream(client: Client) -> Context {
    jetstream::new(client)
}
