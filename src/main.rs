//! relaywire - adaptive messaging demo
//!
//! Wires the full stack over the in-process loopback host: batched one-way
//! sends and a request/response call, with config and logging set up the
//! way a host process would.

use relaywire_codec::Value;
use relaywire_rpc::{Config, Correlator, Responder};
use relaywire_transport::{AdaptiveTransport, Destination, LoopbackHost, PeerId, TransportError};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (from file if RELAYWIRE_CONFIG is set, then env overrides)
    let config_path = std::env::var("RELAYWIRE_CONFIG").ok();
    let loaded = Config::load();

    let default_level = match &loaded {
        Ok(c) if c.transport.debug => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match loaded {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting relaywire loopback demo");
    tracing::info!(
        "  Batching: interval={}ms, max size={}, max wait={}ms",
        config.transport.batch_interval_ms,
        config.transport.max_batch_size,
        config.transport.max_batch_wait_ms
    );
    tracing::info!(
        "  Compression threshold: {} bytes",
        config.transport.compression_threshold
    );
    tracing::info!("  Request timeout: {}ms", config.rpc.request_timeout_ms);

    let (host, mut inbox) = LoopbackHost::new();
    let host = Arc::new(host);

    let responder = Responder::new(config.transport.clone(), config.rpc.clone());
    host.register("inventory", move |peer: &PeerId, bytes| {
        responder
            .serve("inventory", Some(peer), &bytes, |request| {
                let slot = request
                    .as_table()
                    .and_then(|t| t.get_str("slot"))
                    .and_then(Value::as_int)
                    .ok_or_else(|| "missing slot".to_string())?;
                Ok(Value::map(vec![
                    ("slot", Value::Int(slot)),
                    ("item", Value::from("lantern")),
                    ("count", Value::Int(3)),
                ]))
            })
            .map_err(|e| TransportError::Send {
                channel: "inventory".to_string(),
                reason: e.to_string(),
            })
    });

    let transport = AdaptiveTransport::new(Arc::clone(&host), config.transport.clone());
    transport.start_sweeper();

    for tick in 0..5 {
        transport.enqueue(
            "state",
            Destination::Broadcast,
            Value::map(vec![("tick", Value::Int(tick))]),
        )?;
    }
    transport.send(
        "chat",
        Destination::Peer(PeerId(1)),
        Value::from("hello from relaywire"),
    )?;
    transport.flush_all();

    let correlator = Correlator::new(
        Arc::clone(&host),
        config.transport.clone(),
        config.rpc.clone(),
    );
    let reply = correlator
        .request(
            "inventory",
            PeerId(1),
            Value::map(vec![("slot", Value::Int(2))]),
        )
        .await?;
    tracing::info!("inventory reply: {}", reply);

    match correlator
        .request("inventory", PeerId(1), Value::Nil)
        .await
    {
        Ok(v) => tracing::info!("unexpected reply: {}", v),
        Err(e) => tracing::info!("request rejected ({}): {}", e.code(), e),
    }

    transport.shutdown();

    while let Ok(delivery) = inbox.try_recv() {
        let values = transport.receive(&delivery.bytes)?;
        tracing::info!(
            "received {} message(s) on '{}' for {} ({} bytes)",
            values.len(),
            delivery.channel,
            delivery.destination,
            delivery.bytes.len()
        );
    }

    let stats = transport.stats();
    tracing::info!("{}", serde_json::to_string(&stats)?);

    tracing::info!("Demo finished");
    Ok(())
}
