//! eletech Modbus bridge.
//!
//! Polls Modbus things and publishes their channel values and device
//! status to Zenoh.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use eletech_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use eletech_modbus::config::ModbusBridgeConfig;
use eletech_modbus::endpoint::ModbusEndpoint;
use eletech_modbus::publish::StatePublisher;
use eletech_modbus::ThingHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("eletech-modbus.json5");

    let config = ModbusBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("modbus", config, Some(&args))
        .await
        .context("Failed to start bridge")?
        .with_status_publishing();

    info!("Loaded configuration from {:?}", args.config);

    let modbus = runner.config().modbus.clone();
    let state_publisher = StatePublisher::new(runner.publisher());

    let mut endpoints = HashMap::new();
    for endpoint_config in &modbus.endpoints {
        let endpoint = Arc::new(ModbusEndpoint::new(endpoint_config.clone()));
        endpoint.open()?;
        endpoints.insert(endpoint_config.name.clone(), endpoint);
    }

    let mut handlers = Vec::with_capacity(modbus.things.len());
    for thing in &modbus.things {
        let (Some(endpoint), Some(profile)) = (endpoints.get(&thing.bridge), thing.profile())
        else {
            error!(thing = %thing.name, "Skipping thing with invalid configuration");
            continue;
        };

        let handler = ThingHandler::new(
            thing.name.clone(),
            profile,
            thing.poll_settings(),
            endpoint.clone(),
            Arc::new(state_publisher.sink_for(&thing.name)),
        );

        if let Err(e) = handler.initialize() {
            error!(thing = %thing.name, error = %e, "Failed to start thing");
        }

        let follower = handler.clone();
        let online = endpoint.subscribe();
        runner.spawn(async move {
            follower.follow_bridge(online).await;
        });
        handlers.push(handler);
    }

    info!(
        "Modbus bridge running with {} endpoint(s) and {} thing(s)",
        endpoints.len(),
        handlers.len()
    );

    runner.spawn(async move {
        state_publisher.run().await;
    });

    let metadata = serde_json::json!({
        "endpoints": modbus.endpoints.iter().map(|e| &e.name).collect::<Vec<_>>(),
        "things": modbus.things.iter().map(|t| &t.name).collect::<Vec<_>>(),
    });

    runner.on_shutdown(move || {
        for handler in &handlers {
            handler.dispose();
        }
        for endpoint in endpoints.values() {
            endpoint.close();
        }
    });

    runner
        .run_with_metadata(Some(metadata))
        .await
        .context("Bridge failed")?;

    Ok(())
}
