//! Station node binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `NODE_WIFI_SSID=lab NODE_PROTOCOL=tcp cargo run --bin node`
//! - **ESP32**: `NODE_WIFI_SSID=lab NODE_WIFI_PSK=... cargo espflash flash --bin node --features esp32 --release`
//!
//! On the device the settings are baked in at build time; on the host they
//! are read from the environment when the process starts.
//!
//! ## Status pixel
//!
//! - red: link down (or the data-plane server faulted)
//! - yellow: link up, address settling
//! - green: data-plane server listening

use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use wifi_sta_node::{Node, NodeConfig, StatusIndicator};

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn run(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use wifi_sta_node::indicator::Ws2812Led;
    use wifi_sta_node::link::EspLink;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // On-board pixel of the ESP32-S3 DevKitC
    let led = Ws2812Led::new(peripherals.rmt.channel0, peripherals.pins.gpio48)?;
    let indicator = Arc::new(StatusIndicator::new(led));
    let link = Arc::new(EspLink::new(peripherals.modem, sysloop, Some(nvs))?);

    let node = Node::new(config, link, indicator)?;
    node.run()?;
    Ok(())
}

#[cfg(not(feature = "esp32"))]
fn run(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    use wifi_sta_node::indicator::LogLed;
    use wifi_sta_node::link::HostLink;

    let indicator = Arc::new(StatusIndicator::new(LogLed::new()));
    let link = Arc::new(HostLink::new());

    let node = Node::new(config, link, indicator)?;
    node.run()?;
    Ok(())
}

fn main() -> ExitCode {
    platform_init();

    info!("=== Station node starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "SSID: {}, protocol: {}, port: {}",
        config.credentials.ssid(),
        config.protocol,
        config.port
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Node stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
