//! ESP32 station link.
//!
//! Wraps the ESP-IDF WiFi driver in station mode. Connect requests go
//! straight to `esp_wifi_connect`, which only queues the attempt; the
//! outcome is delivered through the system event loop.

use super::{EventHandler, LinkDriver, LinkError, LinkEvent};
use crate::config::StationCredentials;
use crate::sync::lock;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};
use log::{debug, info};
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// ESP-IDF WiFi station.
pub struct EspLink {
    /// ESP-IDF WiFi driver.
    wifi: Mutex<EspWifi<'static>>,
    sysloop: EspSystemEventLoop,
}

impl EspLink {
    /// Create the station driver.
    ///
    /// # Arguments
    ///
    /// * `modem` - The WiFi/BT modem peripheral
    /// * `sysloop` - The ESP-IDF system event loop
    /// * `nvs` - Default NVS partition (PHY calibration data)
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, LinkError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        Ok(Self {
            wifi: Mutex::new(wifi),
            sysloop,
        })
    }

    fn client_configuration(credentials: &StationCredentials) -> Result<Configuration, LinkError> {
        let auth_method = if credentials.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        Ok(Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid()
                .try_into()
                .map_err(|_| LinkError::InvalidSsid)?,
            password: credentials
                .psk()
                .try_into()
                .map_err(|_| LinkError::InvalidPsk)?,
            auth_method,
            ..Default::default()
        }))
    }
}

impl LinkDriver for EspLink {
    type Subscription = EspSubscription<'static, System>;

    fn subscribe(&self, handler: EventHandler) -> Result<Self::Subscription, LinkError> {
        let subscription = self
            .sysloop
            .subscribe::<WifiEvent, _>(move |event| match event {
                WifiEvent::StaConnected(_) => handler(LinkEvent::ConnectResult { success: true }),
                WifiEvent::StaDisconnected(_) => handler(LinkEvent::Disconnected),
                _ => {}
            })?;
        Ok(subscription)
    }

    fn bring_up(&self) -> Result<(), LinkError> {
        let mut wifi = lock(&self.wifi);
        if !wifi.is_started()? {
            // Station mode needs a configuration before start
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            wifi.start()?;
            info!("WiFi station interface started");
        }
        Ok(())
    }

    fn submit_connect(&self, credentials: &StationCredentials) -> Result<(), LinkError> {
        let config = Self::client_configuration(credentials)?;
        let mut wifi = lock(&self.wifi);
        wifi.set_configuration(&config)?;
        wifi.connect()?;
        debug!("Connect request queued for {}", credentials.ssid());
        Ok(())
    }

    fn assigned_address(&self) -> Option<Ipv4Addr> {
        let wifi = lock(&self.wifi);
        wifi.sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }
}
