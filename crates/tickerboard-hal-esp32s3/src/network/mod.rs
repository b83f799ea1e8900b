//! Bounded Wi-Fi bring-up implementing the core connectivity seam.

pub mod http;
pub mod sntp;

use embassy_net::Stack;
use embassy_time::{Duration, WithTimeout};
use esp_radio::wifi::{WifiController, WifiError};
use log::{info, warn};
use tickerboard_core::cycle::{ConnectOutcome, Connectivity};

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiConfig {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectFailure {
    Auth,
    Link,
}

/// Station link driven to a binary outcome: associated with an IPv4
/// config inside the caller's budget, or not. No half-connected state
/// leaks out; the radio stays powered until `power_off`.
pub struct WifiLink<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
}

impl<'d> WifiLink<'d> {
    pub fn new(controller: WifiController<'d>, stack: Stack<'d>) -> Self {
        Self { controller, stack }
    }

    async fn bring_up(&mut self) -> Result<(), ConnectFailure> {
        if !self.controller.is_started().unwrap_or(false) {
            self.controller.start_async().await.map_err(|err| {
                warn!("wifi start failed: {:?}", err);
                ConnectFailure::Link
            })?;
        }

        self.controller.connect_async().await.map_err(|err| {
            warn!("wifi connect failed: {:?}", err);
            classify_connect_error(&err)
        })?;

        // DHCP; the caller's timeout bounds this wait.
        self.stack.wait_config_up().await;
        Ok(())
    }
}

/// The driver surfaces credential rejection as an immediate disconnect;
/// everything else is a link failure the orchestrator may retry once.
fn classify_connect_error(err: &WifiError) -> ConnectFailure {
    match err {
        WifiError::Disconnected => ConnectFailure::Auth,
        _ => ConnectFailure::Link,
    }
}

impl Connectivity for WifiLink<'_> {
    async fn connect(&mut self, timeout_ms: u32) -> ConnectOutcome {
        match self
            .bring_up()
            .with_timeout(Duration::from_millis(timeout_ms as u64))
            .await
        {
            Ok(Ok(())) => {
                info!("wifi connected and dhcp ready");
                ConnectOutcome::Connected
            }
            Ok(Err(ConnectFailure::Auth)) => ConnectOutcome::AuthFailed,
            // A fast link failure consumed the attempt just like a slow
            // one; the contract is binary.
            Ok(Err(ConnectFailure::Link)) => ConnectOutcome::TimedOut,
            Err(_) => {
                warn!("wifi bring-up exceeded {} ms", timeout_ms);
                let _ = self.controller.disconnect_async().await;
                ConnectOutcome::TimedOut
            }
        }
    }

    async fn power_off(&mut self) {
        let _ = self.controller.disconnect_async().await;
        let _ = self.controller.stop_async().await;
        info!("wifi radio powered off");
    }
}
