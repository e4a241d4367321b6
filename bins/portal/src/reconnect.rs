//! Reconnection protocol.
//!
//! Entered only when the bridge escalates repeated service failures:
//!
//! ```text
//! Failed -> DisconnectAttempt -+-- ok ---------------------------------------+-> ReconnectBus -+-- ok --> Running
//!                              '-- err -> ResetNetworkAdapter -> ReconnectNetwork -'               '-- err -> FatalReset
//! ```
//!
//! The watchdog is fed before every stage that may block for a while.

use std::time::Duration;

use portal_core::fault::{BusFault, FatalFault, RecoveryFault};
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::device::Device;
use crate::hal::BusClient;
use crate::watchdog::WatchdogGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Failed,
    DisconnectAttempt,
    ResetNetworkAdapter,
    ReconnectNetwork,
    ReconnectBus,
    Running,
    FatalReset,
}

/// How the connection came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// A clean disconnect and reconnect was enough.
    Reconnected,
    /// The network adapter had to be reset first.
    ReconnectedAfterReset,
}

pub async fn recover<B: BusClient>(
    cause: &BusFault,
    bridge: &mut Bridge<B>,
    dev: &mut Device,
    dog: &mut WatchdogGuard,
    pause: Duration,
) -> Result<Recovery, FatalFault> {
    warn!("bus loop failed: {cause}");
    dev.counters.inc("fail_loop");

    let mut stage = Stage::Failed;
    let mut adapter_reset = false;
    let mut last_error: Option<BusFault> = None;
    loop {
        debug!(?stage, "recovery");
        stage = match stage {
            Stage::Failed => {
                dog.feed();
                tokio::time::sleep(pause).await;
                Stage::DisconnectAttempt
            }
            Stage::DisconnectAttempt => {
                dog.feed();
                match bridge.disconnect().await {
                    Ok(()) => Stage::ReconnectBus,
                    Err(e) => {
                        warn!("{}", RecoveryFault { stage: "disconnect", reason: e.to_string() });
                        Stage::ResetNetworkAdapter
                    }
                }
            }
            Stage::ResetNetworkAdapter => {
                dev.counters.inc("esp_reset");
                adapter_reset = true;
                dog.feed();
                match dev.network.reset() {
                    Ok(()) => Stage::ReconnectNetwork,
                    Err(e) => {
                        error!("{}", RecoveryFault { stage: "adapter reset", reason: e.to_string() });
                        Stage::ReconnectBus
                    }
                }
            }
            Stage::ReconnectNetwork => {
                info!("reconnecting network");
                dog.feed();
                match dev.network.connect() {
                    Ok(()) => info!("network adapter reset and reconnected"),
                    Err(e) => error!("{}", RecoveryFault { stage: "network connect", reason: e.to_string() }),
                }
                Stage::ReconnectBus
            }
            Stage::ReconnectBus => {
                dog.feed();
                match bridge.connect().await {
                    Ok(()) => Stage::Running,
                    Err(e) => {
                        last_error = Some(e);
                        Stage::FatalReset
                    }
                }
            }
            Stage::Running => {
                info!("reconnected to broker {}", bridge.broker());
                return Ok(if adapter_reset {
                    Recovery::ReconnectedAfterReset
                } else {
                    Recovery::Reconnected
                });
            }
            Stage::FatalReset => {
                let reason = last_error.take().map(|e| e.to_string()).unwrap_or_default();
                error!("FATAL! could not reconnect to {}: {reason}", bridge.broker());
                return Err(FatalFault::Reconnect(reason));
            }
        };
    }
}
