//! Timeout defaults and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// TCP connect timeout toward the device
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the config handshake
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Silence tolerated while streaming before the session is declared dead
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between heartbeats sent to the device
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period for tasks to wind down on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `fut` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_protocol_error() {
        let res: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(res, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let res: Result<()> =
            with_timeout_error(async { Err(ProtocolError::NotConnected) }, DEFAULT_TIMEOUT).await;
        assert!(matches!(res, Err(ProtocolError::NotConnected)));
    }
}
