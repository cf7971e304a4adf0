//! Default timeouts and an async timeout wrapper.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Listener read timeout; also how often a running listener notices a stop request
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Time a client has to send its identity after connecting
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the processing service blocks on an empty queue between stop checks
pub const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound on a graceful server shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, mapping an elapsed deadline to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<()> = with_timeout_error(
            async { Err(ProtocolError::ConnectionClosed) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
