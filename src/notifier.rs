//! Notifier (component C): opaque cross-channel notification capability.
//!
//! Transport implementations (SMTP, webhook POSTs, …) are out of scope; the
//! core only calls `send` and logs failures (§7 *NotifierFailure* — swallowed,
//! never fails a run).

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &str, title: &str, body: &str) -> Result<()>;
}

/// Logs every notification instead of delivering it anywhere. Used when no
/// real transport is wired up, and in tests.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, channel: &str, title: &str, body: &str) -> Result<()> {
        tracing::info!(channel, title, body, "notification (no transport configured)");
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every call for assertion in tests.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, channel: &str, title: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .await
                .push((channel.to_string(), title.to_string(), body.to_string()));
            Ok(())
        }
    }
}
