use crate::dvrip::{DVRIPCam, open_stream};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::time::Duration;

#[async_trait]
pub trait Connection: Send + Sync {
    /// Connect to the device
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Disconnect from the device. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl Connection for DVRIPCam {
    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        let stream = open_stream(&self.ip, self.port, timeout).await?;
        tracing::debug!("connected to {}:{}", self.ip, self.port);

        self.stream = Some(stream);
        self.session = 0;
        self.packet_count = 0;
        self.authenticated = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.authenticated = false;
        if let Some(mut stream) = self.stream.take() {
            // Errors on shutdown mean the peer is already gone.
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
