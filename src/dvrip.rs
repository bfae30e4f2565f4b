use crate::commands::Authentication;
use crate::config::CameraConfig;
use crate::constants::TCP_PORT;
use crate::error::{DVRIPError, Result};
use crate::protocol::{receive_packet, send_packet, unpack_json};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::Duration;

/// One control connection to a camera.
///
/// A `DVRIPCam` owns its socket, session id and sequence counter. It is never
/// shared between concurrent operations: the camera does not multiplex
/// requests on one socket, so every worker opens its own.
pub struct DVRIPCam {
    pub(crate) ip: String,
    pub(crate) port: u16,
    pub(crate) timeout: Duration,

    pub(crate) stream: Option<TcpStream>,
    pub(crate) authenticated: bool,

    pub(crate) session: u32,
    pub(crate) packet_count: u32,
}

impl DVRIPCam {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: TCP_PORT,
            timeout: Duration::from_secs(10),
            stream: None,
            authenticated: false,
            session: 0,
            packet_count: 0,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session_id(&self) -> u32 {
        self.session
    }

    /// Session id in the `0x%08X` form the camera expects inside requests.
    pub fn session_hex(&self) -> String {
        format!("0x{:08X}", self.session)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends one legacy-framed request and reads exactly one framed reply.
    ///
    /// `Ok(None)` means the reply body was not a JSON object. Socket and
    /// framing failures close the connection and are returned as errors.
    pub async fn send(&mut self, msg_id: u16, data: &Value) -> Result<Option<Value>> {
        let session = self.session;
        let packet_count = self.next_packet_count();
        let timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DVRIPError::ConnectionError("Not connected".to_string()))?;

        let exchange = async {
            send_packet(stream, session, packet_count, msg_id, data).await?;
            receive_packet(stream, timeout).await
        };

        match exchange.await {
            Ok((header, body)) => {
                tracing::debug!(
                    msg_id,
                    reply_id = header.msg_id,
                    len = header.data_len,
                    "dvrip exchange"
                );
                Ok(unpack_json(&body))
            }
            Err(e) => {
                tracing::debug!(msg_id, "dvrip exchange failed, dropping socket: {}", e);
                self.stream = None;
                self.authenticated = false;
                Err(e)
            }
        }
    }

    fn next_packet_count(&mut self) -> u32 {
        let current = self.packet_count;
        self.packet_count = self.packet_count.wrapping_add(1);
        current
    }
}

pub(crate) async fn open_stream(ip: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect((ip, port)))
        .await
        .map_err(|_| DVRIPError::Timeout("Connection timeout".to_string()))?
        .map_err(|e| DVRIPError::ConnectionError(format!("Connection error: {}", e)))
}

/// Connects and logs in with the credentials from `camera`.
pub async fn open_session(camera: &CameraConfig, timeout: Duration) -> Result<DVRIPCam> {
    let mut cam = DVRIPCam::new(camera.host.clone())
        .with_port(camera.port)
        .with_timeout(timeout);
    cam.login(&camera.username, &camera.password).await?;
    Ok(cam)
}
