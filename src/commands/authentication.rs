use crate::commands::Connection;
use crate::constants::{LOGIN, OK_CODES, describe_code};
use crate::dvrip::DVRIPCam;
use crate::error::{DVRIPError, Result};
use crate::protocol::sofia_hash;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// The parts of a login reply this crate reads.
#[derive(Debug, Default, Deserialize)]
pub struct LoginReply {
    #[serde(rename = "Ret")]
    pub ret: Option<u32>,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
}

impl LoginReply {
    pub fn parse_session(&self) -> Option<u32> {
        let raw = self.session_id.as_deref()?;
        let hex = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        u32::from_str_radix(hex, 16).ok()
    }
}

#[async_trait]
pub trait Authentication: Send + Sync {
    /// Login to the device, connecting first if needed
    async fn login(&mut self, username: &str, password: &str) -> Result<()>;

    /// Check if authenticated
    fn is_authenticated(&self) -> bool;
}

#[async_trait]
impl Authentication for DVRIPCam {
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if !Connection::is_connected(self) {
            Connection::connect(self, self.timeout).await?;
        }

        let data = json!({
            "EncryptType": "MD5",
            "LoginType": "DVRIP-Web",
            "PassWord": sofia_hash(password),
            "UserName": username,
        });

        let Some(reply) = self.send(LOGIN, &data).await? else {
            Connection::close(self).await?;
            return Err(DVRIPError::AuthenticationError("Empty response".to_string()));
        };
        let reply: LoginReply = serde_json::from_value(reply).unwrap_or_default();

        let Some(ret) = reply.ret else {
            Connection::close(self).await?;
            return Err(DVRIPError::AuthenticationError(
                "Login reply carries no status code".to_string(),
            ));
        };
        if !OK_CODES.contains(&ret) {
            Connection::close(self).await?;
            return Err(DVRIPError::AuthenticationError(format!(
                "Login rejected with {} ({})",
                ret,
                describe_code(ret)
            )));
        }

        let Some(session) = reply.parse_session() else {
            Connection::close(self).await?;
            return Err(DVRIPError::ProtocolError("Invalid SessionID".to_string()));
        };

        self.session = session;
        self.authenticated = true;
        tracing::debug!("logged in as {} with session 0x{:08X}", username, session);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}
