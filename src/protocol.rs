use crate::constants::HEAD_MAGIC;
use crate::error::{DVRIPError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Duration;

/// Terminator appended to every JSON payload sent with the legacy header.
pub const LEGACY_TAIL: &[u8] = b"\x0a\x00";

/// Legacy control header: magic, reserved byte, two pad bytes, session,
/// sequence, two pad bytes, message id, payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub head: u8,
    pub version: u8,
    pub session: u32,
    pub packet_count: u32,
    pub msg_id: u16,
    pub data_len: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 20;

    pub fn new(session: u32, packet_count: u32, msg_id: u16, data_len: u32) -> Self {
        Self {
            head: HEAD_MAGIC,
            version: 0,
            session,
            packet_count,
            msg_id,
            data_len,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0] = self.head;
        buf[1] = self.version;
        LittleEndian::write_u32(&mut buf[4..8], self.session);
        LittleEndian::write_u32(&mut buf[8..12], self.packet_count);
        LittleEndian::write_u16(&mut buf[14..16], self.msg_id);
        LittleEndian::write_u32(&mut buf[16..20], self.data_len);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(DVRIPError::ProtocolError("Header too small".to_string()));
        }
        if data[0] != HEAD_MAGIC {
            return Err(DVRIPError::ProtocolError(format!(
                "Invalid DVRIP magic 0x{:02X}",
                data[0]
            )));
        }
        Ok(Self {
            head: data[0],
            version: data[1],
            session: LittleEndian::read_u32(&data[4..8]),
            packet_count: LittleEndian::read_u32(&data[8..12]),
            msg_id: LittleEndian::read_u16(&data[14..16]),
            data_len: LittleEndian::read_u32(&data[16..20]),
        })
    }
}

/// Header used on the archive data socket. Same width as the legacy header,
/// but bytes 12 and 13 carry two flags; a nonzero `flag2` marks the last
/// packet of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedHeader {
    pub head: u8,
    pub version: u8,
    pub session: u32,
    pub packet_count: u32,
    pub flag1: u8,
    pub flag2: u8,
    pub msg_id: u16,
    pub data_len: u32,
}

impl TaggedHeader {
    pub const SIZE: usize = 20;

    pub fn is_terminal(&self) -> bool {
        self.flag2 != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0] = self.head;
        buf[1] = self.version;
        LittleEndian::write_u32(&mut buf[4..8], self.session);
        LittleEndian::write_u32(&mut buf[8..12], self.packet_count);
        buf[12] = self.flag1;
        buf[13] = self.flag2;
        LittleEndian::write_u16(&mut buf[14..16], self.msg_id);
        LittleEndian::write_u32(&mut buf[16..20], self.data_len);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(DVRIPError::ProtocolError("Header too small".to_string()));
        }
        if data[0] != HEAD_MAGIC {
            return Err(DVRIPError::ProtocolError(format!(
                "Invalid DVRIP magic 0x{:02X}",
                data[0]
            )));
        }
        Ok(Self {
            head: data[0],
            version: data[1],
            session: LittleEndian::read_u32(&data[4..8]),
            packet_count: LittleEndian::read_u32(&data[8..12]),
            flag1: data[12],
            flag2: data[13],
            msg_id: LittleEndian::read_u16(&data[14..16]),
            data_len: LittleEndian::read_u32(&data[16..20]),
        })
    }
}

/// Builds a legacy-framed packet carrying `payload` as compact JSON.
pub fn pack_json(session: u32, packet_count: u32, msg_id: u16, payload: &Value) -> Result<Vec<u8>> {
    let data = serde_json::to_vec(payload)
        .map_err(|e| DVRIPError::SerializationError(e.to_string()))?;
    let header = PacketHeader::new(
        session,
        packet_count,
        msg_id,
        (data.len() + LEGACY_TAIL.len()) as u32,
    );

    let mut packet = header.encode();
    packet.extend_from_slice(&data);
    packet.extend_from_slice(LEGACY_TAIL);
    Ok(packet)
}

pub async fn send_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    session: u32,
    packet_count: u32,
    msg_id: u16,
    payload: &Value,
) -> Result<()> {
    let packet = pack_json(session, packet_count, msg_id, payload)?;
    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn receive_data<R: AsyncRead + Unpin>(
    reader: &mut R,
    length: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    let mut received = 0;

    while received < length {
        let result = tokio::time::timeout(timeout, reader.read(&mut buf[received..])).await;

        let chunk = match result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Ok(Err(e)) => {
                return Err(DVRIPError::IoError(e));
            }
            Err(_) => {
                return Err(DVRIPError::Timeout(format!(
                    "Timeout receiving data after {} of {} bytes",
                    received, length
                )));
            }
        };

        if chunk == 0 {
            return Err(DVRIPError::ConnectionError(format!(
                "Connection closed by peer after {} of {} bytes",
                received, length
            )));
        }
        received += chunk;
    }

    Ok(buf)
}

pub async fn receive_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<(PacketHeader, Vec<u8>)> {
    let raw = receive_data(reader, PacketHeader::SIZE, timeout).await?;
    let header = PacketHeader::decode(&raw)?;
    let data = receive_data(reader, header.data_len as usize, timeout).await?;
    Ok((header, data))
}

pub async fn receive_tagged_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<(TaggedHeader, Vec<u8>)> {
    let raw = receive_data(reader, TaggedHeader::SIZE, timeout).await?;
    let header = TaggedHeader::decode(&raw)?;
    let data = receive_data(reader, header.data_len as usize, timeout).await?;
    Ok((header, data))
}

/// Parses a reply body as JSON after stripping trailing `\n` and NUL bytes.
/// Anything that is not a JSON object counts as no data.
pub fn unpack_json(data: &[u8]) -> Option<Value> {
    let end = data
        .iter()
        .rposition(|&b| b != 0x00 && b != 0x0a)
        .map_or(0, |i| i + 1);
    match serde_json::from_slice::<Value>(&data[..end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

pub fn sofia_hash(password: &str) -> String {
    let digest = md5::compute(password.as_bytes());

    let chars: Vec<char> = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz"
        .chars()
        .collect();

    let mut result = String::new();
    for i in (0..digest.len()).step_by(2) {
        let sum = digest[i] as usize + digest[i + 1] as usize;
        result.push(chars[sum % 62]);
    }
    result
}
