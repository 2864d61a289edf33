//! Control message catalog and wire codec
//!
//! Control commands ride the session's AV channel as small framed binary
//! messages: a fixed 16-byte header (magic, protocol version, opcode,
//! payload length) followed by an opcode-specific payload. Replies reuse
//! the framing and answer on `request opcode + 1`, which is what the
//! control channel correlates on.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::{Error, Result};

pub mod auth;

const MAGIC: [u8; 2] = *b"HL";
const PROTOCOL_VERSION: u8 = 5;
pub const HEADER_LEN: usize = 16;

/// Opcodes of the fixed command catalog
pub mod opcode {
    /// Start the authentication exchange; reply carries the challenge
    pub const CONNECT_CHALLENGE: u16 = 10000;
    /// Challenge digest submission; reply carries the connection result
    pub const CHALLENGE_RESPONSE: u16 = 10002;
    /// Legacy resolution/bitrate command for doorbell and battery models
    pub const SET_RESOLUTION_LEGACY: u16 = 10052;
    /// Resolution/bitrate command for current firmware
    pub const SET_RESOLUTION: u16 = 10056;
    /// Set the camera's wall clock
    pub const SET_CAMERA_TIME: u16 = 10092;
    /// Toggle the native RTSP server
    pub const SET_RTSP_SWITCH: u16 = 10600;
    /// Query native RTSP state and URL
    pub const GET_RTSP_PARAM: u16 = 10604;
}

/// One framed control command or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub code: u16,
    pub payload: Bytes,
}

impl ControlMessage {
    pub fn new(code: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Opcode the camera answers this message on
    pub fn reply_code(&self) -> u16 {
        self.code + 1
    }

    /// Frame the message for the wire
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0);
        buf.put_u16_le(self.code);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_bytes(0, 8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a framed message, validating magic and length
    pub fn decode(raw: &[u8]) -> Result<ControlMessage> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "control message truncated at {} bytes",
                raw.len()
            )));
        }
        if raw[..2] != MAGIC {
            return Err(Error::Protocol("bad control message magic".into()));
        }

        let mut header = &raw[2..];
        let _version = header.get_u8();
        let _reserved = header.get_u8();
        let code = header.get_u16_le();
        let len = header.get_u16_le() as usize;

        if raw.len() < HEADER_LEN + len {
            return Err(Error::Protocol(format!(
                "control message {code} declares {len} payload bytes, got {}",
                raw.len() - HEADER_LEN
            )));
        }

        Ok(ControlMessage {
            code,
            payload: Bytes::copy_from_slice(&raw[HEADER_LEN..HEADER_LEN + len]),
        })
    }

    /// Connect challenge request; battery cameras need their MAC in the
    /// payload so the hub wakes them first.
    pub fn connect_challenge(wake_mac: Option<&str>) -> Self {
        let payload = wake_mac.map(|mac| mac.as_bytes().to_vec()).unwrap_or_default();
        Self::new(opcode::CONNECT_CHALLENGE, payload)
    }

    /// Challenge digest submission
    pub fn challenge_response(digest: &[u8; 16], enable_audio: bool) -> Self {
        let mut payload = BytesMut::with_capacity(17);
        payload.put_slice(digest);
        payload.put_u8(enable_audio as u8);
        Self::new(opcode::CHALLENGE_RESPONSE, payload.freeze())
    }

    /// Resolution/bitrate/fps command in the current firmware layout
    pub fn set_resolution(frame_size: i32, bitrate: u8, fps: u8) -> Self {
        Self::new(
            opcode::SET_RESOLUTION,
            vec![(frame_size + 1) as u8, bitrate, fps],
        )
    }

    /// Resolution/bitrate/fps command in the legacy layout
    pub fn set_resolution_legacy(frame_size: i32, bitrate: u8, fps: u8) -> Self {
        Self::new(
            opcode::SET_RESOLUTION_LEGACY,
            vec![frame_size as u8, bitrate, fps, 0, 0, 0],
        )
    }

    pub fn set_camera_time(epoch_secs: u32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(epoch_secs);
        Self::new(opcode::SET_CAMERA_TIME, payload.freeze())
    }

    pub fn get_rtsp_param() -> Self {
        Self::new(opcode::GET_RTSP_PARAM, Bytes::new())
    }

    pub fn set_rtsp_switch(enabled: bool) -> Self {
        Self::new(opcode::SET_RTSP_SWITCH, vec![enabled as u8])
    }
}

/// Parsed reply to the challenge-response submission
#[derive(Debug, Clone)]
pub struct AuthReply {
    /// Textual connection result: "1" accepted, "2" enr mismatch
    pub connection_res: String,
    /// Camera metadata blob returned on success
    pub camera_info: Option<Value>,
}

/// Parse the challenge-response reply payload (JSON with a textual result
/// code and an embedded metadata blob).
pub fn parse_auth_reply(payload: &[u8]) -> Result<AuthReply> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| Error::Protocol(format!("malformed auth reply: {e}")))?;

    let connection_res = value
        .get("connectionRes")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("auth reply missing connectionRes".into()))?
        .to_string();

    Ok(AuthReply {
        connection_res,
        camera_info: value.get("cameraInfo").cloned(),
    })
}

/// Recover (frame_size, bitrate, fps) from a resolution-set echo
pub fn parse_resolution_echo(code: u16, payload: &[u8]) -> Result<(i32, u8, u8)> {
    match code {
        opcode::SET_RESOLUTION if payload.len() >= 3 => {
            Ok((payload[0] as i32 - 1, payload[1], payload[2]))
        }
        opcode::SET_RESOLUTION_LEGACY if payload.len() >= 3 => {
            Ok((payload[0] as i32, payload[1], payload[2]))
        }
        _ => Err(Error::Protocol(format!(
            "unexpected resolution echo: code={code} len={}",
            payload.len()
        ))),
    }
}

/// Parse the RTSP parameter reply: enabled flag byte, then the URL bytes.
pub fn parse_rtsp_param(payload: &[u8]) -> Option<(bool, Option<String>)> {
    let enabled = *payload.first()? != 0;
    let url = String::from_utf8_lossy(&payload[1..]);
    let url = url
        .find("rtsp://")
        .map(|at| url[at..].trim_end_matches('\0').to_string());
    Some((enabled, url))
}
