//! Transport binding: the narrow seam over the vendor native library
//!
//! Every other component consumes the proprietary peer-to-peer transport
//! exclusively through [`TransportBinding`]. A concrete adapter (native FFI,
//! simulator, test stub) is selected at startup from configuration and
//! injected as `Arc<dyn TransportBinding>`; nothing in the crate subclasses
//! or reaches around it.
//!
//! Status-code mapping happens at this boundary: adapters translate the
//! soft receive conditions into [`Pull`] variants and every other negative
//! vendor code into [`crate::Error::Transport`].

use std::time::Duration;

use bytes::Bytes;

use crate::Result;

pub mod runtime;
pub mod status;

/// Handle to a live transport session, as issued by the vendor library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle(pub i32);

/// Handle to the AV channel within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHandle(pub i32);

/// Session liveness info returned by the synchronous session check
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInfo {
    /// Vendor connection mode (relayed, P2P, LAN)
    pub mode: u8,
    /// Negotiated version of the remote peer
    pub version: u32,
}

/// Outcome of a single frame pull
///
/// The three non-`Ready` variants are the soft conditions the pipeline
/// retries internally; hard failures come back as `Err` instead.
#[derive(Debug)]
pub enum Pull<T> {
    Ready { data: Bytes, info: T },
    /// Nothing buffered yet ([`status::AV_ER_DATA_NOREADY`])
    NotReady,
    /// Frame arrived with holes ([`status::AV_ER_INCOMPLETE_FRAME`])
    Incomplete,
    /// Frame was dropped in transit ([`status::AV_ER_LOST_FRAME`])
    Lost,
}

/// Metadata attached to a pulled video frame
#[derive(Debug, Clone, Copy)]
pub struct VideoFrameInfo {
    pub codec_id: u16,
    pub is_keyframe: bool,
    /// Geometry code negotiated with the camera (not pixels)
    pub frame_size: i32,
    pub bitrate: u16,
    /// Camera clock, seconds since the unix epoch
    pub timestamp: u32,
    /// Sub-second part of the camera clock, milliseconds
    pub timestamp_ms: u32,
}

/// Metadata attached to a pulled audio frame
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameInfo {
    pub codec_id: u16,
    pub timestamp: u32,
    pub timestamp_ms: u32,
}

impl VideoFrameInfo {
    /// Camera timestamp as fractional seconds since the unix epoch
    pub fn timestamp_secs(&self) -> f64 {
        media_timestamp(self.timestamp, self.timestamp_ms)
    }
}

impl AudioFrameInfo {
    pub fn timestamp_secs(&self) -> f64 {
        media_timestamp(self.timestamp, self.timestamp_ms)
    }
}

fn media_timestamp(seconds: u32, millis: u32) -> f64 {
    seconds as f64 + millis as f64 / 1_000.0
}

/// Capability interface over the vendor library
///
/// All methods are synchronous, mirroring the native calls; the pull
/// methods are expected to return quickly (the "not ready" condition is a
/// fast retry, never a block). Implementations must be safe to share across
/// the video task, the audio task and the control listener of one session.
pub trait TransportBinding: Send + Sync {
    /// Process-wide init. Returns the number of AV channels actually granted.
    fn initialize(&self, udp_port: u16, max_channels: i32) -> Result<i32>;

    /// Process-wide teardown; the runtime guarantees a single call.
    fn deinitialize(&self);

    /// Allocate a session slot before connecting.
    fn alloc_session(&self) -> Result<SessionHandle>;

    /// Direct parallel connect, for cameras without a derived-key requirement.
    fn connect_parallel(&self, peer_id: &str, session: SessionHandle) -> Result<SessionHandle>;

    /// Key-based connect with an explicit timeout.
    fn connect_keyed(
        &self,
        peer_id: &str,
        session: SessionHandle,
        auth_key: &str,
        timeout: Duration,
    ) -> Result<SessionHandle>;

    /// Synchronous liveness probe of a connected session.
    fn session_check(&self, session: SessionHandle) -> Result<SessionInfo>;

    /// Abort an in-flight connect. Best-effort.
    fn connect_stop(&self, session: SessionHandle) -> Result<()>;

    /// Close the session slot. Infallible by contract; always paired with
    /// a prior `connect_stop` during disconnect.
    fn session_close(&self, session: SessionHandle);

    /// Start the AV channel carrying frames and control commands.
    #[allow(clippy::too_many_arguments)]
    fn channel_start(
        &self,
        session: SessionHandle,
        username: &str,
        password: &str,
        timeout: Duration,
        channel_id: u8,
        resend: bool,
    ) -> Result<ChannelHandle>;

    fn channel_stop(&self, channel: ChannelHandle);

    fn set_recv_buffer_size(&self, channel: ChannelHandle, bytes: u32);

    /// Pull one video frame. Soft conditions map to [`Pull`] variants.
    fn recv_video(&self, channel: ChannelHandle) -> Result<Pull<VideoFrameInfo>>;

    /// Pull one audio frame. Logically distinct from the video pull, so the
    /// two loops need no lock between them.
    fn recv_audio(&self, channel: ChannelHandle) -> Result<Pull<AudioFrameInfo>>;

    /// Send a raw, already-framed control command.
    fn send_ioctl(&self, channel: ChannelHandle, message: &[u8]) -> Result<()>;

    /// Receive the next raw control reply, waiting at most `timeout`.
    /// `Ok(None)` means nothing arrived; transport failures are `Err`.
    fn recv_ioctl(&self, channel: ChannelHandle, timeout: Duration) -> Result<Option<Bytes>>;

    /// Tell the peer the control channel is going away. Best-effort.
    fn send_ioctl_exit(&self, channel: ChannelHandle);

    /// Drop everything buffered locally for this channel.
    fn clear_local_buffer(&self, channel: ChannelHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_timestamp_combines_subsecond_part() {
        let info = VideoFrameInfo {
            codec_id: 78,
            is_keyframe: true,
            frame_size: 0,
            bitrate: 120,
            timestamp: 1_700_000_000,
            timestamp_ms: 250,
        };
        assert!((info.timestamp_secs() - 1_700_000_000.25).abs() < 1e-6);
    }
}
