//! Camera session: connect handshake, authentication and channel ownership
//!
//! A [`Session`] owns the full lifecycle of one camera link: transport
//! connect (direct or derived-key), AV channel start, the challenge/response
//! authentication exchange, and teardown. The video task, the audio task and
//! control callers all share one session through `Arc`, so every method
//! takes `&self` and the mutable bits live behind locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::SessionOptions;
use crate::control::{ControlChannel, DEFAULT_REPLY_TIMEOUT};
use crate::device::{Account, CameraDescriptor};
use crate::pipeline::sync::SyncClock;
use crate::protocol::{self, ControlMessage, auth};
use crate::sink::{self, MediaKind};
use crate::transport::{ChannelHandle, Pull, SessionHandle, TransportBinding};
use crate::{Error, Result};

pub mod state;

pub use state::SessionState;

/// How long the AV channel start may take
const CHANNEL_START_TIMEOUT: Duration = Duration::from_secs(10);
/// Receive buffer large enough for a few seconds of HD video
const RECV_BUFFER_BYTES: u32 = 10 * 1024 * 1024;
/// How long to keep retrying control-channel acquisition
const CONTROL_ACQUIRE_WINDOW: Duration = Duration::from_millis(500);

/// Audio codec identified from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCodec {
    pub codec_id: u16,
    /// Codec name in ffmpeg vocabulary
    pub name: &'static str,
    pub sample_rate: u32,
}

/// The negotiated stream parameters, updated as the camera renegotiates
#[derive(Debug, Clone, Copy)]
struct StreamProfile {
    frame_size: i32,
    bitrate: u8,
    frame_rate: u8,
}

pub struct Session {
    binding: Arc<dyn TransportBinding>,
    account: Account,
    camera: CameraDescriptor,
    options: SessionOptions,

    state: std::sync::Mutex<SessionState>,
    handle: std::sync::Mutex<Option<SessionHandle>>,
    channel: std::sync::Mutex<Option<ChannelHandle>>,
    profile: std::sync::Mutex<StreamProfile>,
    camera_info: std::sync::Mutex<Option<Value>>,

    clock: SyncClock,
    control_busy: Arc<AtomicBool>,
    audio_pipe_ready: AtomicBool,
}

impl Session {
    pub fn new(
        binding: Arc<dyn TransportBinding>,
        account: Account,
        camera: CameraDescriptor,
        options: SessionOptions,
    ) -> Self {
        let profile = StreamProfile {
            frame_size: options.frame_size,
            bitrate: options.bitrate,
            frame_rate: options.frame_rate,
        };
        Self {
            binding,
            account,
            camera,
            options,
            state: std::sync::Mutex::new(SessionState::Disconnected),
            handle: std::sync::Mutex::new(None),
            channel: std::sync::Mutex::new(None),
            profile: std::sync::Mutex::new(profile),
            camera_info: std::sync::Mutex::new(None),
            clock: SyncClock::new(),
            control_busy: Arc::new(AtomicBool::new(false)),
            audio_pipe_ready: AtomicBool::new(false),
        }
    }

    pub fn camera(&self) -> &CameraDescriptor {
        &self.camera
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn clock(&self) -> &SyncClock {
        &self.clock
    }

    pub(crate) fn binding(&self) -> &dyn TransportBinding {
        self.binding.as_ref()
    }

    /// Metadata blob the camera returned on authentication
    pub fn camera_info(&self) -> Option<Value> {
        self.camera_info.lock().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Apply a state transition, refusing invalid ones
    pub(crate) fn set_state(&self, target: SessionState) {
        let mut state = self.state.lock().unwrap();
        if state.can_transition_to(target) {
            if *state != target {
                debug!("{}: session state {} -> {}", self.camera.name_uri, state, target);
            }
            *state = target;
        } else {
            warn!(
                "{}: refusing session state {} -> {}",
                self.camera.name_uri, state, target
            );
        }
    }

    /// Bring up the transport session and the AV channel
    pub async fn connect(&self) -> Result<()> {
        match self.connect_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect();
                self.set_state(SessionState::ConnectingFailed);
                Err(e)
            }
        }
    }

    async fn connect_inner(&self) -> Result<()> {
        self.set_state(SessionState::IotcConnecting);

        let slot = self.binding.alloc_session()?;
        *self.handle.lock().unwrap() = Some(slot);

        let handle = if self.camera.needs_auth_key() {
            let (enr, mac) = self.camera.auth_material();
            let key = auth::auth_key(enr, mac);
            self.binding
                .connect_keyed(&self.camera.p2p_id, slot, &key, self.options.connect_timeout)?
        } else {
            self.binding.connect_parallel(&self.camera.p2p_id, slot)?
        };
        *self.handle.lock().unwrap() = Some(handle);

        let session_info = self.binding.session_check(handle)?;
        debug!(
            "{}: transport session up (mode={})",
            self.camera.name_uri, session_info.mode
        );

        self.set_state(SessionState::AvConnecting);

        // Battery cameras choke on transport-level resend
        let resend = self.options.resend && !self.camera.is_low_power();
        let password = if self.camera.needs_auth_key() {
            self.camera.enr.clone()
        } else {
            "888888".to_string()
        };
        let channel = self.binding.channel_start(
            handle,
            "admin",
            &password,
            CHANNEL_START_TIMEOUT,
            0,
            resend,
        )?;
        self.binding.set_recv_buffer_size(channel, RECV_BUFFER_BYTES);
        *self.channel.lock().unwrap() = Some(channel);

        self.set_state(SessionState::Connected);
        info!("{}: connected (resend={})", self.camera.name_uri, resend);
        Ok(())
    }

    /// Run the challenge/response exchange and negotiate the stream profile
    pub async fn authenticate(&self) -> Result<()> {
        let found = self.state();
        if found != SessionState::Connected {
            return Err(Error::InvalidState {
                expected: SessionState::Connected,
                found,
            });
        }

        match self.authenticate_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect();
                self.set_state(SessionState::AuthenticationFailed);
                Err(e)
            }
        }
    }

    async fn authenticate_inner(&self) -> Result<()> {
        self.set_state(SessionState::Authenticating);
        let mux = self.control().await?;

        let wake_mac = self.camera.is_low_power().then_some(self.camera.mac.as_str());
        let challenge = mux
            .call(&ControlMessage::connect_challenge(wake_mac), DEFAULT_REPLY_TIMEOUT)
            .await?;
        if challenge.is_empty() {
            return Err(Error::Protocol("camera did not answer the connect challenge".into()));
        }

        let digest = auth::challenge_response(
            &challenge,
            &self.camera.combined_enr(),
            &self.camera.product_model,
            &self.camera.mac,
            &self.account.phone_id,
            &self.account.open_user_id,
            self.options.enable_audio,
        );
        let reply = mux
            .call(
                &ControlMessage::challenge_response(&digest, self.options.enable_audio),
                DEFAULT_REPLY_TIMEOUT,
            )
            .await?;
        if reply.is_empty() {
            return Err(Error::Protocol("camera did not answer the challenge response".into()));
        }

        let auth_reply = protocol::parse_auth_reply(&reply)?;
        match auth_reply.connection_res.as_str() {
            "1" => {}
            "2" => return Err(Error::EnrMismatch),
            other => return Err(Error::AuthRejected(other.to_string())),
        }
        *self.camera_info.lock().unwrap() = auth_reply.camera_info;

        // Ask for the preferred profile right away; the echo is informational
        let profile = *self.profile.lock().unwrap();
        let request = self.resolution_command(profile.frame_size, profile.bitrate, 0);
        let echo = mux.call(&request, DEFAULT_REPLY_TIMEOUT).await?;
        if echo.is_empty() {
            debug!("{}: no echo for the initial resolution request", self.camera.name_uri);
        }

        mux.shutdown().await;
        self.set_state(SessionState::AuthenticationSucceeded);
        info!("{}: authenticated", self.camera.name_uri);
        Ok(())
    }

    /// Tear everything down. Safe to call repeatedly and from any state.
    pub fn disconnect(&self) {
        if let Some(channel) = self.channel.lock().unwrap().take() {
            self.binding.send_ioctl_exit(channel);
            self.binding.channel_stop(channel);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if let Err(e) = self.binding.connect_stop(handle) {
                warn!("{}: connect_stop failed: {e}", self.camera.name_uri);
            }
            self.binding.session_close(handle);
        }
        self.set_state(SessionState::Disconnected);
    }

    /// The AV channel handle, or a protocol error when not connected
    pub(crate) fn channel(&self) -> Result<ChannelHandle> {
        self.channel
            .lock()
            .unwrap()
            .ok_or_else(|| Error::Protocol("session has no AV channel".into()))
    }

    /// Acquire the control channel, waiting out a concurrent holder
    pub async fn control(&self) -> Result<ControlChannel> {
        let channel = self.channel()?;
        let deadline = tokio::time::Instant::now() + CONTROL_ACQUIRE_WINDOW;
        loop {
            match ControlChannel::open(
                Arc::clone(&self.binding),
                channel,
                Arc::clone(&self.control_busy),
            ) {
                Ok(mux) => return Ok(mux),
                Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    /// Single-shot control acquisition for best-effort paths
    pub fn try_control(&self) -> Result<ControlChannel> {
        let channel = self.channel()?;
        ControlChannel::open(
            Arc::clone(&self.binding),
            channel,
            Arc::clone(&self.control_busy),
        )
    }

    /// Pick the resolution command variant the firmware understands
    fn resolution_command(&self, frame_size: i32, bitrate: u8, fps: u8) -> ControlMessage {
        if fps != 0 || self.camera.uses_legacy_resolution_command() {
            ControlMessage::set_resolution_legacy(frame_size, bitrate, fps)
        } else {
            ControlMessage::set_resolution(frame_size, bitrate, fps)
        }
    }

    /// Push the camera clock to ours; best-effort, skipped when the control
    /// channel is held elsewhere.
    pub async fn sync_camera_time(&self, wait: bool) {
        match self.try_control() {
            Ok(mux) => {
                let message =
                    ControlMessage::set_camera_time(chrono::Utc::now().timestamp() as u32);
                let outcome = if wait {
                    mux.call(&message, DEFAULT_REPLY_TIMEOUT).await.map(|_| ())
                } else {
                    mux.send_no_wait(&message)
                };
                if let Err(e) = outcome {
                    debug!("{}: clock sync failed: {e}", self.camera.name_uri);
                }
                mux.shutdown().await;
            }
            Err(e) => debug!("{}: skipping clock sync: {e}", self.camera.name_uri),
        }
        // The pacing reference restarts even when the command could not go out
        self.clock.mark(unix_now());
    }

    /// Renegotiate geometry/bitrate/fps with the camera.
    ///
    /// `bitrate` of `None` keeps the current value; `fps` of 0 keeps the
    /// camera's frame rate and selects the current-firmware command layout.
    pub async fn update_frame_size_rate(&self, bitrate: Option<u8>, fps: u8) {
        let (frame_size, bitrate) = {
            let mut profile = self.profile.lock().unwrap();
            if let Some(bitrate) = bitrate {
                profile.bitrate = bitrate;
            }
            if fps != 0 {
                profile.frame_rate = fps;
            }
            (profile.frame_size, profile.bitrate)
        };
        warn!(
            "{}: requesting {} bitrate={} fps={}",
            self.camera.name_uri,
            crate::config::resolution_label(frame_size),
            bitrate,
            fps
        );
        if fps != 0 {
            self.sync_camera_time(false).await;
        }
        match self.control().await {
            Ok(mux) => {
                let request = self.resolution_command(frame_size, bitrate, fps);
                if let Err(e) = mux.send_no_wait(&request) {
                    warn!("{}: resolution request failed: {e}", self.camera.name_uri);
                }
                mux.shutdown().await;
            }
            Err(e) => warn!("{}: resolution request failed: {e}", self.camera.name_uri),
        }
    }

    /// Drop everything buffered for this channel, camera clock first
    pub async fn clear_buffer(&self) {
        self.sync_camera_time(true).await;
        if let Ok(channel) = self.channel() {
            self.binding.clear_local_buffer(channel);
        }
    }

    /// Stem of the output pipe names for this stream
    pub fn pipe_name(&self) -> String {
        if self.options.substream {
            format!("{}-sub", self.camera.name_uri)
        } else {
            self.camera.name_uri.clone()
        }
    }

    pub(crate) fn mark_audio_pipe(&self, ready: bool) {
        self.audio_pipe_ready.store(ready, Ordering::SeqCst);
    }

    /// Discard stale audio from the output pipe, roughly `gap` seconds
    pub fn flush_audio_pipe(&self, gap: f64) {
        if !self.audio_pipe_ready.load(Ordering::SeqCst) {
            return;
        }
        let path = sink::pipe_path(&self.options.pipe_dir, &self.pipe_name(), MediaKind::Audio);
        if let Err(e) = sink::flush(&path, gap) {
            warn!("{}: audio pipe flush failed: {e}", self.camera.name_uri);
        }
    }

    /// Sleep budget before the next video pull
    pub fn pacing_delay(&self) -> Duration {
        if self.options.low_latency {
            return Duration::ZERO;
        }
        let frame_rate = self.profile.lock().unwrap().frame_rate.max(1);
        self.clock.pacing_delay(1.0 / frame_rate as f64, unix_now())
    }

    /// Sample rate advertised in the camera metadata, with a model fallback
    pub fn audio_sample_rate(&self) -> u32 {
        self.camera_info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|info| info.get("audioParm"))
            .and_then(|parm| parm.get("sampleRate"))
            .and_then(|rate| match rate {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64().map(|n| n as u32),
                _ => None,
            })
            .unwrap_or(self.camera.default_sample_rate)
    }

    /// Map a stream codec id to its ffmpeg name and effective sample rate
    pub fn audio_codec_from_id(&self, codec_id: u16) -> Result<AudioCodec> {
        let (name, forced_rate) = match codec_id {
            137 => ("mulaw", None),
            140 => ("s16le", None),
            141 => ("aac", None),
            143 => ("alaw", None),
            144 => ("aac_eld", Some(16_000)),
            146 => ("libopus", Some(16_000)),
            other => {
                return Err(Error::Protocol(format!("unknown audio codec id {other}")));
            }
        };
        Ok(AudioCodec {
            codec_id,
            name,
            sample_rate: forced_rate.unwrap_or_else(|| self.audio_sample_rate()),
        })
    }

    /// Pull audio frames until one reveals the codec in use
    pub async fn identify_audio_codec(&self) -> Result<AudioCodec> {
        let channel = self.channel()?;
        for _ in 0..60 {
            if let Pull::Ready { info, .. } = self.binding.recv_audio(channel)? {
                return self.audio_codec_from_id(info.codec_id);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(Error::Protocol("no audio frames to identify the codec from".into()))
    }

    /// Query (and optionally enable) the firmware's native RTSP server.
    ///
    /// The switch command is only sent when the server is observed
    /// disabled; an already-running server is left alone.
    pub async fn check_native_rtsp(&self, start: bool) -> Result<Option<String>> {
        if !self.camera.rtsp_firmware {
            return Ok(None);
        }
        let mux = self.control().await?;
        let reply = mux
            .call(&ControlMessage::get_rtsp_param(), DEFAULT_REPLY_TIMEOUT)
            .await?;
        let mut param = protocol::parse_rtsp_param(&reply);

        if start && matches!(param, Some((false, _))) {
            info!("{}: enabling the native rtsp server", self.camera.name_uri);
            mux.call(&ControlMessage::set_rtsp_switch(true), DEFAULT_REPLY_TIMEOUT)
                .await?;
            let reply = mux
                .call(&ControlMessage::get_rtsp_param(), DEFAULT_REPLY_TIMEOUT)
                .await?;
            param = protocol::parse_rtsp_param(&reply);
        }
        mux.shutdown().await;

        match param {
            Some((true, url)) => Ok(url),
            _ => Ok(None),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Wall clock as fractional unix seconds
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1_000.0
}
