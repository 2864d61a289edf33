//! Scripted transport stub shared by the unit tests
//!
//! The stub plays the vendor library from a script: canned control replies
//! keyed by request opcode, queued frame pulls, and one-shot failure knobs
//! for each connect phase. Everything sent through it is recorded so tests
//! can assert on the exact command traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::device::{Account, CameraDescriptor};
use crate::protocol::ControlMessage;
use crate::transport::{
    AudioFrameInfo, ChannelHandle, Pull, SessionHandle, SessionInfo, TransportBinding,
    VideoFrameInfo,
};
use crate::{Error, Result};

#[derive(Default)]
struct StubState {
    init_count: usize,
    deinit_count: usize,

    fail_initialize: Option<i32>,
    fail_alloc: Option<i32>,
    fail_connect: Option<i32>,
    fail_channel: Option<i32>,
    fail_recv_ioctl: Option<i32>,

    /// Canned reply payloads per request opcode; consumed front-to-back
    responders: HashMap<u16, VecDeque<Bytes>>,
    /// Framed replies waiting to be picked up by the control listener
    inbox: VecDeque<Bytes>,
    /// Every control command sent, decoded
    sent: Vec<ControlMessage>,

    video: VecDeque<Result<Pull<VideoFrameInfo>>>,
    audio: VecDeque<Result<Pull<AudioFrameInfo>>>,

    next_session: i32,
    connect_stopped: usize,
    sessions_closed: usize,
    channels_stopped: usize,
    exits_sent: usize,
    buffers_cleared: usize,
    last_resend: Option<bool>,
    last_password: Option<String>,
    last_auth_key: Option<String>,
}

pub struct StubTransport {
    state: Mutex<StubState>,
}

impl StubTransport {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StubState::default()),
        })
    }

    // failure knobs, each armed for a single call

    pub fn fail_initialize(&self, code: i32) {
        self.state.lock().unwrap().fail_initialize = Some(code);
    }

    pub fn fail_alloc(&self, code: i32) {
        self.state.lock().unwrap().fail_alloc = Some(code);
    }

    pub fn fail_connect(&self, code: i32) {
        self.state.lock().unwrap().fail_connect = Some(code);
    }

    pub fn fail_channel(&self, code: i32) {
        self.state.lock().unwrap().fail_channel = Some(code);
    }

    pub fn fail_recv_ioctl(&self, code: i32) {
        self.state.lock().unwrap().fail_recv_ioctl = Some(code);
    }

    // scripting

    /// Queue a canned reply payload for the next command with this opcode
    pub fn respond(&self, request_code: u16, payload: Bytes) {
        self.state
            .lock()
            .unwrap()
            .responders
            .entry(request_code)
            .or_default()
            .push_back(payload);
    }

    pub fn push_video(&self, pull: Result<Pull<VideoFrameInfo>>) {
        self.state.lock().unwrap().video.push_back(pull);
    }

    pub fn push_audio(&self, pull: Result<Pull<AudioFrameInfo>>) {
        self.state.lock().unwrap().audio.push_back(pull);
    }

    // recorded traffic

    pub fn init_count(&self) -> usize {
        self.state.lock().unwrap().init_count
    }

    pub fn deinit_count(&self) -> usize {
        self.state.lock().unwrap().deinit_count
    }

    pub fn sent_codes(&self) -> Vec<u16> {
        self.state.lock().unwrap().sent.iter().map(|m| m.code).collect()
    }

    pub fn count_sent(&self, code: u16) -> usize {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|m| m.code == code)
            .count()
    }

    pub fn last_sent(&self, code: u16) -> Option<ControlMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .rev()
            .find(|m| m.code == code)
            .cloned()
    }

    pub fn channels_stopped(&self) -> usize {
        self.state.lock().unwrap().channels_stopped
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().sessions_closed
    }

    pub fn connect_stopped(&self) -> usize {
        self.state.lock().unwrap().connect_stopped
    }

    pub fn exits_sent(&self) -> usize {
        self.state.lock().unwrap().exits_sent
    }

    pub fn buffers_cleared(&self) -> usize {
        self.state.lock().unwrap().buffers_cleared
    }

    pub fn last_resend(&self) -> Option<bool> {
        self.state.lock().unwrap().last_resend
    }

    pub fn last_password(&self) -> Option<String> {
        self.state.lock().unwrap().last_password.clone()
    }

    pub fn last_auth_key(&self) -> Option<String> {
        self.state.lock().unwrap().last_auth_key.clone()
    }
}

impl TransportBinding for StubTransport {
    fn initialize(&self, _udp_port: u16, max_channels: i32) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_initialize.take() {
            return Err(Error::transport(code));
        }
        state.init_count += 1;
        Ok(max_channels)
    }

    fn deinitialize(&self) {
        self.state.lock().unwrap().deinit_count += 1;
    }

    fn alloc_session(&self) -> Result<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_alloc.take() {
            return Err(Error::transport(code));
        }
        state.next_session += 1;
        Ok(SessionHandle(state.next_session))
    }

    fn connect_parallel(&self, _peer_id: &str, session: SessionHandle) -> Result<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_connect.take() {
            return Err(Error::transport(code));
        }
        state.last_auth_key = None;
        Ok(session)
    }

    fn connect_keyed(
        &self,
        _peer_id: &str,
        session: SessionHandle,
        auth_key: &str,
        _timeout: Duration,
    ) -> Result<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_connect.take() {
            return Err(Error::transport(code));
        }
        state.last_auth_key = Some(auth_key.to_string());
        Ok(session)
    }

    fn session_check(&self, _session: SessionHandle) -> Result<SessionInfo> {
        Ok(SessionInfo::default())
    }

    fn connect_stop(&self, _session: SessionHandle) -> Result<()> {
        self.state.lock().unwrap().connect_stopped += 1;
        Ok(())
    }

    fn session_close(&self, _session: SessionHandle) {
        self.state.lock().unwrap().sessions_closed += 1;
    }

    fn channel_start(
        &self,
        _session: SessionHandle,
        _username: &str,
        password: &str,
        _timeout: Duration,
        channel_id: u8,
        resend: bool,
    ) -> Result<ChannelHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_channel.take() {
            return Err(Error::transport(code));
        }
        state.last_resend = Some(resend);
        state.last_password = Some(password.to_string());
        Ok(ChannelHandle(channel_id as i32))
    }

    fn channel_stop(&self, _channel: ChannelHandle) {
        self.state.lock().unwrap().channels_stopped += 1;
    }

    fn set_recv_buffer_size(&self, _channel: ChannelHandle, _bytes: u32) {}

    fn recv_video(&self, _channel: ChannelHandle) -> Result<Pull<VideoFrameInfo>> {
        match self.state.lock().unwrap().video.pop_front() {
            Some(pull) => pull,
            None => Ok(Pull::NotReady),
        }
    }

    fn recv_audio(&self, _channel: ChannelHandle) -> Result<Pull<AudioFrameInfo>> {
        match self.state.lock().unwrap().audio.pop_front() {
            Some(pull) => pull,
            None => Ok(Pull::NotReady),
        }
    }

    fn send_ioctl(&self, _channel: ChannelHandle, message: &[u8]) -> Result<()> {
        let decoded = ControlMessage::decode(message)?;
        let mut state = self.state.lock().unwrap();
        let reply_code = decoded.reply_code();
        if let Some(payload) = state
            .responders
            .get_mut(&decoded.code)
            .and_then(VecDeque::pop_front)
        {
            let reply = ControlMessage::new(reply_code, payload).encode();
            state.inbox.push_back(reply);
        }
        state.sent.push(decoded);
        Ok(())
    }

    fn recv_ioctl(&self, _channel: ChannelHandle, timeout: Duration) -> Result<Option<Bytes>> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(code) = state.fail_recv_ioctl.take() {
                return Err(Error::transport(code));
            }
            if let Some(raw) = state.inbox.pop_front() {
                return Ok(Some(raw));
            }
        }
        // Simulate the vendor poll blocking for its timeout
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(None)
    }

    fn send_ioctl_exit(&self, _channel: ChannelHandle) {
        self.state.lock().unwrap().exits_sent += 1;
    }

    fn clear_local_buffer(&self, _channel: ChannelHandle) {
        self.state.lock().unwrap().buffers_cleared += 1;
    }
}

/// Camera fixture matching the shape the device directory hands over
pub fn camera() -> CameraDescriptor {
    CameraDescriptor {
        p2p_id: "ABCDEF123456".into(),
        mac: "aabbccddeeff".into(),
        enr: "0123456789abcdef".into(),
        product_model: "WYZE_CAKP2JFUS".into(),
        name_uri: "front-door".into(),
        dtls: false,
        parent_dtls: false,
        parent_enr: None,
        parent_mac: None,
        rtsp_firmware: false,
        default_sample_rate: 16_000,
    }
}

pub fn account() -> Account {
    Account {
        phone_id: "phone-1234".into(),
        open_user_id: "open-user".into(),
    }
}

/// Keyframe video pull with sane defaults for the pipeline tests
pub fn video_frame(frame_size: i32, is_keyframe: bool, timestamp: f64) -> Pull<VideoFrameInfo> {
    Pull::Ready {
        data: Bytes::from_static(&[0u8; 64]),
        info: VideoFrameInfo {
            codec_id: 78,
            is_keyframe,
            frame_size,
            bitrate: 120,
            timestamp: timestamp as u32,
            timestamp_ms: ((timestamp.fract()) * 1_000.0) as u32,
        },
    }
}

pub fn audio_frame(codec_id: u16, timestamp: f64) -> Pull<AudioFrameInfo> {
    Pull::Ready {
        data: Bytes::from_static(&[0u8; 32]),
        info: AudioFrameInfo {
            codec_id,
            timestamp: timestamp as u32,
            timestamp_ms: ((timestamp.fract()) * 1_000.0) as u32,
        },
    }
}
