//! Paced frame delivery
//!
//! Two pull loops per session, one for video and one for audio, each
//! wrapped in a stream type that owns the retry, pacing and sync logic:
//!
//! - [`VideoStream`] paces its pulls against the camera clock, validates
//!   frame geometry and renegotiates the profile when the camera drifts to
//!   a resolution nobody asked for. Every valid-geometry frame is
//!   delivered; the keyframe epoch only gates sync corrections and
//!   renegotiation.
//! - [`AudioStream`] runs on a fixed short cadence and yields to video
//!   whenever the sync engine says audio ran ahead.
//!
//! Both report into a shared [`StreamHealth`] and deliver frames upward;
//! the `pump_*` helpers connect a stream to its named pipe for the
//! external muxer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::session::{Session, SessionState, unix_now};
use crate::sink::{MediaKind, PipeSink};
use crate::transport::{AudioFrameInfo, Pull, VideoFrameInfo};
use crate::{Error, Result};

pub mod health;
pub mod sync;

pub use health::{HealthSummary, StreamHealth};
pub use sync::{SyncAction, SyncClock};

/// Pause between pulls when the transport has nothing buffered
const NOT_READY_BACKOFF: Duration = Duration::from_millis(12);
/// Audio pull cadence
const AUDIO_CADENCE: Duration = Duration::from_millis(10);

/// Predicate deciding whether the stream should keep running
pub type KeepGoing = Box<dyn Fn() -> bool + Send + Sync>;

/// A source of framed media, pulled one frame at a time
///
/// `Ok(None)` is the clean end of the stream; errors are fatal for the
/// session.
#[async_trait]
pub trait FrameSource: Send {
    type Info: Send;

    async fn next_frame(&mut self) -> Result<Option<(Bytes, Self::Info)>>;

    fn name(&self) -> &'static str;
}

fn always() -> KeepGoing {
    Box::new(|| true)
}

/// Paced video pull loop for one session
pub struct VideoStream {
    session: Arc<Session>,
    keep_going: KeepGoing,
    health: Arc<StreamHealth>,
    have_keyframe: bool,
    started: bool,
    /// Watchdog reference: last delivered frame, or loop start
    last_frame: Instant,
}

impl VideoStream {
    pub fn new(session: Arc<Session>, keep_going: KeepGoing) -> Self {
        Self {
            session,
            keep_going,
            health: Arc::new(StreamHealth::new()),
            have_keyframe: false,
            started: false,
            last_frame: Instant::now(),
        }
    }

    pub fn with_default_predicate(session: Arc<Session>) -> Self {
        Self::new(session, always())
    }

    pub fn health(&self) -> Arc<StreamHealth> {
        Arc::clone(&self.health)
    }

    fn should_stream(&self) -> bool {
        self.session.state() == SessionState::AuthenticationSucceeded && (self.keep_going)()
    }

    /// Stall watchdog: one renegotiation attempt, then a hard error.
    ///
    /// Returns true when the caller should retry the pull.
    async fn check_watchdog(&mut self) -> Result<bool> {
        if self.last_frame.elapsed() < self.session.options().connect_timeout {
            return Ok(true);
        }
        if self.have_keyframe {
            self.session.set_state(SessionState::ConnectingFailed);
            return Err(Error::Timing(format!(
                "{}: no video frame within the timeout",
                self.session.camera().name_uri
            )));
        }
        warn!(
            "{}: no frames yet, asking for the stream again",
            self.session.camera().name_uri
        );
        self.health.record_renegotiation();
        self.session.update_frame_size_rate(None, 0).await;
        // Arm the watchdog: a second stall is fatal
        self.have_keyframe = true;
        self.last_frame = Instant::now();
        Ok(false)
    }

    /// Frame geometry the camera was never asked for: drop it, flush the
    /// audio pipe and request the profile again (once per keyframe epoch).
    async fn reject_geometry(&mut self, info: &VideoFrameInfo) {
        debug!(
            "{}: dropping frame with geometry {} (want {:?})",
            self.session.camera().name_uri,
            info.frame_size,
            self.session.options().valid_frame_sizes()
        );
        self.session.flush_audio_pipe(0.0);
        if self.have_keyframe {
            self.health.record_renegotiation();
            self.session.update_frame_size_rate(None, 0).await;
        }
        self.have_keyframe = false;
    }

    /// Pull the next deliverable video frame
    pub async fn next(&mut self) -> Result<Option<(Bytes, VideoFrameInfo)>> {
        if !self.started {
            self.session.sync_camera_time(false).await;
            self.last_frame = Instant::now();
            self.started = true;
        }

        loop {
            tokio::time::sleep(self.session.pacing_delay()).await;

            if !self.should_stream() {
                info!("{}: video stream stopping", self.session.camera().name_uri);
                self.session.set_state(SessionState::ConnectingFailed);
                return Ok(None);
            }
            if !self.check_watchdog().await? {
                continue;
            }

            let channel = self.session.channel()?;
            match self.session.binding().recv_video(channel) {
                Ok(Pull::Ready { data, info }) => {
                    if !self
                        .session
                        .options()
                        .valid_frame_sizes()
                        .contains(&info.frame_size)
                    {
                        self.reject_geometry(&info).await;
                        continue;
                    }

                    if self.have_keyframe {
                        let actions = self
                            .session
                            .clock()
                            .observe_video(info.timestamp_secs(), unix_now());
                        for action in actions {
                            match action {
                                SyncAction::ClearBuffer => self.session.clear_buffer().await,
                                SyncAction::FlushAudio { gap } => {
                                    self.session.flush_audio_pipe(gap)
                                }
                                // Only the audio loop holds
                                SyncAction::Hold(_) => {}
                            }
                        }
                    } else if info.is_keyframe {
                        self.session.clock().mark(unix_now());
                        self.have_keyframe = true;
                    }

                    self.last_frame = Instant::now();
                    self.health.record_frame(data.len(), info.is_keyframe);
                    return Ok(Some((data, info)));
                }
                Ok(Pull::NotReady) => {
                    tokio::time::sleep(NOT_READY_BACKOFF).await;
                }
                Ok(Pull::Incomplete) | Ok(Pull::Lost) => {
                    self.health.record_soft_retry();
                }
                Err(e) => {
                    self.session.set_state(SessionState::ConnectingFailed);
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for VideoStream {
    type Info = VideoFrameInfo;

    async fn next_frame(&mut self) -> Result<Option<(Bytes, VideoFrameInfo)>> {
        self.next().await
    }

    fn name(&self) -> &'static str {
        "video"
    }
}

/// Audio pull loop for one session
pub struct AudioStream {
    session: Arc<Session>,
    keep_going: KeepGoing,
    health: Arc<StreamHealth>,
}

impl AudioStream {
    pub fn new(session: Arc<Session>, keep_going: KeepGoing) -> Self {
        Self {
            session,
            keep_going,
            health: Arc::new(StreamHealth::new()),
        }
    }

    pub fn with_default_predicate(session: Arc<Session>) -> Self {
        Self::new(session, always())
    }

    pub fn health(&self) -> Arc<StreamHealth> {
        Arc::clone(&self.health)
    }

    fn should_stream(&self) -> bool {
        self.session.state() == SessionState::AuthenticationSucceeded && (self.keep_going)()
    }

    /// Pull the next audio frame, yielding to video when audio runs ahead
    pub async fn next(&mut self) -> Result<Option<(Bytes, AudioFrameInfo)>> {
        loop {
            tokio::time::sleep(AUDIO_CADENCE).await;

            if !self.should_stream() {
                info!("{}: audio stream stopping", self.session.camera().name_uri);
                self.session.set_state(SessionState::ConnectingFailed);
                return Ok(None);
            }

            let channel = self.session.channel()?;
            match self.session.binding().recv_audio(channel) {
                Ok(Pull::Ready { data, info }) => {
                    let actions = self.session.clock().observe_audio(info.timestamp_secs());
                    for action in actions {
                        match action {
                            SyncAction::ClearBuffer => self.session.clear_buffer().await,
                            SyncAction::FlushAudio { gap } => self.session.flush_audio_pipe(gap),
                            SyncAction::Hold(pause) => tokio::time::sleep(pause).await,
                        }
                    }
                    self.health.record_frame(data.len(), false);
                    return Ok(Some((data, info)));
                }
                Ok(Pull::NotReady) => {}
                Ok(Pull::Incomplete) | Ok(Pull::Lost) => {
                    self.health.record_soft_retry();
                }
                Err(e) => {
                    // Parking the session here is also what ends the video loop
                    self.session.set_state(SessionState::ConnectingFailed);
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for AudioStream {
    type Info = AudioFrameInfo;

    async fn next_frame(&mut self) -> Result<Option<(Bytes, AudioFrameInfo)>> {
        self.next().await
    }

    fn name(&self) -> &'static str {
        "audio"
    }
}

/// Run the video loop to completion, writing frames into the video pipe
pub async fn pump_video_to_pipe(session: Arc<Session>, keep_going: KeepGoing) -> Result<()> {
    let mut stream = VideoStream::new(Arc::clone(&session), keep_going);
    let mut sink = PipeSink::create(
        &session.options().pipe_dir,
        &session.pipe_name(),
        MediaKind::Video,
    )?;

    while let Some((data, _info)) = stream.next().await? {
        if !sink.write(&data)? {
            stream.health().record_pipe_drop();
        }
    }
    Ok(())
}

/// Run the audio loop to completion, writing frames into the audio pipe
///
/// The session's flush path only touches the pipe while this pump holds it
/// open, so the ready flag brackets the loop.
pub async fn pump_audio_to_pipe(session: Arc<Session>, keep_going: KeepGoing) -> Result<()> {
    let mut stream = AudioStream::new(Arc::clone(&session), keep_going);
    let mut sink = PipeSink::create(
        &session.options().pipe_dir,
        &session.pipe_name(),
        MediaKind::Audio,
    )?;

    session.mark_audio_pipe(true);
    let outcome = async {
        while let Some((data, _info)) = stream.next().await? {
            if !sink.write(&data)? {
                stream.health().record_pipe_drop();
            }
        }
        Ok(())
    }
    .await;
    session.mark_audio_pipe(false);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;
    use crate::protocol::opcode;
    use crate::testing::{self, StubTransport};
    use crate::transport::TransportBinding;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn live_session(stub: &Arc<StubTransport>, options: SessionOptions) -> Arc<Session> {
        stub.respond(opcode::CONNECT_CHALLENGE, Bytes::from_static(&[7u8; 16]));
        stub.respond(
            opcode::CHALLENGE_RESPONSE,
            Bytes::from_static(br#"{"connectionRes":"1"}"#),
        );
        stub.respond(opcode::SET_RESOLUTION, Bytes::from_static(&[1, 120, 0]));

        let session = Arc::new(Session::new(
            stub.clone() as Arc<dyn TransportBinding>,
            testing::account(),
            testing::camera(),
            options,
        ));
        session.connect().await.unwrap();
        session.authenticate().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_valid_frames_deliver_before_the_first_keyframe() {
        let stub = StubTransport::shared();
        let now = crate::session::unix_now();
        // Stale enough that an engaged sync engine would clear the buffer
        stub.push_video(Ok(testing::video_frame(0, false, now - 6.0)));
        stub.push_video(Ok(testing::video_frame(0, true, now)));
        let session = live_session(&stub, SessionOptions::default()).await;

        let mut stream = VideoStream::with_default_predicate(Arc::clone(&session));

        // Nothing is withheld while waiting for a keyframe
        let (_, info) = stream.next().await.unwrap().unwrap();
        assert!(!info.is_keyframe);
        // Sync corrections only engage once the keyframe arrives
        assert_eq!(stub.buffers_cleared(), 0);

        let (_, info) = stream.next().await.unwrap().unwrap();
        assert!(info.is_keyframe);
        assert_eq!(stream.health().frames_delivered(), 2);
    }

    #[tokio::test]
    async fn test_audio_transport_error_parks_the_session() {
        let stub = StubTransport::shared();
        stub.push_audio(Err(Error::transport(
            crate::transport::status::AV_ER_SESSION_CLOSED_BY_REMOTE,
        )));
        let session = live_session(&stub, SessionOptions::default()).await;

        let mut stream = AudioStream::with_default_predicate(Arc::clone(&session));
        assert!(stream.next().await.unwrap_err().is_transport());
        // The parked state is what stops the video loop too
        assert_eq!(session.state(), SessionState::ConnectingFailed);
    }

    #[tokio::test]
    async fn test_audio_stream_parks_the_session_on_exit() {
        let stub = StubTransport::shared();
        let session = live_session(&stub, SessionOptions::default()).await;

        let mut stream = AudioStream::new(Arc::clone(&session), Box::new(|| false));
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(session.state(), SessionState::ConnectingFailed);
    }

    #[tokio::test]
    async fn test_bad_geometry_renegotiates_once_and_resumes() {
        let stub = StubTransport::shared();
        let now = crate::session::unix_now();
        stub.push_video(Ok(testing::video_frame(0, true, now)));
        // Geometry nobody asked for (valid set is {0, 3})
        stub.push_video(Ok(testing::video_frame(1, true, now)));
        stub.push_video(Ok(testing::video_frame(0, true, now)));
        let session = live_session(&stub, SessionOptions::default()).await;

        let mut stream = VideoStream::with_default_predicate(session);
        let baseline = stub.count_sent(opcode::SET_RESOLUTION);

        stream.next().await.unwrap().unwrap();
        let (_, info) = stream.next().await.unwrap().unwrap();
        assert_eq!(info.frame_size, 0);

        assert_eq!(stub.count_sent(opcode::SET_RESOLUTION), baseline + 1);
        assert_eq!(stream.health().renegotiations(), 1);
        assert_eq!(stream.health().frames_delivered(), 2);
    }

    #[tokio::test]
    async fn test_video_stops_when_predicate_clears() {
        let stub = StubTransport::shared();
        let session = live_session(&stub, SessionOptions::default()).await;

        let stop = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&stop);
        let mut stream = VideoStream::new(
            Arc::clone(&session),
            Box::new(move || flag.load(Ordering::SeqCst)),
        );
        stop.store(false, Ordering::SeqCst);

        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(session.state(), SessionState::ConnectingFailed);
    }

    #[tokio::test]
    async fn test_video_transport_error_parks_the_session() {
        let stub = StubTransport::shared();
        stub.push_video(Err(Error::transport(
            crate::transport::status::AV_ER_SESSION_CLOSED_BY_REMOTE,
        )));
        let session = live_session(&stub, SessionOptions::default()).await;

        let mut stream = VideoStream::with_default_predicate(Arc::clone(&session));
        assert!(stream.next().await.unwrap_err().is_transport());
        assert_eq!(session.state(), SessionState::ConnectingFailed);
    }

    #[tokio::test]
    async fn test_watchdog_renegotiates_then_fails_hard() {
        let stub = StubTransport::shared();
        let options = SessionOptions {
            connect_timeout: Duration::from_millis(50),
            ..SessionOptions::default()
        };
        let session = live_session(&stub, options).await;

        let mut stream = VideoStream::with_default_predicate(Arc::clone(&session));
        let baseline = stub.count_sent(opcode::SET_RESOLUTION);

        let err = stream.next().await.unwrap_err();
        assert!(matches!(err, Error::Timing(_)));
        // One renegotiation attempt before giving up
        assert_eq!(stub.count_sent(opcode::SET_RESOLUTION), baseline + 1);
        assert_eq!(session.state(), SessionState::ConnectingFailed);
    }

    #[tokio::test]
    async fn test_audio_frames_flow() {
        let stub = StubTransport::shared();
        let now = crate::session::unix_now();
        stub.push_video(Ok(testing::video_frame(0, true, now)));
        stub.push_audio(Ok(testing::audio_frame(137, now)));
        let session = live_session(&stub, SessionOptions::default()).await;

        // Seed the video clock so the audio gap is well defined
        let mut video = VideoStream::with_default_predicate(Arc::clone(&session));
        video.next().await.unwrap().unwrap();

        let mut audio = AudioStream::with_default_predicate(session);
        let (_, info) = audio.next().await.unwrap().unwrap();
        assert_eq!(info.codec_id, 137);
    }
}
