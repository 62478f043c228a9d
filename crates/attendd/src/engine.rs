use attend_core::{
    AttendanceRecord, CaptureCompletion, CaptureRequest, CaptureTicket, CommandError, FaceCounter,
    Generation, Recognizer, SessionMachine, SessionSnapshot, TickOutcome,
};
use attend_hw::{MediaError, MediaSource, StreamInfo};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

const NOTICE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),
    #[error("{0}")]
    Rejected(#[from] CommandError),
    #[error("start already in progress")]
    StartInProgress,
    #[error("start cancelled")]
    StartCancelled,
    #[error("engine task exited")]
    ChannelClosed,
}

/// Timing of the detection cycle and capture processing.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub capture_delay: Duration,
}

/// Acknowledgement of a capture command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureAck {
    Started,
    AlreadyInFlight,
}

/// User-facing notifications broadcast to presentation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notice {
    Activated { stream: StreamInfo },
    Deactivated,
    MediaUnavailable { reason: String },
    AttendanceMarked { record: AttendanceRecord },
}

/// Operator intents sent from presentation to the engine task.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<StreamInfo, EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<CaptureAck, EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Ledger {
        reply: oneshot::Sender<Vec<AttendanceRecord>>,
    },
}

/// Results posted back by tasks the engine spawned.
enum EngineEvent {
    Acquired {
        attempt: u64,
        result: Result<StreamInfo, MediaError>,
    },
    Tick {
        generation: Generation,
        faces: u32,
    },
    CaptureElapsed {
        ticket: CaptureTicket,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    /// Acquire the camera and start the detection cycle.
    pub async fn start(&self) -> Result<StreamInfo, EngineError> {
        self.call(|reply| EngineRequest::Start { reply }).await?
    }

    /// Stop the detection cycle and release the camera.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Stop { reply }).await?
    }

    /// Mark attendance for the current recognition candidate.
    pub async fn capture(&self) -> Result<CaptureAck, EngineError> {
        self.call(|reply| EngineRequest::Capture { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.call(|reply| EngineRequest::Snapshot { reply }).await
    }

    /// Copy of every attendance record so far, in capture order.
    pub async fn ledger(&self) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::Ledger { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

struct PendingStart {
    attempt: u64,
    reply: oneshot::Sender<Result<StreamInfo, EngineError>>,
}

/// Event loop owning the session. Each request or event is handled to
/// completion before the next is taken.
struct Engine<M: MediaSource, R> {
    media: Arc<M>,
    counter: Arc<Mutex<Box<dyn FaceCounter>>>,
    machine: SessionMachine<R>,
    settings: EngineSettings,
    events: mpsc::UnboundedSender<EngineEvent>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    notices: broadcast::Sender<Notice>,
    ticker: Option<JoinHandle<()>>,
    pending_start: Option<PendingStart>,
    /// Attempt whose acquisition has not reported back yet. At most one
    /// acquisition runs at a time, even across a cancelled start.
    acquiring: Option<u64>,
    next_attempt: u64,
    media_held: bool,
}

/// Spawn the session engine on the current tokio runtime.
///
/// The engine runs until every [`EngineHandle`] is dropped; the camera is
/// released on the way out if a session is still active.
pub fn spawn_engine<M, R>(
    media: M,
    counter: impl FaceCounter + 'static,
    recognizer: R,
    settings: EngineSettings,
) -> EngineHandle
where
    M: MediaSource,
    R: Recognizer + 'static,
{
    let (engine, handle, requests) = Engine::new(media, counter, recognizer, settings);

    tracing::info!(
        tick_ms = settings.tick_interval.as_millis() as u64,
        capture_delay_ms = settings.capture_delay.as_millis() as u64,
        "engine started"
    );
    tokio::spawn(engine.run(requests));

    handle
}

impl<M, R> Engine<M, R>
where
    M: MediaSource,
    R: Recognizer + 'static,
{
    fn new(
        media: M,
        counter: impl FaceCounter + 'static,
        recognizer: R,
        settings: EngineSettings,
    ) -> (Self, EngineHandle, mpsc::Receiver<EngineRequest>) {
        let (tx, requests) = mpsc::channel(16);
        let (events, event_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let engine = Engine {
            media: Arc::new(media),
            counter: Arc::new(Mutex::new(Box::new(counter))),
            machine: SessionMachine::new(recognizer),
            settings,
            events,
            event_rx,
            notices: notices.clone(),
            ticker: None,
            pending_start: None,
            acquiring: None,
            next_attempt: 1,
            media_held: false,
        };
        (engine, EngineHandle { tx, notices }, requests)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<EngineRequest>) {
        loop {
            tokio::select! {
                biased;
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = self.event_rx.recv() => self.handle_event(event),
            }
        }
        tracing::info!("engine exiting");
    }

    fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Start { reply } => self.begin_start(reply),
            EngineRequest::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            EngineRequest::Capture { reply } => {
                let _ = reply.send(self.capture());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.machine.snapshot());
            }
            EngineRequest::Ledger { reply } => {
                let _ = reply.send(self.machine.ledger().all().to_vec());
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Acquired { attempt, result } => self.finish_start(attempt, result),
            EngineEvent::Tick { generation, faces } => {
                if let TickOutcome::Dropped = self.machine.on_detection_tick(generation, faces) {
                    tracing::trace!(generation, "late tick ignored");
                }
            }
            EngineEvent::CaptureElapsed { ticket } => {
                if let CaptureCompletion::Committed(record) =
                    self.machine.complete_capture(ticket, Utc::now())
                {
                    self.notify(Notice::AttendanceMarked { record });
                }
            }
        }
    }

    /// Kick off media acquisition. The reply is sent from `finish_start`.
    fn begin_start(&mut self, reply: oneshot::Sender<Result<StreamInfo, EngineError>>) {
        if self.pending_start.is_some() {
            let _ = reply.send(Err(EngineError::StartInProgress));
            return;
        }
        if self.machine.is_active() {
            tracing::warn!("start rejected: already active");
            let _ = reply.send(Err(CommandError::AlreadyActive.into()));
            return;
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.pending_start = Some(PendingStart { attempt, reply });

        match self.acquiring {
            Some(cancelled) => {
                tracing::debug!(attempt, cancelled, "waiting for cancelled acquisition");
            }
            None => self.spawn_acquire(attempt),
        }
    }

    /// Run one acquisition. The result always comes back as an `Acquired`
    /// event; if the engine is gone by then, the stream is released here.
    fn spawn_acquire(&mut self, attempt: u64) {
        self.acquiring = Some(attempt);
        let media = Arc::clone(&self.media);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = media.acquire().await;
            if let Err(mpsc::error::SendError(EngineEvent::Acquired { result: Ok(_), .. })) =
                events.send(EngineEvent::Acquired { attempt, result })
            {
                tracing::info!(attempt, "engine gone; releasing camera");
                media.release();
            }
        });
        tracing::debug!(attempt, "acquiring camera");
    }

    fn finish_start(&mut self, attempt: u64, result: Result<StreamInfo, MediaError>) {
        if self.acquiring == Some(attempt) {
            self.acquiring = None;
        }

        let pending = match self.pending_start.take() {
            Some(pending) if pending.attempt == attempt => pending,
            other => {
                self.pending_start = other;
                if result.is_ok() {
                    tracing::debug!(attempt, "acquisition finished after cancel; releasing");
                    self.media.release();
                }
                // A start issued while this one was winding down.
                if let Some(next) = self.pending_start.as_ref().map(|p| p.attempt) {
                    self.spawn_acquire(next);
                }
                return;
            }
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "camera acquisition failed");
                self.notify(Notice::MediaUnavailable {
                    reason: err.to_string(),
                });
                let _ = pending.reply.send(Err(err.into()));
                return;
            }
        };

        let generation = match self.machine.activate() {
            Ok(generation) => generation,
            Err(err) => {
                self.media.release();
                let _ = pending.reply.send(Err(err.into()));
                return;
            }
        };
        self.media_held = true;
        self.spawn_ticker(generation);

        self.notify(Notice::Activated {
            stream: stream.clone(),
        });
        let _ = pending.reply.send(Ok(stream));
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        // The acquisition keeps running; its stream is released in
        // `finish_start` once it reports back.
        if let Some(pending) = self.pending_start.take() {
            tracing::info!(attempt = pending.attempt, "start cancelled");
            let _ = pending.reply.send(Err(EngineError::StartCancelled));
            return Ok(());
        }

        let generation = self.machine.generation();
        if let Err(err) = self.machine.deactivate() {
            tracing::warn!(error = %err, "stop rejected");
            return Err(err.into());
        }
        tracing::info!(generation, "session stopped");
        self.cancel_ticker();
        self.release_media();
        self.notify(Notice::Deactivated);
        Ok(())
    }

    fn capture(&mut self) -> Result<CaptureAck, EngineError> {
        let ticket = match self.machine.request_capture() {
            Ok(CaptureRequest::Started(ticket)) => ticket,
            Ok(CaptureRequest::AlreadyInFlight) => {
                tracing::debug!("capture already in flight; ignoring");
                return Ok(CaptureAck::AlreadyInFlight);
            }
            Err(err) => {
                tracing::warn!(error = %err, "capture rejected");
                return Err(err.into());
            }
        };

        let delay = self.settings.capture_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(EngineEvent::CaptureElapsed { ticket });
        });
        Ok(CaptureAck::Started)
    }

    /// Sample the face counter once per tick interval, first sample one
    /// interval after activation.
    fn spawn_ticker(&mut self, generation: Generation) {
        self.cancel_ticker();

        let period = self.settings.tick_interval;
        let counter = Arc::clone(&self.counter);
        let events = self.events.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let faces = counter.lock().await.sample();
                if events.send(EngineEvent::Tick { generation, faces }).is_err() {
                    break;
                }
            }
        }));
        tracing::debug!(generation, "detection ticker started");
    }

    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
            tracing::debug!("detection ticker stopped");
        }
    }

    fn release_media(&mut self) {
        if self.media_held {
            self.media.release();
            self.media_held = false;
        }
    }

    fn notify(&self, notice: Notice) {
        // Err only means nobody is subscribed.
        let _ = self.notices.send(notice);
    }
}

impl<M: MediaSource, R> Drop for Engine<M, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        // Acquisitions that finished but were never processed still hold
        // the camera. Later ones see the closed channel and release it.
        self.event_rx.close();
        while let Ok(event) = self.event_rx.try_recv() {
            if let EngineEvent::Acquired { result: Ok(_), attempt } = event {
                tracing::info!(attempt, "releasing unclaimed acquisition on teardown");
                self.media.release();
            }
        }
        if self.media_held {
            tracing::info!("releasing camera on engine teardown");
            self.media.release();
            self.media_held = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::{AttendanceStatus, ScriptedFaceCounter, ScriptedRecognizer, SessionPhase};
    use attend_hw::SimulatedCamera;

    fn settings() -> EngineSettings {
        EngineSettings {
            tick_interval: Duration::from_secs(1),
            capture_delay: Duration::from_secs(2),
        }
    }

    fn engine(
        cam: &SimulatedCamera,
        faces: impl IntoIterator<Item = u32>,
        identity: &str,
        confidence: u8,
    ) -> EngineHandle {
        spawn_engine(
            cam.clone(),
            ScriptedFaceCounter::new(faces),
            ScriptedRecognizer::always(identity, confidence),
            settings(),
        )
    }

    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_marks_attendance() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [2], "Alice", 90);
        let mut notices = handle.subscribe();

        let stream = handle.start().await.unwrap();
        assert_eq!(stream.device, "simulated");
        assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::ActiveIdle);

        advance(1_100).await;
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, SessionPhase::ActiveCandidate);
        assert_eq!(snap.detected_face_count, 2);
        assert_eq!(snap.candidate.unwrap().identity, "Alice");

        assert_eq!(handle.capture().await.unwrap(), CaptureAck::Started);
        assert!(handle.snapshot().await.unwrap().capturing);
        assert!(handle.ledger().await.unwrap().is_empty());

        advance(2_100).await;
        let ledger = handle.ledger().await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].name, "Alice");
        assert_eq!(ledger[0].status, AttendanceStatus::Present);
        assert!((ledger[0].confidence.unwrap() - 0.90).abs() < 1e-6);
        assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::ActiveCandidate);

        assert!(matches!(notices.try_recv(), Ok(Notice::Activated { .. })));
        match notices.try_recv() {
            Ok(Notice::AttendanceMarked { record }) => assert_eq!(record, ledger[0]),
            other => panic!("expected attendance notice, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_with_no_faces_rejected() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [0], "Alice", 90);
        handle.start().await.unwrap();

        advance(1_100).await;
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, SessionPhase::ActiveIdle);
        assert!(snap.candidate.is_none());

        let err = handle.capture().await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(CommandError::NoFacesDetected)));
        assert_eq!(err.to_string(), "no faces detected");

        advance(3_000).await;
        assert!(handle.ledger().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_while_inactive_rejected() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        let err = handle.capture().await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(CommandError::NotActive)));
        assert_eq!(err.to_string(), "system not active");
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_capture_single_entry() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        handle.start().await.unwrap();
        advance(1_100).await;

        assert_eq!(handle.capture().await.unwrap(), CaptureAck::Started);
        assert_eq!(handle.capture().await.unwrap(), CaptureAck::AlreadyInFlight);

        advance(2_100).await;
        assert_eq!(handle.ledger().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_capture_discards() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "unknown", 75);
        handle.start().await.unwrap();
        advance(1_100).await;

        assert_eq!(handle.capture().await.unwrap(), CaptureAck::Started);
        handle.stop().await.unwrap();

        advance(3_000).await;
        assert!(handle.ledger().await.unwrap().is_empty());
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, SessionPhase::Inactive);
        assert!(!snap.capturing);
        assert_eq!(cam.releases(), 1);
        assert!(!cam.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [3], "Alice", 90);
        handle.start().await.unwrap();
        advance(1_100).await;
        assert_eq!(handle.snapshot().await.unwrap().detected_face_count, 3);

        handle.stop().await.unwrap();
        advance(5_000).await;
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.phase, SessionPhase::Inactive);
        assert_eq!(snap.detected_face_count, 0);
        assert!(snap.candidate.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_from_previous_session_never_commits() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        handle.start().await.unwrap();
        advance(1_100).await;
        handle.capture().await.unwrap();

        handle.stop().await.unwrap();
        handle.start().await.unwrap();
        advance(2_500).await;

        assert!(handle.ledger().await.unwrap().is_empty());
        let snap = handle.snapshot().await.unwrap();
        assert!(snap.active);
        assert!(!snap.capturing);
        assert_eq!(cam.acquisitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_unavailable_then_retry() {
        let cam = SimulatedCamera::default();
        cam.set_available(false);
        let handle = engine(&cam, [1], "Alice", 90);
        let mut notices = handle.subscribe();

        let err = handle.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MediaUnavailable(MediaError::PermissionDenied(_))
        ));
        assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::Inactive);
        assert!(matches!(notices.try_recv(), Ok(Notice::MediaUnavailable { .. })));

        advance(2_000).await;
        assert_eq!(handle.snapshot().await.unwrap().detected_face_count, 0);

        cam.set_available(true);
        handle.start().await.unwrap();
        assert!(handle.snapshot().await.unwrap().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_rejected() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        handle.start().await.unwrap();
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(CommandError::AlreadyActive)));
        assert_eq!(cam.acquisitions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_inactive_rejected() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        let err = handle.stop().await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected(CommandError::NotActive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_start() {
        let cam = SimulatedCamera::default().with_latency(Duration::from_millis(500));
        let handle = engine(&cam, [1], "Alice", 90);

        let starter = handle.clone();
        let start = tokio::spawn(async move { starter.start().await });
        advance(10).await;

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::StartInProgress));

        handle.stop().await.unwrap();
        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::StartCancelled));

        advance(1_000).await;
        assert_eq!(handle.snapshot().await.unwrap().phase, SessionPhase::Inactive);
        assert_eq!(cam.acquisitions(), 1);
        assert_eq!(cam.releases(), 1);
        assert!(!cam.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_cancel_waits_for_release() {
        let cam = SimulatedCamera::default().with_latency(Duration::from_millis(500));
        let handle = engine(&cam, [1], "Alice", 90);

        let starter = handle.clone();
        let first = tokio::spawn(async move { starter.start().await });
        advance(10).await;
        handle.stop().await.unwrap();
        assert!(matches!(
            first.await.unwrap(),
            Err(EngineError::StartCancelled)
        ));

        let stream = handle.start().await.unwrap();
        assert_eq!(stream.device, "simulated");
        assert!(handle.snapshot().await.unwrap().active);
        assert!(cam.is_held());
        assert_eq!(cam.acquisitions(), 2);
        assert_eq!(cam.releases(), 1);
    }

    fn bare_engine(cam: &SimulatedCamera) -> Engine<SimulatedCamera, ScriptedRecognizer> {
        let (engine, _handle, _requests) = Engine::new(
            cam.clone(),
            ScriptedFaceCounter::new([1]),
            ScriptedRecognizer::always("Alice", 90),
            settings(),
        );
        engine
    }

    /// Process queued task events the way the run loop would.
    async fn pump(engine: &mut Engine<SimulatedCamera, ScriptedRecognizer>) {
        for _ in 0..3 {
            advance(10).await;
            while let Ok(event) = engine.event_rx.try_recv() {
                engine.handle_event(event);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_with_cancelled_acquisition_queued() {
        let cam = SimulatedCamera::default();
        let mut engine = bare_engine(&cam);

        let (first, mut first_rx) = oneshot::channel();
        engine.begin_start(first);
        advance(10).await;
        assert!(cam.is_held());

        engine.stop().unwrap();
        assert!(matches!(
            first_rx.try_recv(),
            Ok(Err(EngineError::StartCancelled))
        ));

        let (second, mut second_rx) = oneshot::channel();
        engine.begin_start(second);
        advance(10).await;
        assert_eq!(cam.acquisitions(), 1);

        pump(&mut engine).await;
        assert!(matches!(second_rx.try_recv(), Ok(Ok(_))));
        assert!(engine.machine.is_active());
        assert!(cam.is_held());
        assert_eq!(cam.acquisitions(), 2);
        assert_eq!(cam.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_unprocessed_acquisition() {
        let cam = SimulatedCamera::default();
        let mut engine = bare_engine(&cam);

        let (reply, _reply_rx) = oneshot::channel();
        engine.begin_start(reply);
        advance(10).await;
        assert!(cam.is_held());

        drop(engine);
        assert!(!cam.is_held());
        assert_eq!(cam.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_mid_acquisition_releases_on_completion() {
        let cam = SimulatedCamera::default().with_latency(Duration::from_millis(500));
        let mut engine = bare_engine(&cam);

        let (reply, _reply_rx) = oneshot::channel();
        engine.begin_start(reply);
        advance(10).await;
        drop(engine);

        advance(1_000).await;
        assert_eq!(cam.acquisitions(), 1);
        assert_eq!(cam.releases(), 1);
        assert!(!cam.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_released_on_teardown() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        handle.start().await.unwrap();
        assert!(cam.is_held());

        drop(handle);
        advance(10).await;
        assert!(!cam.is_held());
        assert_eq!(cam.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_errors_after_engine_gone() {
        let cam = SimulatedCamera::default();
        let handle = engine(&cam, [1], "Alice", 90);
        let (tx, _) = mpsc::channel(1);
        let orphan = EngineHandle {
            tx,
            notices: handle.notices.clone(),
        };
        assert!(matches!(
            orphan.snapshot().await,
            Err(EngineError::ChannelClosed)
        ));
    }
}
