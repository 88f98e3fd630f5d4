// SPDX-License-Identifier: MPL-2.0

//! Surface-fed video encode pipeline
//!
//! A dedicated `video-encoder` thread owns the graphics context, the encoder
//! and its input surface. Callers only enqueue [`VideoCommand`]s:
//!
//! ```text
//! start()            ──▶ Start(config, shared context)
//! frame_available()  ──▶ FrameAvailable(transform, ts)   (dropped when 2 are pending)
//! set_texture()      ──▶ SetTexture(id)
//! rebind_context()   ──▶ RebindContext(context)
//! stop()             ──▶ Stop, Quit
//! ```
//!
//! Commands run in order, so `Quit` only ends the thread after a preceding
//! `Stop` has drained and released everything.
//!
//! State: `Idle → Starting → Running → Stopping → Released`

mod worker;

use crate::config::SessionConfig;
use crate::constants::MAX_PENDING_FRAMES;
use crate::errors::{PipelineError, RecorderError, RecorderResult};
use crate::gpu::{GraphicsBackend, SharedContext, TextureId, Transform};
use crate::media::encoders::EncoderFactory;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Sender, channel, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace};
use worker::VideoWorker;

/// Video pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No session
    #[default]
    Idle,
    /// Start queued, encoder and context not built yet
    Starting,
    /// Encoding frames
    Running,
    /// Draining and releasing
    Stopping,
    /// Everything released
    Released,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Parameters of a `Start` command
#[derive(Clone)]
pub struct VideoStartParams {
    pub config: Arc<SessionConfig>,
    pub shared_context: SharedContext,
}

/// Commands processed by the video thread, in FIFO order
pub enum VideoCommand {
    Start(VideoStartParams),
    Stop,
    FrameAvailable {
        transform: Transform,
        timestamp_ns: i64,
    },
    SetTexture(TextureId),
    RebindContext(SharedContext),
    Quit,
}

impl fmt::Debug for VideoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCommand::Start(params) => write!(f, "Start({:?})", params.shared_context),
            VideoCommand::Stop => f.write_str("Stop"),
            VideoCommand::FrameAvailable { timestamp_ns, .. } => {
                write!(f, "FrameAvailable({})", timestamp_ns)
            }
            VideoCommand::SetTexture(id) => write!(f, "SetTexture({})", id),
            VideoCommand::RebindContext(ctx) => write!(f, "RebindContext({:?})", ctx),
            VideoCommand::Quit => f.write_str("Quit"),
        }
    }
}

/// State shared between the handle and the thread
#[derive(Default)]
struct Shared {
    state: Mutex<PipelineState>,
    pending_frames: AtomicUsize,
    error: Mutex<Option<RecorderError>>,
    end_of_stream: Arc<AtomicBool>,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!(from = %*current, to = %state, "Video pipeline state");
            *current = state;
        }
    }

    fn record_error(&self, err: RecorderError) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Handle to the video encode thread
pub struct VideoPipeline {
    factory: Arc<dyn EncoderFactory>,
    graphics: Arc<dyn GraphicsBackend>,
    shared: Arc<Shared>,
    sender: Option<Sender<VideoCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl VideoPipeline {
    pub fn new(factory: Arc<dyn EncoderFactory>, graphics: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            factory,
            graphics,
            shared: Arc::new(Shared::default()),
            sender: None,
            thread: None,
        }
    }

    /// Spawn the thread and queue `Start`
    ///
    /// Returns once the thread accepts commands; encoder and context creation
    /// happen afterwards on the thread, and their failures surface through
    /// [`take_error`](Self::take_error).
    pub fn start(
        &mut self,
        config: Arc<SessionConfig>,
        shared_context: SharedContext,
    ) -> RecorderResult<()> {
        match self.shared.state() {
            PipelineState::Idle | PipelineState::Released => {}
            _ => return Err(PipelineError::StillRunning.into()),
        }
        self.join();

        let shared = Arc::new(Shared::default());
        let (tx, rx) = channel();
        let (ready_tx, ready_rx) = sync_channel::<()>(1);
        let worker = VideoWorker::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.graphics),
            Arc::clone(&shared),
        );

        let thread = std::thread::Builder::new()
            .name("video-encoder".to_string())
            .spawn(move || worker.run(rx, ready_tx))
            .map_err(|e| PipelineError::SpawnFailed(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PipelineError::ThreadDied("video-encoder".to_string()))?;

        shared.set_state(PipelineState::Starting);
        tx.send(VideoCommand::Start(VideoStartParams {
            config,
            shared_context,
        }))
        .map_err(|_| PipelineError::NotRunning)?;

        self.shared = shared;
        self.sender = Some(tx);
        self.thread = Some(thread);
        info!("Video pipeline started");
        Ok(())
    }

    fn send(&self, command: VideoCommand) -> bool {
        match &self.sender {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Queue `Stop` followed by `Quit`
    pub fn stop(&mut self) {
        if self.sender.is_none() {
            return;
        }
        debug!("Video stop requested");
        self.send(VideoCommand::Stop);
        self.send(VideoCommand::Quit);
        self.sender = None;
    }

    /// Offer a new frame; dropped silently when the thread is behind
    pub fn frame_available(&self, transform: Transform, timestamp_ns: i64) {
        if self.sender.is_none() {
            return;
        }
        let pending = &self.shared.pending_frames;
        if pending.fetch_add(1, Ordering::SeqCst) >= MAX_PENDING_FRAMES {
            pending.fetch_sub(1, Ordering::SeqCst);
            trace!(timestamp_ns, "Video thread busy, dropping frame");
            return;
        }
        if !self.send(VideoCommand::FrameAvailable {
            transform,
            timestamp_ns,
        }) {
            pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Select the external texture frames are drawn from
    pub fn set_texture(&self, texture: TextureId) {
        self.send(VideoCommand::SetTexture(texture));
    }

    /// Replace the shared context; the old one is torn down first on the thread
    pub fn rebind_context(&self, shared_context: SharedContext) {
        self.send(VideoCommand::RebindContext(shared_context));
    }

    /// Mark the next encoded sample as the end of the stream
    pub fn signal_end_of_stream(&self) {
        self.shared.end_of_stream.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.state() == PipelineState::Running
    }

    /// Join the thread after [`stop`](Self::stop)
    pub fn wait_for_completion(&mut self) {
        self.join();
    }

    /// First fatal error the thread hit, if any
    pub fn take_error(&self) -> Option<RecorderError> {
        self.shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Video thread panicked");
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
