// SPDX-License-Identifier: MPL-2.0

//! Video thread: command loop and session resources

use super::{PipelineState, Shared, VideoCommand, VideoStartParams};
use crate::errors::RecorderResult;
use crate::gpu::{GraphicsBackend, GraphicsContext, SharedContext, TextureId, Transform};
use crate::media::encoders::{EncoderDrain, EncoderFactory, SurfaceEncoder};
use crate::media::sample::StreamKind;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, SyncSender};
use tracing::{debug, error, info, trace, warn};

/// Everything a running session owns. Only ever touched by the video thread.
struct Session {
    encoder: Box<dyn SurfaceEncoder>,
    drain: EncoderDrain,
    context: Option<Box<dyn GraphicsContext>>,
    frames: u64,
}

pub(super) struct VideoWorker {
    factory: Arc<dyn EncoderFactory>,
    graphics: Arc<dyn GraphicsBackend>,
    shared: Arc<Shared>,
    session: Option<Session>,
    texture: TextureId,
}

impl VideoWorker {
    pub(super) fn new(
        factory: Arc<dyn EncoderFactory>,
        graphics: Arc<dyn GraphicsBackend>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            factory,
            graphics,
            shared,
            session: None,
            texture: 0,
        }
    }

    pub(super) fn run(mut self, commands: Receiver<VideoCommand>, ready: SyncSender<()>) {
        let _ = ready.send(());

        while let Ok(command) = commands.recv() {
            trace!(?command, "Video command");
            match self.handle(command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "Video pipeline failed");
                    self.shared.record_error(e);
                    break;
                }
            }
        }

        // Covers errors and a handle dropped without Stop
        if self.session.is_some() {
            self.shutdown();
        }
        self.shared.set_state(PipelineState::Released);
        debug!("Video thread exiting");
    }

    /// Returns `false` when the loop should end
    fn handle(&mut self, command: VideoCommand) -> RecorderResult<bool> {
        match command {
            VideoCommand::Start(params) => self.handle_start(params)?,
            VideoCommand::FrameAvailable {
                transform,
                timestamp_ns,
            } => {
                self.shared.pending_frames.fetch_sub(1, Ordering::SeqCst);
                self.handle_frame(&transform, timestamp_ns)?;
            }
            VideoCommand::SetTexture(texture) => {
                debug!(texture, "Video source texture set");
                self.texture = texture;
            }
            VideoCommand::RebindContext(shared_context) => self.handle_rebind(&shared_context)?,
            VideoCommand::Stop => {
                if self.session.is_some() {
                    self.shutdown();
                } else {
                    debug!("Stop without an active session");
                }
            }
            VideoCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn handle_start(&mut self, params: VideoStartParams) -> RecorderResult<()> {
        if self.session.is_some() {
            warn!("Start ignored, a session is already running");
            return Ok(());
        }

        let video = params.config.video();
        let mut encoder = self.factory.create_video_encoder(video)?;

        let context = match create_context(
            self.graphics.as_ref(),
            &params.shared_context,
            encoder.as_ref(),
        ) {
            Ok(context) => context,
            Err(e) => {
                encoder.release();
                return Err(e);
            }
        };

        let drain = EncoderDrain::with_end_of_stream_flag(
            StreamKind::Video,
            params.config.muxer().clone(),
            Arc::clone(&self.shared.end_of_stream),
        );

        self.session = Some(Session {
            encoder,
            drain,
            context: Some(context),
            frames: 0,
        });
        self.shared.set_state(PipelineState::Running);
        info!(
            width = video.width,
            height = video.height,
            bitrate = video.bitrate,
            shared_context = params.shared_context.id(),
            "Video encoding started"
        );
        Ok(())
    }

    fn handle_frame(&mut self, transform: &Transform, timestamp_ns: i64) -> RecorderResult<()> {
        if timestamp_ns == 0 {
            // Seen after device sleep/wake; the frame carries no usable time
            debug!("Dropping frame with zero timestamp");
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            trace!(timestamp_ns, "Frame without an active session");
            return Ok(());
        };
        let Some(context) = session.context.as_mut() else {
            trace!(timestamp_ns, "Frame without a graphics context");
            return Ok(());
        };

        // Keep the encoder from backing up before feeding it more
        session.drain.drain(session.encoder.as_mut(), false)?;

        context.draw_frame(self.texture, transform)?;
        context.set_presentation_time(timestamp_ns);
        context.swap_buffers()?;
        session.frames += 1;
        Ok(())
    }

    fn handle_rebind(&mut self, shared_context: &SharedContext) -> RecorderResult<()> {
        let Some(session) = self.session.as_mut() else {
            debug!(shared_context = shared_context.id(), "Rebind without an active session");
            return Ok(());
        };

        // The old context goes away completely before the new one exists
        if let Some(mut old) = session.context.take() {
            old.release_surface();
            old.release();
        }

        session.context = Some(create_context(
            self.graphics.as_ref(),
            shared_context,
            session.encoder.as_ref(),
        )?);
        info!(shared_context = shared_context.id(), "Video context rebound");
        Ok(())
    }

    /// Drain to end of stream and release encoder, surface and context
    fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.shared.set_state(PipelineState::Stopping);

        match session.drain.finish(session.encoder.as_mut()) {
            Ok(outcome) => debug!(?outcome, frames = session.frames, "Video stream finished"),
            Err(e) => {
                error!(error = %e, "Final video drain failed");
                self.shared.record_error(e);
            }
        }
        session.drain.release(session.encoder.as_mut());

        if let Some(mut context) = session.context.take() {
            context.release_surface();
            context.release();
        }
        self.shared.set_state(PipelineState::Released);
        info!(frames = session.frames, "Video encoding stopped");
    }
}

/// Build a context against `shared_context` drawing into the encoder's surface
fn create_context(
    graphics: &dyn GraphicsBackend,
    shared_context: &SharedContext,
    encoder: &dyn SurfaceEncoder,
) -> RecorderResult<Box<dyn GraphicsContext>> {
    let mut context = graphics.create_context(shared_context)?;
    let bound = context
        .bind_surface(encoder.input_surface())
        .and_then(|()| context.prepare_blit());
    if let Err(e) = bound {
        context.release();
        return Err(e.into());
    }
    Ok(context)
}
