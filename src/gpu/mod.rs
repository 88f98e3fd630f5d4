// SPDX-License-Identifier: GPL-3.0-only

//! Graphics abstractions used by the video pipeline.
//!
//! The video thread never draws on its own; it asks a [`GraphicsContext`] to
//! blit the current external frame onto the encoder's input surface. A
//! context is created from a [`SharedContext`], the opaque handle the preview
//! side hands over so both sides see the same textures.
//!
//! [`raster`] provides a software implementation.

pub mod raster;

use crate::errors::RenderError;
use crate::media::encoders::InputSurface;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Column-major 4x4 texture-coordinate transform
pub type Transform = [f32; 16];

/// Identity transform
pub const IDENTITY_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Name of an external texture inside a shared context
pub type TextureId = u32;

/// Opaque handle to the context the frame source renders with
#[derive(Clone)]
pub struct SharedContext {
    id: u64,
    inner: Arc<dyn Any + Send + Sync>,
}

impl SharedContext {
    pub fn new<T: Any + Send + Sync>(id: u64, inner: T) -> Self {
        Self {
            id,
            inner: Arc::new(inner),
        }
    }

    /// Identifier used in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Backend-specific view of the handle
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedContext({})", self.id)
    }
}

/// Creates contexts that share state with a [`SharedContext`]
pub trait GraphicsBackend: Send + Sync {
    fn create_context(
        &self,
        shared: &SharedContext,
    ) -> Result<Box<dyn GraphicsContext>, RenderError>;
}

/// A rendering context owned by the video thread
pub trait GraphicsContext: Send {
    /// Make `surface` the draw target
    fn bind_surface(&mut self, surface: InputSurface) -> Result<(), RenderError>;

    /// Prepare the full-frame blit for the bound surface
    fn prepare_blit(&mut self) -> Result<(), RenderError>;

    /// Draw external texture `texture` through `transform`
    fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> Result<(), RenderError>;

    /// Stamp the next presented frame
    fn set_presentation_time(&mut self, timestamp_ns: i64);

    /// Present the drawn frame to the surface
    fn swap_buffers(&mut self) -> Result<(), RenderError>;

    /// Drop the surface binding and blit resources
    fn release_surface(&mut self);

    /// Destroy the context
    fn release(&mut self);
}
