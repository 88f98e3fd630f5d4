// SPDX-License-Identifier: GPL-3.0-only

//! Software raster graphics backend
//!
//! Frame sources publish RGBA images into [`ExternalTextures`]; the registry
//! is what a raster [`SharedContext`] carries. A [`RasterContext`] blits the
//! selected texture onto a CPU framebuffer sized to the encoder surface,
//! sampling through the frame transform with nearest filtering, and presents
//! the framebuffer to the surface on swap.

use super::{GraphicsBackend, GraphicsContext, SharedContext, TextureId, Transform};
use crate::errors::RenderError;
use crate::media::encoders::InputSurface;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

/// One RGBA image
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

/// Texture registry shared between a frame source and the raster contexts
#[derive(Debug, Clone, Default)]
pub struct ExternalTextures {
    textures: Arc<RwLock<HashMap<TextureId, TextureImage>>>,
}

impl ExternalTextures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new image for `id`, replacing the previous one
    pub fn update(&self, id: TextureId, width: u32, height: u32, rgba: Vec<u8>) {
        let image = TextureImage {
            width,
            height,
            rgba: Arc::new(rgba),
        };
        self.textures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, image);
    }

    pub fn get(&self, id: TextureId) -> Option<TextureImage> {
        self.textures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Wrap the registry as a shared context handle
    pub fn shared_context(&self, id: u64) -> SharedContext {
        SharedContext::new(id, self.clone())
    }
}

/// Backend producing [`RasterContext`]s
#[derive(Debug, Default)]
pub struct RasterGraphics;

impl GraphicsBackend for RasterGraphics {
    fn create_context(
        &self,
        shared: &SharedContext,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        let textures = shared.downcast_ref::<ExternalTextures>().ok_or_else(|| {
            RenderError::ContextCreation(format!(
                "context {} is not a raster texture registry",
                shared.id()
            ))
        })?;
        debug!(shared = shared.id(), "Created raster context");
        Ok(Box::new(RasterContext::new(textures.clone())))
    }
}

struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// CPU rendering context
pub struct RasterContext {
    textures: ExternalTextures,
    surface: Option<InputSurface>,
    framebuffer: Option<Framebuffer>,
    presentation_time_ns: i64,
}

impl RasterContext {
    pub fn new(textures: ExternalTextures) -> Self {
        Self {
            textures,
            surface: None,
            framebuffer: None,
            presentation_time_ns: 0,
        }
    }
}

impl GraphicsContext for RasterContext {
    fn bind_surface(&mut self, surface: InputSurface) -> Result<(), RenderError> {
        let (width, height) = surface.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::SurfaceBinding(format!(
                "surface has no area ({}x{})",
                width, height
            )));
        }
        self.surface = Some(surface);
        Ok(())
    }

    fn prepare_blit(&mut self) -> Result<(), RenderError> {
        let (width, height) = self
            .surface
            .as_ref()
            .ok_or(RenderError::NoSurface)?
            .dimensions();
        self.framebuffer = Some(Framebuffer {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        });
        Ok(())
    }

    fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> Result<(), RenderError> {
        let framebuffer = self.framebuffer.as_mut().ok_or(RenderError::NoSurface)?;
        let image = self
            .textures
            .get(texture)
            .ok_or_else(|| RenderError::DrawFailed(format!("texture {} not found", texture)))?;
        blit(&image, transform, framebuffer);
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.presentation_time_ns = timestamp_ns;
    }

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        let surface = self.surface.as_ref().ok_or(RenderError::NoSurface)?;
        let framebuffer = self.framebuffer.as_ref().ok_or(RenderError::NoSurface)?;
        surface
            .queue_frame(&framebuffer.pixels, self.presentation_time_ns)
            .map_err(|e| RenderError::DrawFailed(e.to_string()))?;
        trace!(ts_ns = self.presentation_time_ns, "Presented frame");
        Ok(())
    }

    fn release_surface(&mut self) {
        self.framebuffer = None;
        self.surface = None;
    }

    fn release(&mut self) {
        self.release_surface();
        debug!("Released raster context");
    }
}

/// Map texture coordinates through a column-major 4x4 matrix
fn apply_transform(m: &Transform, s: f32, t: f32) -> (f32, f32) {
    let x = m[0] * s + m[4] * t + m[12];
    let y = m[1] * s + m[5] * t + m[13];
    let w = m[3] * s + m[7] * t + m[15];
    if w != 0.0 && w != 1.0 {
        (x / w, y / w)
    } else {
        (x, y)
    }
}

fn blit(image: &TextureImage, transform: &Transform, target: &mut Framebuffer) {
    let expected = image.width as usize * image.height as usize * 4;
    if image.width == 0 || image.height == 0 || image.rgba.len() < expected {
        target.pixels.fill(0);
        return;
    }

    let src_w = image.width as usize;
    let src_h = image.height as usize;

    for y in 0..target.height as usize {
        let t = (y as f32 + 0.5) / target.height as f32;
        for x in 0..target.width as usize {
            let s = (x as f32 + 0.5) / target.width as f32;
            let (u, v) = apply_transform(transform, s, t);

            let sx = ((u * src_w as f32).floor() as isize).clamp(0, src_w as isize - 1) as usize;
            let sy = ((v * src_h as f32).floor() as isize).clamp(0, src_h as isize - 1) as usize;

            let src = (sy * src_w + sx) * 4;
            let dst = (y * target.width as usize + x) * 4;
            target.pixels[dst..dst + 4].copy_from_slice(&image.rgba[src..src + 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EncoderError;
    use crate::gpu::IDENTITY_TRANSFORM;
    use crate::media::encoders::SurfaceTarget;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSurface {
        frames: Mutex<Vec<(Vec<u8>, i64)>>,
    }

    impl SurfaceTarget for CaptureSurface {
        fn dimensions(&self) -> (u32, u32) {
            (2, 2)
        }
        fn queue_frame(&self, rgba: &[u8], timestamp_ns: i64) -> Result<(), EncoderError> {
            self.frames.lock().unwrap().push((rgba.to_vec(), timestamp_ns));
            Ok(())
        }
    }

    fn checker() -> Vec<u8> {
        // 2x2: red, green / blue, white
        vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ]
    }

    fn context(textures: &ExternalTextures) -> (Box<dyn GraphicsContext>, Arc<CaptureSurface>) {
        let surface = Arc::new(CaptureSurface::default());
        let mut ctx = RasterGraphics
            .create_context(&textures.shared_context(1))
            .unwrap();
        ctx.bind_surface(InputSurface::new(surface.clone())).unwrap();
        ctx.prepare_blit().unwrap();
        (ctx, surface)
    }

    #[test]
    fn test_identity_blit_copies_texture() {
        let textures = ExternalTextures::new();
        textures.update(7, 2, 2, checker());
        let (mut ctx, surface) = context(&textures);

        ctx.draw_frame(7, &IDENTITY_TRANSFORM).unwrap();
        ctx.set_presentation_time(1_000);
        ctx.swap_buffers().unwrap();

        let frames = surface.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, checker());
        assert_eq!(frames[0].1, 1_000);
    }

    #[test]
    fn test_transform_flips_vertically() {
        let textures = ExternalTextures::new();
        textures.update(7, 2, 2, checker());
        let (mut ctx, surface) = context(&textures);

        // t' = 1 - t
        let mut flip = IDENTITY_TRANSFORM;
        flip[5] = -1.0;
        flip[13] = 1.0;
        ctx.draw_frame(7, &flip).unwrap();
        ctx.swap_buffers().unwrap();

        let frames = surface.frames.lock().unwrap();
        let expected = vec![
            0, 0, 255, 255, 255, 255, 255, 255, //
            255, 0, 0, 255, 0, 255, 0, 255,
        ];
        assert_eq!(frames[0].0, expected);
    }

    #[test]
    fn test_missing_texture_fails() {
        let textures = ExternalTextures::new();
        let (mut ctx, _surface) = context(&textures);
        assert!(matches!(
            ctx.draw_frame(3, &IDENTITY_TRANSFORM),
            Err(RenderError::DrawFailed(_))
        ));
    }

    #[test]
    fn test_foreign_shared_context_rejected() {
        let shared = SharedContext::new(9, 42u32);
        assert!(matches!(
            RasterGraphics.create_context(&shared),
            Err(RenderError::ContextCreation(_))
        ));
    }

    #[test]
    fn test_draw_requires_surface() {
        let mut ctx = RasterContext::new(ExternalTextures::new());
        assert_eq!(
            ctx.draw_frame(0, &IDENTITY_TRANSFORM),
            Err(RenderError::NoSurface)
        );
    }
}
