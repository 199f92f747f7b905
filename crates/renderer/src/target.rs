use crate::device::{FramebufferId, GraphicsDevice, TextureId};
use crate::error::{PipelineError, PipelineResult};
use crate::scope::{FramebufferScope, TextureScope};
use crate::types::{
    FilterMode, FramebufferStatus, PixelFormat, SamplerParams, Viewport, WrapMode,
};

const TARGET_SAMPLING: SamplerParams = SamplerParams {
    filter: FilterMode::Nearest,
    wrap: WrapMode::ClampToEdge,
};

/// A 2D texture paired with a framebuffer that renders into it.
///
/// The size is a request: storage is (re)allocated lazily by the next
/// operation that needs it, tracked separately for the luminance image
/// ([`upload_data`](Self::upload_data)) and the color attachment
/// ([`bind_as_render_destination`](Self::bind_as_render_destination)).
#[derive(Debug)]
pub struct RenderTarget {
    texture: TextureId,
    framebuffer: FramebufferId,
    width: u32,
    height: u32,
    image_pending: bool,
    framebuffer_pending: bool,
    live: bool,
}

impl RenderTarget {
    pub fn new<D: GraphicsDevice + ?Sized>(device: &mut D) -> Self {
        let texture = device.create_texture();
        {
            let mut scope = TextureScope::bind(device, texture);
            scope.texture_parameters(TARGET_SAMPLING);
        }

        let framebuffer = device.create_framebuffer();
        {
            let mut scope = FramebufferScope::bind(device, framebuffer);
            scope.framebuffer_texture(Some(texture));
        }

        Self {
            texture,
            framebuffer,
            width: 0,
            height: 0,
            image_pending: true,
            framebuffer_pending: true,
            live: true,
        }
    }

    /// Records a new logical size. Returns whether it changed; no GPU work happens here.
    pub fn set_size(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.image_pending = true;
        self.framebuffer_pending = true;
        true
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn image_pending(&self) -> bool {
        self.image_pending
    }

    pub fn framebuffer_pending(&self) -> bool {
        self.framebuffer_pending
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    /// Uploads `width * height` luminance bytes from the front of `bytes`.
    ///
    /// Bytes past the image (a trailing chroma plane, say) are ignored. The
    /// length is checked before anything is bound, so a short buffer leaves
    /// the pending flag untouched.
    pub fn upload_data<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        bytes: &[u8],
    ) -> PipelineResult<()> {
        let expected = PixelFormat::Luminance.image_len(self.width, self.height);
        if bytes.len() < expected {
            return Err(PipelineError::InvalidData {
                expected,
                actual: bytes.len(),
            });
        }
        if expected == 0 {
            return Ok(());
        }

        let pixels = &bytes[..expected];
        let mut scope = TextureScope::bind(device, self.texture);
        if self.image_pending {
            scope.tex_image_2d(PixelFormat::Luminance, self.width, self.height, Some(pixels));
            self.image_pending = false;
            tracing::debug!(
                texture = ?self.texture,
                width = self.width,
                height = self.height,
                "allocated luminance storage"
            );
        } else {
            scope.tex_sub_image_2d(PixelFormat::Luminance, self.width, self.height, pixels);
        }
        Ok(())
    }

    /// Binds the framebuffer for drawing and sets the viewport to the target size.
    ///
    /// Color storage is allocated first if pending; new storage is zero-filled.
    pub fn bind_as_render_destination<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> PipelineResult<()> {
        self.ensure_color_storage(device);

        device.bind_framebuffer(Some(self.framebuffer));
        let status = device.check_framebuffer_status();
        if status != FramebufferStatus::Complete {
            return Err(PipelineError::IncompleteTarget { status });
        }
        device.viewport(Viewport::sized(self.width, self.height));
        Ok(())
    }

    /// Allocates zero-filled RGBA color storage if the size changed since the last allocation.
    pub fn ensure_color_storage<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if !self.framebuffer_pending {
            return;
        }
        let mut scope = TextureScope::bind(device, self.texture);
        scope.tex_image_2d(PixelFormat::Rgba, self.width, self.height, None);
        self.framebuffer_pending = false;
        tracing::debug!(
            texture = ?self.texture,
            width = self.width,
            height = self.height,
            "allocated color storage"
        );
    }

    /// Binds the texture to texture unit `slot`, leaving that unit active.
    pub fn bind_as_sampled_input<D: GraphicsDevice + ?Sized>(&self, device: &mut D, slot: u32) {
        device.set_active_texture_unit(slot);
        device.bind_texture(Some(self.texture));
    }

    /// Binds the display surface as destination with a `width`x`height` viewport.
    pub fn present_to_screen<D: GraphicsDevice + ?Sized>(device: &mut D, width: u32, height: u32) {
        device.bind_framebuffer(None);
        device.viewport(Viewport::sized(width, height));
    }

    pub fn release<D: GraphicsDevice + ?Sized>(mut self, device: &mut D) {
        if device.bound_framebuffer() == Some(self.framebuffer) {
            device.bind_framebuffer(None);
        }
        device.delete_framebuffer(self.framebuffer);
        device.delete_texture(self.texture);
        self.live = false;
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if self.live {
            tracing::warn!(texture = ?self.texture, "render target dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn construction_restores_bindings() {
        let mut device = HeadlessDevice::new();
        let target = RenderTarget::new(&mut device);
        assert_eq!(device.bound_texture(), None);
        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(
            device.texture_sampling(target.texture()),
            Some(TARGET_SAMPLING)
        );
        target.release(&mut device);
    }

    #[test]
    fn resizing_to_the_same_size_is_free() {
        let mut device = HeadlessDevice::new();
        let mut target = RenderTarget::new(&mut device);
        assert!(target.set_size(64, 48));
        target.upload_data(&mut device, &[7; 64 * 48]).unwrap();
        assert!(!target.image_pending());

        assert!(!target.set_size(64, 48));
        assert!(!target.image_pending());
        target.upload_data(&mut device, &[9; 64 * 48]).unwrap();
        assert_eq!(device.allocation_count(target.texture()), 1);
        assert_eq!(device.texture_pixels(target.texture()).unwrap()[0], 9);
        target.release(&mut device);
    }

    #[test]
    fn undersized_upload_is_rejected_before_binding() {
        let mut device = HeadlessDevice::new();
        let mut target = RenderTarget::new(&mut device);
        target.set_size(4, 4);
        let err = target
            .upload_data(&mut device, &[0; 15])
            .expect_err("short buffer");
        assert!(matches!(
            err,
            PipelineError::InvalidData {
                expected: 16,
                actual: 15
            }
        ));
        assert!(target.image_pending());
        assert_eq!(device.allocation_count(target.texture()), 0);
        target.release(&mut device);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut device = HeadlessDevice::new();
        let mut target = RenderTarget::new(&mut device);
        target.set_size(4, 2);
        let mut nv21 = vec![1u8; 8];
        nv21.extend_from_slice(&[200; 4]);
        target.upload_data(&mut device, &nv21).unwrap();
        assert_eq!(device.texture_pixels(target.texture()).unwrap(), &[1; 8][..]);
        target.release(&mut device);
    }

    #[test]
    fn render_destination_allocates_zeroed_rgba_and_sets_viewport() {
        let mut device = HeadlessDevice::new();
        let mut target = RenderTarget::new(&mut device);
        target.set_size(3, 2);
        target.bind_as_render_destination(&mut device).unwrap();

        assert!(!target.framebuffer_pending());
        assert_eq!(device.bound_framebuffer(), Some(target.framebuffer()));
        assert_eq!(device.current_viewport(), Viewport::sized(3, 2));
        let pixels = device.texture_pixels(target.texture()).unwrap();
        assert_eq!(pixels.len(), 3 * 2 * 4);
        assert!(pixels.iter().all(|&byte| byte == 0));

        RenderTarget::present_to_screen(&mut device, 10, 10);
        target.release(&mut device);
    }

    #[test]
    fn zero_sized_destination_is_incomplete() {
        let mut device = HeadlessDevice::new();
        let mut target = RenderTarget::new(&mut device);
        let err = target
            .bind_as_render_destination(&mut device)
            .expect_err("nothing to render into");
        assert!(matches!(
            err,
            PipelineError::IncompleteTarget {
                status: FramebufferStatus::IncompleteAttachment
            }
        ));
        RenderTarget::present_to_screen(&mut device, 1, 1);
        target.release(&mut device);
    }
}
