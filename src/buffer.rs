//! scanout buffers
//!
//! buffers are allocated through an [`Allocator`] at the output's mode size,
//! exported per plane and registered with the kms device as framebuffers.
//! [`GbmAllocator`] is the implementation over libgbm.

use std::{
    io,
    os::fd::{AsFd, OwnedFd},
};

use bitflags::bitflags;
use drm::{buffer::DrmFourcc, control::framebuffer};
use gbm::{BufferObjectFlags, Modifier};

use crate::{
    core::{Core, OutputId},
    device::{FramebufferLayout, KmsDevice},
    error::{Error, Result},
    topology::Output,
};

/// largest swap chain an output may hold
pub const MAX_BUFFERS: usize = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// buffer is presented by the display controller
        const SCANOUT = 1 << 0;
        const RENDERING = 1 << 1;
        const LINEAR = 1 << 2;
        /// buffer is filled from the cpu
        const WRITE = 1 << 3;
    }
}

impl From<AllocFlags> for BufferObjectFlags {
    fn from(flags: AllocFlags) -> Self {
        let mut usage = BufferObjectFlags::empty();
        if flags.contains(AllocFlags::SCANOUT) {
            usage |= BufferObjectFlags::SCANOUT;
        }
        if flags.contains(AllocFlags::RENDERING) {
            usage |= BufferObjectFlags::RENDERING;
        }
        if flags.contains(AllocFlags::LINEAR) {
            usage |= BufferObjectFlags::LINEAR;
        }
        if flags.contains(AllocFlags::WRITE) {
            usage |= BufferObjectFlags::WRITE;
        }
        usage
    }
}

/// How the buffers of one swap chain are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub format: DrmFourcc,
    pub flags: AllocFlags,
    /// negotiate a layout from the plane's advertised modifiers
    pub modifiers: bool,
    /// used by the single plane registration path
    pub depth: u32,
    pub bpp: u32,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            format: DrmFourcc::Xrgb8888,
            flags: AllocFlags::SCANOUT | AllocFlags::LINEAR,
            modifiers: true,
            depth: 24,
            bpp: 32,
        }
    }
}

/// A gpu buffer object.
pub trait BufferObject {
    fn size(&self) -> (u32, u32);

    fn format(&self) -> DrmFourcc;

    /// `None` when the layout is implicit
    fn modifier(&self) -> Option<u64>;

    fn plane_count(&self) -> usize;

    fn handle(&self, plane: usize) -> u32;

    fn stride(&self, plane: usize) -> u32;

    fn offset(&self, plane: usize) -> u32;

    /// shareable descriptor of one plane
    fn export_fd(&self, plane: usize) -> io::Result<OwnedFd>;

    /// map the whole buffer for cpu access, the mapping ends when `f` returns
    fn map(&mut self, f: &mut dyn FnMut(&mut [u8], u32)) -> io::Result<()>;

    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

pub trait Allocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>>;

    fn allocate_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        modifiers: &[u64],
        flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>>;
}

/// libgbm over a duplicate of the kms descriptor.
pub struct GbmAllocator {
    gbm: gbm::Device<OwnedFd>,
}

impl GbmAllocator {
    pub fn new(device: &impl AsFd) -> Result<Self> {
        let fd = device
            .as_fd()
            .try_clone_to_owned()
            .map_err(Error::kernel("duplicate device fd"))?;
        let gbm = gbm::Device::new(fd).map_err(Error::kernel("create gbm device"))?;
        tracing::debug!("gbm backend {}", gbm.backend_name());
        Ok(Self { gbm })
    }
}

impl Allocator for GbmAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>> {
        let bo = self.gbm.create_buffer_object::<()>(width, height, format, flags.into())?;
        Ok(Box::new(GbmBuffer { bo, explicit: false }))
    }

    fn allocate_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        modifiers: &[u64],
        flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>> {
        let bo = self.gbm.create_buffer_object_with_modifiers2::<()>(
            width,
            height,
            format,
            modifiers.iter().copied().map(Modifier::from),
            // the layout comes from the modifier list
            (flags - AllocFlags::LINEAR).into(),
        )?;
        Ok(Box::new(GbmBuffer { bo, explicit: true }))
    }
}

struct GbmBuffer {
    bo: gbm::BufferObject<()>,
    explicit: bool,
}

impl BufferObject for GbmBuffer {
    fn size(&self) -> (u32, u32) {
        (self.bo.width(), self.bo.height())
    }

    fn format(&self) -> DrmFourcc {
        self.bo.format()
    }

    fn modifier(&self) -> Option<u64> {
        match self.bo.modifier() {
            Modifier::Invalid => None,
            _ if !self.explicit => None,
            modifier => Some(modifier.into()),
        }
    }

    fn plane_count(&self) -> usize {
        self.bo.plane_count() as usize
    }

    fn handle(&self, plane: usize) -> u32 {
        unsafe { self.bo.handle_for_plane(plane as i32).u32_ }
    }

    fn stride(&self, plane: usize) -> u32 {
        self.bo.stride_for_plane(plane as i32)
    }

    fn offset(&self, plane: usize) -> u32 {
        self.bo.offset(plane as i32)
    }

    fn export_fd(&self, plane: usize) -> io::Result<OwnedFd> {
        self.bo
            .fd_for_plane(plane as i32)
            .map_err(|err|io::Error::new(io::ErrorKind::Other, err))
    }

    fn map(&mut self, f: &mut dyn FnMut(&mut [u8], u32)) -> io::Result<()> {
        let (width, height) = self.size();
        self.bo.map_mut(0, 0, width, height, |mapped|{
            let stride = mapped.stride();
            f(mapped.buffer_mut(), stride)
        })
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.bo.write(data)
    }
}

/// Exported description of one buffer plane.
#[derive(Debug)]
pub struct PlaneExport {
    pub handle: u32,
    pub stride: u32,
    pub offset: u32,
    pub fd: OwnedFd,
}

/// A buffer object registered as a framebuffer, owned by its output.
pub struct Buffer {
    pub(crate) output: OutputId,
    pub(crate) bo: Box<dyn BufferObject>,
    pub(crate) planes: Vec<PlaneExport>,
    pub(crate) fb: framebuffer::Handle,
    pub(crate) format: DrmFourcc,
    pub(crate) modifier: Option<u64>,
}

impl Buffer {
    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn framebuffer(&self) -> framebuffer::Handle {
        self.fb
    }

    pub fn planes(&self) -> &[PlaneExport] {
        &self.planes
    }

    pub fn format(&self) -> DrmFourcc {
        self.format
    }

    pub fn modifier(&self) -> Option<u64> {
        self.modifier
    }

    pub fn size(&self) -> (u32, u32) {
        self.bo.size()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("output", &self.output)
            .field("fb", &self.fb)
            .field("format", &self.format)
            .field("modifier", &self.modifier)
            .field("planes", &self.planes)
            .finish_non_exhaustive()
    }
}

fn create_slot<D: KmsDevice, A: Allocator>(
    device: &D,
    allocator: &A,
    output: &Output,
    id: OutputId,
    slot: usize,
    info: &BufferInfo,
) -> Result<Buffer> {
    let (width, height) = output.mode.size();
    let (width, height) = (width as u32, height as u32);
    let alloc = |op: &'static str| move |source: io::Error| Error::Allocation { op, slot, source };

    let negotiated = info.modifiers && !output.modifiers.is_empty() && device.supports_modifiers();
    let bo = if negotiated {
        allocator.allocate_with_modifiers(width, height, info.format, &output.modifiers, info.flags)
    } else {
        allocator.allocate(width, height, info.format, info.flags)
    }
    .map_err(alloc("allocate"))?;

    let plane_count = bo.plane_count().min(4);
    let mut planes = Vec::with_capacity(plane_count);
    for plane in 0..plane_count {
        planes.push(PlaneExport {
            handle: bo.handle(plane),
            stride: bo.stride(plane),
            offset: bo.offset(plane),
            fd: bo.export_fd(plane).map_err(alloc("export plane"))?,
        });
    }

    let modifier = if negotiated { bo.modifier() } else { None };
    let layout = if negotiated || planes.len() > 1 {
        let mut handles = [0; 4];
        let mut pitches = [0; 4];
        let mut offsets = [0; 4];
        for (i, plane) in planes.iter().enumerate() {
            handles[i] = plane.handle;
            pitches[i] = plane.stride;
            offsets[i] = plane.offset;
        }
        FramebufferLayout::Planar {
            size: (width, height),
            format: info.format,
            modifier,
            handles,
            pitches,
            offsets,
        }
    } else {
        FramebufferLayout::Legacy {
            size: (width, height),
            format: info.format,
            depth: info.depth,
            bpp: info.bpp,
            pitch: planes.first().map(|plane|plane.stride).unwrap_or_default(),
            handle: planes.first().map(|plane|plane.handle).unwrap_or_default(),
        }
    };

    let fb = device.add_framebuffer(&layout).map_err(alloc("add framebuffer"))?;
    tracing::debug!(output = id.index(), slot, ?fb, ?modifier, "created buffer");

    Ok(Buffer {
        output: id,
        bo,
        planes,
        fb,
        format: info.format,
        modifier,
    })
}

impl<D: KmsDevice, A: Allocator> Core<D, A> {
    /// Allocate `count` swap chain slots for an output.
    ///
    /// A failing slot aborts the call, slots completed before it stay.
    pub fn create_buffers(&mut self, id: OutputId, count: usize, info: &BufferInfo) -> Result<()> {
        if count == 0 || count > MAX_BUFFERS {
            return Err(Error::BufferCount(count));
        }
        let output = self.outputs.get_mut(id.0).ok_or(Error::InvalidOutput(id.0))?;
        if output.buffers.len() + count > MAX_BUFFERS {
            return Err(Error::BufferCount(output.buffers.len() + count));
        }

        for _ in 0..count {
            let slot = output.buffers.len();
            let buffer = create_slot(&self.device, &self.allocator, output, id, slot, info)?;
            output.buffers.push(buffer);
        }
        Ok(())
    }

    /// Map a slot for cpu access; unmapped when `f` returns.
    pub fn map_buffer(
        &mut self,
        id: OutputId,
        slot: usize,
        mut f: impl FnMut(&mut [u8], u32),
    ) -> Result<()> {
        let buffer = self.buffer_mut(id, slot)?;
        buffer.bo.map(&mut f).map_err(|source|Error::Allocation { op: "map", slot, source })
    }

    pub fn write_buffer(&mut self, id: OutputId, slot: usize, data: &[u8]) -> Result<()> {
        let buffer = self.buffer_mut(id, slot)?;
        buffer.bo.write(data).map_err(|source|Error::Allocation { op: "write", slot, source })
    }

    /// Drop every slot of an output, framebuffers first.
    pub fn destroy_buffers(&mut self, id: OutputId) -> Result<()> {
        let output = self.outputs.get_mut(id.0).ok_or(Error::InvalidOutput(id.0))?;
        if output.pending {
            return Err(Error::CommitPending(output.crtc));
        }

        let mut result = Ok(());
        for buffer in output.buffers.drain(..) {
            if let Err(err) = self.device.destroy_framebuffer(buffer.fb) {
                tracing::warn!(fb = ?buffer.fb, "failed to destroy framebuffer: {err}");
                result = Err(Error::kernel("destroy framebuffer")(err));
            }
            drop(buffer);
        }
        output.on_screen = None;
        output.queued = None;
        result
    }

    fn buffer_mut(&mut self, id: OutputId, slot: usize) -> Result<&mut Buffer> {
        let output = self.outputs.get_mut(id.0).ok_or(Error::InvalidOutput(id.0))?;
        output.buffers.get_mut(slot).ok_or(Error::InvalidBuffer { output: id.0, slot })
    }
}
