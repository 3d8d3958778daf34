//! the kernel display device boundary
//!
//! [`KmsDevice`] is everything the rest of the crate asks of a kms device.
//! [`Card`] implements it over the `drm` crate for a descriptor handed out by
//! the session broker.

use std::{
    io,
    os::fd::{AsFd, BorrowedFd},
    time::Duration,
};

use drm::{
    buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer},
    control::{
        self, atomic::AtomicModeReq, connector, crtc, encoder, framebuffer, plane, property,
        AtomicCommitFlags, Device as ControlDevice, FbCmd2Flags, Mode, PageFlipFlags,
        ResourceHandle,
    },
    ClientCapability, Device, DriverCapability,
};

use crate::{commit::AtomicRequest, session::TakenDevice};

#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub connectors: Vec<connector::Handle>,
    pub encoders: Vec<encoder::Handle>,
    pub crtcs: Vec<crtc::Handle>,
    pub planes: Vec<plane::Handle>,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub handle: connector::Handle,
    /// `interface-id`, e.g. `HDMI-A-1`
    pub name: String,
    pub connected: bool,
    pub modes: Vec<Mode>,
    pub encoders: Vec<encoder::Handle>,
}

#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub handle: encoder::Handle,
    pub crtc: Option<crtc::Handle>,
    pub possible_crtcs: Vec<crtc::Handle>,
}

#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub handle: plane::Handle,
    pub possible_crtcs: Vec<crtc::Handle>,
    pub formats: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct PropertyEntry {
    pub handle: property::Handle,
    pub name: String,
    pub value: u64,
}

/// Memory layout handed to the kernel when registering a framebuffer.
#[derive(Debug, Clone)]
pub enum FramebufferLayout {
    /// single plane, described by depth and bits per pixel
    Legacy {
        size: (u32, u32),
        format: DrmFourcc,
        depth: u32,
        bpp: u32,
        pitch: u32,
        handle: u32,
    },
    /// up to four planes with an optional layout modifier
    Planar {
        size: (u32, u32),
        format: DrmFourcc,
        modifier: Option<u64>,
        handles: [u32; 4],
        pitches: [u32; 4],
        offsets: [u32; 4],
    },
}

/// A completion notification read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub crtc: crtc::Handle,
    pub sequence: u32,
    pub time: Duration,
}

pub trait KmsDevice: AsFd {
    /// enable universal planes and atomic mode-setting
    fn enable_atomic(&self) -> io::Result<()>;

    fn resources(&self) -> io::Result<Resources>;

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo>;

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo>;

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo>;

    fn properties<H: ResourceHandle>(&self, handle: H) -> io::Result<Vec<PropertyEntry>>;

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>>;

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u64>;

    fn destroy_blob(&self, blob: u64) -> io::Result<()>;

    fn supports_modifiers(&self) -> bool;

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<framebuffer::Handle>;

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()>;

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()>;

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()>;

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()>;

    /// every completion event currently readable, empty when none are
    fn receive_events(&self) -> io::Result<Vec<CompletionEvent>>;
}

/// A kms device opened through the session broker.
#[derive(Debug)]
pub struct Card(TakenDevice);

impl Card {
    pub fn new(device: TakenDevice) -> Self {
        Self(device)
    }

    pub fn taken(&self) -> &TakenDevice {
        &self.0
    }

    /// give the descriptor back so it can be released
    pub fn into_inner(self) -> TakenDevice {
        self.0
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card { }
impl ControlDevice for Card { }

struct LegacyFb {
    size: (u32, u32),
    format: DrmFourcc,
    pitch: u32,
    handle: buffer::Handle,
}

impl buffer::Buffer for LegacyFb {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.format
    }
    fn pitch(&self) -> u32 {
        self.pitch
    }
    fn handle(&self) -> buffer::Handle {
        self.handle
    }
}

struct PlanarFb {
    size: (u32, u32),
    format: DrmFourcc,
    modifier: Option<DrmModifier>,
    handles: [Option<buffer::Handle>; 4],
    pitches: [u32; 4],
    offsets: [u32; 4],
}

impl PlanarBuffer for PlanarFb {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.format
    }
    fn modifier(&self) -> Option<DrmModifier> {
        self.modifier
    }
    fn pitches(&self) -> [u32; 4] {
        self.pitches
    }
    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.handles
    }
    fn offsets(&self) -> [u32; 4] {
        self.offsets
    }
}

fn buffer_handle(raw: u32) -> io::Result<buffer::Handle> {
    std::num::NonZeroU32::new(raw)
        .map(buffer::Handle::from)
        .ok_or_else(||io::Error::new(io::ErrorKind::InvalidInput, "zero buffer handle"))
}

impl KmsDevice for Card {
    fn enable_atomic(&self) -> io::Result<()> {
        self.set_client_capability(ClientCapability::UniversalPlanes, true)?;
        self.set_client_capability(ClientCapability::Atomic, true)
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = self.resource_handles()?;
        Ok(Resources {
            connectors: res.connectors().to_vec(),
            encoders: res.encoders().to_vec(),
            crtcs: res.crtcs().to_vec(),
            planes: self.plane_handles()?,
        })
    }

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle, true)?;
        Ok(ConnectorInfo {
            handle,
            name: format!("{}-{}", info.interface().as_str(), info.interface_id()),
            connected: info.state() == connector::State::Connected,
            modes: info.modes().to_vec(),
            encoders: info.encoders().to_vec(),
        })
    }

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(handle)?;
        let res = self.resource_handles()?;
        Ok(EncoderInfo {
            handle,
            crtc: info.crtc(),
            possible_crtcs: res.filter_crtcs(info.possible_crtcs()),
        })
    }

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo> {
        let info = self.get_plane(handle)?;
        let res = self.resource_handles()?;
        Ok(PlaneInfo {
            handle,
            possible_crtcs: res.filter_crtcs(info.possible_crtcs()),
            formats: info.formats().to_vec(),
        })
    }

    fn properties<H: ResourceHandle>(&self, handle: H) -> io::Result<Vec<PropertyEntry>> {
        let props = self.get_properties(handle)?;
        let mut entries = vec![];
        for (prop, value) in props {
            let info = self.get_property(prop)?;
            let Ok(name) = info.name().to_str() else {
                continue;
            };
            entries.push(PropertyEntry { handle: prop, name: name.to_owned(), value });
        }
        Ok(entries)
    }

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>> {
        self.get_property_blob(blob)
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u64> {
        match self.create_property_blob(mode)? {
            property::Value::Blob(id) => Ok(id),
            other => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected blob value {other:?}"),
            )),
        }
    }

    fn destroy_blob(&self, blob: u64) -> io::Result<()> {
        self.destroy_property_blob(blob)
    }

    fn supports_modifiers(&self) -> bool {
        self.get_driver_capability(DriverCapability::AddFB2Modifiers)
            .map(|cap|cap != 0)
            .unwrap_or(false)
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<framebuffer::Handle> {
        match *layout {
            FramebufferLayout::Legacy { size, format, depth, bpp, pitch, handle } => {
                let fb = LegacyFb { size, format, pitch, handle: buffer_handle(handle)? };
                ControlDevice::add_framebuffer(self, &fb, depth, bpp)
            }
            FramebufferLayout::Planar { size, format, modifier, handles, pitches, offsets } => {
                let mut planar_handles = [None; 4];
                for (slot, raw) in planar_handles.iter_mut().zip(handles) {
                    *slot = std::num::NonZeroU32::new(raw).map(buffer::Handle::from);
                }
                let fb = PlanarFb {
                    size,
                    format,
                    modifier: modifier.map(DrmModifier::from),
                    handles: planar_handles,
                    pitches,
                    offsets,
                };
                let flags = match modifier {
                    Some(_) => FbCmd2Flags::MODIFIERS,
                    None => FbCmd2Flags::empty(),
                };
                self.add_planar_framebuffer(&fb, flags)
            }
        }
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::destroy_framebuffer(self, fb)
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for (object, prop, value) in request.iter() {
            req.add_raw_property(object, prop, value);
        }
        ControlDevice::atomic_commit(self, flags, req)
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        ControlDevice::set_crtc(self, crtc, fb, (0, 0), connectors, mode)
    }

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::page_flip(self, crtc, fb, PageFlipFlags::EVENT, None)
    }

    fn receive_events(&self) -> io::Result<Vec<CompletionEvent>> {
        let events = match ControlDevice::receive_events(self) {
            Ok(events) => events,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(vec![]),
            Err(err) => return Err(err),
        };

        Ok(events
            .filter_map(|event|match event {
                control::Event::PageFlip(event) => Some(CompletionEvent {
                    crtc: event.crtc,
                    sequence: event.frame,
                    time: event.duration,
                }),
                control::Event::Vblank(event) => {
                    tracing::trace!(crtc = ?event.crtc, "ignoring plain vblank event");
                    None
                }
                _ => None,
            })
            .collect())
    }
}

impl<T: KmsDevice> KmsDevice for &T {
    fn enable_atomic(&self) -> io::Result<()> {
        (**self).enable_atomic()
    }

    fn resources(&self) -> io::Result<Resources> {
        (**self).resources()
    }

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo> {
        (**self).connector(handle)
    }

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo> {
        (**self).encoder(handle)
    }

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo> {
        (**self).plane(handle)
    }

    fn properties<H: ResourceHandle>(&self, handle: H) -> io::Result<Vec<PropertyEntry>> {
        (**self).properties(handle)
    }

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>> {
        (**self).property_blob(blob)
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u64> {
        (**self).create_mode_blob(mode)
    }

    fn destroy_blob(&self, blob: u64) -> io::Result<()> {
        (**self).destroy_blob(blob)
    }

    fn supports_modifiers(&self) -> bool {
        (**self).supports_modifiers()
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<framebuffer::Handle> {
        (**self).add_framebuffer(layout)
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        (**self).destroy_framebuffer(fb)
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()> {
        (**self).atomic_commit(flags, request)
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        (**self).set_crtc(crtc, fb, connectors, mode)
    }

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle) -> io::Result<()> {
        (**self).page_flip(crtc, fb)
    }

    fn receive_events(&self) -> io::Result<Vec<CompletionEvent>> {
        (**self).receive_events()
    }
}
