//! atomic commits and the legacy mode-setting path
//!
//! an output is either idle or has exactly one commit in flight. the flag is
//! cleared by [`Core::drain_events`] when the completion for its crtc arrives.

use drm::control::{property, AtomicCommitFlags, RawResourceHandle, ResourceHandle};

use crate::{
    buffer::Allocator,
    core::{Core, OutputId},
    device::KmsDevice,
    error::{Error, Result},
    props::{Prop, PropertyMap},
    topology::Output,
};

/// Outcome of appending one property to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStatus {
    Set,
    /// the driver does not expose the property, nothing was appended
    Unsupported,
}

/// An ordered list of property assignments, consumed by one commit.
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    entries: Vec<(RawResourceHandle, property::Handle, u64)>,
    target: Option<(OutputId, usize)>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `prop` of `object`, skipping it when the driver lacks it.
    pub fn add<H: ResourceHandle>(
        &mut self,
        object: H,
        props: &PropertyMap,
        prop: Prop,
        value: u64,
    ) -> Result<PropertyStatus> {
        if !props.kind().recognized().contains(&prop) || !prop.accepts(value) {
            return Err(Error::InvalidProperty { property: prop.name(), value });
        }
        let Some(handle) = props.get(prop) else {
            return Ok(PropertyStatus::Unsupported);
        };
        self.entries.push((object.into(), handle, value));
        Ok(PropertyStatus::Set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawResourceHandle, property::Handle, u64)> + '_ {
        self.entries.iter().copied()
    }

    /// output and slot the request was built for
    pub fn target(&self) -> Option<(OutputId, usize)> {
        self.target
    }
}

/// 16.16 fixed point, the unit of plane source coordinates
fn fixed(value: u16) -> u64 {
    (value as u64) << 16
}

/// a request may only be submitted for the output it was built for
fn check_request(id: OutputId, output: &Output, request: &AtomicRequest) -> Result<()> {
    if !output.atomic {
        return Err(Error::AtomicUnsupported(id.0));
    }
    if request.is_empty() {
        return Err(Error::EmptyRequest);
    }
    match request.target {
        Some((built, _)) if built != id => Err(Error::RequestTarget { built: built.0, output: id.0 }),
        _ => Ok(()),
    }
}

fn check_idle(outputs: &[Output], output: &Output) -> Result<()> {
    if outputs.iter().any(|other|other.crtc == output.crtc && other.pending) {
        return Err(Error::CommitPending(output.crtc));
    }
    Ok(())
}

impl<D: KmsDevice, A: Allocator> Core<D, A> {
    /// Append everything needed to show `slot` of `id` full screen.
    ///
    /// Returns the properties the driver does not expose.
    pub fn build_request(&self, id: OutputId, slot: usize, request: &mut AtomicRequest) -> Result<Vec<Prop>> {
        let output = self.output(id)?;
        let buffer = output.buffers.get(slot).ok_or(Error::InvalidBuffer { output: id.0, slot })?;

        let (width, height) = output.mode.size();
        let plane = output.plane;
        let crtc = output.crtc;
        let crtc_id = u32::from(crtc) as u64;

        let assignments = [
            (Prop::CrtcId, crtc_id),
            (Prop::FbId, u32::from(buffer.fb) as u64),
            (Prop::SrcX, 0),
            (Prop::SrcY, 0),
            (Prop::SrcW, fixed(width)),
            (Prop::SrcH, fixed(height)),
            (Prop::CrtcX, 0),
            (Prop::CrtcY, 0),
            (Prop::CrtcW, width as u64),
            (Prop::CrtcH, height as u64),
        ];

        let mut skipped = vec![];
        let mut note = |prop: Prop, status: PropertyStatus|{
            if status == PropertyStatus::Unsupported {
                skipped.push(prop);
            }
        };

        for (prop, value) in assignments {
            note(prop, request.add(plane, &output.plane_props, prop, value)?);
        }
        note(Prop::ModeId, request.add(crtc, &output.crtc_props, Prop::ModeId, output.mode_blob)?);
        note(Prop::Active, request.add(crtc, &output.crtc_props, Prop::Active, 1)?);
        note(Prop::CrtcId, request.add(output.connector, &output.connector_props, Prop::CrtcId, crtc_id)?);

        if !skipped.is_empty() {
            tracing::debug!(output = id.0, "skipped unsupported properties {skipped:?}");
        }
        request.target = Some((id, slot));
        Ok(skipped)
    }

    /// Submit a request without blocking; completion arrives as an event.
    ///
    /// Mode-setting is always allowed on the first commit of an output.
    pub fn commit(&mut self, id: OutputId, request: AtomicRequest, allow_modeset: bool) -> Result<()> {
        let output = self.output(id)?;
        check_request(id, output, &request)?;
        check_idle(&self.outputs, output)?;
        if output.buffers.is_empty() {
            return Err(Error::NoBuffers(id.0));
        }

        let mut flags = AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT;
        if allow_modeset || !output.modeset {
            flags |= AtomicCommitFlags::ALLOW_MODESET;
        }

        self.device
            .atomic_commit(flags, &request)
            .map_err(Error::kernel("atomic commit"))?;
        tracing::trace!(output = id.0, ?flags, props = request.len(), "committed");

        let queued = request.target.map(|(_, slot)|slot);
        let output = &mut self.outputs[id.0];
        output.pending = true;
        output.modeset = true;
        output.queued = queued;
        Ok(())
    }

    /// Ask the kernel whether a request would be accepted, changing nothing.
    pub fn test_commit(&self, id: OutputId, request: &AtomicRequest, allow_modeset: bool) -> Result<()> {
        let output = self.output(id)?;
        check_request(id, output, request)?;

        let mut flags = AtomicCommitFlags::TEST_ONLY;
        if allow_modeset || !output.modeset {
            flags |= AtomicCommitFlags::ALLOW_MODESET;
        }
        self.device.atomic_commit(flags, request).map_err(Error::kernel("test commit"))
    }

    /// Bind `slot` to the crtc with the legacy interface. Blocks until done.
    pub fn set_crtc(&mut self, id: OutputId, slot: usize) -> Result<()> {
        let output = self.output(id)?;
        check_idle(&self.outputs, output)?;
        let fb = output.buffers.get(slot).ok_or(Error::InvalidBuffer { output: id.0, slot })?.fb;

        self.device
            .set_crtc(output.crtc, Some(fb), &[output.connector], Some(output.mode))
            .map_err(Error::kernel("set crtc"))?;

        let output = &mut self.outputs[id.0];
        output.modeset = true;
        output.on_screen = Some(slot);
        Ok(())
    }

    /// Queue a legacy flip to `slot`; completion arrives as an event.
    pub fn page_flip(&mut self, id: OutputId, slot: usize) -> Result<()> {
        let output = self.output(id)?;
        check_idle(&self.outputs, output)?;
        let fb = output.buffers.get(slot).ok_or(Error::InvalidBuffer { output: id.0, slot })?.fb;

        self.device.page_flip(output.crtc, fb).map_err(Error::kernel("page flip"))?;

        let output = &mut self.outputs[id.0];
        output.pending = true;
        output.queued = Some(slot);
        Ok(())
    }
}
