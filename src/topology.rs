//! output topology enumeration
//!
//! selection is purely by index (or connector name), no heuristics are
//! applied. the result is an [`Output`] that stays immutable apart from its
//! commit state and the buffers it owns.

use drm::{
    buffer::DrmFourcc,
    control::{connector, crtc, encoder, plane, Mode},
};

use crate::{
    buffer::{Allocator, Buffer},
    core::{Core, OutputId},
    device::{KmsDevice, PropertyEntry},
    error::{Error, Result},
    props::{ObjectKind, PropertyMap},
    utils::display_info,
};

/// Which connector, encoder, crtc and plane to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSelector {
    pub connector: usize,
    pub encoder: usize,
    pub crtc: usize,
    pub plane: usize,
    /// preferred refresh rate in Hz, the first mode is used when none match
    pub refresh: Option<u32>,
    /// replaces the connector index when set
    pub connector_name: Option<String>,
    /// pixel format whose modifiers are read from the plane
    pub format: DrmFourcc,
}

impl Default for OutputSelector {
    fn default() -> Self {
        Self {
            connector: 0,
            encoder: 0,
            crtc: 0,
            plane: 0,
            refresh: None,
            connector_name: None,
            format: DrmFourcc::Xrgb8888,
        }
    }
}

/// One selected display pipeline.
#[derive(Debug)]
pub struct Output {
    pub(crate) connector: connector::Handle,
    pub(crate) encoder: encoder::Handle,
    pub(crate) crtc: crtc::Handle,
    pub(crate) plane: plane::Handle,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) mode: Mode,
    pub(crate) mode_blob: u64,
    pub(crate) format: DrmFourcc,
    pub(crate) modifiers: Vec<u64>,
    pub(crate) connector_props: PropertyMap,
    pub(crate) crtc_props: PropertyMap,
    pub(crate) plane_props: PropertyMap,
    pub(crate) atomic: bool,
    pub(crate) pending: bool,
    pub(crate) modeset: bool,
    pub(crate) on_screen: Option<usize>,
    pub(crate) queued: Option<usize>,
    pub(crate) buffers: Vec<Buffer>,
}

impl Output {
    pub fn connector(&self) -> connector::Handle {
        self.connector
    }

    pub fn encoder(&self) -> encoder::Handle {
        self.encoder
    }

    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    pub fn plane(&self) -> plane::Handle {
        self.plane
    }

    /// connector name such as `HDMI-A-1`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// monitor make and model read from the EDID, when available
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn mode_blob(&self) -> u64 {
        self.mode_blob
    }

    pub fn format(&self) -> DrmFourcc {
        self.format
    }

    /// modifiers the plane advertises for [`Output::format`]
    pub fn modifiers(&self) -> &[u64] {
        &self.modifiers
    }

    pub fn connector_props(&self) -> &PropertyMap {
        &self.connector_props
    }

    pub fn crtc_props(&self) -> &PropertyMap {
        &self.crtc_props
    }

    pub fn plane_props(&self) -> &PropertyMap {
        &self.plane_props
    }

    /// whether the driver accepted atomic modesetting, only the legacy path
    /// works without it
    pub fn has_atomic(&self) -> bool {
        self.atomic
    }

    /// a commit or flip has been submitted and its completion not yet drained
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn has_modeset(&self) -> bool {
        self.modeset
    }

    /// slot currently scanned out
    pub fn on_screen(&self) -> Option<usize> {
        self.on_screen
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }
}

fn pick<T: Copy>(items: &[T], index: usize, kind: &'static str) -> Result<T> {
    items.get(index).copied().ok_or(Error::IndexOutOfRange {
        kind,
        index,
        len: items.len(),
    })
}

/// first mode with the requested refresh rate, else the first mode
pub fn select_mode(modes: &[Mode], refresh: Option<u32>) -> Option<Mode> {
    let first = *modes.first()?;
    let Some(refresh) = refresh else {
        return Some(first);
    };
    match modes.iter().find(|mode|mode.vrefresh() == refresh) {
        Some(mode) => Some(*mode),
        None => {
            tracing::warn!("no mode at {refresh}Hz, using {:?}", first);
            Some(first)
        }
    }
}

fn discover(kind: ObjectKind, entries: &[PropertyEntry]) -> PropertyMap {
    let map = PropertyMap::discover(kind, entries.iter().map(|entry|(entry.name.as_str(), entry.handle)));
    for prop in map.missing() {
        tracing::debug!(?kind, "driver does not expose {prop}");
    }
    map
}

fn read_u32(blob: &[u8], offset: usize) -> Option<u32> {
    let bytes = blob.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

fn read_u64(blob: &[u8], offset: usize) -> Option<u64> {
    let bytes = blob.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_ne_bytes(bytes.try_into().ok()?))
}

// struct drm_format_modifier_blob
const BLOB_COUNT_FORMATS: usize = 8;
const BLOB_FORMATS_OFFSET: usize = 12;
const BLOB_COUNT_MODIFIERS: usize = 16;
const BLOB_MODIFIERS_OFFSET: usize = 20;

// struct drm_format_modifier
const MODIFIER_FORMATS: usize = 0;
const MODIFIER_OFFSET: usize = 8;
const MODIFIER_VALUE: usize = 16;
const MODIFIER_SIZE: usize = 24;

/// Modifiers an `IN_FORMATS` blob advertises for `format`.
///
/// The blob header points at a format list and at modifier entries whose
/// `formats` mask refers to format `offset + n` with bit `n`. Reading stops at
/// the end of the blob whatever the header claims.
pub fn parse_in_formats(blob: &[u8], format: u32) -> Vec<u64> {
    let mut modifiers = vec![];
    let (Some(count_formats), Some(formats_offset), Some(count_modifiers), Some(modifiers_offset)) = (
        read_u32(blob, BLOB_COUNT_FORMATS),
        read_u32(blob, BLOB_FORMATS_OFFSET),
        read_u32(blob, BLOB_COUNT_MODIFIERS),
        read_u32(blob, BLOB_MODIFIERS_OFFSET),
    ) else {
        return modifiers;
    };

    let index = (0..count_formats as usize)
        .map_while(|i|read_u32(blob, (formats_offset as usize).checked_add(i.checked_mul(4)?)?))
        .position(|candidate|candidate == format);
    let Some(index) = index else {
        return modifiers;
    };

    for i in 0..count_modifiers as usize {
        let Some(base) = i.checked_mul(MODIFIER_SIZE).and_then(|at|at.checked_add(modifiers_offset as usize)) else {
            break;
        };
        let (Some(mask), Some(offset), Some(modifier)) = (
            read_u64(blob, base + MODIFIER_FORMATS),
            read_u32(blob, base + MODIFIER_OFFSET),
            read_u64(blob, base + MODIFIER_VALUE),
        ) else {
            break;
        };
        let Some(bit) = index.checked_sub(offset as usize) else {
            continue;
        };
        if bit < 64 && mask & (1 << bit) != 0 && !modifiers.contains(&modifier) {
            modifiers.push(modifier);
        }
    }

    modifiers
}

impl<D: KmsDevice, A: Allocator> Core<D, A> {
    /// Select an output pipeline and cache everything needed to commit to it.
    pub fn enumerate(&mut self, selector: &OutputSelector) -> Result<OutputId> {
        let device = &self.device;
        let atomic = match device.enable_atomic() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("atomic modesetting unavailable, only set_crtc and page_flip will work: {err}");
                false
            }
        };

        let res = device.resources().map_err(Error::kernel("get resources"))?;

        let connector = match &selector.connector_name {
            Some(name) => {
                let mut found = None;
                for handle in &res.connectors {
                    let info = device.connector(*handle).map_err(Error::kernel("get connector"))?;
                    if &info.name == name {
                        found = Some(info);
                        break;
                    }
                }
                found.ok_or_else(||Error::ConnectorNotFound(name.clone()))?
            }
            None => {
                let handle = pick(&res.connectors, selector.connector, "connector")?;
                device.connector(handle).map_err(Error::kernel("get connector"))?
            }
        };

        if !connector.connected {
            return Err(Error::Disconnected(connector.name));
        }
        let mode = select_mode(&connector.modes, selector.refresh)
            .ok_or_else(||Error::NoMode(connector.name.clone()))?;

        let encoder = pick(&res.encoders, selector.encoder, "encoder")?;
        let crtc = pick(&res.crtcs, selector.crtc, "crtc")?;
        let plane = pick(&res.planes, selector.plane, "plane")?;

        let encoder_info = device.encoder(encoder).map_err(Error::kernel("get encoder"))?;
        if !encoder_info.possible_crtcs.contains(&crtc) {
            tracing::warn!(?encoder, ?crtc, "encoder does not list the crtc as possible");
        }
        if !connector.encoders.contains(&encoder) {
            tracing::warn!(?encoder, "encoder is not usable by {}", connector.name);
        }
        let plane_info = device.plane(plane).map_err(Error::kernel("get plane"))?;
        if !plane_info.possible_crtcs.contains(&crtc) {
            tracing::warn!(?plane, ?crtc, "plane cannot be placed on the crtc");
        }
        if !plane_info.formats.contains(&(selector.format as u32)) {
            tracing::warn!(?plane, "plane does not list {:?}", selector.format);
        }

        let connector_entries = device.properties(connector.handle).map_err(Error::kernel("get connector properties"))?;
        let crtc_entries = device.properties(crtc).map_err(Error::kernel("get crtc properties"))?;
        let plane_entries = device.properties(plane).map_err(Error::kernel("get plane properties"))?;

        let connector_props = discover(ObjectKind::Connector, &connector_entries);
        let crtc_props = discover(ObjectKind::Crtc, &crtc_entries);
        let plane_props = discover(ObjectKind::Plane, &plane_entries);

        let modifiers = match plane_entries.iter().find(|entry|entry.name == "IN_FORMATS") {
            Some(entry) if entry.value != 0 => match device.property_blob(entry.value) {
                Ok(blob) => parse_in_formats(&blob, selector.format as u32),
                Err(err) => {
                    tracing::warn!(?plane, "failed to read IN_FORMATS: {err}");
                    vec![]
                }
            },
            _ => vec![],
        };

        let description = display_info::for_connector(device, connector.handle).map(|info|display_info::describe(&info));

        let mode_blob = device.create_mode_blob(&mode).map_err(Error::kernel("create mode blob"))?;

        let (width, height) = mode.size();
        tracing::info!(
            connector = %connector.name,
            ?crtc,
            ?plane,
            "selected {width}x{height}@{} ({} modifiers){}",
            mode.vrefresh(),
            modifiers.len(),
            description.as_deref().map(|desc|format!(" on {desc}")).unwrap_or_default(),
        );

        let id = OutputId(self.outputs.len());
        self.outputs.push(Output {
            connector: connector.handle,
            encoder,
            crtc,
            plane,
            name: connector.name,
            description,
            mode,
            mode_blob,
            format: selector.format,
            modifiers,
            connector_props,
            crtc_props,
            plane_props,
            atomic,
            pending: false,
            modeset: false,
            on_screen: None,
            queued: None,
            buffers: vec![],
        });
        Ok(id)
    }
}
