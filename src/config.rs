use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};

use crate::{buffer::MAX_BUFFERS, topology::OutputSelector};

pub struct Config {
    pub drm_device: PathBuf,
    pub output: OutputSelector,
    pub buffers: usize,
    pub frames: u32,
    pub disable_modifiers: bool,
    /// drive the output with set_crtc and page_flip instead of atomic commits
    pub legacy: bool,
    pub direct_vt: bool,
    pub seat: String,
    pub kb_layout: String,
    /// xrgb8888
    pub clear_color: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drm_device: PathBuf::from("/dev/dri/card0"),
            output: OutputSelector::default(),
            buffers: 2,
            frames: 120,
            disable_modifiers: false,
            legacy: false,
            direct_vt: false,
            seat: String::from("seat0"),
            kb_layout: String::from("us"),
            clear_color: 0x00cc_cce6,
        }
    }
}

impl Config {
    pub fn setup() -> Result<Config> {
        Config::from_lookup(|key|std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let mut config = Config::default();
        let flag = |key: &str|matches!(lookup(key).as_deref(), Some("1"));

        if let Some(path) = lookup("SCANOUT_DRM_DEVICE") {
            config.drm_device = path.into();
        }
        config.output.connector_name = lookup("SCANOUT_CONNECTOR").filter(|name|!name.is_empty());
        if let Some(indices) = lookup("SCANOUT_OUTPUT") {
            let [connector, encoder, crtc, plane] = parse_indices(&indices)?;
            config.output.connector = connector;
            config.output.encoder = encoder;
            config.output.crtc = crtc;
            config.output.plane = plane;
        }
        config.output.refresh = parse(&lookup, "SCANOUT_REFRESH")?;
        if let Some(buffers) = parse(&lookup, "SCANOUT_BUFFERS")? {
            if !(1..=MAX_BUFFERS).contains(&buffers) {
                bail!("SCANOUT_BUFFERS must be between 1 and {MAX_BUFFERS}, got {buffers}");
            }
            config.buffers = buffers;
        }
        if let Some(frames) = parse(&lookup, "SCANOUT_FRAMES")? {
            config.frames = frames;
        }
        config.disable_modifiers = flag("SCANOUT_DISABLE_MODIFIERS");
        config.legacy = flag("SCANOUT_LEGACY");
        config.direct_vt = flag("SCANOUT_DIRECT_VT");
        if let Some(seat) = lookup("XDG_SEAT").filter(|seat|!seat.is_empty()) {
            config.seat = seat;
        }
        if let Some(layout) = lookup("XKB_DEFAULT_LAYOUT").filter(|layout|!layout.is_empty()) {
            config.kb_layout = layout;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => Ok(Some(value.trim().parse().with_context(||format!("invalid {key}: {value:?}"))?)),
        None => Ok(None),
    }
}

/// `connector,encoder,crtc,plane`
fn parse_indices(value: &str) -> Result<[usize; 4]> {
    let mut indices = [0; 4];
    let mut parts = value.split(',');
    for index in &mut indices {
        let part = parts.next().context("SCANOUT_OUTPUT needs four indices")?;
        *index = part.trim().parse().with_context(||format!("invalid index {part:?} in SCANOUT_OUTPUT"))?;
    }
    if parts.next().is_some() {
        bail!("SCANOUT_OUTPUT takes exactly four indices");
    }
    Ok(indices)
}
