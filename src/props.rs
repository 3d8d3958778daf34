//! kms properties this crate knows how to drive
//!
//! property ids are discovered per object at enumeration time. a recognized
//! property the driver does not expose stays unset in [`PropertyMap`] and is
//! skipped when a request is built.

use std::fmt;

use drm::control::property;

const PROP_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prop {
    CrtcId,
    FbId,
    SrcX,
    SrcY,
    SrcW,
    SrcH,
    CrtcX,
    CrtcY,
    CrtcW,
    CrtcH,
    ModeId,
    Active,
}

impl Prop {
    pub const ALL: [Prop; PROP_COUNT] = [
        Prop::CrtcId,
        Prop::FbId,
        Prop::SrcX,
        Prop::SrcY,
        Prop::SrcW,
        Prop::SrcH,
        Prop::CrtcX,
        Prop::CrtcY,
        Prop::CrtcW,
        Prop::CrtcH,
        Prop::ModeId,
        Prop::Active,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prop::CrtcId => "CRTC_ID",
            Prop::FbId => "FB_ID",
            Prop::SrcX => "SRC_X",
            Prop::SrcY => "SRC_Y",
            Prop::SrcW => "SRC_W",
            Prop::SrcH => "SRC_H",
            Prop::CrtcX => "CRTC_X",
            Prop::CrtcY => "CRTC_Y",
            Prop::CrtcW => "CRTC_W",
            Prop::CrtcH => "CRTC_H",
            Prop::ModeId => "MODE_ID",
            Prop::Active => "ACTIVE",
        }
    }

    pub fn from_name(name: &str) -> Option<Prop> {
        Prop::ALL.into_iter().find(|prop|prop.name() == name)
    }

    /// whether `value` is meaningful for this property
    pub fn accepts(self, value: u64) -> bool {
        match self {
            Prop::Active => value <= 1,
            // signed 32 bit positions, sign extended to 64 bits
            Prop::CrtcX | Prop::CrtcY => i32::try_from(value as i64).is_ok(),
            _ => value <= u32::MAX as u64,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Connector,
    Crtc,
    Plane,
}

impl ObjectKind {
    /// properties recorded for this kind of object
    pub fn recognized(self) -> &'static [Prop] {
        match self {
            ObjectKind::Connector => &[Prop::CrtcId],
            ObjectKind::Crtc => &[Prop::ModeId, Prop::Active],
            ObjectKind::Plane => &[
                Prop::CrtcId,
                Prop::FbId,
                Prop::SrcX,
                Prop::SrcY,
                Prop::SrcW,
                Prop::SrcH,
                Prop::CrtcX,
                Prop::CrtcY,
                Prop::CrtcW,
                Prop::CrtcH,
            ],
        }
    }
}

/// Property ids of one kms object, keyed by the closed [`Prop`] set.
#[derive(Debug, Clone)]
pub struct PropertyMap {
    kind: ObjectKind,
    ids: [Option<property::Handle>; PROP_COUNT],
}

impl PropertyMap {
    pub fn new(kind: ObjectKind) -> Self {
        Self { kind, ids: [None; PROP_COUNT] }
    }

    /// record the ids of recognized names, everything else is ignored
    pub fn discover<'a>(
        kind: ObjectKind,
        entries: impl IntoIterator<Item = (&'a str, property::Handle)>,
    ) -> Self {
        let mut map = Self::new(kind);
        for (name, handle) in entries {
            let Some(prop) = Prop::from_name(name) else {
                continue;
            };
            if kind.recognized().contains(&prop) {
                map.ids[prop.index()] = Some(handle);
            }
        }
        map
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// `None` means the driver does not expose the property
    pub fn get(&self, prop: Prop) -> Option<property::Handle> {
        self.ids[prop.index()]
    }

    pub fn len(&self) -> usize {
        self.ids.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missing(&self) -> impl Iterator<Item = Prop> + '_ {
        self.kind.recognized().iter().copied().filter(|prop|self.get(*prop).is_none())
    }
}
