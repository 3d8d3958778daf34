use std::{io, path::PathBuf};

use drm::control::crtc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{method} failed: {source}")]
    Ipc {
        method: &'static str,
        #[source]
        source: zbus::Error,
    },
    #[error("session {id} rejected: {reason}")]
    SessionRejected { id: String, reason: String },
    #[error("no session available: {0}")]
    NoSession(String),
    #[error("{op} failed: {source}")]
    Kernel {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{kind} index {index} out of range ({len} available)")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("no connector named {0}")]
    ConnectorNotFound(String),
    #[error("connector {0} is not connected")]
    Disconnected(String),
    #[error("connector {0} has no modes")]
    NoMode(String),
    #[error("invalid output handle {0}")]
    InvalidOutput(usize),
    #[error("invalid buffer slot {slot} on output {output}")]
    InvalidBuffer { output: usize, slot: usize },
    #[error("invalid value {value} for property {property}")]
    InvalidProperty { property: &'static str, value: u64 },
    #[error("{op} failed for buffer slot {slot}: {source}")]
    Allocation {
        op: &'static str,
        slot: usize,
        #[source]
        source: io::Error,
    },
    #[error("buffer count must be between 1 and 3, got {0}")]
    BufferCount(usize),
    #[error("atomic request is empty")]
    EmptyRequest,
    #[error("request was built for output {built}, not output {output}")]
    RequestTarget { built: usize, output: usize },
    #[error("output {0} has no atomic support, use the legacy path")]
    AtomicUnsupported(usize),
    #[error("commit already pending on {0:?}")]
    CommitPending(crtc::Handle),
    #[error("output {0} has no allocated buffers")]
    NoBuffers(usize),
    #[error("{op} on {path:?} failed: {source}")]
    Vt {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("input: {0}")]
    Input(String),
}

impl Error {
    pub(crate) fn kernel(op: &'static str) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Kernel { op, source }
    }

    pub(crate) fn ipc(method: &'static str) -> impl FnOnce(zbus::Error) -> Error {
        move |source| Error::Ipc { method, source }
    }

    /// Raw OS error code behind a kernel, allocation or terminal failure.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Kernel { source, .. }
            | Error::Allocation { source, .. }
            | Error::Vt { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
