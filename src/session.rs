//! privileged device access
//!
//! the preferred path asks logind (over the system bus) for a session and for
//! per-device grants, see [`logind`]. when no broker is reachable the process
//! takes a virtual terminal itself and opens devices directly, see [`vt`].

use std::{
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
};

use rustix::fs::{Mode, OFlags};

use crate::{
    config::Config,
    error::{Error, Result},
};

pub mod logind;
pub mod vt;

pub use logind::{LogindSession, Login1, SystemBus};
pub use vt::{Console, LinuxConsole, VtSession};

/// major number of kms character devices
pub const DRM_MAJOR: u32 = 226;

/// A device descriptor granted by a [`DeviceBroker`].
#[derive(Debug)]
pub struct TakenDevice {
    fd: OwnedFd,
    path: PathBuf,
    major: u32,
    minor: u32,
    paused: bool,
}

impl TakenDevice {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dev(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    /// logind hands out paused devices when the session is not in foreground
    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn is_display(&self) -> bool {
        self.major == DRM_MAJOR
    }
}

impl AsFd for TakenDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// device number pair of a character device node
pub fn device_number(path: &Path) -> Result<(u32, u32)> {
    let stat = rustix::fs::stat(path).map_err(|err|Error::Kernel {
        op: "stat device",
        source: err.into(),
    })?;
    Ok((rustix::fs::major(stat.st_rdev), rustix::fs::minor(stat.st_rdev)))
}

/// Grants and revokes access to privileged devices.
pub trait DeviceBroker {
    fn take_device(&mut self, path: &Path) -> Result<TakenDevice>;

    fn release_device(&mut self, device: TakenDevice) -> Result<()>;
}

#[derive(Debug)]
pub enum Session<L: Login1 = SystemBus, C: Console = LinuxConsole> {
    Logind(LogindSession<L>),
    Direct(VtSession<C>),
}

impl Session {
    /// logind first, the virtual terminal when no broker answers
    pub fn connect(config: &Config) -> Result<Session> {
        Session::connect_with(config.direct_vt, SystemBus::connect, LinuxConsole::new)
    }
}

impl<L: Login1, C: Console> Session<L, C> {
    /// A session rejected by a reachable logind is an error, only an
    /// unreachable bus or service falls back to the console.
    pub fn connect_with(
        direct_vt: bool,
        bus: impl FnOnce() -> Result<L>,
        console: impl FnOnce() -> Result<C>,
    ) -> Result<Self> {
        if direct_vt {
            tracing::info!("direct vt requested, skipping logind");
            return VtSession::open_with(console()?).map(Session::Direct);
        }

        let bus = match bus() {
            Ok(bus) => bus,
            Err(err) => {
                tracing::warn!("session broker unavailable ({err}), falling back to vt");
                return VtSession::open_with(console()?).map(Session::Direct);
            }
        };

        LogindSession::create(bus).map(Session::Logind)
    }

    pub fn seat(&self) -> &str {
        match self {
            Session::Logind(session) => session.seat(),
            Session::Direct(_) => "seat0",
        }
    }

    /// tear the session down, releasing control or the terminal
    pub fn release(self) -> Result<()> {
        match self {
            Session::Logind(session) => session.release(),
            Session::Direct(vt) => {
                drop(vt);
                Ok(())
            }
        }
    }
}

impl<L: Login1, C: Console> DeviceBroker for Session<L, C> {
    fn take_device(&mut self, path: &Path) -> Result<TakenDevice> {
        match self {
            Session::Logind(session) => session.take_device(path),
            Session::Direct(vt) => vt.take_device(path),
        }
    }

    fn release_device(&mut self, device: TakenDevice) -> Result<()> {
        match self {
            Session::Logind(session) => session.release_device(device),
            Session::Direct(vt) => vt.release_device(device),
        }
    }
}

/// open a device node without a broker
pub(crate) fn open_direct(path: &Path) -> Result<TakenDevice> {
    let (major, minor) = device_number(path)?;
    let flags = OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK;
    let fd = rustix::fs::open(path, flags, Mode::empty()).map_err(|err|Error::Kernel {
        op: "open device",
        source: err.into(),
    })?;

    Ok(TakenDevice {
        fd,
        path: path.to_path_buf(),
        major,
        minor,
        paused: false,
    })
}
