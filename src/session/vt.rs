//! direct virtual terminal ownership, used when no session broker answers
//!
//! every step taken in [`VtSession::open`] is recorded so dropping the session
//! (or failing half way through opening it) undoes exactly the steps that
//! completed, last first.

use std::{
    io,
    os::fd::{AsRawFd, OwnedFd},
    path::{Path, PathBuf},
};

use rustix::fs::{Mode, OFlags};

use super::{open_direct, TakenDevice};
use crate::error::{Error, Result};

// linux/vt.h
const VT_OPENQRY: libc::c_ulong = 0x5600;
const VT_GETSTATE: libc::c_ulong = 0x5603;
const VT_ACTIVATE: libc::c_ulong = 0x5606;
const VT_WAITACTIVE: libc::c_ulong = 0x5607;

// linux/kd.h
const KDSETMODE: libc::c_ulong = 0x4B3A;
const KDGKBMODE: libc::c_ulong = 0x4B44;
const KDSKBMODE: libc::c_ulong = 0x4B45;
const KD_TEXT: libc::c_ulong = 0x00;
const KD_GRAPHICS: libc::c_ulong = 0x01;
const K_OFF: libc::c_int = 0x04;

const TTY0: &str = "/dev/tty0";

/// The terminal ioctls a [`VtSession`] issues.
///
/// Queries before [`Console::open_vt`] go to `/dev/tty0`, everything after it
/// to the opened terminal.
pub trait Console {
    /// first terminal nobody has open
    fn free_vt(&mut self) -> io::Result<u32>;

    /// terminal in the foreground
    fn active_vt(&mut self) -> io::Result<u16>;

    fn open_vt(&mut self, vt: u32) -> io::Result<()>;

    fn activate(&mut self, vt: u32) -> io::Result<()>;

    fn wait_active(&mut self, vt: u32) -> io::Result<()>;

    fn keyboard_mode(&mut self) -> io::Result<libc::c_int>;

    fn set_keyboard_mode(&mut self, mode: libc::c_int) -> io::Result<()>;

    /// `KD_GRAPHICS` when true, `KD_TEXT` otherwise
    fn set_graphics(&mut self, graphics: bool) -> io::Result<()>;
}

#[repr(C)]
#[allow(dead_code)]
#[derive(Default)]
struct VtStat {
    v_active: libc::c_ushort,
    v_signal: libc::c_ushort,
    v_state: libc::c_ushort,
}

fn ioctl(fd: &OwnedFd, request: libc::c_ulong, arg: libc::c_ulong) -> io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, arg) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

fn ioctl_ptr<T>(fd: &OwnedFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, arg as *mut T) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn open_tty(path: &Path) -> io::Result<OwnedFd> {
    let flags = OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC;
    Ok(rustix::fs::open(path, flags, Mode::empty())?)
}

/// The kernel console, `/dev/tty0` and then `/dev/ttyN`.
#[derive(Debug)]
pub struct LinuxConsole {
    tty0: Option<OwnedFd>,
    tty: Option<OwnedFd>,
}

impl LinuxConsole {
    pub fn new() -> Result<Self> {
        let tty0 = open_tty(Path::new(TTY0)).map_err(|source|Error::Vt {
            op: "open",
            path: PathBuf::from(TTY0),
            source,
        })?;
        Ok(Self { tty0: Some(tty0), tty: None })
    }

    fn tty0(&self) -> io::Result<&OwnedFd> {
        self.tty0.as_ref().ok_or_else(||io::Error::from_raw_os_error(libc::EBADF))
    }

    fn tty(&self) -> io::Result<&OwnedFd> {
        self.tty.as_ref().ok_or_else(||io::Error::from_raw_os_error(libc::ENOTTY))
    }
}

impl Console for LinuxConsole {
    fn free_vt(&mut self) -> io::Result<u32> {
        let mut free: libc::c_int = -1;
        ioctl_ptr(self.tty0()?, VT_OPENQRY, &mut free)?;
        if free <= 0 {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no free virtual terminal"));
        }
        Ok(free as u32)
    }

    fn active_vt(&mut self) -> io::Result<u16> {
        let mut state = VtStat::default();
        ioctl_ptr(self.tty0()?, VT_GETSTATE, &mut state)?;
        Ok(state.v_active)
    }

    fn open_vt(&mut self, vt: u32) -> io::Result<()> {
        self.tty = Some(open_tty(&tty_path(vt))?);
        self.tty0 = None;
        Ok(())
    }

    fn activate(&mut self, vt: u32) -> io::Result<()> {
        ioctl(self.tty()?, VT_ACTIVATE, vt as libc::c_ulong).map(drop)
    }

    fn wait_active(&mut self, vt: u32) -> io::Result<()> {
        ioctl(self.tty()?, VT_WAITACTIVE, vt as libc::c_ulong).map(drop)
    }

    fn keyboard_mode(&mut self) -> io::Result<libc::c_int> {
        let mut mode: libc::c_int = 0;
        ioctl_ptr(self.tty()?, KDGKBMODE, &mut mode)?;
        Ok(mode)
    }

    fn set_keyboard_mode(&mut self, mode: libc::c_int) -> io::Result<()> {
        ioctl(self.tty()?, KDSKBMODE, mode as libc::c_ulong).map(drop)
    }

    fn set_graphics(&mut self, graphics: bool) -> io::Result<()> {
        let mode = if graphics { KD_GRAPHICS } else { KD_TEXT };
        ioctl(self.tty()?, KDSETMODE, mode).map(drop)
    }
}

fn tty_path(vt: u32) -> PathBuf {
    PathBuf::from(format!("/dev/tty{vt}"))
}

/// A virtual terminal switched into graphics mode by this process.
#[derive(Debug)]
pub struct VtSession<C: Console = LinuxConsole> {
    console: C,
    path: PathBuf,
    vt: u32,
    previous_vt: Option<u16>,
    saved_kb_mode: Option<libc::c_int>,
    graphics: bool,
}

impl VtSession {
    pub fn open() -> Result<Self> {
        VtSession::open_with(LinuxConsole::new()?)
    }
}

impl<C: Console> VtSession<C> {
    pub fn open_with(mut console: C) -> Result<Self> {
        let fail = |op: &'static str, path: &Path|{
            let path = path.to_path_buf();
            move |source| Error::Vt { op, path, source }
        };

        let tty0 = Path::new(TTY0);
        let vt = console.free_vt().map_err(fail("VT_OPENQRY", tty0))?;
        let previous = console.active_vt().map_err(fail("VT_GETSTATE", tty0))?;

        let path = tty_path(vt);
        console.open_vt(vt).map_err(fail("open", &path))?;
        tracing::info!("using virtual terminal {}", path.display());

        let mut session = Self {
            console,
            path,
            vt,
            previous_vt: None,
            saved_kb_mode: None,
            graphics: false,
        };

        session.console.activate(vt).map_err(fail("VT_ACTIVATE", &session.path))?;
        session.previous_vt = Some(previous);
        session.console.wait_active(vt).map_err(fail("VT_WAITACTIVE", &session.path))?;

        let kb_mode = session.console.keyboard_mode().map_err(fail("KDGKBMODE", &session.path))?;
        session.console.set_keyboard_mode(K_OFF).map_err(fail("KDSKBMODE", &session.path))?;
        session.saved_kb_mode = Some(kb_mode);

        session.console.set_graphics(true).map_err(fail("KDSETMODE", &session.path))?;
        session.graphics = true;

        Ok(session)
    }

    pub fn vt(&self) -> u32 {
        self.vt
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// saved keyboard mode, restored on drop
    pub fn saved_kb_mode(&self) -> Option<libc::c_int> {
        self.saved_kb_mode
    }

    pub fn take_device(&mut self, path: &Path) -> Result<TakenDevice> {
        open_direct(path)
    }

    pub fn release_device(&mut self, device: TakenDevice) -> Result<()> {
        tracing::debug!("closing {}", device.path().display());
        drop(device);
        Ok(())
    }
}

impl<C: Console> Drop for VtSession<C> {
    fn drop(&mut self) {
        if self.graphics {
            if let Err(err) = self.console.set_graphics(false) {
                tracing::warn!("failed to restore text mode on {}: {err}", self.path.display());
            }
        }

        if let Some(mode) = self.saved_kb_mode.take() {
            if let Err(err) = self.console.set_keyboard_mode(mode) {
                tracing::warn!("failed to restore keyboard mode on {}: {err}", self.path.display());
            }
        }

        if let Some(previous) = self.previous_vt.take() {
            if let Err(err) = self.console.activate(previous as u32) {
                tracing::warn!("failed to switch back to vt{previous}: {err}");
            }
        }

        tracing::debug!("left virtual terminal {}", self.path.display());
    }
}
