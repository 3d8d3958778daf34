//! logind session broker
//!
//! [`Login1`] is the subset of `org.freedesktop.login1` this crate calls,
//! [`SystemBus`] implements it with blocking zbus calls.

use std::{os::fd::OwnedFd, path::Path};

use rustix::io::{fcntl_setfd, FdFlags};
use zbus::zvariant::OwnedObjectPath;

use super::{device_number, TakenDevice, DRM_MAJOR};
use crate::error::{Error, Result};

const DESTINATION: &str = "org.freedesktop.login1";
const MANAGER_PATH: &str = "/org/freedesktop/login1";
const MANAGER: &str = "org.freedesktop.login1.Manager";
const SESSION: &str = "org.freedesktop.login1.Session";
const USER: &str = "org.freedesktop.login1.User";

const DEFAULT_SEAT: &str = "seat0";

/// Static description of a logind session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    /// `tty`, `x11`, `wayland`, `mir` or `unspecified`
    pub kind: String,
    pub seat: String,
    pub vtnr: u32,
}

pub trait Login1 {
    /// id of the session the process belongs to, if any
    fn session_of_pid(&self, pid: u32) -> Result<Option<String>>;

    /// id of the user's display session, if any
    fn display_session_of_user(&self, uid: u32) -> Result<Option<String>>;

    /// object path of a session id
    fn get_session(&self, id: &str) -> Result<String>;

    fn session_info(&self, id: &str) -> Result<SessionInfo>;

    fn activate(&self, session: &str) -> Result<()>;

    fn take_control(&self, session: &str, force: bool) -> Result<()>;

    fn release_control(&self, session: &str) -> Result<()>;

    /// returns an owned duplicate of the granted descriptor and the paused flag
    fn take_device(&self, session: &str, major: u32, minor: u32) -> Result<(OwnedFd, bool)>;

    fn release_device(&self, session: &str, major: u32, minor: u32) -> Result<()>;
}

/// Connection to logind on the system bus.
#[derive(Debug, Clone)]
pub struct SystemBus {
    conn: zbus::blocking::Connection,
}

impl SystemBus {
    pub fn connect() -> Result<Self> {
        let conn = zbus::blocking::Connection::system().map_err(Error::ipc("connect system bus"))?;

        let reply = conn
            .call_method(
                Some("org.freedesktop.DBus"),
                "/org/freedesktop/DBus",
                Some("org.freedesktop.DBus"),
                "NameHasOwner",
                &(DESTINATION),
            )
            .map_err(Error::ipc("NameHasOwner"))?;
        let owned: bool = reply.body().deserialize().map_err(Error::ipc("NameHasOwner"))?;
        if !owned {
            return Err(Error::NoSession(format!("{DESTINATION} is not running")));
        }

        Ok(Self { conn })
    }

    fn session_proxy(&self, path: &str) -> Result<zbus::blocking::Proxy<'_>> {
        zbus::blocking::Proxy::new(&self.conn, DESTINATION, path.to_owned(), SESSION)
            .map_err(Error::ipc("session proxy"))
    }
}

fn no_such(err: &zbus::Error, name: &str) -> bool {
    matches!(err, zbus::Error::MethodError(error_name, _, _) if error_name.as_str() == name)
}

impl Login1 for SystemBus {
    fn session_of_pid(&self, pid: u32) -> Result<Option<String>> {
        let reply = match self.conn.call_method(
            Some(DESTINATION),
            MANAGER_PATH,
            Some(MANAGER),
            "GetSessionByPID",
            &(pid),
        ) {
            Ok(reply) => reply,
            Err(err) if no_such(&err, "org.freedesktop.login1.NoSessionForPID") => return Ok(None),
            Err(err) => return Err(Error::ipc("GetSessionByPID")(err)),
        };
        let path: OwnedObjectPath = reply.body().deserialize().map_err(Error::ipc("GetSessionByPID"))?;

        let id: String = self
            .session_proxy(path.as_str())?
            .get_property("Id")
            .map_err(Error::ipc("Session.Id"))?;
        Ok(Some(id))
    }

    fn display_session_of_user(&self, uid: u32) -> Result<Option<String>> {
        let reply = match self.conn.call_method(
            Some(DESTINATION),
            MANAGER_PATH,
            Some(MANAGER),
            "GetUser",
            &(uid),
        ) {
            Ok(reply) => reply,
            Err(err) if no_such(&err, "org.freedesktop.login1.NoSuchUser") => return Ok(None),
            Err(err) => return Err(Error::ipc("GetUser")(err)),
        };
        let path: OwnedObjectPath = reply.body().deserialize().map_err(Error::ipc("GetUser"))?;

        let user = zbus::blocking::Proxy::new(&self.conn, DESTINATION, path.as_str().to_owned(), USER)
            .map_err(Error::ipc("user proxy"))?;
        let (id, _): (String, OwnedObjectPath) =
            user.get_property("Display").map_err(Error::ipc("User.Display"))?;

        Ok((!id.is_empty()).then_some(id))
    }

    fn get_session(&self, id: &str) -> Result<String> {
        let reply = self
            .conn
            .call_method(Some(DESTINATION), MANAGER_PATH, Some(MANAGER), "GetSession", &(id))
            .map_err(Error::ipc("GetSession"))?;
        let path: OwnedObjectPath = reply.body().deserialize().map_err(Error::ipc("GetSession"))?;
        Ok(path.as_str().to_owned())
    }

    fn session_info(&self, id: &str) -> Result<SessionInfo> {
        let path = self.get_session(id)?;
        let proxy = self.session_proxy(&path)?;

        let kind: String = proxy.get_property("Type").map_err(Error::ipc("Session.Type"))?;
        let (seat, _): (String, OwnedObjectPath) =
            proxy.get_property("Seat").map_err(Error::ipc("Session.Seat"))?;
        let vtnr: u32 = proxy.get_property("VTNr").map_err(Error::ipc("Session.VTNr"))?;

        Ok(SessionInfo { id: id.to_owned(), kind, seat, vtnr })
    }

    fn activate(&self, session: &str) -> Result<()> {
        self.conn
            .call_method(Some(DESTINATION), session, Some(SESSION), "Activate", &())
            .map_err(Error::ipc("Activate"))?;
        Ok(())
    }

    fn take_control(&self, session: &str, force: bool) -> Result<()> {
        self.conn
            .call_method(Some(DESTINATION), session, Some(SESSION), "TakeControl", &(force))
            .map_err(Error::ipc("TakeControl"))?;
        Ok(())
    }

    fn release_control(&self, session: &str) -> Result<()> {
        self.conn
            .call_method(Some(DESTINATION), session, Some(SESSION), "ReleaseControl", &())
            .map_err(Error::ipc("ReleaseControl"))?;
        Ok(())
    }

    fn take_device(&self, session: &str, major: u32, minor: u32) -> Result<(OwnedFd, bool)> {
        let reply = self
            .conn
            .call_method(Some(DESTINATION), session, Some(SESSION), "TakeDevice", &(major, minor))
            .map_err(Error::ipc("TakeDevice"))?;

        // deserializing duplicates the descriptor out of the reply, which
        // closes its own copy when dropped
        let (fd, paused): (zbus::zvariant::OwnedFd, bool) =
            reply.body().deserialize().map_err(Error::ipc("TakeDevice"))?;
        let fd = OwnedFd::from(fd);

        fcntl_setfd(&fd, FdFlags::CLOEXEC).map_err(|err|Error::Kernel {
            op: "set CLOEXEC on device fd",
            source: err.into(),
        })?;

        Ok((fd, paused))
    }

    fn release_device(&self, session: &str, major: u32, minor: u32) -> Result<()> {
        self.conn
            .call_method(Some(DESTINATION), session, Some(SESSION), "ReleaseDevice", &(major, minor))
            .map_err(Error::ipc("ReleaseDevice"))?;
        Ok(())
    }
}

/// A logind session this process controls.
#[derive(Debug)]
pub struct LogindSession<L: Login1 = SystemBus> {
    bus: L,
    id: String,
    path: String,
    seat: String,
    vtnr: u32,
    has_display: bool,
    in_control: bool,
}

impl<L: Login1> LogindSession<L> {
    pub fn create(bus: L) -> Result<Self> {
        let id = match bus.session_of_pid(std::process::id())? {
            Some(id) => id,
            None => {
                let uid = rustix::process::getuid().as_raw();
                bus.display_session_of_user(uid)?
                    .ok_or_else(||Error::NoSession(format!("user {uid} has no display session")))?
            }
        };

        let info = bus.session_info(&id)?;
        if info.kind != "tty" {
            return Err(Error::SessionRejected {
                id,
                reason: format!("session type is {:?}, not tty", info.kind),
            });
        }
        if info.seat != DEFAULT_SEAT {
            return Err(Error::SessionRejected {
                id,
                reason: format!("seat {:?} is not {DEFAULT_SEAT}", info.seat),
            });
        }

        let path = bus.get_session(&id)?;
        bus.activate(&path)?;
        bus.take_control(&path, false)?;

        tracing::info!(session = %id, seat = %info.seat, vt = info.vtnr, "took control of session");

        Ok(Self {
            bus,
            id,
            path,
            seat: info.seat,
            vtnr: info.vtnr,
            has_display: false,
            in_control: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn seat(&self) -> &str {
        &self.seat
    }

    pub fn vtnr(&self) -> u32 {
        self.vtnr
    }

    /// whether a kms device granted through this session is still held
    pub fn has_display(&self) -> bool {
        self.has_display
    }

    pub fn take_device(&mut self, path: &Path) -> Result<TakenDevice> {
        let (major, minor) = device_number(path)?;
        self.grant(path, major, minor)
    }

    fn grant(&mut self, path: &Path, major: u32, minor: u32) -> Result<TakenDevice> {
        let (fd, paused) = self.bus.take_device(&self.path, major, minor)?;
        if major == DRM_MAJOR {
            self.has_display = true;
        }
        if paused {
            tracing::warn!("device {} granted while paused", path.display());
        }
        tracing::debug!("took device {} ({major}:{minor})", path.display());

        Ok(TakenDevice {
            fd,
            path: path.to_path_buf(),
            major,
            minor,
            paused,
        })
    }

    pub fn release_device(&mut self, device: TakenDevice) -> Result<()> {
        let TakenDevice { fd, path, major, minor, .. } = device;
        let result = self.bus.release_device(&self.path, major, minor);
        drop(fd);
        if major == DRM_MAJOR && result.is_ok() {
            self.has_display = false;
        }
        tracing::debug!("released device {} ({major}:{minor})", path.display());
        result
    }

    pub fn release(mut self) -> Result<()> {
        if self.has_display {
            tracing::warn!(session = %self.id, "releasing control while a display device is still held");
        }
        self.in_control = false;
        self.bus.release_control(&self.path)
    }
}

impl<L: Login1> Drop for LogindSession<L> {
    fn drop(&mut self) {
        if self.in_control {
            if let Err(err) = self.bus.release_control(&self.path) {
                tracing::warn!("failed to release session control: {err}");
            }
        }
    }
}
