//! keyboard input over libinput
//!
//! devices are opened through the same [`DeviceBroker`] that granted the kms
//! device, so input works under logind and on a directly owned terminal.

use std::{
    cell::RefCell,
    collections::HashMap,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    path::Path,
    rc::Rc,
};

use input::{
    event::{
        keyboard::{KeyState, KeyboardEvent, KeyboardEventTrait},
        Event,
    },
    Libinput, LibinputInterface,
};
use xkbcommon::xkb;

use crate::{
    error::{Error, Result},
    session::{DeviceBroker, TakenDevice},
};

/// evdev key codes are offset by 8 in xkb
const EVDEV_OFFSET: u32 = 8;

/// A key press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// evdev key code
    pub code: u32,
    pub pressed: bool,
    pub time_usec: u64,
}

struct Interface<B> {
    broker: Rc<RefCell<B>>,
    devices: HashMap<RawFd, TakenDevice>,
}

impl<B: DeviceBroker> LibinputInterface for Interface<B> {
    fn open_restricted(&mut self, path: &Path, _flags: i32) -> Result<OwnedFd, i32> {
        let device = self.broker.borrow_mut().take_device(path).map_err(|err|{
            tracing::warn!("failed to open {}: {err}", path.display());
            err.raw_os_error().unwrap_or(libc::EIO)
        })?;

        // libinput closes its copy, the granted descriptor stays with us
        let fd = match device.as_fd().try_clone_to_owned() {
            Ok(fd) => fd,
            Err(err) => {
                let errno = err.raw_os_error().unwrap_or(libc::EIO);
                if let Err(err) = self.broker.borrow_mut().release_device(device) {
                    tracing::warn!("failed to release {}: {err}", path.display());
                }
                return Err(errno);
            }
        };

        tracing::debug!("opened input device {}", path.display());
        self.devices.insert(fd.as_raw_fd(), device);
        Ok(fd)
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        let device = self.devices.remove(&fd.as_raw_fd());
        drop(fd);
        let Some(device) = device else {
            return;
        };
        let path = device.path().to_path_buf();
        if let Err(err) = self.broker.borrow_mut().release_device(device) {
            tracing::warn!("failed to release {}: {err}", path.display());
        }
    }
}

/// libinput context assigned to one seat.
pub struct InputContext {
    libinput: Libinput,
}

impl InputContext {
    pub fn new<B: DeviceBroker + 'static>(broker: Rc<RefCell<B>>, seat: &str) -> Result<Self> {
        let mut libinput = Libinput::new_with_udev(Interface {
            broker,
            devices: HashMap::new(),
        });
        libinput
            .udev_assign_seat(seat)
            .map_err(|()|Error::Input(format!("failed to assign seat {seat}")))?;
        tracing::info!("listening for input on {seat}");
        Ok(Self { libinput })
    }

    /// Read pending libinput events and return the key events among them.
    pub fn dispatch(&mut self) -> Result<Vec<KeyEvent>> {
        self.libinput.dispatch().map_err(Error::kernel("libinput dispatch"))?;

        let mut keys = vec![];
        for event in &mut self.libinput {
            if let Event::Keyboard(KeyboardEvent::Key(key)) = event {
                keys.push(KeyEvent {
                    code: key.key(),
                    pressed: key.key_state() == KeyState::Pressed,
                    time_usec: key.time_usec(),
                });
            }
        }
        Ok(keys)
    }
}

impl AsFd for InputContext {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.libinput.as_fd()
    }
}

/// xkb state translating key codes to keysyms.
pub struct Keyboard {
    state: xkb::State,
}

impl Keyboard {
    /// keymap from the default rules with the given layout, e.g. `us`
    pub fn new(layout: &str) -> Result<Self> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            "",
            "",
            layout,
            "",
            None,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(||Error::Input(format!("failed to compile keymap for layout {layout:?}")))?;
        Ok(Self { state: xkb::State::new(&keymap) })
    }

    /// Update the state, returning the keysym produced by a press.
    pub fn feed(&mut self, event: &KeyEvent) -> Option<xkb::Keysym> {
        let code = xkb::Keycode::new(event.code + EVDEV_OFFSET);
        let keysym = self.state.key_get_one_sym(code);
        let direction = match event.pressed {
            true => xkb::KeyDirection::Down,
            false => xkb::KeyDirection::Up,
        };
        self.state.update_key(code, direction);

        if !event.pressed {
            return None;
        }
        tracing::trace!(keysym = xkb::keysym_get_name(keysym), "keysym");
        Some(keysym)
    }
}
