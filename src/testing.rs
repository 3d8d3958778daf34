//! in-memory stand-ins for the kernel, the allocator and logind

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    fs::File,
    io,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    path::Path,
    rc::Rc,
    time::Duration,
};

use drm::{
    buffer::DrmFourcc,
    control::{
        connector, crtc, encoder, framebuffer, plane, property, AtomicCommitFlags, Mode,
        ResourceHandle,
    },
};

use crate::{
    buffer::{AllocFlags, Allocator, BufferObject},
    commit::AtomicRequest,
    device::{
        CompletionEvent, ConnectorInfo, EncoderInfo, FramebufferLayout, KmsDevice, PlaneInfo,
        PropertyEntry, Resources,
    },
    error::{Error, Result},
    props::Prop,
    session::{
        logind::{Login1, SessionInfo},
        open_direct,
        vt::Console,
        DeviceBroker, TakenDevice,
    },
};

pub const LINEAR: u64 = 0;
/// I915_FORMAT_MOD_X_TILED
pub const TILED: u64 = 0x0100_0000_0000_0001;

const EDID_BLOB: u64 = 200;
const IN_FORMATS_BLOB: u64 = 201;

fn handle<H: ResourceHandle>(id: u32) -> H {
    drm::control::from_u32(id).unwrap()
}

pub fn crtc(id: u32) -> crtc::Handle {
    handle(id)
}

/// property id the fake device uses for a recognized property
pub fn prop(prop: Prop) -> property::Handle {
    let index = Prop::ALL.iter().position(|p|*p == prop).unwrap() as u32;
    handle(100 + index)
}

fn other_prop(name: &str) -> property::Handle {
    let id = match name {
        "EDID" => 150,
        "DPMS" => 151,
        "GAMMA_LUT" => 152,
        "type" => 153,
        "IN_FORMATS" => 154,
        _ => 159,
    };
    handle(id)
}

pub fn mode(width: u16, height: u16, refresh: u32) -> Mode {
    Mode::from(drm_ffi::drm_mode_modeinfo {
        clock: width as u32 * height as u32 * refresh / 1000,
        hdisplay: width,
        hsync_start: width + 88,
        hsync_end: width + 132,
        htotal: width + 280,
        hskew: 0,
        vdisplay: height,
        vsync_start: height + 4,
        vsync_end: height + 9,
        vtotal: height + 45,
        vscan: 0,
        vrefresh: refresh,
        flags: 0,
        type_: 0,
        name: [0; 32],
    })
}

/// `IN_FORMATS` blob with every modifier entry starting at format 0
pub fn in_formats_blob(formats: &[u32], modifiers: &[(u64, u64)]) -> Vec<u8> {
    let formats_offset = 24u32;
    let modifiers_offset = (formats_offset + 4 * formats.len() as u32 + 7) & !7;

    let mut blob = vec![];
    for word in [1, 0, formats.len() as u32, formats_offset, modifiers.len() as u32, modifiers_offset] {
        blob.extend_from_slice(&word.to_ne_bytes());
    }
    for format in formats {
        blob.extend_from_slice(&format.to_ne_bytes());
    }
    blob.resize(modifiers_offset as usize, 0);
    for (mask, modifier) in modifiers {
        blob.extend_from_slice(&mask.to_ne_bytes());
        blob.extend_from_slice(&0u32.to_ne_bytes());
        blob.extend_from_slice(&0u32.to_ne_bytes());
        blob.extend_from_slice(&modifier.to_ne_bytes());
    }
    blob
}

fn entry(handle: property::Handle, name: &str, value: u64) -> PropertyEntry {
    PropertyEntry { handle, name: name.to_owned(), value }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn null_fd() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").unwrap())
}

#[derive(Default)]
struct KmsState {
    atomic: bool,
    next_id: u32,
    framebuffers: HashMap<u32, FramebufferLayout>,
    mode_blobs: HashSet<u64>,
    events: VecDeque<CompletionEvent>,
    sequence: u32,
    commits: Vec<AtomicCommitFlags>,
    fail_commits: Option<i32>,
    fail_framebuffers: Option<i32>,
    teardown: Vec<&'static str>,
}

impl KmsState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn queue_flip(&mut self, crtc: crtc::Handle) {
        self.sequence += 1;
        self.events.push_back(CompletionEvent {
            crtc,
            sequence: self.sequence,
            time: Duration::from_micros(self.sequence as u64 * 16_667),
        });
    }
}

/// A kms device with two connectors, two crtcs and two planes.
pub struct FakeKms {
    fd: OwnedFd,
    connectors: Vec<ConnectorInfo>,
    encoders: Vec<EncoderInfo>,
    crtcs: Vec<crtc::Handle>,
    planes: Vec<PlaneInfo>,
    props: HashMap<u32, Vec<PropertyEntry>>,
    blobs: HashMap<u64, Vec<u8>>,
    modifiers: bool,
    refuse_atomic: bool,
    state: RefCell<KmsState>,
}

impl FakeKms {
    /// `HDMI-A-1` connected, `DP-1` disconnected
    pub fn single() -> Self {
        let crtcs = vec![crtc(40), crtc(41)];
        let connectors = vec![
            ConnectorInfo {
                handle: handle(30),
                name: "HDMI-A-1".into(),
                connected: true,
                modes: vec![mode(1920, 1080, 60), mode(1920, 1080, 30), mode(1280, 720, 60)],
                encoders: vec![handle(31)],
            },
            ConnectorInfo {
                handle: handle(32),
                name: "DP-1".into(),
                connected: false,
                modes: vec![],
                encoders: vec![handle(33)],
            },
        ];
        let encoders = vec![
            EncoderInfo { handle: handle(31), crtc: None, possible_crtcs: crtcs.clone() },
            EncoderInfo { handle: handle(33), crtc: None, possible_crtcs: vec![crtc(41)] },
        ];
        let formats = vec![DrmFourcc::Xrgb8888 as u32, DrmFourcc::Argb8888 as u32];
        let planes = vec![
            PlaneInfo { handle: handle(50), possible_crtcs: crtcs.clone(), formats: formats.clone() },
            PlaneInfo { handle: handle(51), possible_crtcs: vec![crtc(41)], formats },
        ];

        let mut props = HashMap::new();
        for id in [30, 32] {
            props.insert(id, vec![
                entry(prop(Prop::CrtcId), "CRTC_ID", 0),
                entry(other_prop("EDID"), "EDID", EDID_BLOB),
                entry(other_prop("DPMS"), "DPMS", 0),
            ]);
        }
        for id in [40, 41] {
            props.insert(id, vec![
                entry(prop(Prop::ModeId), "MODE_ID", 0),
                entry(prop(Prop::Active), "ACTIVE", 0),
                entry(other_prop("GAMMA_LUT"), "GAMMA_LUT", 0),
            ]);
        }
        for id in [50, 51] {
            let mut entries: Vec<_> = Prop::ALL
                .iter()
                .filter(|p|!matches!(p, Prop::ModeId | Prop::Active))
                .map(|p|entry(prop(*p), p.name(), 0))
                .collect();
            entries.push(entry(other_prop("type"), "type", 1));
            entries.push(entry(other_prop("IN_FORMATS"), "IN_FORMATS", IN_FORMATS_BLOB));
            props.insert(id, entries);
        }

        let mut blobs = HashMap::new();
        blobs.insert(EDID_BLOB, b"not an edid".to_vec());
        blobs.insert(
            IN_FORMATS_BLOB,
            in_formats_blob(
                &[DrmFourcc::Xrgb8888 as u32, DrmFourcc::Argb8888 as u32],
                &[(0b11, LINEAR), (0b01, TILED)],
            ),
        );

        Self {
            fd: null_fd(),
            connectors,
            encoders,
            crtcs,
            planes,
            props,
            blobs,
            modifiers: true,
            refuse_atomic: false,
            state: RefCell::default(),
        }
    }

    /// drop a property from every object exposing it
    pub fn without_prop(mut self, removed: Prop) -> Self {
        for entries in self.props.values_mut() {
            entries.retain(|entry|entry.handle != prop(removed));
        }
        self
    }

    pub fn without_modifiers(mut self) -> Self {
        self.modifiers = false;
        self
    }

    /// a driver without atomic modesetting
    pub fn without_atomic(mut self) -> Self {
        self.refuse_atomic = true;
        self
    }

    pub fn fail_commits(&self, code: i32) {
        self.state.borrow_mut().fail_commits = Some(code);
    }

    pub fn fail_framebuffers(&self, code: i32) {
        self.state.borrow_mut().fail_framebuffers = Some(code);
    }

    pub fn push_event(&self, crtc: crtc::Handle, sequence: u32) {
        self.state.borrow_mut().events.push_back(CompletionEvent {
            crtc,
            sequence,
            time: Duration::ZERO,
        });
    }

    pub fn atomic_enabled(&self) -> bool {
        self.state.borrow().atomic
    }

    pub fn live_blobs(&self) -> usize {
        self.state.borrow().mode_blobs.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn framebuffer(&self, fb: framebuffer::Handle) -> Option<FramebufferLayout> {
        self.state.borrow().framebuffers.get(&u32::from(fb)).cloned()
    }

    pub fn last_commit_flags(&self) -> Option<AtomicCommitFlags> {
        self.state.borrow().commits.last().copied()
    }

    pub fn commit_count(&self) -> usize {
        self.state.borrow().commits.len()
    }

    pub fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    pub fn teardown_log(&self) -> Vec<&'static str> {
        self.state.borrow().teardown.clone()
    }
}

impl AsFd for FakeKms {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl KmsDevice for FakeKms {
    fn enable_atomic(&self) -> io::Result<()> {
        if self.refuse_atomic {
            return Err(errno(libc::EOPNOTSUPP));
        }
        self.state.borrow_mut().atomic = true;
        Ok(())
    }

    fn resources(&self) -> io::Result<Resources> {
        Ok(Resources {
            connectors: self.connectors.iter().map(|c|c.handle).collect(),
            encoders: self.encoders.iter().map(|e|e.handle).collect(),
            crtcs: self.crtcs.clone(),
            planes: self.planes.iter().map(|p|p.handle).collect(),
        })
    }

    fn connector(&self, handle: connector::Handle) -> io::Result<ConnectorInfo> {
        self.connectors.iter().find(|c|c.handle == handle).cloned().ok_or_else(||errno(libc::ENOENT))
    }

    fn encoder(&self, handle: encoder::Handle) -> io::Result<EncoderInfo> {
        self.encoders.iter().find(|e|e.handle == handle).cloned().ok_or_else(||errno(libc::ENOENT))
    }

    fn plane(&self, handle: plane::Handle) -> io::Result<PlaneInfo> {
        self.planes.iter().find(|p|p.handle == handle).cloned().ok_or_else(||errno(libc::ENOENT))
    }

    fn properties<H: ResourceHandle>(&self, handle: H) -> io::Result<Vec<PropertyEntry>> {
        let id: u32 = handle.into();
        Ok(self.props.get(&id).cloned().unwrap_or_default())
    }

    fn property_blob(&self, blob: u64) -> io::Result<Vec<u8>> {
        self.blobs.get(&blob).cloned().ok_or_else(||errno(libc::ENOENT))
    }

    fn create_mode_blob(&self, _mode: &Mode) -> io::Result<u64> {
        let mut state = self.state.borrow_mut();
        let id = state.next_id() as u64;
        state.mode_blobs.insert(id);
        Ok(id)
    }

    fn destroy_blob(&self, blob: u64) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.mode_blobs.remove(&blob) {
            return Err(errno(libc::ENOENT));
        }
        state.teardown.push("blob");
        Ok(())
    }

    fn supports_modifiers(&self) -> bool {
        self.modifiers
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<framebuffer::Handle> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.fail_framebuffers {
            return Err(errno(code));
        }
        let id = state.next_id();
        state.framebuffers.insert(id, layout.clone());
        Ok(handle(id))
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&u32::from(fb)).is_none() {
            return Err(errno(libc::ENOENT));
        }
        state.teardown.push("fb");
        Ok(())
    }

    fn atomic_commit(&self, flags: AtomicCommitFlags, request: &AtomicRequest) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.commits.push(flags);
        if let Some(code) = state.fail_commits {
            return Err(errno(code));
        }
        if flags.contains(AtomicCommitFlags::TEST_ONLY) || !flags.contains(AtomicCommitFlags::PAGE_FLIP_EVENT) {
            return Ok(());
        }

        let mut flipped = vec![];
        for (object, property, value) in request.iter() {
            let object = crtc(object.get());
            let target = if self.crtcs.contains(&object) {
                Some(object)
            } else if property == prop(Prop::CrtcId) {
                self.crtcs.iter().copied().find(|c|u32::from(*c) as u64 == value)
            } else {
                None
            };
            if let Some(target) = target.filter(|c|!flipped.contains(c)) {
                flipped.push(target);
            }
        }
        for target in flipped {
            state.queue_flip(target);
        }
        Ok(())
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        _fb: Option<framebuffer::Handle>,
        _connectors: &[connector::Handle],
        _mode: Option<Mode>,
    ) -> io::Result<()> {
        if !self.crtcs.contains(&crtc) {
            return Err(errno(libc::ENOENT));
        }
        Ok(())
    }

    fn page_flip(&self, crtc: crtc::Handle, _fb: framebuffer::Handle) -> io::Result<()> {
        self.state.borrow_mut().queue_flip(crtc);
        Ok(())
    }

    fn receive_events(&self) -> io::Result<Vec<CompletionEvent>> {
        Ok(self.state.borrow_mut().events.drain(..).collect())
    }
}

struct FakeBo {
    size: (u32, u32),
    format: DrmFourcc,
    modifier: Option<u64>,
    handle: u32,
    data: Vec<u8>,
}

impl FakeBo {
    fn stride(&self) -> u32 {
        self.size.0 * 4
    }
}

impl BufferObject for FakeBo {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<u64> {
        self.modifier
    }

    fn plane_count(&self) -> usize {
        1
    }

    fn handle(&self, _plane: usize) -> u32 {
        self.handle
    }

    fn stride(&self, _plane: usize) -> u32 {
        FakeBo::stride(self)
    }

    fn offset(&self, _plane: usize) -> u32 {
        0
    }

    fn export_fd(&self, _plane: usize) -> io::Result<OwnedFd> {
        Ok(OwnedFd::from(File::open("/dev/null")?))
    }

    fn map(&mut self, f: &mut dyn FnMut(&mut [u8], u32)) -> io::Result<()> {
        let stride = FakeBo::stride(self);
        f(&mut self.data, stride);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let target = self.data.get_mut(..data.len()).ok_or_else(||errno(libc::EINVAL))?;
        target.copy_from_slice(data);
        Ok(())
    }
}

/// Allocator handing out zeroed system memory.
#[derive(Default)]
pub struct FakeAllocator {
    allocated: Cell<usize>,
    fail_after: Option<usize>,
}

impl FakeAllocator {
    /// succeed `count` times, then report ENOMEM
    pub fn failing_after(count: usize) -> Self {
        Self { allocated: Cell::new(0), fail_after: Some(count) }
    }

    fn bo(&self, size: (u32, u32), format: DrmFourcc, modifier: Option<u64>) -> io::Result<Box<dyn BufferObject>> {
        let allocated = self.allocated.get();
        if self.fail_after.is_some_and(|limit|allocated >= limit) {
            return Err(errno(libc::ENOMEM));
        }
        self.allocated.set(allocated + 1);
        Ok(Box::new(FakeBo {
            size,
            format,
            modifier,
            handle: allocated as u32 + 1,
            data: vec![0; (size.0 * 4 * size.1) as usize],
        }))
    }
}

impl Allocator for FakeAllocator {
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        _flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>> {
        self.bo((width, height), format, None)
    }

    fn allocate_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: DrmFourcc,
        modifiers: &[u64],
        _flags: AllocFlags,
    ) -> io::Result<Box<dyn BufferObject>> {
        self.bo((width, height), format, modifiers.first().copied())
    }
}

/// Broker opening device nodes directly, counting grants.
#[derive(Debug, Default)]
pub struct FakeBroker {
    held: usize,
    released: usize,
}

impl FakeBroker {
    pub fn held(&self) -> usize {
        self.held
    }

    pub fn released(&self) -> usize {
        self.released
    }
}

impl DeviceBroker for FakeBroker {
    fn take_device(&mut self, path: &Path) -> Result<TakenDevice> {
        let device = open_direct(path)?;
        self.held += 1;
        Ok(device)
    }

    fn release_device(&mut self, device: TakenDevice) -> Result<()> {
        drop(device);
        self.held -= 1;
        self.released += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginCall {
    GetSession(String),
    Activate,
    TakeControl(bool),
    ReleaseControl,
    TakeDevice(u32, u32),
    ReleaseDevice(u32, u32),
}

#[derive(Debug)]
struct LoginState {
    pid_session: Option<String>,
    user_session: Option<String>,
    kind: String,
    seat: String,
    vtnr: u32,
    deny_devices: bool,
    calls: Vec<LoginCall>,
    taken: Vec<(u32, u32)>,
}

/// Scripted logind, clones share state.
#[derive(Debug, Clone)]
pub struct FakeLogin1(Rc<RefCell<LoginState>>);

impl FakeLogin1 {
    /// session `c1`, a tty on seat0 at vt 2
    pub fn tty() -> Self {
        Self(Rc::new(RefCell::new(LoginState {
            pid_session: Some("c1".into()),
            user_session: Some("c1".into()),
            kind: "tty".into(),
            seat: "seat0".into(),
            vtnr: 2,
            deny_devices: false,
            calls: vec![],
            taken: vec![],
        })))
    }

    pub fn set_pid_session(&self, id: Option<&str>) {
        self.0.borrow_mut().pid_session = id.map(str::to_owned);
    }

    pub fn set_user_session(&self, id: Option<&str>) {
        self.0.borrow_mut().user_session = id.map(str::to_owned);
    }

    pub fn set_kind(&self, kind: &str) {
        self.0.borrow_mut().kind = kind.to_owned();
    }

    pub fn set_seat(&self, seat: &str) {
        self.0.borrow_mut().seat = seat.to_owned();
    }

    pub fn deny_devices(&self) {
        self.0.borrow_mut().deny_devices = true;
    }

    pub fn allow_devices(&self) {
        self.0.borrow_mut().deny_devices = false;
    }

    pub fn calls(&self) -> Vec<LoginCall> {
        self.0.borrow().calls.clone()
    }

    /// device numbers currently granted
    pub fn taken(&self) -> Vec<(u32, u32)> {
        self.0.borrow().taken.clone()
    }

    fn record(&self, call: LoginCall) {
        self.0.borrow_mut().calls.push(call);
    }
}

fn failure(method: &'static str, message: &str) -> Error {
    Error::Ipc { method, source: zbus::Error::Failure(message.to_owned()) }
}

impl Login1 for FakeLogin1 {
    fn session_of_pid(&self, _pid: u32) -> Result<Option<String>> {
        Ok(self.0.borrow().pid_session.clone())
    }

    fn display_session_of_user(&self, _uid: u32) -> Result<Option<String>> {
        Ok(self.0.borrow().user_session.clone())
    }

    fn get_session(&self, id: &str) -> Result<String> {
        self.record(LoginCall::GetSession(id.to_owned()));
        Ok(format!("/org/freedesktop/login1/session/{id}"))
    }

    fn session_info(&self, id: &str) -> Result<SessionInfo> {
        let state = self.0.borrow();
        Ok(SessionInfo {
            id: id.to_owned(),
            kind: state.kind.clone(),
            seat: state.seat.clone(),
            vtnr: state.vtnr,
        })
    }

    fn activate(&self, _session: &str) -> Result<()> {
        self.record(LoginCall::Activate);
        Ok(())
    }

    fn take_control(&self, _session: &str, force: bool) -> Result<()> {
        self.record(LoginCall::TakeControl(force));
        Ok(())
    }

    fn release_control(&self, _session: &str) -> Result<()> {
        self.record(LoginCall::ReleaseControl);
        Ok(())
    }

    fn take_device(&self, _session: &str, major: u32, minor: u32) -> Result<(OwnedFd, bool)> {
        self.record(LoginCall::TakeDevice(major, minor));
        let mut state = self.0.borrow_mut();
        if state.deny_devices {
            return Err(failure("TakeDevice", "access denied"));
        }
        if state.taken.contains(&(major, minor)) {
            return Err(failure("TakeDevice", "device already taken"));
        }
        state.taken.push((major, minor));
        Ok((null_fd(), false))
    }

    fn release_device(&self, _session: &str, major: u32, minor: u32) -> Result<()> {
        self.record(LoginCall::ReleaseDevice(major, minor));
        let mut state = self.0.borrow_mut();
        let Some(index) = state.taken.iter().position(|dev|*dev == (major, minor)) else {
            return Err(failure("ReleaseDevice", "device not taken"));
        };
        state.taken.remove(index);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCall {
    FreeVt,
    ActiveVt,
    OpenVt(u32),
    Activate(u32),
    WaitActive(u32),
    KeyboardMode,
    SetKeyboardMode(libc::c_int),
    SetGraphics(bool),
}

#[derive(Debug)]
struct ConsoleState {
    free: u32,
    active: u16,
    kb_mode: libc::c_int,
    fail_at: Option<ConsoleCall>,
    calls: Vec<ConsoleCall>,
}

/// Scripted kernel console recording every ioctl, clones share state.
#[derive(Debug, Clone)]
pub struct FakeConsole(Rc<RefCell<ConsoleState>>);

impl FakeConsole {
    pub fn new(free: u32, active: u16, kb_mode: libc::c_int) -> Self {
        Self(Rc::new(RefCell::new(ConsoleState {
            free,
            active,
            kb_mode,
            fail_at: None,
            calls: vec![],
        })))
    }

    /// make exactly this call fail with EIO from now on
    pub fn fail_at(&self, call: ConsoleCall) {
        self.0.borrow_mut().fail_at = Some(call);
    }

    pub fn calls(&self) -> Vec<ConsoleCall> {
        self.0.borrow().calls.clone()
    }

    fn call(&self, call: ConsoleCall) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let failing = state.fail_at.as_ref() == Some(&call);
        state.calls.push(call);
        if failing {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }
}

impl Console for FakeConsole {
    fn free_vt(&mut self) -> io::Result<u32> {
        self.call(ConsoleCall::FreeVt)?;
        Ok(self.0.borrow().free)
    }

    fn active_vt(&mut self) -> io::Result<u16> {
        self.call(ConsoleCall::ActiveVt)?;
        Ok(self.0.borrow().active)
    }

    fn open_vt(&mut self, vt: u32) -> io::Result<()> {
        self.call(ConsoleCall::OpenVt(vt))
    }

    fn activate(&mut self, vt: u32) -> io::Result<()> {
        self.call(ConsoleCall::Activate(vt))
    }

    fn wait_active(&mut self, vt: u32) -> io::Result<()> {
        self.call(ConsoleCall::WaitActive(vt))
    }

    fn keyboard_mode(&mut self) -> io::Result<libc::c_int> {
        self.call(ConsoleCall::KeyboardMode)?;
        Ok(self.0.borrow().kb_mode)
    }

    fn set_keyboard_mode(&mut self, mode: libc::c_int) -> io::Result<()> {
        self.call(ConsoleCall::SetKeyboardMode(mode))
    }

    fn set_graphics(&mut self, graphics: bool) -> io::Result<()> {
        self.call(ConsoleCall::SetGraphics(graphics))
    }
}
