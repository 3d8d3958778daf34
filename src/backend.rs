//! the end to end display loop used by the binary
//!
//! takes a session and the kms device, enumerates one output, fills its swap
//! chain with solid colours and flips between the slots until enough frames
//! have been shown or Escape is pressed.

use std::{cell::RefCell, rc::Rc};

use anyhow::{Context, Result};
use rustix::event::{PollFd, PollFlags};
use xkbcommon::xkb::Keysym;

use crate::{
    buffer::{AllocFlags, Allocator, BufferInfo, GbmAllocator},
    commit::AtomicRequest,
    config::Config,
    core::{Core, OutputId},
    device::{Card, KmsDevice},
    input::{InputContext, Keyboard},
    session::{DeviceBroker, Session},
};

/// poll timeout while waiting for the last flip before shutdown
const DRAIN_TIMEOUT_MS: i32 = 100;
const DRAIN_ATTEMPTS: usize = 10;

pub fn run(config: Config) -> Result<()> {
    let session = Session::connect(&config).context("failed to open a session")?;
    tracing::info!("using seat {:?}", session.seat());

    let broker = Rc::new(RefCell::new(session));
    let device = broker
        .borrow_mut()
        .take_device(&config.drm_device)
        .with_context(||format!("failed to take {}", config.drm_device.display()))?;
    if device.paused() {
        tracing::warn!("session is not in the foreground, commits may fail");
    }
    let card = Card::new(device);

    let result = display(&config, &card, broker.clone());

    if let Err(err) = broker.borrow_mut().release_device(card.into_inner()) {
        tracing::warn!("failed to release the drm device: {err}");
    }
    match Rc::try_unwrap(broker) {
        Ok(session) => session.into_inner().release().context("failed to release the session")?,
        Err(_) => tracing::warn!("session still shared at shutdown"),
    }

    result
}

fn display(config: &Config, card: &Card, broker: Rc<RefCell<Session>>) -> Result<()> {
    let allocator = GbmAllocator::new(card).context("failed to setup gbm")?;
    let mut core = Core::new(card, allocator);

    let id = core.enumerate(&config.output).context("failed to enumerate the output")?;
    let info = BufferInfo {
        modifiers: !config.disable_modifiers,
        flags: AllocFlags::SCANOUT | AllocFlags::LINEAR,
        ..BufferInfo::default()
    };
    core.create_buffers(id, config.buffers, &info).context("failed to create buffers")?;

    let slots = core.output(id)?.buffers().len();
    for slot in 0..slots {
        let color = shade(config.clear_color, slot);
        core.map_buffer(id, slot, |data, stride|fill(data, stride, color))
            .with_context(||format!("failed to fill slot {slot}"))?;
    }

    let mut keyboard = match Keyboard::new(&config.kb_layout) {
        Ok(keyboard) => Some(keyboard),
        Err(err) => {
            tracing::warn!("keyboard unavailable: {err}");
            None
        }
    };
    let mut input = match InputContext::new(broker, &config.seat) {
        Ok(input) => Some(input),
        Err(err) => {
            tracing::warn!("input unavailable: {err}");
            None
        }
    };

    let legacy = config.legacy || !core.output(id)?.has_atomic();
    if legacy && !config.legacy {
        tracing::info!("driver has no atomic modesetting, using set_crtc and page_flip");
    }

    let mut slot = 0;
    present(&mut core, id, slot, legacy).context("failed to present the first frame")?;

    let mut flips = 0;
    'frames: while flips < config.frames {
        let Some((drm_ready, input_ready)) = wait(&core, input.as_ref(), -1)? else {
            continue;
        };

        if input_ready {
            if let (Some(input), Some(keyboard)) = (input.as_mut(), keyboard.as_mut()) {
                for key in input.dispatch()? {
                    if keyboard.feed(&key) == Some(Keysym::Escape) {
                        tracing::info!("escape pressed, stopping");
                        break 'frames;
                    }
                }
            } else if let Some(input) = input.as_mut() {
                input.dispatch()?;
            }
        }

        if drm_ready {
            for done in core.drain_events()? {
                flips += 1;
                tracing::trace!(sequence = done.sequence, time = ?done.time, "frame {flips} on screen");
            }
            if !core.output(id)?.is_pending() && flips < config.frames {
                slot = (slot + 1) % slots;
                present(&mut core, id, slot, legacy)?;
            }
        }
    }
    tracing::info!("showed {flips} frames");

    for _ in 0..DRAIN_ATTEMPTS {
        if !core.output(id)?.is_pending() {
            break;
        }
        if let Some((true, _)) = wait(&core, None, DRAIN_TIMEOUT_MS)? {
            core.drain_events()?;
        }
    }

    drop(input);
    core.shutdown().context("failed to tear down the output")?;
    Ok(())
}

fn present<D: KmsDevice, A: Allocator>(
    core: &mut Core<D, A>,
    id: OutputId,
    slot: usize,
    legacy: bool,
) -> crate::Result<()> {
    if legacy {
        if !core.output(id)?.has_modeset() {
            core.set_crtc(id, slot)?;
        }
        return core.page_flip(id, slot);
    }

    let mut request = AtomicRequest::new();
    core.build_request(id, slot, &mut request)?;
    if !core.output(id)?.has_modeset() {
        core.test_commit(id, &request, true)?;
    }
    core.commit(id, request, false)
}

/// readiness of the kms and input descriptors, `None` when interrupted
fn wait<D: KmsDevice, A: Allocator>(
    core: &Core<D, A>,
    input: Option<&InputContext>,
    timeout: i32,
) -> Result<Option<(bool, bool)>> {
    let mut fds = vec![PollFd::from_borrowed_fd(core.completion_fd(), PollFlags::IN)];
    if let Some(input) = input {
        fds.push(PollFd::new(input, PollFlags::IN));
    }

    match rustix::event::poll(&mut fds, timeout) {
        Ok(_) => {}
        Err(rustix::io::Errno::INTR) => return Ok(None),
        Err(err) => return Err(err).context("poll failed"),
    }

    let ready = |index: usize|fds.get(index).is_some_and(|fd|fd.revents().contains(PollFlags::IN));
    Ok(Some((ready(0), ready(1))))
}

/// dim the colour a little for every slot so flips are visible
fn shade(color: u32, slot: usize) -> u32 {
    let factor = 4 - slot.min(3) as u32;
    let channel = |shift: u32|((color >> shift) & 0xff) * factor / 4;
    (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

fn fill(data: &mut [u8], stride: u32, color: u32) {
    let pixel = color.to_ne_bytes();
    for row in data.chunks_mut(stride as usize) {
        for px in row.chunks_exact_mut(4) {
            px.copy_from_slice(&pixel);
        }
    }
}
