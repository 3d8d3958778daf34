//! completion events
//!
//! there is no internal loop. poll [`Core::completion_fd`] for readability and
//! call [`Core::drain_events`].

use std::{
    os::fd::{AsFd, BorrowedFd},
    time::Duration,
};

use drm::control::crtc;

use crate::{
    buffer::Allocator,
    core::{Core, OutputId},
    device::KmsDevice,
    error::{Error, Result},
};

/// A commit or flip that reached the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub output: OutputId,
    pub crtc: crtc::Handle,
    /// vblank sequence number reported by the kernel
    pub sequence: u32,
    /// monotonic timestamp of the flip
    pub time: Duration,
}

impl<D: KmsDevice, A: Allocator> Core<D, A> {
    /// descriptor that becomes readable when completions are queued
    pub fn completion_fd(&self) -> BorrowedFd<'_> {
        self.device.as_fd()
    }

    /// Register a callback invoked for every drained completion.
    pub fn on_completion(&mut self, callback: impl FnMut(&Completion) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Read every queued event, clearing pending state of the outputs involved.
    pub fn drain_events(&mut self) -> Result<Vec<Completion>> {
        let events = self.device.receive_events().map_err(Error::kernel("read events"))?;

        let mut completions = vec![];
        for event in events {
            let mut matched = false;
            for (index, output) in self.outputs.iter_mut().enumerate() {
                if output.crtc != event.crtc || !output.pending {
                    continue;
                }
                matched = true;
                output.pending = false;
                if let Some(slot) = output.queued.take() {
                    output.on_screen = Some(slot);
                }
                completions.push(Completion {
                    output: OutputId(index),
                    crtc: event.crtc,
                    sequence: event.sequence,
                    time: event.time,
                });
            }

            if !matched {
                tracing::warn!(crtc = ?event.crtc, sequence = event.sequence, "dropping event for an idle or unknown crtc");
            }
        }

        for completion in &completions {
            for callback in &mut self.callbacks {
                callback(completion);
            }
        }

        Ok(completions)
    }
}
