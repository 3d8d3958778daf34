use std::fmt;

use crate::{
    buffer::Allocator,
    device::KmsDevice,
    error::{Error, Result},
    event::Completion,
    topology::Output,
};

/// Handle of an enumerated output, checked on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub(crate) usize);

impl OutputId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

pub(crate) type CompletionCallback = Box<dyn FnMut(&Completion)>;

/// Everything needed to drive the outputs of one kms device.
///
/// Outputs own their buffers. Dropping the core (or calling
/// [`Core::shutdown`]) destroys framebuffers, then buffer objects, then mode
/// blobs, and finally drops the allocator and the device.
pub struct Core<D: KmsDevice, A: Allocator> {
    pub(crate) outputs: Vec<Output>,
    pub(crate) callbacks: Vec<CompletionCallback>,
    pub(crate) allocator: A,
    pub(crate) device: D,
}

impl<D: KmsDevice, A: Allocator> Core<D, A> {
    pub fn new(device: D, allocator: A) -> Self {
        Self {
            outputs: vec![],
            callbacks: vec![],
            allocator,
            device,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn output(&self, id: OutputId) -> Result<&Output> {
        self.outputs.get(id.0).ok_or(Error::InvalidOutput(id.0))
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    /// tear everything down, reporting the first failure
    pub fn shutdown(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut result = Ok(());
        let mut record = |op: &'static str, err: std::io::Error|{
            tracing::warn!("{op} failed during shutdown: {err}");
            if result.is_ok() {
                result = Err(Error::kernel(op)(err));
            }
        };

        for output in &mut self.outputs {
            if output.pending {
                tracing::debug!(output = %output.name, "shutting down with a commit in flight");
            }
            for buffer in output.buffers.drain(..) {
                if let Err(err) = self.device.destroy_framebuffer(buffer.fb) {
                    record("destroy framebuffer", err);
                }
            }
        }

        for output in self.outputs.drain(..) {
            if let Err(err) = self.device.destroy_blob(output.mode_blob) {
                record("destroy mode blob", err);
            }
        }

        result
    }
}

impl<D: KmsDevice, A: Allocator> Drop for Core<D, A> {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}
