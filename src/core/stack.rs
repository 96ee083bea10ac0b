//! Stack capture collaborators
//!
//! The engine only ever sees [`StackId`] handles. Capturing and resolving
//! them is delegated to a [`StackCapture`] implementation chosen by the host.

use crate::core::types::{StackId, ThreadId};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of stack-trace handles
///
/// Implementations must not call back into the detector. Locks they take are
/// not observed as long as the caller raised the thread's reentrancy guard,
/// which the detector always does.
pub trait StackCapture: Send + Sync {
    /// Capture the calling thread's stack, dropping the innermost `skip` frames
    ///
    /// # Returns
    /// `None` if no stack could be captured
    fn capture(&self, thread_id: ThreadId, skip: usize) -> Option<StackId>;
}

/// Capture nothing; every report carries empty stack fields
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStacks;

impl StackCapture for NoStacks {
    fn capture(&self, _thread_id: ThreadId, _skip: usize) -> Option<StackId> {
        None
    }
}

#[derive(Debug, Default)]
struct DepotInner {
    ids: FxHashMap<Arc<[usize]>, StackId>,
    traces: Vec<Arc<[usize]>>,
}

/// Deduplicating store of raw instruction-pointer traces
///
/// Identical traces share one id, so the cost of a hot acquisition site is one
/// unwind and a hash lookup. Symbolization happens only on [`resolve_symbols`].
///
/// [`resolve_symbols`]: BacktraceDepot::resolve_symbols
#[derive(Debug)]
pub struct BacktraceDepot {
    max_frames: usize,
    inner: Mutex<DepotInner>,
}

impl Default for BacktraceDepot {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BacktraceDepot {
    /// Create a depot keeping at most `max_frames` frames per trace
    pub fn new(max_frames: usize) -> Self {
        BacktraceDepot {
            max_frames,
            inner: Mutex::new(DepotInner::default()),
        }
    }

    /// Intern a trace
    ///
    /// # Returns
    /// `None` for an empty trace
    pub fn put(&self, frames: &[usize]) -> Option<StackId> {
        if frames.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.ids.get(frames) {
            return Some(id);
        }
        let id = StackId(u32::try_from(inner.traces.len() + 1).ok()?);
        let trace: Arc<[usize]> = Arc::from(frames);
        inner.traces.push(Arc::clone(&trace));
        inner.ids.insert(trace, id);
        Some(id)
    }

    /// Instruction pointers of a stored trace, innermost first
    pub fn get(&self, id: StackId) -> Option<Arc<[usize]>> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.inner.lock().traces.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symbolize a stored trace, one line per frame
    pub fn resolve_symbols(&self, id: StackId) -> Vec<String> {
        let Some(frames) = self.get(id) else {
            return Vec::new();
        };
        frames
            .iter()
            .map(|&ip| {
                let mut line = format!("{ip:#x}");
                backtrace::resolve(ip as *mut std::ffi::c_void, |symbol| {
                    if let Some(name) = symbol.name() {
                        line = format!("{ip:#x} {name}");
                    }
                });
                line
            })
            .collect()
    }
}

impl StackCapture for BacktraceDepot {
    #[inline(never)]
    fn capture(&self, _thread_id: ThreadId, skip: usize) -> Option<StackId> {
        let mut frames = Vec::with_capacity(self.max_frames);
        // One extra for this frame
        let mut to_skip = skip + 1;
        backtrace::trace(|frame| {
            if to_skip > 0 {
                to_skip -= 1;
                return true;
            }
            frames.push(frame.ip() as usize);
            frames.len() < self.max_frames
        });
        self.put(&frames)
    }
}
