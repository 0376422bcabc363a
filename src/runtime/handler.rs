use super::runtime_error::RuntimeError;

/// One `try` region of a frame.
///
/// `catch` and `finally` are absolute instruction offsets, 0 meaning "none".
/// Both get cleared as the region's blocks are entered so an error raised
/// inside a catch or finally block is never routed back into the same
/// region.
#[derive(Debug, Clone, Default)]
pub struct Handler {
    pub catch: usize,
    pub finally: usize,
    /// Stack pointer to restore when control enters a block of this region.
    pub sp: usize,
    /// Set by `Finalizer`: where to resume once the finally block completes.
    pub return_ip: Option<usize>,
    /// Error that entered the region and has not been consumed by a catch.
    pub pending: Option<RuntimeError>,
}

/// What `Throw 0` does at the end of a finally block.
#[derive(Debug)]
pub enum FinallyExit {
    /// An error passed through the finally block; keep propagating it.
    Rethrow(RuntimeError),
    /// Resume the instruction that requested the finally block.
    Resume { ip: usize, sp: usize },
    /// Fall through.
    Done,
}

/// LIFO of handler descriptors owned by one frame.
#[derive(Debug, Clone, Default)]
pub struct HandlerStack(Vec<Handler>);

impl HandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, catch: usize, finally: usize, sp: usize) {
        self.0.push(Handler {
            catch,
            finally,
            sp,
            ..Handler::default()
        });
    }

    /// Offers `err` to the innermost descriptors.
    ///
    /// Returns the jump target and the stack pointer to restore. Descriptors
    /// with no remaining target are discarded along the way; when none takes
    /// the error it is handed back so the caller can unwind the frame.
    pub fn route(&mut self, err: RuntimeError) -> Result<(usize, usize), RuntimeError> {
        while let Some(h) = self.0.last_mut() {
            let target = if h.catch != 0 { h.catch } else { h.finally };
            if target != 0 {
                h.pending = Some(err);
                h.return_ip = None;
                return Ok((target, h.sp));
            }
            self.0.pop();
        }
        Err(err)
    }

    /// Enters a catch block: clears the catch target and hands over the
    /// pending error.
    pub fn setup_catch(&mut self) -> Option<RuntimeError> {
        let h = self.0.last_mut()?;
        h.catch = 0;
        h.pending.take()
    }

    /// Enters a finally block.
    pub fn setup_finally(&mut self) {
        if let Some(h) = self.0.last_mut() {
            h.catch = 0;
            h.finally = 0;
        }
    }

    /// Leaves a finally block, popping its descriptor.
    pub fn end_finally(&mut self) -> FinallyExit {
        match self.0.pop() {
            Some(Handler {
                pending: Some(err), ..
            }) => FinallyExit::Rethrow(err),
            Some(Handler {
                return_ip: Some(ip),
                sp,
                ..
            }) => FinallyExit::Resume { ip, sp },
            _ => FinallyExit::Done,
        }
    }

    /// Runs the next pending finally block among descriptors at index
    /// `floor` and above.
    ///
    /// `at` is the offset of the `Finalizer` instruction itself, so once the
    /// finally block ends control comes back here and the next one runs.
    /// Returns `None`, after dropping every descriptor from `floor` up, when
    /// no finally block is left.
    pub fn finalize(&mut self, floor: usize, at: usize, sp: usize) -> Option<usize> {
        let idx = (floor..self.0.len())
            .rev()
            .find(|&i| self.0[i].finally != 0);
        let Some(idx) = idx else {
            self.0.truncate(floor);
            return None;
        };
        self.0.truncate(idx + 1);
        let h = &mut self.0[idx];
        let target = h.finally;
        h.catch = 0;
        h.finally = 0;
        h.pending = None;
        h.return_ip = Some(at);
        h.sp = sp;
        Some(target)
    }
}
