/// Resource limits of a [`Vm`](super::Vm).
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Operand stack slots shared by all frames.
    pub stack_size: usize,
    /// Maximum call depth, the outermost frame included.
    pub max_frames: usize,
    /// Instruction budget per run; `None` is unlimited.
    pub max_steps: Option<usize>,
    /// Statically verify every function before the first instruction runs.
    pub verify: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 2048,
            max_frames: 1024,
            max_steps: None,
            verify: true,
        }
    }
}
