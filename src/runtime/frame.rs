use std::sync::Arc;

use super::handler::HandlerStack;
use crate::lang::function::CompiledFunction;

/// Activation record of a compiled function.
///
/// Locals are the stack slots starting at `base`; the callee itself sits
/// at `base - 1` and receives the return value. Free variables are reached
/// through `function.free`.
#[derive(Debug)]
pub struct Frame {
    pub function: Arc<CompiledFunction>,
    pub base: usize,
    /// Resume offset, saved while this frame is suspended in a call.
    pub ip: usize,
    pub handlers: HandlerStack,
}

impl Frame {
    pub fn new(function: Arc<CompiledFunction>, base: usize) -> Self {
        Self {
            function,
            base,
            ip: 0,
            handlers: HandlerStack::new(),
        }
    }
}
