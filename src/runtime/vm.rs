use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use super::config::VmConfig;
use super::frame::Frame;
use super::handler::{FinallyExit, HandlerStack};
use super::module_cache::ModuleCache;
use super::runtime_error::{RuntimeError, VmError};
use crate::bytecode::ir::Bytecode;
use crate::bytecode::op::{CALL_NAMED, CALL_SPREAD, Opcode, read_operands};
use crate::lang::collections::DictMap;
use crate::lang::function::{CompiledFunction, NamedArgs};
use crate::lang::operator::Token;
use crate::lang::ptr::ObjectPtr;
use crate::lang::value::Object;

/// Cloneable cancellation flag. The engine polls it once per instruction.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Inputs of one [`Vm::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Positional arguments of `main`.
    pub args: Vec<Object>,
    /// Named arguments of `main`.
    pub named_args: NamedArgs,
    /// Object backing `GetGlobal`/`SetGlobal`; an empty dict when `None`.
    pub globals: Option<Object>,
}

impl RunOptions {
    pub fn with_args(args: Vec<Object>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }
}

/// Why an instruction did not complete.
enum Trap {
    /// Routed to script handlers.
    Error(RuntimeError),
    /// Ends the run.
    Fatal(String),
}

impl From<RuntimeError> for Trap {
    fn from(e: RuntimeError) -> Self {
        Trap::Error(e)
    }
}

fn fatal(message: impl Into<String>) -> Trap {
    Trap::Fatal(message.into())
}

enum Flow {
    Continue,
    Done(Object),
}

/// Stack machine executing one [`Bytecode`].
///
/// `run` takes `&mut self`, so a VM executes one program at a time; put it
/// behind a mutex to share it. Any number of VMs may share the same
/// `Arc<Bytecode>`.
pub struct Vm {
    bytecode: Arc<Bytecode>,
    config: VmConfig,
    stack: Vec<Object>,
    sp: usize,
    frames: Vec<Frame>,
    modules: ModuleCache,
    globals: Object,
    abort: AbortHandle,
    steps: usize,

    // registers of the running frame
    func: Arc<CompiledFunction>,
    ip: usize,
    base: usize,
}

impl Vm {
    pub fn new(bytecode: Arc<Bytecode>) -> Self {
        Self::with_config(bytecode, VmConfig::default())
    }

    pub fn with_config(bytecode: Arc<Bytecode>, config: VmConfig) -> Self {
        let func = bytecode.main.clone();
        Self {
            stack: vec![Object::Nil; config.stack_size],
            modules: ModuleCache::new(bytecode.num_modules),
            bytecode,
            config,
            sp: 0,
            frames: Vec::new(),
            globals: Object::dict(DictMap::new()),
            abort: AbortHandle::default(),
            steps: 0,
            func,
            ip: 0,
            base: 0,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn bytecode(&self) -> &Arc<Bytecode> {
        &self.bytecode
    }

    /// Globals object of the last run.
    pub fn globals(&self) -> &Object {
        &self.globals
    }

    /// Executes `main` and returns its result.
    ///
    /// Every run starts from a fresh stack and module cache. The abort flag
    /// is cleared on entry, so an abort only affects the run in progress.
    pub fn run(&mut self, opts: RunOptions) -> Result<Object, VmError> {
        if self.config.verify {
            self.bytecode.verify()?;
        }
        self.reset(opts.globals);
        debug!(
            args = opts.args.len(),
            named = opts.named_args.len(),
            "run start"
        );

        let result = match self.enter_main(opts.args, opts.named_args) {
            Ok(()) => self.execute(),
            Err(Trap::Error(error)) => Err(VmError::Uncaught {
                error,
                trace: Vec::new(),
            }),
            Err(Trap::Fatal(message)) => Err(VmError::Fatal(message)),
        };

        match &result {
            Ok(_) => debug!(steps = self.steps, "run finished"),
            Err(VmError::Aborted) => warn!(steps = self.steps, "run aborted"),
            Err(VmError::Fatal(message)) => warn!(%message, "run hit a fatal fault"),
            Err(e) => debug!(error = %e, "run failed"),
        }

        self.set_sp(0);
        self.frames.clear();
        result
    }

    fn reset(&mut self, globals: Option<Object>) {
        self.abort.reset();
        self.set_sp(0);
        self.frames.clear();
        self.modules = ModuleCache::new(self.bytecode.num_modules);
        self.globals = globals.unwrap_or_else(|| Object::dict(DictMap::new()));
        self.steps = 0;
        self.func = self.bytecode.main.clone();
        self.ip = 0;
        self.base = 0;
    }

    fn enter_main(&mut self, args: Vec<Object>, named: NamedArgs) -> Result<(), Trap> {
        self.push(Object::Function(self.bytecode.main.clone()))?;
        let argc = args.len();
        for arg in args {
            self.push(arg)?;
        }
        let mut flags = 0;
        if !named.is_empty() {
            self.push(Object::dict(named))?;
            flags |= CALL_NAMED;
        }
        self.call(argc, flags)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&mut self) -> Result<Object, VmError> {
        loop {
            if self.abort.is_aborted() {
                return Err(VmError::Aborted);
            }
            self.steps += 1;
            if let Some(max) = self.config.max_steps {
                if self.steps > max {
                    return Err(VmError::Fatal(format!(
                        "execution step limit exceeded ({})",
                        max
                    )));
                }
            }

            let at = self.ip;
            let result = if at >= self.func.instructions.len() {
                // falling off the end returns nil
                self.do_return(Object::Nil)
            } else {
                match read_operands(&self.func.instructions, at) {
                    Some((op, operands)) => {
                        self.ip = at + op.width();
                        self.step(op, operands, at)
                    }
                    None => Err(self.decode_fault(at)),
                }
            };

            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done(value)) => return Ok(value),
                Err(Trap::Error(e)) => self.throw(e, at)?,
                Err(Trap::Fatal(message)) => return Err(VmError::Fatal(message)),
            }
        }
    }

    fn decode_fault(&self, at: usize) -> Trap {
        let byte = self.func.instructions[at];
        match Opcode::from_u8(byte) {
            None => fatal(format!(
                "unknown opcode {} at {} in '{}'",
                byte, at, self.func.name
            )),
            Some(op) => fatal(format!(
                "truncated {} at {} in '{}'",
                op.mnemonic(),
                at,
                self.func.name
            )),
        }
    }

    fn step(&mut self, op: Opcode, operands: [usize; 2], at: usize) -> Result<Flow, Trap> {
        let [a, b] = operands;
        match op {
            Opcode::NoOp => {}
            Opcode::Constant => {
                let c = self.constant(a)?;
                self.push(c)?;
            }
            Opcode::Nil => self.push(Object::Nil)?,
            Opcode::True => self.push(Object::Bool(true))?,
            Opcode::False => self.push(Object::Bool(false))?,
            Opcode::Pop => {
                self.pop()?;
            }

            // Variables
            Opcode::GetGlobal => {
                let name = self.constant(a)?;
                let value = self.globals.index_get(&name)?;
                self.push(value)?;
            }
            Opcode::SetGlobal => {
                let name = self.constant(a)?;
                let value = self.pop()?;
                self.globals.index_set(name, value)?;
            }
            Opcode::GetLocal => {
                let idx = self.local(a)?;
                let value = match &self.stack[idx] {
                    Object::Ptr(p) => p.get(),
                    other => other.clone(),
                };
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let value = self.pop()?;
                let idx = self.local(a)?;
                if let Object::Ptr(p) = &self.stack[idx] {
                    p.set(value);
                } else {
                    self.stack[idx] = value;
                }
            }
            Opcode::DefineLocal => {
                let value = self.pop()?;
                let idx = self.local(a)?;
                self.stack[idx] = value;
            }
            Opcode::GetFree => {
                let cell = self.free_cell(a)?;
                self.push(cell.get())?;
            }
            Opcode::SetFree => {
                let value = self.pop()?;
                self.free_cell(a)?.set(value);
            }
            Opcode::GetLocalPtr => {
                let idx = self.local(a)?;
                let cell = match &self.stack[idx] {
                    Object::Ptr(p) => p.clone(),
                    other => {
                        let p = ObjectPtr::new(other.clone());
                        self.stack[idx] = Object::Ptr(p.clone());
                        p
                    }
                };
                self.push(Object::Ptr(cell))?;
            }
            Opcode::GetFreePtr => {
                let cell = self.free_cell(a)?;
                self.push(Object::Ptr(cell))?;
            }

            // Operators
            Opcode::BinaryOp => {
                let token = self.token(a)?;
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(left.binary_op(token, &right)?)?;
            }
            Opcode::Unary => {
                let token = self.token(a)?;
                let value = self.pop()?;
                self.push(value.unary_op(token)?)?;
            }
            Opcode::Equal | Opcode::NotEqual => {
                let right = self.pop()?;
                let left = self.pop()?;
                let eq = left.equals(&right);
                self.push(Object::Bool(if op == Opcode::Equal { eq } else { !eq }))?;
            }

            // Jumps
            Opcode::Jump => self.ip = a,
            Opcode::JumpFalsy => {
                if self.pop()?.is_falsy() {
                    self.ip = a;
                }
            }
            Opcode::AndJump => {
                if self.peek()?.is_falsy() {
                    self.ip = a;
                } else {
                    self.pop()?;
                }
            }
            Opcode::OrJump => {
                if self.peek()?.is_falsy() {
                    self.pop()?;
                } else {
                    self.ip = a;
                }
            }
            Opcode::JumpNil => {
                if self.peek()?.is_nil() {
                    self.ip = a;
                }
            }
            Opcode::JumpNotNil => {
                if self.peek()?.is_nil() {
                    self.pop()?;
                } else {
                    self.ip = a;
                }
            }

            // Containers
            Opcode::Array => {
                let items = self.pop_n(a)?;
                self.push(Object::array(items))?;
            }
            Opcode::Dict => {
                let values = self.pop_n(a * 2)?;
                let mut map = DictMap::with_capacity(a);
                let mut it = values.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    map.insert(k.to_string(), v);
                }
                self.push(Object::dict(map))?;
            }
            Opcode::KeyValueArray => {
                let values = self.pop_n(a * 2)?;
                let pairs = values
                    .chunks(2)
                    .map(|kv| Object::array(kv.to_vec()))
                    .collect();
                self.push(Object::array(pairs))?;
            }
            Opcode::GetIndex => {
                let selectors = self.pop_n(a)?;
                let mut value = self.pop()?;
                for sel in &selectors {
                    value = value.index_get(sel)?;
                }
                self.push(value)?;
            }
            Opcode::SetIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = self.pop()?;
                target.index_set(index, value)?;
            }
            Opcode::SliceIndex => {
                let high = self.pop()?;
                let low = self.pop()?;
                let target = self.pop()?;
                self.push(target.slice(&low, &high)?)?;
            }

            // Calls
            Opcode::Call => self.call(a, b as u8)?,
            Opcode::Return => {
                let value = if a == 1 { self.pop()? } else { Object::Nil };
                return self.do_return(value);
            }
            Opcode::Closure => {
                let template = match self.constant(a)? {
                    Object::Function(f) => f,
                    other => {
                        return Err(fatal(format!(
                            "closure constant {} is a {}",
                            a,
                            other.type_name()
                        )));
                    }
                };
                let free = self
                    .pop_n(b)?
                    .into_iter()
                    .map(|v| match v {
                        Object::Ptr(p) => p,
                        other => ObjectPtr::new(other),
                    })
                    .collect();
                self.push(Object::Function(Arc::new(template.with_free(free))))?;
            }

            // Iteration
            Opcode::IterInit => {
                let value = self.pop()?;
                self.push(Object::Iterator(value.iterate()?))?;
            }
            Opcode::IterNext | Opcode::IterKey | Opcode::IterValue => {
                let it = match self.pop()? {
                    Object::Iterator(it) => it,
                    other => return Err(RuntimeError::NotIterable(other.type_name().to_string()).into()),
                };
                let out = match op {
                    Opcode::IterNext => Object::Bool(it.next()),
                    Opcode::IterKey => it.key(),
                    _ => it.value(),
                };
                self.push(out)?;
            }

            // Modules
            Opcode::LoadModule => {
                let constant = self.constant(a)?;
                let (value, fresh) = self
                    .modules
                    .load(b, &constant)
                    .ok_or_else(|| fatal(format!("module slot {} out of range", b)))?;
                self.push(value)?;
                self.push(Object::Bool(fresh))?;
            }
            Opcode::StoreModule => {
                let value = self.peek()?.clone();
                if !self.modules.store(a, &value) {
                    return Err(fatal(format!("module slot {} out of range", a)));
                }
            }

            // Exception handling
            Opcode::SetupTry => {
                let sp = self.sp;
                self.handlers()?.push(a, b, sp);
            }
            Opcode::SetupCatch => {
                let err = self.handlers()?.setup_catch();
                self.push(err.map(|e| e.to_object()).unwrap_or_default())?;
            }
            Opcode::SetupFinally => self.handlers()?.setup_finally(),
            Opcode::Throw => {
                if a == 1 {
                    let value = self.pop()?;
                    return Err(RuntimeError::thrown(value).into());
                }
                match self.handlers()?.end_finally() {
                    FinallyExit::Rethrow(e) => return Err(e.into()),
                    FinallyExit::Resume { ip, sp } => {
                        trace!(ip, "resuming after finally");
                        self.set_sp(sp);
                        self.ip = ip;
                    }
                    FinallyExit::Done => {}
                }
            }
            Opcode::Finalizer => {
                let sp = self.sp;
                if let Some(target) = self.handlers()?.finalize(a, at, sp) {
                    trace!(target, "entering finally");
                    self.ip = target;
                }
            }
        }
        Ok(Flow::Continue)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Calls the callee sitting below `argc` positional arguments (and the
    /// named-arguments object when flagged).
    fn call(&mut self, argc: usize, flags: u8) -> Result<(), Trap> {
        let named = if flags & CALL_NAMED != 0 {
            let obj = self.pop()?;
            named_args(obj)?
        } else {
            NamedArgs::new()
        };

        let mut argc = argc;
        if flags & CALL_SPREAD != 0 && argc > 0 {
            match self.pop()? {
                Object::Array(items) => {
                    let items = items.to_vec();
                    argc = argc - 1 + items.len();
                    for item in items {
                        self.push(item)?;
                    }
                }
                other => {
                    return Err(RuntimeError::ArgumentType {
                        name: "...".to_string(),
                        expected: "array".to_string(),
                        found: other.type_name().to_string(),
                    }
                    .into());
                }
            }
        }

        let callee_at = self
            .sp
            .checked_sub(argc + 1)
            .filter(|&i| i >= self.base)
            .ok_or_else(|| fatal("stack underflow in call"))?;

        let callee = self.stack[callee_at].clone();
        let result = match callee {
            Object::Function(f) => return self.call_compiled(f, callee_at, argc, named),
            Object::Native(n) => n.call(&self.stack[callee_at + 1..self.sp], &named)?,
            Object::Type(t) => t.call(&self.stack[callee_at + 1..self.sp], &named)?,
            Object::User(u) => match u.call(&self.stack[callee_at + 1..self.sp], &named) {
                Some(r) => r?,
                None => return Err(RuntimeError::NotCallable(u.type_name().to_string()).into()),
            },
            other => return Err(RuntimeError::NotCallable(other.type_name().to_string()).into()),
        };
        self.set_sp(callee_at);
        self.push(result)
    }

    fn call_compiled(
        &mut self,
        f: Arc<CompiledFunction>,
        callee_at: usize,
        argc: usize,
        mut named: NamedArgs,
    ) -> Result<(), Trap> {
        let base = callee_at + 1;
        let nparams = f.params.len();
        let variadic = f.variadic && nparams > 0;

        if variadic {
            let fixed = nparams - 1;
            if argc < fixed {
                return Err(RuntimeError::WrongNumArgs {
                    want: format!(">={}", fixed),
                    got: argc,
                }
                .into());
            }
            let rest = self.pop_n(argc - fixed)?;
            self.push(Object::array(rest))?;
        } else if argc != nparams {
            return Err(RuntimeError::WrongNumArgs {
                want: nparams.to_string(),
                got: argc,
            }
            .into());
        }

        let checked = if variadic { nparams - 1 } else { nparams };
        for (i, p) in f.params[..checked].iter().enumerate() {
            let value = &self.stack[base + i];
            if !p.accepts(value) {
                return Err(RuntimeError::ArgumentType {
                    name: p.name.clone(),
                    expected: p.expected(),
                    found: value.type_name().to_string(),
                }
                .into());
            }
        }

        for np in &f.named_params {
            let value = named
                .shift_remove(&np.name)
                .unwrap_or_else(|| np.default.clone());
            if !np.accepts(&value) {
                return Err(RuntimeError::ArgumentType {
                    name: np.name.clone(),
                    expected: np
                        .types
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join("|"),
                    found: value.type_name().to_string(),
                }
                .into());
            }
            self.push(value)?;
        }
        if let Some(key) = named.keys().next() {
            return Err(RuntimeError::UnexpectedNamedArg(key.clone()).into());
        }

        let top = base + f.frame_size();
        if top > self.stack.len() {
            return Err(fatal(format!(
                "stack overflow ({} slots)",
                self.stack.len()
            )));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(fatal(format!(
                "call depth limit exceeded ({}) in '{}'",
                self.config.max_frames, f.name
            )));
        }
        self.sp = self.sp.max(top);

        if let Some(caller) = self.frames.last_mut() {
            caller.ip = self.ip;
        }
        trace!(function = %f.name, depth = self.frames.len() + 1, "frame push");
        self.frames.push(Frame::new(f.clone(), base));
        self.func = f;
        self.base = base;
        self.ip = 0;
        Ok(())
    }

    fn do_return(&mut self, value: Object) -> Result<Flow, Trap> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| fatal("return without a frame"))?;
        trace!(function = %frame.function.name, depth = self.frames.len(), "frame pop");
        self.set_sp(frame.base - 1);

        let Some(caller) = self.frames.last() else {
            return Ok(Flow::Done(value));
        };
        self.func = caller.function.clone();
        self.base = caller.base;
        self.ip = caller.ip;
        self.push(value)?;
        Ok(Flow::Continue)
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Routes `err`, raised by the instruction at `at`, to the nearest
    /// handler, unwinding frames that have none.
    fn throw(&mut self, mut err: RuntimeError, mut at: usize) -> Result<(), VmError> {
        let mut trace = Vec::new();
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(VmError::Uncaught { error: err, trace });
            };
            trace.push(self.bytecode.describe_location(&frame.function, at));
            match frame.handlers.route(err) {
                Ok((target, sp)) => {
                    trace!(target, depth = self.frames.len(), "error routed to handler");
                    self.set_sp(sp);
                    self.ip = target;
                    return Ok(());
                }
                Err(e) => err = e,
            }

            if self.frames.len() == 1 {
                return Err(VmError::Uncaught { error: err, trace });
            }
            if let Some(frame) = self.frames.pop() {
                trace!(function = %frame.function.name, "frame unwound");
                self.set_sp(frame.base - 1);
            }
            if let Some(caller) = self.frames.last() {
                self.func = caller.function.clone();
                self.base = caller.base;
                self.ip = caller.ip;
                at = caller.ip.saturating_sub(Opcode::Call.width());
            }
        }
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn push(&mut self, value: Object) -> Result<(), Trap> {
        if self.sp >= self.stack.len() {
            return Err(fatal(format!(
                "stack overflow ({} slots)",
                self.stack.len()
            )));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, Trap> {
        if self.sp <= self.base {
            return Err(fatal("stack underflow"));
        }
        self.sp -= 1;
        Ok(mem::take(&mut self.stack[self.sp]))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Object>, Trap> {
        if self.sp < self.base + n {
            return Err(fatal("stack underflow"));
        }
        let start = self.sp - n;
        let items = self.stack[start..self.sp].iter_mut().map(mem::take).collect();
        self.sp = start;
        Ok(items)
    }

    fn peek(&self) -> Result<&Object, Trap> {
        if self.sp <= self.base {
            return Err(fatal("stack underflow"));
        }
        Ok(&self.stack[self.sp - 1])
    }

    /// Moves `sp`, resetting every vacated slot to nil.
    fn set_sp(&mut self, sp: usize) {
        if sp < self.sp {
            for slot in &mut self.stack[sp..self.sp] {
                *slot = Object::Nil;
            }
        }
        self.sp = sp;
    }

    fn local(&self, n: usize) -> Result<usize, Trap> {
        let idx = self.base + n;
        if idx >= self.sp {
            return Err(fatal(format!(
                "local {} out of range in '{}'",
                n, self.func.name
            )));
        }
        Ok(idx)
    }

    fn free_cell(&self, n: usize) -> Result<ObjectPtr, Trap> {
        self.func.free.get(n).cloned().ok_or_else(|| {
            fatal(format!(
                "free variable {} out of range in '{}'",
                n, self.func.name
            ))
        })
    }

    fn constant(&self, idx: usize) -> Result<Object, Trap> {
        self.bytecode
            .constants
            .get(idx)
            .cloned()
            .ok_or_else(|| fatal(format!("constant {} out of range", idx)))
    }

    fn token(&self, b: usize) -> Result<Token, Trap> {
        Token::from_u8(b as u8).ok_or_else(|| fatal(format!("unknown operator token {}", b)))
    }

    fn handlers(&mut self) -> Result<&mut HandlerStack, Trap> {
        self.frames
            .last_mut()
            .map(|f| &mut f.handlers)
            .ok_or_else(|| fatal("no active frame"))
    }
}

/// Accepts a dict, a sync dict, an array of `[key, value]` pairs (as built by
/// `KeyValueArray`) or nil.
fn named_args(obj: Object) -> Result<NamedArgs, Trap> {
    let invalid = |found: &Object| -> Trap {
        RuntimeError::ArgumentType {
            name: "named arguments".to_string(),
            expected: "dict".to_string(),
            found: found.type_name().to_string(),
        }
        .into()
    };
    match &obj {
        Object::Nil => Ok(NamedArgs::new()),
        Object::Dict(d) => Ok(d.read().clone()),
        Object::SyncDict(d) => Ok(d.read().clone()),
        Object::Array(a) => {
            let mut named = NamedArgs::new();
            for pair in a.read().iter() {
                let Object::Array(kv) = pair else {
                    return Err(invalid(pair));
                };
                let kv = kv.read();
                match kv.as_slice() {
                    [k, v] => {
                        named.insert(k.to_string(), v.clone());
                    }
                    _ => return Err(invalid(pair)),
                }
            }
            Ok(named)
        }
        other => Err(invalid(other)),
    }
}
