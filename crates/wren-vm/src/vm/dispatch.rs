//! The interpreter's dispatch loop.
//!
//! Single-threaded and cooperative. Hot frame state (`frame`, `stack_start`,
//! `fn_obj`) is cached in locals and refreshed by `load_frame!` whenever a
//! call frame is pushed or popped or the current fiber changes; stack
//! positions are indices, so stack growth never invalidates them.

use wren_core::instruction::RK_CONSTANT_BASE;
use wren_core::{Instruction, Opcode};
use wren_runtime::objects::class::Method;
use wren_runtime::objects::closure;
use wren_runtime::objects::fiber::{self, CallFrame, FiberState, ObjFiber, RETURN_TO_BASE};
use wren_runtime::objects::function::ObjFn;
use wren_runtime::objects::{list, map, range};
use wren_runtime::value::values_equal;
use wren_runtime::{ops, Value};

use crate::error::InterpretResult;
use crate::exec::call::{self, OverloadOutcome};
use crate::exec::class as class_exec;
use crate::exec::import;
use crate::vm::WrenVm;

/// Refreshes the cached frame locals after a frame change.
macro_rules! load_frame {
    ($fiber:expr, $frame:ident, $stack_start:ident, $fn_obj:ident) => {{
        let top: *mut CallFrame = (*$fiber).frames.last_mut().expect("active frame");
        $frame = top;
        $stack_start = (*top).stack_start;
        $fn_obj = (*(*top).closure).fn_obj;
    }};
}

/// Propagates the current fiber's error along the caller chain. Either a
/// `try` fiber catches it and execution resumes there, or the interpreter
/// exits with a runtime error.
macro_rules! runtime_error {
    ($self:ident, $fiber:ident, $frame:ident, $stack_start:ident, $fn_obj:ident) => {{
        $self.register_runtime_error();
        if $self.fiber.is_null() {
            return InterpretResult::RuntimeError;
        }
        $fiber = $self.fiber;
        load_frame!($fiber, $frame, $stack_start, $fn_obj);
        continue;
    }};
}

/// Handles the three ways an overload invocation can leave the interpreter.
macro_rules! finish_overload {
    ($self:ident, $fiber:ident, $frame:ident, $stack_start:ident, $fn_obj:ident,
     $outcome:expr, $dst:expr) => {{
        match $outcome {
            OverloadOutcome::Value(value) => {
                let dst = $dst;
                (&mut (*$fiber).stack)[dst] = value;
                load_frame!($fiber, $frame, $stack_start, $fn_obj);
                continue;
            }
            OverloadOutcome::Reenter => {
                if $self.fiber.is_null() {
                    return InterpretResult::Success;
                }
                $fiber = $self.fiber;
                load_frame!($fiber, $frame, $stack_start, $fn_obj);
                continue;
            }
            OverloadOutcome::Abort => {
                runtime_error!($self, $fiber, $frame, $stack_start, $fn_obj)
            }
        }
    }};
}

/// Arithmetic-style opcode body: overload fast path on a class or instance
/// receiver, built-in fallback otherwise.
macro_rules! binary_op {
    ($self:ident, $fiber:ident, $frame:ident, $stack_start:ident, $fn_obj:ident,
     $inst:ident, $left:ident, $right:ident, $symbol:ident, $fallback:path) => {{
        if $left.is_class() || $left.is_instance() {
            let class = $self.class_of($left);
            let method = (*class).method($self.symbols.$symbol);
            if !method.is_none() {
                let dst = ($stack_start + $inst.a() as usize) as i64;
                let outcome = call::invoke_overload($self, method, &[$left, $right], dst);
                finish_overload!(
                    $self,
                    $fiber,
                    $frame,
                    $stack_start,
                    $fn_obj,
                    outcome,
                    dst as usize
                );
            }
        }
        match $fallback(&mut $self.gc, $left, $right) {
            Ok(value) => set_reg($fiber, $stack_start, $inst.a(), value),
            Err(error) => {
                $self.fiber_abort(error);
                runtime_error!($self, $fiber, $frame, $stack_start, $fn_obj)
            }
        }
    }};
}

#[inline(always)]
unsafe fn reg(fiber: *mut ObjFiber, base: usize, index: u32) -> Value {
    (&(*fiber).stack)[base + index as usize]
}

#[inline(always)]
unsafe fn set_reg(fiber: *mut ObjFiber, base: usize, index: u32, value: Value) {
    (&mut (*fiber).stack)[base + index as usize] = value;
}

/// Register-or-constant operand: 9-bit fields at or above the RK base read
/// the constant table.
#[inline(always)]
unsafe fn rk(fiber: *mut ObjFiber, base: usize, fn_obj: *mut ObjFn, index: u32) -> Value {
    if index >= RK_CONSTANT_BASE {
        (&(*fn_obj).constants)[(index - RK_CONSTANT_BASE) as usize]
    } else {
        reg(fiber, base, index)
    }
}

/// Operand pair of a `*K` opcode: the K flag says which side the constant
/// is, preserving left/right asymmetry for non-commutative operators.
#[inline(always)]
unsafe fn k_operands(
    fiber: *mut ObjFiber,
    base: usize,
    fn_obj: *mut ObjFn,
    inst: Instruction,
) -> (Value, Value) {
    let constant = (&(*fn_obj).constants)[inst.c8() as usize];
    let other = rk(fiber, base, fn_obj, inst.b());
    if inst.k() {
        (constant, other)
    } else {
        (other, constant)
    }
}

impl WrenVm {
    /// Runs `fiber` until it completes, the fiber chain unwinds to the host,
    /// or a runtime error escapes every `try`.
    pub(crate) fn run_interpreter(&mut self, fiber: *mut ObjFiber) -> InterpretResult {
        // SAFETY: every pointer the loop touches (fibers, frames, functions,
        // heap objects) is kept alive by the GC root set, which includes the
        // current fiber; frames and stacks are addressed by index.
        unsafe { self.run_inner(fiber) }
    }

    unsafe fn run_inner(&mut self, mut fiber: *mut ObjFiber) -> InterpretResult {
        self.fiber = fiber;
        (*fiber).state = FiberState::Root;

        let mut frame: *mut CallFrame;
        let mut stack_start: usize;
        let mut fn_obj: *mut ObjFn;
        load_frame!(fiber, frame, stack_start, fn_obj);

        loop {
            // Collections only run at instruction boundaries, which are the
            // allocation points of the interpreter.
            self.maybe_collect();

            let ip = (*frame).ip;
            let inst = (&(*fn_obj).code)[ip];
            (*frame).ip = ip + 1;

            match inst.opcode() {
                Opcode::LoadK => {
                    let constant = (&(*fn_obj).constants)[inst.bx() as usize];
                    // Mutable collection constants are copied so runtime
                    // mutation cannot poison the constant table.
                    let value = if constant.is_list() {
                        Value::obj(list::repeat(&mut self.gc, constant.as_list(), 1))
                    } else if constant.is_map() {
                        Value::obj(map::copy(&mut self.gc, constant.as_map()))
                    } else {
                        constant
                    };
                    set_reg(fiber, stack_start, inst.a(), value);
                }

                Opcode::LoadNull => {
                    set_reg(fiber, stack_start, inst.a(), Value::Null);
                }

                Opcode::LoadBool => {
                    set_reg(fiber, stack_start, inst.a(), Value::Bool(inst.b() != 0));
                    if inst.c() != 0 {
                        (*frame).ip += 1;
                    }
                }

                Opcode::Move => {
                    let value = reg(fiber, stack_start, inst.b());
                    set_reg(fiber, stack_start, inst.a(), value);
                }

                Opcode::GetGlobal => {
                    let value = (&(*(*fn_obj).module).variables)[inst.bx() as usize];
                    set_reg(fiber, stack_start, inst.a(), value);
                }

                Opcode::SetGlobal => {
                    let value = reg(fiber, stack_start, inst.a());
                    (&mut (*(*fn_obj).module).variables)[inst.bx() as usize] = value;
                }

                Opcode::GetUpval => {
                    let upvalue = (&(*(*frame).closure).upvalues)[inst.bx() as usize];
                    set_reg(fiber, stack_start, inst.a(), closure::load(upvalue));
                }

                Opcode::SetUpval => {
                    let upvalue = (&(*(*frame).closure).upvalues)[inst.bx() as usize];
                    closure::store(upvalue, reg(fiber, stack_start, inst.a()));
                }

                Opcode::GetField => {
                    let receiver = reg(fiber, stack_start, inst.b());
                    let field = inst.c() as usize;
                    if receiver.is_instance() {
                        let instance = receiver.as_instance();
                        debug_assert!(field < (&(*instance).fields).len(), "out of bounds field");
                        set_reg(fiber, stack_start, inst.a(), (*instance).fields[field]);
                    } else if receiver.is_map_entry() {
                        let entry = receiver.as_map_entry();
                        let value = if field == 0 {
                            (*entry).key
                        } else {
                            (*entry).value
                        };
                        set_reg(fiber, stack_start, inst.a(), value);
                    } else {
                        self.fiber_abort_str("Receiver must be an instance.");
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::SetField => {
                    let receiver = reg(fiber, stack_start, inst.b());
                    let field = inst.c() as usize;
                    if receiver.is_instance() {
                        let instance = receiver.as_instance();
                        debug_assert!(field < (&(*instance).fields).len(), "out of bounds field");
                        (*instance).fields[field] = reg(fiber, stack_start, inst.a());
                    } else {
                        self.fiber_abort_str("Receiver must be an instance.");
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::Test => {
                    let truthy = !reg(fiber, stack_start, inst.b()).is_falsy();
                    if truthy != (inst.c() != 0) {
                        (*frame).ip += 1;
                    } else {
                        // The next instruction is always the paired jump;
                        // take it without a second dispatch.
                        let jump = (&(*fn_obj).code)[(*frame).ip];
                        debug_assert!(jump.opcode() == Opcode::Jump, "TEST must pair with JUMP");
                        (*frame).ip = ((*frame).ip as i64 + 1 + jump.sjx() as i64) as usize;
                    }
                }

                Opcode::Jump => {
                    (*frame).ip = ((*frame).ip as i64 + inst.sjx() as i64) as usize;
                }

                Opcode::Return => {
                    let result = if inst.b() == 1 {
                        reg(fiber, stack_start, inst.a())
                    } else {
                        Value::Null
                    };

                    // A module body marks its end so imports can find it.
                    if inst.c() == 1 {
                        self.last_module = (*fn_obj).module;
                    }

                    let return_reg = (*frame).return_reg;
                    (*fiber).frames.pop();
                    fiber::close_upvalues(fiber, stack_start);

                    if (*fiber).frames.is_empty() {
                        // The fiber is complete. Leave the result in slot
                        // zero for the host, then resume the caller if any.
                        (&mut (*fiber).stack)[0] = result;

                        let caller = (*fiber).caller;
                        if caller.is_null() {
                            return InterpretResult::Success;
                        }
                        (*fiber).caller = std::ptr::null_mut();
                        fiber = caller;
                        self.fiber = caller;

                        let dst = (*fiber).last_call_reg;
                        fiber::ensure_stack(fiber, dst + 1);
                        (&mut (*fiber).stack)[dst] = result;
                    } else if return_reg != RETURN_TO_BASE {
                        (&mut (*fiber).stack)[return_reg as usize] = result;
                    } else {
                        (&mut (*fiber).stack)[stack_start] = result;
                    }

                    load_frame!(fiber, frame, stack_start, fn_obj);
                }

                Opcode::CallK | Opcode::CallSuperK => {
                    let num_args = inst.vb() as usize + 1;
                    let symbol = inst.vc();
                    let base = stack_start + inst.a() as usize;
                    (*fiber).last_call_reg = base;

                    let class = if inst.opcode() == Opcode::CallSuperK {
                        // The superclass sits in a constant loaded just past
                        // the arguments.
                        let superclass = (&(*fiber).stack)[base + num_args];
                        debug_assert!(superclass.is_class());
                        superclass.as_class()
                    } else {
                        self.class_of((&(*fiber).stack)[base])
                    };

                    match (*class).method(symbol) {
                        Method::Primitive(id) => {
                            let primitive = self.primitives[id as usize];
                            if !primitive(self, base) {
                                // An error, fiber switch, or call frame
                                // change occurred.
                                fiber = self.fiber;
                                if fiber.is_null() {
                                    return InterpretResult::Success;
                                }
                                if (*fiber).has_error() {
                                    runtime_error!(self, fiber, frame, stack_start, fn_obj);
                                }
                                load_frame!(fiber, frame, stack_start, fn_obj);
                            }
                        }
                        Method::FunctionCall => {
                            let receiver = (&(*fiber).stack)[base];
                            if !call::check_arity(self, receiver, num_args) {
                                runtime_error!(self, fiber, frame, stack_start, fn_obj);
                            }
                            call::call_function(fiber, receiver.as_closure(), base, RETURN_TO_BASE);
                            load_frame!(fiber, frame, stack_start, fn_obj);
                        }
                        Method::Foreign(id) => {
                            (*fiber).api_stack_top = base + num_args;
                            let foreign = self.foreign_methods[id as usize];
                            debug_assert!(
                                self.api_stack.is_none(),
                                "cannot already be in foreign call"
                            );
                            self.api_stack = Some(base);
                            foreign(self);
                            self.api_stack = None;
                            // One slot is left for the result.
                            (*fiber).api_stack_top = base + 1;
                            if (*fiber).has_error() {
                                runtime_error!(self, fiber, frame, stack_start, fn_obj);
                            }
                        }
                        Method::Block(method_closure) => {
                            (*fiber).api_stack_top = base + num_args;
                            call::call_function(fiber, method_closure, base, base as i64);
                            load_frame!(fiber, frame, stack_start, fn_obj);
                        }
                        Method::None | Method::Finalizer(_) => {
                            self.method_not_found(class, symbol);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::Closure => {
                    let proto_value = (&(*fn_obj).constants)[inst.bx() as usize];
                    debug_assert!(proto_value.is_closure(), "constant must be a prototype");
                    let proto = proto_value.as_closure();
                    let function = (*proto).fn_obj;

                    // Store the closure before capturing so a collection
                    // between captures sees it.
                    let new_closure = closure::new(&mut self.gc, function);
                    set_reg(fiber, stack_start, inst.a(), Value::obj(new_closure));

                    for i in 0..(*function).num_upvalues {
                        let descriptor = (&(*proto).proto_upvalues)[i];
                        let upvalue = if descriptor.is_local {
                            fiber::capture_upvalue(
                                &mut self.gc,
                                fiber,
                                stack_start + descriptor.index,
                            )
                        } else {
                            (&(*(*frame).closure).upvalues)[descriptor.index]
                        };
                        (&mut (*new_closure).upvalues)[i] = upvalue;
                    }
                }

                Opcode::Close => {
                    fiber::close_upvalues(fiber, stack_start + inst.a() as usize);
                }

                Opcode::Class => {
                    let slot = stack_start + inst.a() as usize;
                    if inst.sign() {
                        class_exec::create_class(self, -1, (*fn_obj).module, slot);
                    } else {
                        let num_fields = inst.sbx().unsigned_abs() as i32;
                        class_exec::create_class(self, num_fields, std::ptr::null_mut(), slot);
                    }
                    if (*fiber).has_error() {
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::EndClass => {
                    class_exec::end_class(self, stack_start + inst.a() as usize);
                    if (*fiber).has_error() {
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::Method => {
                    let symbol = inst.sbx().unsigned_abs();
                    let class_value = reg(fiber, stack_start, inst.a());
                    debug_assert!(class_value.is_class());
                    let method_value = reg(fiber, stack_start, inst.a() - 1);
                    class_exec::bind_register_method(
                        self,
                        inst.sign(),
                        symbol,
                        (*fn_obj).module,
                        class_value.as_class(),
                        method_value,
                    );
                    if (*fiber).has_error() {
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::Construct => {
                    let slot = stack_start + inst.a() as usize;
                    if inst.bx() == 0 {
                        class_exec::construct_instance(self, slot);
                    } else {
                        class_exec::create_foreign(self, slot);
                        if (*fiber).has_error() {
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::ImportModule => {
                    let name = (&(*fn_obj).constants)[inst.bx() as usize];
                    match import::import_module(self, name) {
                        Ok(result) => {
                            // Keep the module closure in the register so a
                            // collection during the call sees it.
                            set_reg(fiber, stack_start, inst.a(), result);
                            if result.is_closure() {
                                call::call_function(
                                    fiber,
                                    result.as_closure(),
                                    stack_start + inst.a() as usize,
                                    RETURN_TO_BASE,
                                );
                                load_frame!(fiber, frame, stack_start, fn_obj);
                            } else {
                                // Already loaded; remember it for IMPORTVAR.
                                self.last_module = result.as_module();
                            }
                        }
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::ImportVar => {
                    let variable = (&(*fn_obj).constants)[inst.bx() as usize];
                    let last_module = self.last_module;
                    match import::get_module_variable(self, last_module, variable) {
                        Ok(value) => set_reg(fiber, stack_start, inst.a(), value),
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::Add => {
                    let left = reg(fiber, stack_start, inst.b());
                    let right = reg(fiber, stack_start, inst.c());
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        plus,
                        ops::add
                    );
                }
                Opcode::AddK => {
                    let (left, right) = k_operands(fiber, stack_start, fn_obj, inst);
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        plus,
                        ops::add
                    );
                }

                Opcode::Sub => {
                    let left = reg(fiber, stack_start, inst.b());
                    let right = reg(fiber, stack_start, inst.c());
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        minus,
                        ops::subtract
                    );
                }
                Opcode::SubK => {
                    let (left, right) = k_operands(fiber, stack_start, fn_obj, inst);
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        minus,
                        ops::subtract
                    );
                }

                Opcode::Mul => {
                    let left = rk(fiber, stack_start, fn_obj, inst.b());
                    let right = rk(fiber, stack_start, fn_obj, inst.c());
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        star,
                        ops::multiply
                    );
                }
                Opcode::MulK => {
                    let (left, right) = k_operands(fiber, stack_start, fn_obj, inst);
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        star,
                        ops::multiply
                    );
                }

                Opcode::Div => {
                    let left = rk(fiber, stack_start, fn_obj, inst.b());
                    let right = rk(fiber, stack_start, fn_obj, inst.c());
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        slash,
                        ops::divide
                    );
                }
                Opcode::DivK => {
                    let (left, right) = k_operands(fiber, stack_start, fn_obj, inst);
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        left,
                        right,
                        slash,
                        ops::divide
                    );
                }

                Opcode::Neg => {
                    let operand = reg(fiber, stack_start, inst.b());
                    if operand.is_class() || operand.is_instance() {
                        let class = self.class_of(operand);
                        let method = (*class).method(self.symbols.negate);
                        if let Method::Block(_) = method {
                            let dst = (stack_start + inst.a() as usize) as i64;
                            let outcome = call::invoke_overload(self, method, &[operand], dst);
                            finish_overload!(
                                self,
                                fiber,
                                frame,
                                stack_start,
                                fn_obj,
                                outcome,
                                dst as usize
                            );
                        }
                    }
                    match ops::negate(&mut self.gc, operand) {
                        Ok(value) => set_reg(fiber, stack_start, inst.a(), value),
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::Not => {
                    let operand = reg(fiber, stack_start, inst.b());
                    if operand.is_class() || operand.is_instance() {
                        let class = self.class_of(operand);
                        let method = (*class).method(self.symbols.not_op);
                        if let Method::Block(_) = method {
                            let dst = (stack_start + inst.a() as usize) as i64;
                            let outcome = call::invoke_overload(self, method, &[operand], dst);
                            finish_overload!(
                                self,
                                fiber,
                                frame,
                                stack_start,
                                fn_obj,
                                outcome,
                                dst as usize
                            );
                        }
                    }
                    let value = ops::not(operand);
                    set_reg(fiber, stack_start, inst.a(), value);
                }

                Opcode::Eq | Opcode::EqK => {
                    let (left, right) = if inst.opcode() == Opcode::Eq {
                        (
                            reg(fiber, stack_start, inst.b()),
                            reg(fiber, stack_start, inst.c()),
                        )
                    } else {
                        k_operands(fiber, stack_start, fn_obj, inst)
                    };

                    if let Some(()) = self.try_comparison_overload(
                        &mut fiber,
                        left,
                        right,
                        if inst.a() == 0 {
                            self.symbols.eq_eq
                        } else {
                            self.symbols.bang_eq
                        },
                        frame,
                        fn_obj,
                        stack_start,
                    ) {
                        if (*fiber).has_error() {
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                        load_frame!(fiber, frame, stack_start, fn_obj);
                        continue;
                    }

                    if values_equal(left, right) != (inst.a() != 0) {
                        (*frame).ip += 1;
                    }
                }

                Opcode::Lt | Opcode::LtK | Opcode::Lte | Opcode::LteK => {
                    let op = inst.opcode();
                    let (left, right) = if op == Opcode::Lt || op == Opcode::Lte {
                        (
                            rk(fiber, stack_start, fn_obj, inst.b()),
                            rk(fiber, stack_start, fn_obj, inst.c()),
                        )
                    } else {
                        k_operands(fiber, stack_start, fn_obj, inst)
                    };

                    let is_lt = op == Opcode::Lt || op == Opcode::LtK;
                    let symbol = match (is_lt, inst.a() == 0) {
                        (true, true) => self.symbols.lt,
                        (true, false) => self.symbols.gt_eq,
                        (false, true) => self.symbols.lt_eq,
                        (false, false) => self.symbols.gt,
                    };

                    if let Some(()) = self.try_comparison_overload(
                        &mut fiber,
                        left,
                        right,
                        symbol,
                        frame,
                        fn_obj,
                        stack_start,
                    ) {
                        if (*fiber).has_error() {
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                        load_frame!(fiber, frame, stack_start, fn_obj);
                        continue;
                    }

                    let Value::Num(left_num) = left else {
                        self.fiber_abort_str("Left operand must be a number.");
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    };
                    let Value::Num(right_num) = right else {
                        self.fiber_abort_str("Right operand must be a number.");
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    };

                    let result = if is_lt {
                        left_num < right_num
                    } else {
                        left_num <= right_num
                    };
                    if result != (inst.a() != 0) {
                        (*frame).ip += 1;
                    }
                }

                Opcode::AddElem | Opcode::AddElemK => {
                    let left = reg(fiber, stack_start, inst.b());
                    let right = if inst.opcode() == Opcode::AddElemK {
                        (&(*fn_obj).constants)[inst.c8() as usize]
                    } else {
                        reg(fiber, stack_start, inst.c8())
                    };
                    debug_assert!(left.is_list(), "ADDELEM receiver must be a list");

                    match ops::add_elem(&mut self.gc, left, right, !inst.k()) {
                        Ok(result) => {
                            if !result.is_null() {
                                set_reg(fiber, stack_start, inst.a(), result);
                            }
                        }
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::Iterate => {
                    let sequence = reg(fiber, stack_start, inst.b());
                    let iterator = if inst.k() {
                        (&(*fn_obj).constants)[inst.c8() as usize]
                    } else {
                        reg(fiber, stack_start, inst.c8())
                    };
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        sequence,
                        iterator,
                        iterate,
                        ops::iterate
                    );
                }

                Opcode::IteratorValue => {
                    let sequence = reg(fiber, stack_start, inst.b());
                    let iterator = if inst.k() {
                        (&(*fn_obj).constants)[inst.c8() as usize]
                    } else {
                        reg(fiber, stack_start, inst.c8())
                    };

                    if sequence.is_class() || sequence.is_instance() {
                        let class = self.class_of(sequence);
                        let method = (*class).method(self.symbols.iterator_value);
                        if !method.is_none() {
                            let dst = (stack_start + inst.a() as usize) as i64;
                            let outcome =
                                call::invoke_overload(self, method, &[sequence, iterator], dst);
                            finish_overload!(
                                self,
                                fiber,
                                frame,
                                stack_start,
                                fn_obj,
                                outcome,
                                dst as usize
                            );
                        }
                    }

                    match ops::iterator_value(&mut self.gc, sequence, iterator) {
                        Ok(result) => {
                            // Map iteration peephole: a GETFIELD of the
                            // entry's key or value directly follows, so load
                            // the field and skip the instruction.
                            if result.is_map_entry() {
                                let next_ip = (*frame).ip;
                                if let Some(next) = (&(*fn_obj).code).get(next_ip).copied() {
                                    if next.opcode() == Opcode::GetField && next.b() == inst.a() {
                                        let entry = result.as_map_entry();
                                        let field = if next.c() == 0 {
                                            (*entry).key
                                        } else {
                                            (*entry).value
                                        };
                                        set_reg(fiber, stack_start, next.a(), field);
                                        (*frame).ip = next_ip + 1;
                                        continue;
                                    }
                                }
                            }
                            set_reg(fiber, stack_start, inst.a(), result);
                        }
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    }
                }

                Opcode::GetSub => {
                    let receiver = reg(fiber, stack_start, inst.b());
                    let index = if inst.k() {
                        (&(*fn_obj).constants)[inst.c8() as usize]
                    } else {
                        reg(fiber, stack_start, inst.c8())
                    };
                    binary_op!(
                        self,
                        fiber,
                        frame,
                        stack_start,
                        fn_obj,
                        inst,
                        receiver,
                        index,
                        subscript,
                        ops::subscript
                    );
                }

                Opcode::SetSub => {
                    let receiver = reg(fiber, stack_start, inst.b());
                    let index = if inst.k() {
                        (&(*fn_obj).constants)[inst.c8() as usize]
                    } else {
                        reg(fiber, stack_start, inst.c8())
                    };
                    let value = reg(fiber, stack_start, inst.a());

                    if receiver.is_class() || receiver.is_instance() {
                        let class = self.class_of(receiver);
                        let method = (*class).method(self.symbols.subscript_set);
                        if !method.is_none() {
                            let dst = (stack_start + inst.a() as usize) as i64;
                            let outcome =
                                call::invoke_overload(self, method, &[receiver, index, value], dst);
                            finish_overload!(
                                self,
                                fiber,
                                frame,
                                stack_start,
                                fn_obj,
                                outcome,
                                dst as usize
                            );
                        }
                    }

                    if let Err(error) = ops::set_subscript(&mut self.gc, receiver, index, value) {
                        self.fiber_abort(error);
                        runtime_error!(self, fiber, frame, stack_start, fn_obj);
                    }
                }

                Opcode::Range => {
                    let from_value = reg(fiber, stack_start, inst.b());
                    let to_value = reg(fiber, stack_start, inst.c8());
                    let from = match ops::validate_num(
                        &mut self.gc,
                        from_value,
                        "Left hand side of range",
                    ) {
                        Ok(from) => from,
                        Err(error) => {
                            self.fiber_abort(error);
                            runtime_error!(self, fiber, frame, stack_start, fn_obj);
                        }
                    };
                    let to =
                        match ops::validate_num(&mut self.gc, to_value, "Right hand side of range")
                        {
                            Ok(to) => to,
                            Err(error) => {
                                self.fiber_abort(error);
                                runtime_error!(self, fiber, frame, stack_start, fn_obj);
                            }
                        };
                    let value = range::value(&mut self.gc, from, to, inst.k());
                    set_reg(fiber, stack_start, inst.a(), value);
                }

                Opcode::Noop => {}

                Opcode::Invalid => {
                    self.fiber_abort_str("Invalid bytecode instruction.");
                    runtime_error!(self, fiber, frame, stack_start, fn_obj);
                }
            }
        }
    }

    /// The relational-overload path. When the receiver defines the operator
    /// as a block method, reserves scratch space and calls it; pairs with a
    /// following `LOADBOOL` by rewriting the pair to `NOOP` in place and
    /// delivering the result straight to its destination register. Returns
    /// `Some(())` when a call was made (the dispatch loop reloads and
    /// continues), `None` to use the built-in comparison.
    #[allow(clippy::too_many_arguments)]
    unsafe fn try_comparison_overload(
        &mut self,
        fiber: &mut *mut ObjFiber,
        left: Value,
        right: Value,
        symbol: u32,
        frame: *mut CallFrame,
        fn_obj: *mut ObjFn,
        stack_start: usize,
    ) -> Option<()> {
        if !left.is_class() && !left.is_instance() {
            return None;
        }
        let class = self.class_of(left);
        let method = (*class).method(symbol);
        let Method::Block(_) = method else {
            return None;
        };

        let next_ip = (*frame).ip;
        let return_reg = if (&(*fn_obj).code)
            .get(next_ip)
            .map(|next| next.opcode() == Opcode::LoadBool)
            .unwrap_or(false)
        {
            let dst = (&(*fn_obj).code)[next_ip].a();
            // Blank the materialization pair; the overload's return value
            // replaces it.
            (&mut (*fn_obj).code)[next_ip].set_opcode(Opcode::Noop);
            if let Some(second) = (&mut (*fn_obj).code).get_mut(next_ip + 1) {
                second.set_opcode(Opcode::Noop);
            }
            (stack_start + dst as usize) as i64
        } else {
            // No consumer; deliver into the reserved top-of-stack slot.
            ((**fiber).stack.len().max(2) - 2) as i64
        };

        match call::invoke_overload(self, method, &[left, right], return_reg) {
            OverloadOutcome::Value(value) => {
                (&mut (**fiber).stack)[return_reg as usize] = value;
            }
            OverloadOutcome::Reenter => {
                if !self.fiber.is_null() {
                    *fiber = self.fiber;
                }
            }
            OverloadOutcome::Abort => {
                // The caller checks the fiber error and unwinds.
            }
        }
        Some(())
    }
}
