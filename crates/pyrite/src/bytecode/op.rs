//! Operations of the executable representation.

use strum::IntoStaticStr;

use crate::{
    dispatch::{BinaryOp, CompareOp},
    intern::StringId,
};

/// Index of an op within its code object; the target of jumps.
pub type JumpTarget = u32;

/// One operation of a code object.
///
/// The evaluator is a stack machine. Each variant documents its stack effect as
/// `before -> after`, top of stack rightmost. Attribute, call, and binary-operator ops carry
/// the index of their inline-cache site, which stays stable across re-executions so caches
/// persist across loop iterations and calls.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
pub enum Op {
    // ==========================
    // names and constants
    /// `-> consts[i]`
    LoadConst(u16),
    /// `-> locals[i]`
    LoadFast(u16),
    /// `value ->`
    StoreFast(u16),
    /// `-> globals[name]`, falling back to builtins.
    LoadGlobal(StringId),
    /// `value ->`
    StoreGlobal(StringId),

    // ==========================
    // attributes and calls
    /// `obj -> obj.name`
    LoadAttr { name: StringId, site: u16 },
    /// `value obj ->`
    StoreAttr { name: StringId, site: u16 },
    /// `obj ->`
    DeleteAttr(StringId),
    /// `obj arg1 .. argN -> obj.name(arg1, .., argN)`
    CallMethod { name: StringId, argc: u8, site: u16 },
    /// `callable arg1 .. argN -> result`
    Call { argc: u8 },

    // ==========================
    // operators
    /// `left right -> left OP right`
    BinaryOp { op: BinaryOp, site: u16 },
    /// `left right -> left OP right`
    Compare { op: CompareOp },
    /// `item container -> item in container`
    Contains,
    /// `value -> not value`
    UnaryNot,

    // ==========================
    // containers
    /// `obj key -> obj[key]`
    Subscript,
    /// `value obj key ->`
    StoreSubscript,
    /// `item1 .. itemN -> (item1, .., itemN)`
    BuildTuple(u16),
    /// `item1 .. itemN -> [item1, .., itemN]`
    BuildList(u16),
    /// `iterable -> iterator`
    GetIter,
    /// `iterator -> iterator next`, or pops the iterator and jumps when exhausted.
    ForIter(JumpTarget),

    // ==========================
    // control flow
    Jump(JumpTarget),
    /// `cond ->`
    PopJumpIfFalse(JumpTarget),
    /// `cond ->`
    PopJumpIfTrue(JumpTarget),
    /// `value -> value` and jump if falsy, else `value ->`. Used for `and`.
    JumpIfFalseOrPop(JumpTarget),
    /// `value -> value` and jump if truthy, else `value ->`. Used for `or`.
    JumpIfTrueOrPop(JumpTarget),

    // ==========================
    // stack manipulation
    Pop,
    Dup,
    /// `a b -> b a`
    Rot2,

    // ==========================
    // exceptions
    /// Pushes a handler block. On an exception inside the block the stack is cut back to its
    /// depth at setup, the exception object is pushed, it becomes the currently handled
    /// exception, and control jumps to the handler.
    SetupExcept(JumpTarget),
    /// Pops the innermost handler block.
    PopBlock,
    /// `exc cls -> matches` where `cls` may be a class or a tuple of classes.
    ExceptMatch,
    /// Leaves a handler: the exception it was handling stops being current.
    PopExcept,
    /// `exc ->` raises a class (instantiated without arguments) or an instance.
    Raise,
    /// Bare `raise`: re-raises the currently handled exception.
    Reraise,

    // ==========================
    // definitions
    /// `default1 .. defaultN -> function`; `code` indexes a [`Const::Code`](super::Const::Code).
    MakeFunction { code: u16, defaults: u8 },
    /// `base1 .. baseN body -> class`. `body` is a function whose locals become the namespace.
    BuildClass { name: StringId, nbases: u8 },
    /// `cls obj -> super(cls, obj)`
    LoadSuper,

    // ==========================
    // frame exit
    /// `value -> sent`: suspends a generator, producing `value`.
    Yield,
    /// `value ->` and leaves the frame.
    Return,
}

impl Op {
    /// The op's name for tracers and disassembly.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Jump target of a branching op.
    #[must_use]
    pub fn jump_target(self) -> Option<JumpTarget> {
        match self {
            Self::ForIter(t)
            | Self::Jump(t)
            | Self::PopJumpIfFalse(t)
            | Self::PopJumpIfTrue(t)
            | Self::JumpIfFalseOrPop(t)
            | Self::JumpIfTrueOrPop(t)
            | Self::SetupExcept(t) => Some(t),
            _ => None,
        }
    }

    /// The same op with its jump target replaced; other ops are returned unchanged.
    #[must_use]
    pub(crate) fn with_target(self, target: JumpTarget) -> Self {
        match self {
            Self::ForIter(_) => Self::ForIter(target),
            Self::Jump(_) => Self::Jump(target),
            Self::PopJumpIfFalse(_) => Self::PopJumpIfFalse(target),
            Self::PopJumpIfTrue(_) => Self::PopJumpIfTrue(target),
            Self::JumpIfFalseOrPop(_) => Self::JumpIfFalseOrPop(target),
            Self::JumpIfTrueOrPop(_) => Self::JumpIfTrueOrPop(target),
            Self::SetupExcept(_) => Self::SetupExcept(target),
            other => other,
        }
    }
}
