//! Builder for code objects.
//!
//! `CodeBuilder` stands in for a compiler front-end: it appends ops, allocates one
//! inline-cache site per attribute/call/operator op, resolves local names to slots, and
//! patches forward jumps.
//!
//! ```
//! use pyrite::{CodeBuilder, Runtime, Value};
//!
//! let mut b = CodeBuilder::module();
//! b.load_int(40).load_int(2).add().return_value();
//! let code = b.build();
//! let mut rt = Runtime::new();
//! assert_eq!(rt.execute(&code).unwrap(), Value::Int(42));
//! ```

use std::sync::Arc;

use crate::{
    cache::{AttributeSite, BinarySite, CallSite, StoreSite},
    dispatch::{BinaryOp, CompareOp},
    intern::{StaticStrings, StringId, intern},
};

use super::{
    code::{Code, Const, Site},
    op::{JumpTarget, Op},
};

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub struct JumpLabel(usize);

#[derive(Debug)]
pub struct CodeBuilder {
    name: StringId,
    arg_count: usize,
    local_names: Vec<StringId>,
    consts: Vec<Const>,
    ops: Vec<Op>,
    sites: Vec<Site>,
}

impl CodeBuilder {
    /// Top-level code: names are globals unless declared with [`CodeBuilder::local`].
    #[must_use]
    pub fn module() -> Self {
        Self::function(StaticStrings::Module.as_str(), &[])
    }

    /// A function body whose parameters occupy the first local slots.
    #[must_use]
    pub fn function(name: &str, params: &[&str]) -> Self {
        Self {
            name: intern(name),
            arg_count: params.len(),
            local_names: params.iter().map(|p| intern(p)).collect(),
            consts: Vec::new(),
            ops: Vec::new(),
            sites: Vec::new(),
        }
    }

    /// Slot of a local variable, allocating it on first use.
    pub fn local(&mut self, name: &str) -> u16 {
        let id = intern(name);
        let index = match self.local_names.iter().position(|&n| n == id) {
            Some(index) => index,
            None => {
                self.local_names.push(id);
                self.local_names.len() - 1
            }
        };
        u16::try_from(index).expect("more than u16::MAX locals")
    }

    /// Index the next emitted op will have; a backward jump target.
    #[must_use]
    pub fn position(&self) -> JumpTarget {
        JumpTarget::try_from(self.ops.len()).expect("code longer than u32::MAX ops")
    }

    pub fn emit(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Emits a branching op whose target is patched later by [`CodeBuilder::patch_jump`].
    pub fn emit_jump(&mut self, op: Op) -> JumpLabel {
        debug_assert!(op.jump_target().is_some(), "{op:?} is not a jump");
        self.ops.push(op);
        JumpLabel(self.ops.len() - 1)
    }

    /// Points a forward jump at the next emitted op.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.position();
        self.ops[label.0] = self.ops[label.0].with_target(target);
    }

    fn add_const(&mut self, value: Const) -> u16 {
        self.consts.push(value);
        u16::try_from(self.consts.len() - 1).expect("more than u16::MAX constants")
    }

    fn add_site(&mut self, site: Site) -> u16 {
        self.sites.push(site);
        u16::try_from(self.sites.len() - 1).expect("more than u16::MAX cache sites")
    }

    // ========================================================================
    // Constants and names
    // ========================================================================

    pub fn load_const(&mut self, value: Const) -> &mut Self {
        let index = self.add_const(value);
        self.emit(Op::LoadConst(index))
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Const::None)
    }

    pub fn load_bool(&mut self, value: bool) -> &mut Self {
        self.load_const(Const::Bool(value))
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.load_const(Const::Int(value))
    }

    pub fn load_float(&mut self, value: f64) -> &mut Self {
        self.load_const(Const::Float(value))
    }

    pub fn load_str(&mut self, value: &str) -> &mut Self {
        self.load_const(Const::Str(intern(value)))
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let slot = self.local(name);
        self.emit(Op::LoadFast(slot))
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let slot = self.local(name);
        self.emit(Op::StoreFast(slot))
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.emit(Op::LoadGlobal(intern(name)))
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        self.emit(Op::StoreGlobal(intern(name)))
    }

    // ========================================================================
    // Attributes and calls
    // ========================================================================

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let site = self.add_site(Site::Attr(AttributeSite::new()));
        self.emit(Op::LoadAttr { name: intern(name), site })
    }

    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        let site = self.add_site(Site::Store(StoreSite::new()));
        self.emit(Op::StoreAttr { name: intern(name), site })
    }

    pub fn delete_attr(&mut self, name: &str) -> &mut Self {
        self.emit(Op::DeleteAttr(intern(name)))
    }

    pub fn call_method(&mut self, name: &str, argc: u8) -> &mut Self {
        let site = self.add_site(Site::Call(CallSite::new()));
        self.emit(Op::CallMethod {
            name: intern(name),
            argc,
            site,
        })
    }

    pub fn call(&mut self, argc: u8) -> &mut Self {
        self.emit(Op::Call { argc })
    }

    // ========================================================================
    // Operators
    // ========================================================================

    pub fn binary(&mut self, op: BinaryOp) -> &mut Self {
        let site = self.add_site(Site::Binary(BinarySite::new()));
        self.emit(Op::BinaryOp { op, site })
    }

    pub fn add(&mut self) -> &mut Self {
        self.binary(BinaryOp::Add)
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit(Op::Compare { op })
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Emits `MakeFunction` for `code`, consuming `defaults` values from the stack.
    pub fn make_function(&mut self, code: Arc<Code>, defaults: u8) -> &mut Self {
        let index = self.add_const(Const::Code(code));
        self.emit(Op::MakeFunction { code: index, defaults })
    }

    /// Defines a class: expects `nbases` bases on the stack, then compiles `body` (whose
    /// locals become the namespace) into a function and emits `BuildClass`.
    pub fn build_class(&mut self, name: &str, body: Arc<Code>, nbases: u8) -> &mut Self {
        self.make_function(body, 0);
        self.emit(Op::BuildClass {
            name: intern(name),
            nbases,
        })
    }

    pub fn yield_value(&mut self) -> &mut Self {
        self.emit(Op::Yield)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.emit(Op::Return)
    }

    /// Finishes the code object. A function that contains `Yield` becomes a generator.
    #[must_use]
    pub fn build(self) -> Arc<Code> {
        let is_generator = self.ops.contains(&Op::Yield);
        Arc::new(Code {
            name: self.name,
            arg_count: self.arg_count,
            local_names: self.local_names,
            consts: self.consts,
            ops: self.ops,
            sites: self.sites.into_boxed_slice(),
            is_generator,
        })
    }
}
