//! Executable representation and its evaluator.
//!
//! - `op` - the operations
//! - `code` - code objects, constants, and inline-cache sites
//! - `builder` - `CodeBuilder`, used in place of a compiler front-end
//! - `vm` - the frame evaluator, calls, and generator resumption

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, Const, Site};
pub use op::{JumpTarget, Op};

mod builder;
mod code;
mod op;
pub(crate) mod vm;
