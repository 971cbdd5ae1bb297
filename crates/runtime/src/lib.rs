//! Tree-walking interpreter for the Yarik# language.
//!
//! - `scope`: lexical scoping, name/address lookup, and assignment
//! - `evaluator`: expression evaluation
//! - `statements`: the statement-runner state machine and control flow
//! - `bridge`: the native-call bridge (the crate's sole `unsafe` boundary)
//! - `builtins`: the fixed set of root-scope native callables
//! - `import`: module resolution and cyclic-import detection
//! - `interpreter`: the top-level entry point tying the above together

pub mod bridge;
pub mod builtins;
pub mod evaluator;
pub mod import;
pub mod interpreter;
pub mod scope;
pub mod statements;

pub use bridge::Bridge;
pub use interpreter::Interpreter;
pub use scope::Scope;
