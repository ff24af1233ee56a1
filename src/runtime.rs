pub mod registry;
pub mod scope;
pub mod value;

pub use registry::{Arity, Builtin, Outcome, OutputSink, Registry, Wait};
pub use scope::Scope;
pub use value::{Class, Dict, Function, Instance, Lambda, Value};
