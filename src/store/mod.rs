//! Model inputs, reference arrays and the dense graph storage shared by every phase.
pub mod context;
pub mod registry;
pub mod symbols;
pub mod timeline;
pub mod types;

pub use context::{ReferenceContext, Series};
pub use registry::Registry;
pub use symbols::{SymbolId, SymbolOrigin, SymbolTable};
pub use timeline::{Period, Timeline};
pub use types::*;
