pub mod atomic;
pub mod document;
pub(crate) mod executor;
pub mod linelog;
pub mod registry;

pub use atomic::AtomicFile;
pub use document::{DocumentOptions, JsonStore};
pub use linelog::{JsonLineStore, LineLogOptions, UpdateOutcome};
pub use registry::Registry;
