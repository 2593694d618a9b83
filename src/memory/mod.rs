//! Per-task memory windows with threshold summarization, and the scoped and
//! global views built from them.

pub mod context;
pub mod history;
pub mod interaction;
pub mod store;
pub mod window;

pub use context::ScopedContext;
pub use history::GlobalHistory;
pub use interaction::{Interaction, InteractionKind, Role};
pub use store::{MemoryStore, WindowSettings};
pub use window::{MemoryWindow, WindowView};
