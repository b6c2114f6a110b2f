pub mod atomic;
pub mod journal;
pub mod store;

pub use journal::{Journal, JournalConsole, JournalPause};
pub use store::{RunPaths, RunWriter};
