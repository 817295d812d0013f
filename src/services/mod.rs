pub mod watcher;

pub use watcher::{watch_and_rename, FolderWatcher};
