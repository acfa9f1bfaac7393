pub(crate) mod core;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod models;
pub mod observer;
pub mod progress;
pub mod task;

pub use error::DownloadError;
pub use manager::DownloadManager;
pub use models::DownloadConfig;
pub use observer::{CompletionObserver, UpdateObserver};
pub use task::{DownloadTask, TaskSnapshot, TaskStatus};
