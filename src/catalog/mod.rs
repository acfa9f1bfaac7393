pub mod client;
pub mod error;
pub mod filter;
pub mod layout;
pub mod models;

pub use client::{BuildSource, CatalogClient};
pub use error::CatalogError;
pub use filter::{DownloadedFilter, ImageFilter, StatusFilter};
pub use models::{RecoveryImage, SupportStatus};
