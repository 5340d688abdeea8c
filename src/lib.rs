//! exifbatch - pooled stay-open exiftool workers with timezone reconciliation.
//!
//! ```no_run
//! # async fn demo() -> exifbatch::Result<()> {
//! let exiftool = exifbatch::ExifTool::default();
//! let metadata = exiftool.read("photo.jpg").await?;
//! println!("{:?} {}", metadata.tz, metadata.tz_source);
//! exiftool.end().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod exif;
mod exiftool;
pub mod logging;
pub mod paths;
pub mod tz;

pub use batch::{Pool, PoolConfig, PoolStats, SubmitOptions, Task, ToolProtocol};
pub use error::{ExifBatchError, Result};
pub use exiftool::ExifTool;
pub use tz::{TzConfig, TzOffset, TzResolution, TzSource};
