//! Everything that happens to the archive after logs land in it: compressing
//! them, packing each dongle folder into size-capped groups and uploading
//! those groups to remote storage.

mod codec;
pub mod error;
mod pack;
mod report;
mod stage;
mod upload;
mod walk;

pub use crate::codec::Encoder;
pub use crate::pack::{ArchivalGroup, BinPacker, LocalFileEntry, plan_groups};
pub use crate::report::{ArchiveReport, DeviceUsage, DongleUsage, FileCounts};
pub use crate::stage::{CompressionReport, CompressionStage, CompressionStats};
pub use crate::upload::{ArchivalUploader, GroupReport, UploadEvent, UploadSummary, batch_options, upload};
