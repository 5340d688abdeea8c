//! exiftool operations and the typed model of their results.

mod args;
mod datetime;
mod read;
mod tags;
mod write;

pub use args::{
    ReadOptions, extract_binary_args, read_args, rewrite_all_tags_args, validate_tag_name,
    write_args,
};
pub use datetime::{ExifDate, ExifDateTime, ExifTime};
pub use read::{Metadata, ReadTask};
pub use tags::{FieldKind, TagValue, Tags, field_kind, is_intrinsic_file_tag};
pub use write::{ExtractBinaryTask, RewriteAllTagsTask, WriteSummary, WriteTask};
