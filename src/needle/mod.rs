//! Needle Module
//!
//! Binary record format for small objects and the append-only container
//! ("bundle") that holds them.
//!
//! ## Needle Layout
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────┬───────────────┐
//! │ Header (40)  │ Data (data_size) │ Meta (meta_size) │ Zero padding  │
//! └──────────────┴──────────────────┴──────────────────┴───────────────┘
//!  ^ 4096-aligned                                       total 4096-aligned
//! ```
//!
//! ## Header Layout (little-endian)
//! ```text
//! ┌──────────┬───────────────┬───────────────┬─────────────┬───────────────┬──────────────┐
//! │ Magic u32│ NeedleSize i64│ MetaOffset i64│ MetaSize i32│ DataOffset i64│ DataSize i64 │
//! └──────────┴───────────────┴───────────────┴─────────────┴───────────────┴──────────────┘
//! ```
//!
//! ## Bundle Layout
//! ```text
//! ┌────────────────────────┬──────────┬──────────┬─────┐
//! │ Superblock (4096)      │ Needle 1 │ Needle 2 │ ... │
//! │ Magic "PKBL" | Version │          │          │     │
//! └────────────────────────┴──────────┴──────────┴─────┘
//! ```

mod bundle;
mod header;

pub use bundle::{Bundle, SectionReader, SUPERBLOCK_VERSION};
pub use header::{
    align_up, calculate_disk_size, is_aligned, NeedleHeader, ALIGNMENT, HEADER_SIZE, NEEDLE_MAGIC,
};
