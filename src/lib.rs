//! # DICOM-stack library
//!
//! This crate serves cached DICOM metadata and wrap-around navigation over
//! the slices of a DICOM object

//!
//! Decoding is left to the dicom-rs ecosystem. On top of it the crate adds
//! two pieces:
//!  - A read-through metadata cache. Metadata is looked up in a
//!    [`MetadataStore`] under `<identity>:info` and the DICOM file is only
//!    parsed on a miss, after which the store is populated.
//!  - A slice navigator. It keeps a cursor over a [`SliceStack`] that wraps
//!    at either end, starts on the middle slice and falls back to the middle
//!    slice for out-of-range indices. The stack can be replayed interactively
//!    (one render per scroll or seek event) or exported end to end, once.
//!
//!  Rendering is delegated to a [`FrameRenderer`]. PNG sequences, a single
//!  mirrored PNG and animated GIFs are provided; any `FnMut(usize, &P)`
//!  closure works too.
//!
//!  Slice stacks come either from the frames of one multi-frame file
//!  ([`DicomFileSource`]) or from a directory of single-frame files
//!  ([`StackLoader`]), sorted by position, table position or instance number.
//!
//! # Examples
//!
//! ## Cached metadata
//!
//! ```no_run
//! # use dicom_stack::{DicomDataSource, DicomFileSource, DirectoryStore, FileIdentity, MetadataCache};
//! let cache = MetadataCache::new(DirectoryStore::open(".dicom-cache").expect("cache directory"));
//! let identity = FileIdentity::resolve("stress-sax-gated.dcm").expect("file should exist");
//! let record = cache
//!     .get_metadata(&identity, || DicomFileSource.parse(&identity))
//!     .expect("metadata should be available");
//! println!("{:?}", record.text("modality"));
//! ```
//!
//! ## Exporting every slice
//!
//! ```no_run
//! # use dicom_stack::{DicomDataSource, DicomFileSource, FileIdentity, PngSequenceWriter, SliceNavigator};
//! # use std::time::Duration;
//! let identity = FileIdentity::resolve("stress-sax-gated.dcm").expect("file should exist");
//! let stack = DicomFileSource.load_stack(&identity).expect("slices should decode");
//! let navigator = SliceNavigator::new(stack).expect("stack should not be empty");
//! let mut writer = PngSequenceWriter::new("frames", "slice");
//! navigator.export(Duration::from_millis(100)).run(&mut writer);
//! writer.finish().expect("frames should be written");
//! ```

pub mod dicom_source;
pub mod enums;
pub mod identity;
pub mod metadata;
pub mod metadata_cache;
pub mod navigator;
pub mod render;
pub mod server;
pub mod slice_stack;
pub mod source;
pub mod stack_loader;
pub mod store;

pub use dicom_source::DicomFileSource;
pub use enums::{Direction, Origin, SequenceMode, SequenceState, SortBy};
pub use identity::FileIdentity;
pub use metadata::{EncodeError, MetadataRecord, MetadataValue};
pub use metadata_cache::{CacheEntry, CacheError, MetadataCache, get_metadata};
pub use navigator::{
    ExportDriver, ExportReport, FrameRenderer, InteractiveDriver, NavigationEvent, NavigatorError,
    Sequence, SliceNavigator,
};
pub use render::{GifAnimationWriter, LatestFrameWriter, PngSequenceWriter, RenderError};
pub use slice_stack::SliceStack;
pub use source::{DicomDataSource, SourceError};
pub use stack_loader::StackLoader;
pub use store::{DirectoryStore, MemoryStore, MetadataStore, StoreError};
