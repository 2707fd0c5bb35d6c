use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{identity::FileIdentity, metadata::MetadataRecord, slice_stack::SliceStack};

/// Raised when a DICOM object cannot be read or decoded.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{} does not exist: {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not valid UTF-8 and cannot serve as an identity", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("slice {index} requested but only {count} available")]
    SliceOutOfRange { index: usize, count: usize },

    #[error("could not decode pixel data: {0}")]
    PixelData(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Parse and slice-extraction capability over DICOM objects.
///
/// Implementations decide what a slice payload is; the navigator treats it as
/// opaque.
pub trait DicomDataSource {
    type Slice;

    /// Decode the metadata of `identity`.
    fn parse(&self, identity: &FileIdentity) -> Result<MetadataRecord, SourceError>;

    fn slice_count(&self, identity: &FileIdentity) -> Result<usize, SourceError>;

    fn slice_at(&self, identity: &FileIdentity, index: usize) -> Result<Self::Slice, SourceError>;

    /// Collect every slice of `identity` in source order.
    ///
    /// The default goes through [`slice_at`](Self::slice_at) one index at a
    /// time; sources that decode all frames at once should override it.
    fn load_stack(&self, identity: &FileIdentity) -> Result<SliceStack<Self::Slice>, SourceError> {
        let count = self.slice_count(identity)?;
        let slices = (0..count)
            .map(|index| self.slice_at(identity, index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SliceStack::new(identity.clone(), slices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingSource {
        count: usize,
        reads: Cell<usize>,
    }

    impl DicomDataSource for CountingSource {
        type Slice = usize;

        fn parse(&self, _identity: &FileIdentity) -> Result<MetadataRecord, SourceError> {
            Ok(MetadataRecord::new())
        }

        fn slice_count(&self, _identity: &FileIdentity) -> Result<usize, SourceError> {
            Ok(self.count)
        }

        fn slice_at(&self, _identity: &FileIdentity, index: usize) -> Result<usize, SourceError> {
            if index >= self.count {
                return Err(SourceError::SliceOutOfRange {
                    index,
                    count: self.count,
                });
            }
            self.reads.set(self.reads.get() + 1);
            Ok(index * 10)
        }
    }

    #[test]
    fn default_load_stack_keeps_source_order() {
        let source = CountingSource {
            count: 4,
            reads: Cell::new(0),
        };
        let identity = FileIdentity::new("series.dcm");
        let stack = source.load_stack(&identity).unwrap();

        assert_eq!(stack.identity(), &identity);
        assert_eq!(stack.slices(), &[0, 10, 20, 30]);
        assert_eq!(source.reads.get(), 4);
    }
}
