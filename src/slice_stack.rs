use crate::identity::FileIdentity;

/// Ordered, read-only slices of one DICOM object, in the order they were
/// decoded.
#[derive(Debug, Clone)]
pub struct SliceStack<P> {
    identity: FileIdentity,
    slices: Vec<P>,
}

impl<P> SliceStack<P> {
    pub fn new(identity: FileIdentity, slices: Vec<P>) -> Self {
        Self { identity, slices }
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&P> {
        self.slices.get(index)
    }

    pub fn slices(&self) -> &[P] {
        &self.slices
    }

    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.slices.iter()
    }
}
