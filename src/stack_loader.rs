use crate::{
    dicom_source::{DicomFileSource, Slice},
    enums::SortBy,
    identity::FileIdentity,
    slice_stack::SliceStack,
    source::SourceError,
};

use dicom::object::{DefaultDicomObject, open_file};
use dicom_dictionary_std::tags;
use ndarray::s;
use rayon::prelude::*;
use std::{fs, path::Path};

/// Builds a single [`SliceStack`] out of many single-frame DICOM files, one
/// slice per file.
pub struct StackLoader;

impl StackLoader {
    /// Stack already opened DICOM objects
    ///
    /// # Arguments
    ///
    /// * `identity` - Identity the resulting stack is filed under
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        identity: FileIdentity,
        dicom_objects: &[DefaultDicomObject],
        sort_by: SortBy,
    ) -> Result<SliceStack<Slice>, SourceError> {
        let mut images_with_order: Vec<_> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| Self::extract_image_with_order(dicom_object, sort_by))
            .collect();

        if images_with_order.is_empty() {
            return Err(SourceError::NoValidImages);
        }

        Self::sort_images(&mut images_with_order, sort_by);

        let images: Vec<_> = images_with_order
            .into_iter()
            .map(|(_, image)| image)
            .collect();

        Self::validate_dimensions(&images)?;

        log::info!("stacked {} slices for {identity}", images.len());
        Ok(SliceStack::new(identity, images))
    }

    /// Stack the files at `paths`, opened in parallel.
    pub fn load_from_file_paths(
        identity: FileIdentity,
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<SliceStack<Slice>, SourceError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(identity, &objects?, sort_by)
    }

    /// Stack every `.dcm` file in a directory. The directory's canonical path
    /// becomes the stack identity.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<SliceStack<Slice>, SourceError> {
        let identity = FileIdentity::resolve(path.as_ref())?;
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(SourceError::NoValidImages);
        }

        Self::load_from_file_paths(identity, &paths, sort_by)
    }

    fn extract_image_with_order(
        dicom_object: &DefaultDicomObject,
        sort_by: SortBy,
    ) -> Option<(Option<f32>, Slice)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, image_2d))
    }

    fn get_sort_order(dicom_object: &DefaultDicomObject, sort_by: SortBy) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// First frame only.
    fn decode_image(dicom_object: &DefaultDicomObject) -> Option<Slice> {
        match DicomFileSource::decode_frames(dicom_object) {
            Ok(frames) => Some(frames.slice_move(s![0, .., .., 0])),
            Err(err) => {
                log::warn!("skipping undecodable slice: {err}");
                None
            }
        }
    }

    fn sort_images(images_with_order: &mut [(Option<f32>, Slice)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    fn validate_dimensions(images: &[Slice]) -> Result<(), SourceError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(SourceError::InconsistentDimensions);
        }
        Ok(())
    }
}
