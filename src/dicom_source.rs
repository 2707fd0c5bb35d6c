use std::collections::BTreeMap;

use dicom::{
    core::{Tag, VR, dictionary::DataDictionary},
    object::{DefaultDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{StandardDataDictionary, tags};
use ndarray::{Array2, Array4, s};

use crate::{
    identity::FileIdentity,
    metadata::{MetadataRecord, MetadataValue},
    slice_stack::SliceStack,
    source::{DicomDataSource, SourceError},
};

/// Placeholder stored when a file carries no Slice Location.
pub const MISSING_SLICE_LOCATION: &str = "(missing)";

/// One decoded frame, rows by columns.
pub type Slice = Array2<u16>;

/// [`DicomDataSource`] over DICOM files on the local filesystem.
///
/// Each frame of a (possibly multi-frame) object is one slice.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomFileSource;

impl DicomFileSource {
    pub fn new() -> Self {
        Self
    }

    fn open(identity: &FileIdentity) -> Result<DefaultDicomObject, SourceError> {
        let path = identity.to_path_buf();
        if !path.is_file() {
            return Err(SourceError::NotFound {
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
                path,
            });
        }
        log::info!("Loading DICOM file: {}", path.display());
        Ok(open_file(&path)?)
    }

    /// Decode every frame of `object` into (frames, rows, columns, samples).
    pub(crate) fn decode_frames(object: &DefaultDicomObject) -> Result<Array4<u16>, SourceError> {
        let pixel_data = object
            .decode_pixel_data()
            .map_err(|err| SourceError::PixelData(err.to_string()))?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .map_err(|err| SourceError::PixelData(err.to_string()))
    }

    fn frame_count(object: &DefaultDicomObject) -> usize {
        if object.element(tags::PIXEL_DATA).is_err() {
            return 0;
        }
        int_attribute(object, tags::NUMBER_OF_FRAMES)
            .and_then(|frames| usize::try_from(frames).ok())
            .unwrap_or(1)
    }

    /// Extract the summary fields plus a full attribute dump.
    pub fn extract_metadata(identity: &FileIdentity, object: &DefaultDicomObject) -> MetadataRecord {
        let mut record = MetadataRecord::new().with("file_path", identity.as_str());

        for (field, tag) in [
            ("sop_class_uid", tags::SOP_CLASS_UID),
            ("patient_id", tags::PATIENT_ID),
            ("modality", tags::MODALITY),
            ("study_date", tags::STUDY_DATE),
        ] {
            match text_attribute(object, tag) {
                Some(value) => record = record.with(field, value),
                None => log::debug!("{identity}: no {field}"),
            }
        }

        if let Some(name) = text_attribute(object, tags::PATIENT_NAME) {
            record = record.with("patient_name", family_comma_given(&name));
        }

        for (field, tag) in [("rows", tags::ROWS), ("columns", tags::COLUMNS)] {
            if let Some(value) = int_attribute(object, tag) {
                record = record.with(field, value);
            }
        }
        record = record.with("number_of_frames", Self::frame_count(object) as i64);

        if let Some(spacing) = object
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|element| element.to_multi_float64().ok())
        {
            let spacing: Vec<MetadataValue> = spacing.into_iter().map(MetadataValue::Float).collect();
            record = record.with("pixel_spacing", spacing);
        }

        let slice_location = object
            .element(tags::SLICE_LOCATION)
            .ok()
            .and_then(|element| element.to_float64().ok())
            .map(MetadataValue::Float)
            .unwrap_or_else(|| MetadataValue::from(MISSING_SLICE_LOCATION));
        record = record.with("slice_location", slice_location);

        record.with("attributes", attribute_map(object))
    }
}

impl DicomDataSource for DicomFileSource {
    type Slice = Slice;

    fn parse(&self, identity: &FileIdentity) -> Result<MetadataRecord, SourceError> {
        let object = Self::open(identity)?;
        Ok(Self::extract_metadata(identity, &object))
    }

    fn slice_count(&self, identity: &FileIdentity) -> Result<usize, SourceError> {
        let object = Self::open(identity)?;
        Ok(Self::frame_count(&object))
    }

    fn slice_at(&self, identity: &FileIdentity, index: usize) -> Result<Slice, SourceError> {
        let object = Self::open(identity)?;
        let frames = Self::decode_frames(&object)?;
        let count = frames.dim().0;
        if index >= count {
            return Err(SourceError::SliceOutOfRange { index, count });
        }
        Ok(frames.slice(s![index, .., .., 0]).to_owned())
    }

    fn load_stack(&self, identity: &FileIdentity) -> Result<SliceStack<Slice>, SourceError> {
        let object = Self::open(identity)?;
        if Self::frame_count(&object) == 0 {
            return Ok(SliceStack::new(identity.clone(), Vec::new()));
        }
        let frames = Self::decode_frames(&object)?;
        let slices = frames
            .outer_iter()
            .map(|frame| frame.slice(s![.., .., 0]).to_owned())
            .collect();
        Ok(SliceStack::new(identity.clone(), slices))
    }
}

fn text_attribute(object: &DefaultDicomObject, tag: Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn int_attribute(object: &DefaultDicomObject, tag: Tag) -> Option<i64> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_int::<i64>().ok())
}

/// Render a DICOM person name (`Family^Given^Middle^Prefix^Suffix`) as
/// `Family, Given`.
fn family_comma_given(name: &str) -> String {
    let mut parts = name.split('^').map(str::trim);
    let family = parts.next().unwrap_or_default();
    match parts.next().filter(|given| !given.is_empty()) {
        Some(given) => format!("{family}, {given}"),
        None => family.to_owned(),
    }
}

/// Every textual attribute keyed by dictionary alias. Bulk binary values and
/// sequences are left out.
fn attribute_map(object: &DefaultDicomObject) -> BTreeMap<String, MetadataValue> {
    object
        .iter()
        .filter(|element| {
            !matches!(
                element.header().vr,
                VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN | VR::SQ
            )
        })
        .filter_map(|element| {
            let tag = element.header().tag;
            let name = StandardDataDictionary
                .by_tag(tag)
                .map(|entry| entry.alias.to_string())
                .unwrap_or_else(|| tag.to_string());
            let value = element.to_str().ok()?.trim().to_string();
            Some((name, MetadataValue::Text(value)))
        })
        .collect()
}
