use std::path::Path;
use std::sync::Arc;
use std::{fs, io::Cursor};

use anyhow::{bail, Context, Result};
use dicom_object::{from_reader, open_file, DefaultDicomObject, ReadError, Tag};
use dicom_pixeldata::PixelDecoder;

use crate::study::{InstanceMetadata, InstanceRecord};

const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

#[derive(Debug, Clone)]
pub enum Pixels {
    /// Modality values, one sample per pixel.
    Mono(Arc<[i32]>),
    /// Interleaved 8-bit samples.
    Rgb {
        samples: Arc<[u8]>,
        samples_per_pixel: u16,
    },
}

/// First frame of an instance, decoded for display.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Pixels,
    /// MONOCHROME1 images render with inverted grayscale.
    pub inverted_photometric: bool,
    pub min_value: i32,
    pub max_value: i32,
}

impl DecodedImage {
    pub fn is_monochrome(&self) -> bool {
        matches!(self.pixels, Pixels::Mono(_))
    }
}

/// Reads the header fields the organizer needs. Files without Pixel Data
/// (DICOMDIR, structured reports, ...) yield `Ok(None)`.
pub fn read_instance_record(path: &Path) -> Result<Option<InstanceRecord>> {
    let obj = open_dicom_object(path)?;
    if obj.element(PIXEL_DATA).is_err() {
        log::info!("Skipping non-image DICOM file {}", path.display());
        return Ok(None);
    }

    let metadata = InstanceMetadata {
        patient_name: read_string(&obj, "PatientName").unwrap_or_else(|| "Unknown".to_string()),
        patient_id: read_string(&obj, "PatientID").unwrap_or_else(|| "Unknown".to_string()),
        study_date: read_string(&obj, "StudyDate").unwrap_or_default(),
        study_time: read_string(&obj, "StudyTime").unwrap_or_default(),
        study_description: read_string(&obj, "StudyDescription").unwrap_or_default(),
        series_description: read_string(&obj, "SeriesDescription").unwrap_or_default(),
        study_instance_uid: read_uid(&obj, "StudyInstanceUID"),
        series_instance_uid: read_uid(&obj, "SeriesInstanceUID"),
        sop_instance_uid: read_uid(&obj, "SOPInstanceUID"),
        series_number: read_int_first(&obj, "SeriesNumber").unwrap_or(0),
        instance_number: read_int_first(&obj, "InstanceNumber").unwrap_or(0),
        modality: read_string(&obj, "Modality").unwrap_or_else(|| "OT".to_string()),
        rows: read_int_first(&obj, "Rows").map_or(0, |value| value.max(0) as u32),
        columns: read_int_first(&obj, "Columns").map_or(0, |value| value.max(0) as u32),
        slice_location: read_float_first(&obj, "SliceLocation"),
        slice_thickness: read_float_first(&obj, "SliceThickness"),
        window_center: read_float_first(&obj, "WindowCenter").filter(|value| *value != 0.0),
        window_width: read_float_first(&obj, "WindowWidth").filter(|value| *value != 0.0),
    };

    Ok(Some(InstanceRecord {
        path: path.to_path_buf(),
        metadata,
    }))
}

pub fn decode_first_frame(path: &Path) -> Result<DecodedImage> {
    let obj = open_dicom_object(path)?;
    let photometric = read_string(&obj, "PhotometricInterpretation")
        .unwrap_or_else(|| "MONOCHROME2".to_string());
    let inverted_photometric = photometric.eq_ignore_ascii_case("MONOCHROME1");

    let decoded = obj
        .decode_pixel_data_frame(0)
        .context("Failed to decode PixelData frame 0")?;
    let width = decoded.columns() as usize;
    let height = decoded.rows() as usize;
    let pixel_count = width
        .checked_mul(height)
        .context("Overflow while calculating frame size")?;

    let bits_allocated = decoded.bits_allocated();
    if bits_allocated != 8 && bits_allocated != 16 {
        bail!("BitsAllocated={} is not supported (only 8/16)", bits_allocated);
    }

    match decoded.samples_per_pixel() {
        1 => {
            let samples: Vec<i32> = decoded
                .to_vec_frame(0)
                .context("Could not convert decoded frame 0 to i32 samples")?;
            if samples.len() != pixel_count {
                bail!(
                    "Decoded pixel count mismatch: got {}, expected {}",
                    samples.len(),
                    pixel_count
                );
            }
            let (min_value, max_value) =
                min_max(&samples).context("No pixels available for rendering")?;

            Ok(DecodedImage {
                width,
                height,
                pixels: Pixels::Mono(Arc::from(samples.into_boxed_slice())),
                inverted_photometric,
                min_value,
                max_value,
            })
        }
        spp if spp >= 3 => {
            let samples: Vec<u8> = if bits_allocated == 8 {
                decoded
                    .to_vec_frame(0)
                    .context("Could not convert decoded frame 0 to u8 samples")?
            } else {
                let shift = decoded.bits_stored().saturating_sub(8);
                let wide: Vec<u16> = decoded
                    .to_vec_frame(0)
                    .context("Could not convert decoded frame 0 to u16 samples")?;
                wide.into_iter().map(|sample| (sample >> shift) as u8).collect()
            };
            if samples.len() != pixel_count * spp as usize {
                bail!(
                    "Decoded color sample count mismatch: got {}, expected {}",
                    samples.len(),
                    pixel_count * spp as usize
                );
            }

            Ok(DecodedImage {
                width,
                height,
                pixels: Pixels::Rgb {
                    samples: Arc::from(samples.into_boxed_slice()),
                    samples_per_pixel: spp,
                },
                inverted_photometric: false,
                min_value: 0,
                max_value: 255,
            })
        }
        other => bail!("Unsupported SamplesPerPixel={}", other),
    }
}

fn open_dicom_object(path: &Path) -> Result<DefaultDicomObject> {
    let err = match open_file(path) {
        Ok(obj) => return Ok(obj),
        Err(err) => err,
    };

    if lacks_meta_group_length(&err) {
        let bytes = fs::read(path).with_context(|| format!("Could not read {}", path.display()))?;
        if let Some(repaired) = insert_meta_group_length(&bytes) {
            return from_reader(Cursor::new(repaired)).with_context(|| {
                format!(
                    "Could not open {} after inserting File Meta Group Length (0002,0000)",
                    path.display()
                )
            });
        }
    }

    Err(err).with_context(|| format!("Could not open {}", path.display()))
}

fn lacks_meta_group_length(error: &ReadError) -> bool {
    matches!(
        error,
        ReadError::ParseMetaDataSet {
            source: dicom_object::meta::Error::UnexpectedTag { tag, .. }
        } if tag.group() == 0x0002 && tag.element() != 0x0000
    )
}

/// Some writers omit (0002,0000). Rebuilds the file with the element
/// inserted in front of the meta group so the reader accepts it.
fn insert_meta_group_length(bytes: &[u8]) -> Option<Vec<u8>> {
    let start = if bytes.get(128..132) == Some(b"DICM".as_slice()) {
        132
    } else if bytes.get(..4) == Some(b"DICM".as_slice()) {
        4
    } else {
        return None;
    };
    let first_tag = bytes.get(start..start + 4)?;
    if u16::from_le_bytes([first_tag[0], first_tag[1]]) != 0x0002
        || u16::from_le_bytes([first_tag[2], first_tag[3]]) == 0x0000
    {
        return None;
    }

    let group_len = u32::try_from(meta_group_byte_len(bytes, start)?).ok()?;
    let mut element = [0u8; 12];
    element[0..2].copy_from_slice(&0x0002u16.to_le_bytes());
    element[4..6].copy_from_slice(b"UL");
    element[6..8].copy_from_slice(&4u16.to_le_bytes());
    element[8..12].copy_from_slice(&group_len.to_le_bytes());

    let mut repaired = Vec::with_capacity(bytes.len() + element.len());
    repaired.extend_from_slice(&bytes[..start]);
    repaired.extend_from_slice(&element);
    repaired.extend_from_slice(&bytes[start..]);
    Some(repaired)
}

/// Walks explicit-VR little-endian group 0002 elements from `start`.
fn meta_group_byte_len(bytes: &[u8], start: usize) -> Option<usize> {
    let mut position = start;
    while let Some(header) = bytes.get(position..position + 8) {
        if u16::from_le_bytes([header[0], header[1]]) != 0x0002 {
            break;
        }
        let long_form = matches!(
            [header[4], header[5]],
            [b'O', b'B' | b'D' | b'F' | b'L' | b'W'] | [b'S', b'Q'] | [b'U', b'C' | b'R' | b'T' | b'N']
        );
        let (header_len, value_len) = if long_form {
            let raw = bytes.get(position + 8..position + 12)?;
            let value_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if value_len == u32::MAX {
                return None;
            }
            (12, value_len as usize)
        } else {
            (8, u16::from_le_bytes([header[6], header[7]]) as usize)
        };

        let next = position.checked_add(header_len)?.checked_add(value_len)?;
        if next > bytes.len() {
            return None;
        }
        position = next;
    }

    (position > start).then_some(position - start)
}

fn read_string(obj: &DefaultDicomObject, name: &str) -> Option<String> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .map(|v| v.trim().trim_end_matches('\0').trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_uid(obj: &DefaultDicomObject, name: &str) -> String {
    read_string(obj, name).unwrap_or_default()
}

fn read_float_first(obj: &DefaultDicomObject, name: &str) -> Option<f32> {
    read_string(obj, name).and_then(|value| parse_first_number(&value))
}

fn read_int_first(obj: &DefaultDicomObject, name: &str) -> Option<i32> {
    read_string(obj, name).and_then(|value| {
        let first = value.split('\\').next()?.trim();
        first
            .parse::<i32>()
            .ok()
            .or_else(|| first.parse::<f64>().ok().map(|v| v as i32))
    })
}

/// First value of a possibly multi-valued (`\`-separated) numeric string.
fn parse_first_number(value: &str) -> Option<f32> {
    value
        .split('\\')
        .next()?
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

fn min_max(values: &[i32]) -> Option<(i32, i32)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_without_group_length() -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        // (0002,0002) UI, length 4
        bytes.extend_from_slice(&[
            0x02, 0x00, 0x02, 0x00, b'U', b'I', 0x04, 0x00, b'1', b'.', b'2', 0x00,
        ]);
        // (0002,0010) UI, length 20
        bytes.extend_from_slice(&[0x02, 0x00, 0x10, 0x00, b'U', b'I', 0x14, 0x00]);
        bytes.extend_from_slice(b"1.2.840.10008.1.2.1\0");
        // First data set element ends the meta group.
        bytes.extend_from_slice(&[0x08, 0x00, 0x16, 0x00, b'U', b'I', 0x02, 0x00, b'1', 0x00]);
        bytes
    }

    #[test]
    fn group_length_is_inserted_after_preamble() {
        let bytes = meta_without_group_length();
        let repaired = insert_meta_group_length(&bytes).expect("file should be repaired");

        assert_eq!(&repaired[132..136], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&repaired[136..138], b"UL");
        assert_eq!(&repaired[140..144], &40u32.to_le_bytes());
        assert_eq!(repaired.len(), bytes.len() + 12);
        assert_eq!(&repaired[144..], &bytes[132..]);
    }

    #[test]
    fn existing_group_length_is_left_alone() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&[
            0x02, 0x00, 0x00, 0x00, b'U', b'L', 0x04, 0x00, 0x08, 0x00, 0x00, 0x00,
        ]);
        assert!(insert_meta_group_length(&bytes).is_none());
    }

    #[test]
    fn truncated_meta_group_is_not_repaired() {
        let mut bytes = meta_without_group_length();
        bytes.truncate(160);
        assert!(insert_meta_group_length(&bytes).is_none());
    }

    #[test]
    fn first_number_of_multi_valued_string() {
        assert_eq!(parse_first_number("40\\400"), Some(40.0));
        assert_eq!(parse_first_number(" -600.5 "), Some(-600.5));
        assert_eq!(parse_first_number("abc"), None);
        assert_eq!(parse_first_number(""), None);
    }

    #[test]
    fn min_max_of_samples() {
        assert_eq!(min_max(&[3, -2, 9, 0]), Some((-2, 9)));
        assert_eq!(min_max(&[]), None);
    }

    #[test]
    fn reading_a_missing_file_reports_path() {
        let err = read_instance_record(Path::new("/nonexistent/openscans/file.dcm"))
            .expect_err("missing file should fail");
        assert!(format!("{err:#}").contains("file.dcm"));
    }
}
