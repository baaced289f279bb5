use std::path::PathBuf;

use indexmap::IndexMap;

use crate::windowing::{modality_default, WindowLevel};

pub const UNKNOWN_UID: &str = "unknown";

/// Descriptive fields read from one file, before grouping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMetadata {
    pub patient_name: String,
    pub patient_id: String,
    pub study_date: String,
    pub study_time: String,
    pub study_description: String,
    pub series_description: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub series_number: i32,
    pub instance_number: i32,
    pub modality: String,
    pub rows: u32,
    pub columns: u32,
    pub slice_location: Option<f32>,
    pub slice_thickness: Option<f32>,
    pub window_center: Option<f32>,
    pub window_width: Option<f32>,
}

/// A parsed file with pixel data, ready to be organized.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub path: PathBuf,
    pub metadata: InstanceMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub sop_instance_uid: String,
    pub instance_number: i32,
    /// Handle the decoder uses to fetch pixel data.
    pub path: PathBuf,
    pub rows: u32,
    pub columns: u32,
    pub metadata: InstanceMetadata,
}

impl Instance {
    /// Window pair embedded in the file, if it carried a usable one.
    pub fn source_window(&self) -> Option<WindowLevel> {
        WindowLevel::from_source(self.metadata.window_center, self.metadata.window_width)
    }

    pub fn effective_window(&self) -> WindowLevel {
        self.source_window()
            .unwrap_or_else(|| modality_default(&self.metadata.modality))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub series_instance_uid: String,
    pub series_number: i32,
    pub series_description: String,
    pub modality: String,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub study_instance_uid: String,
    pub patient_name: String,
    pub patient_id: String,
    pub study_date: String,
    pub study_description: String,
    pub series: Vec<Series>,
}

impl Study {
    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|series| series.instances.len()).sum()
    }
}

/// Groups records into Study -> Series -> Instance.
///
/// Studies keep first-seen order. Series are sorted by series number and
/// instances by instance number; both sorts are stable so ties keep input
/// order.
pub fn organize(records: Vec<InstanceRecord>) -> Vec<Study> {
    let mut studies = IndexMap::<String, Study>::new();

    for InstanceRecord { path, metadata } in records {
        let study_uid = uid_or_unknown(&metadata.study_instance_uid);
        let series_uid = uid_or_unknown(&metadata.series_instance_uid);

        let study = studies.entry(study_uid.clone()).or_insert_with(|| Study {
            study_instance_uid: study_uid,
            patient_name: non_empty_or(&metadata.patient_name, "Unknown"),
            patient_id: non_empty_or(&metadata.patient_id, "Unknown"),
            study_date: metadata.study_date.clone(),
            study_description: metadata.study_description.clone(),
            series: Vec::new(),
        });

        let series_index = match study
            .series
            .iter()
            .position(|series| series.series_instance_uid == series_uid)
        {
            Some(index) => index,
            None => {
                study.series.push(Series {
                    series_instance_uid: series_uid,
                    series_number: metadata.series_number,
                    series_description: metadata.series_description.clone(),
                    modality: non_empty_or(&metadata.modality, "OT"),
                    instances: Vec::new(),
                });
                study.series.len() - 1
            }
        };

        study.series[series_index].instances.push(Instance {
            sop_instance_uid: metadata.sop_instance_uid.clone(),
            instance_number: metadata.instance_number,
            path,
            rows: metadata.rows,
            columns: metadata.columns,
            metadata,
        });
    }

    let mut studies = studies.into_values().collect::<Vec<_>>();
    for study in &mut studies {
        study.series.sort_by_key(|series| series.series_number);
        for series in &mut study.series {
            series.instances.sort_by_key(|instance| instance.instance_number);
        }
    }
    studies
}

fn uid_or_unknown(uid: &str) -> String {
    non_empty_or(uid, UNKNOWN_UID)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(
        study: &str,
        series: &str,
        sop: &str,
        series_number: i32,
        instance_number: i32,
    ) -> InstanceRecord {
        InstanceRecord {
            path: PathBuf::from(format!("{sop}.dcm")),
            metadata: InstanceMetadata {
                patient_name: "TEST^PATIENT".to_string(),
                patient_id: "PAT12345".to_string(),
                study_date: "20240101".to_string(),
                study_description: "Brain MRI".to_string(),
                series_description: "T1 MPRAGE SAG".to_string(),
                study_instance_uid: study.to_string(),
                series_instance_uid: series.to_string(),
                sop_instance_uid: sop.to_string(),
                series_number,
                instance_number,
                modality: "MR".to_string(),
                rows: 512,
                columns: 512,
                window_center: Some(128.0),
                window_width: Some(256.0),
                ..Default::default()
            },
        }
    }

    pub fn with_modality(
        mut record: InstanceRecord,
        modality: &str,
        window: Option<(f32, f32)>,
    ) -> InstanceRecord {
        record.metadata.modality = modality.to_string();
        record.metadata.window_center = window.map(|(center, _)| center);
        record.metadata.window_width = window.map(|(_, width)| width);
        record
    }
}
