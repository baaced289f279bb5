use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Storage, RECENT_STUDIES_KEY};
use crate::study::Study;

pub const MAX_RECENT_STUDIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentStudyEntry {
    pub id: String,
    #[serde(rename = "studyInstanceUID")]
    pub study_instance_uid: String,
    pub patient_name: String,
    #[serde(rename = "patientID")]
    pub patient_id: String,
    pub study_date: String,
    pub study_description: String,
    pub series_count: usize,
    pub image_count: usize,
    pub loaded_at: DateTime<Utc>,
    /// Files or folders to reopen the study from.
    #[serde(default)]
    pub source_paths: Vec<PathBuf>,
}

/// Entry contents before an id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecentStudy {
    pub study_instance_uid: String,
    pub patient_name: String,
    pub patient_id: String,
    pub study_date: String,
    pub study_description: String,
    pub series_count: usize,
    pub image_count: usize,
    pub source_paths: Vec<PathBuf>,
}

impl NewRecentStudy {
    pub fn from_study(study: &Study, source_paths: &[PathBuf]) -> Self {
        Self {
            study_instance_uid: study.study_instance_uid.clone(),
            patient_name: study.patient_name.clone(),
            patient_id: study.patient_id.clone(),
            study_date: study.study_date.clone(),
            study_description: study.study_description.clone(),
            series_count: study.series.len(),
            image_count: study.instance_count(),
            source_paths: source_paths.to_vec(),
        }
    }
}

/// Recently opened studies, newest first.
#[derive(Debug)]
pub struct RecentStudies {
    entries: Vec<RecentStudyEntry>,
    storage: Storage,
    persist: bool,
}

impl RecentStudies {
    pub fn load(storage: Storage, persist: bool) -> Self {
        let mut entries = if persist {
            storage
                .load::<Vec<RecentStudyEntry>>(RECENT_STUDIES_KEY)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        entries.truncate(MAX_RECENT_STUDIES);
        Self {
            entries,
            storage,
            persist,
        }
    }

    pub fn entries(&self) -> &[RecentStudyEntry] {
        &self.entries
    }

    pub fn add(&mut self, entry: NewRecentStudy) {
        let now = Utc::now();
        if let Some(index) = self
            .entries
            .iter()
            .position(|existing| existing.study_instance_uid == entry.study_instance_uid)
        {
            let mut existing = self.entries.remove(index);
            existing.loaded_at = now;
            existing.series_count = entry.series_count;
            existing.image_count = entry.image_count;
            existing.source_paths = entry.source_paths;
            self.entries.insert(0, existing);
        } else {
            self.entries.insert(
                0,
                RecentStudyEntry {
                    id: Uuid::new_v4().to_string(),
                    study_instance_uid: entry.study_instance_uid,
                    patient_name: entry.patient_name,
                    patient_id: entry.patient_id,
                    study_date: entry.study_date,
                    study_description: entry.study_description,
                    series_count: entry.series_count,
                    image_count: entry.image_count,
                    loaded_at: now,
                    source_paths: entry.source_paths,
                },
            );
            self.entries.truncate(MAX_RECENT_STUDIES);
        }
        self.save();
    }

    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|entry| entry.id != id);
        self.save();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    /// Turning persistence off also forgets what was stored on disk.
    pub fn set_persist(&mut self, persist: bool) {
        self.persist = persist;
        if persist {
            self.save();
        } else if let Err(err) = self.storage.remove(RECENT_STUDIES_KEY) {
            log::error!("Failed to clear recent studies: {err:#}");
        }
    }

    fn save(&self) {
        if !self.persist {
            return;
        }
        if let Err(err) = self.storage.save(RECENT_STUDIES_KEY, &self.entries) {
            log::error!("Failed to save recent studies: {err:#}");
        }
    }
}
