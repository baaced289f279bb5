use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Storage, FAVORITES_KEY};
use crate::study::{Instance, Series, Study};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteImage {
    #[serde(rename = "sopInstanceUID")]
    pub sop_instance_uid: String,
    #[serde(rename = "studyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "seriesInstanceUID")]
    pub series_instance_uid: String,
    pub instance_number: i32,
    pub image_path: PathBuf,
    pub modality: String,
    pub series_number: i32,
    pub favorited_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_description: Option<String>,
}

impl FavoriteImage {
    pub fn from_instance(study: &Study, series: &Series, instance: &Instance) -> Self {
        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
        Self {
            sop_instance_uid: instance.sop_instance_uid.clone(),
            study_instance_uid: study.study_instance_uid.clone(),
            series_instance_uid: series.series_instance_uid.clone(),
            instance_number: instance.instance_number,
            image_path: instance.path.clone(),
            modality: series.modality.clone(),
            series_number: series.series_number,
            favorited_at: Utc::now(),
            patient_name: non_empty(&study.patient_name),
            study_date: non_empty(&study.study_date),
            series_description: non_empty(&series.series_description),
        }
    }
}

/// Starred images, unique by SOP instance UID, in the order they were added.
#[derive(Debug)]
pub struct Favorites {
    favorites: Vec<FavoriteImage>,
    storage: Storage,
}

impl Favorites {
    pub fn load(storage: Storage) -> Self {
        let favorites = storage
            .load::<Vec<FavoriteImage>>(FAVORITES_KEY)
            .unwrap_or_default();
        Self { favorites, storage }
    }

    pub fn all(&self) -> &[FavoriteImage] {
        &self.favorites
    }

    pub fn add(&mut self, favorite: FavoriteImage) {
        if self.is_favorite(&favorite.sop_instance_uid) {
            return;
        }
        self.favorites.push(favorite);
        self.save();
    }

    pub fn remove(&mut self, sop_instance_uid: &str) {
        let before = self.favorites.len();
        self.favorites
            .retain(|favorite| favorite.sop_instance_uid != sop_instance_uid);
        if self.favorites.len() != before {
            self.save();
        }
    }

    /// Returns `true` when the image was added, `false` when it was removed.
    pub fn toggle(&mut self, favorite: FavoriteImage) -> bool {
        if self.is_favorite(&favorite.sop_instance_uid) {
            self.remove(&favorite.sop_instance_uid);
            false
        } else {
            self.add(favorite);
            true
        }
    }

    pub fn is_favorite(&self, sop_instance_uid: &str) -> bool {
        self.favorites
            .iter()
            .any(|favorite| favorite.sop_instance_uid == sop_instance_uid)
    }

    pub fn clear(&mut self) {
        self.favorites.clear();
        self.save();
    }

    pub fn count(&self) -> usize {
        self.favorites.len()
    }

    fn save(&self) {
        if let Err(err) = self.storage.save(FAVORITES_KEY, &self.favorites) {
            log::error!("Failed to save favorites: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn favorite(uid: &str) -> FavoriteImage {
        FavoriteImage {
            sop_instance_uid: uid.to_string(),
            study_instance_uid: "study-1".to_string(),
            series_instance_uid: "series-1".to_string(),
            instance_number: 1,
            image_path: PathBuf::from(format!("/scans/{uid}.dcm")),
            modality: "MR".to_string(),
            series_number: 1,
            favorited_at: Utc::now(),
            patient_name: None,
            study_date: None,
            series_description: None,
        }
    }

    #[test]
    fn add_ignores_duplicates() {
        let mut favorites = Favorites::load(Storage::disabled());
        favorites.add(favorite("1.2.3.4.1"));
        favorites.add(favorite("1.2.3.4.1"));
        favorites.add(favorite("1.2.3.4.2"));
        assert_eq!(favorites.count(), 2);
    }

    #[test]
    fn remove_unknown_uid_is_harmless() {
        let mut favorites = Favorites::load(Storage::disabled());
        favorites.add(favorite("1.2.3.4.1"));
        favorites.remove("9.9.9");
        assert_eq!(favorites.count(), 1);
        favorites.remove("1.2.3.4.1");
        assert_eq!(favorites.count(), 0);
    }

    #[test]
    fn toggle_reports_whether_added() {
        let mut favorites = Favorites::load(Storage::disabled());
        assert!(favorites.toggle(favorite("1.2.3.4.1")));
        assert!(favorites.is_favorite("1.2.3.4.1"));
        assert!(!favorites.toggle(favorite("1.2.3.4.1")));
        assert!(!favorites.is_favorite("1.2.3.4.1"));
        assert!(favorites.toggle(favorite("1.2.3.4.1")));
        assert_eq!(favorites.count(), 1);
    }

    #[test]
    fn clear_empties_the_list() {
        let mut favorites = Favorites::load(Storage::disabled());
        favorites.clear();
        favorites.add(favorite("a"));
        favorites.add(favorite("b"));
        favorites.clear();
        assert_eq!(favorites.count(), 0);
        assert!(!favorites.is_favorite("a"));
    }

    #[test]
    fn optional_metadata_round_trips_through_storage() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut favorites = Favorites::load(Storage::new(dir.path()));
        let mut full = favorite("full");
        full.patient_name = Some("TEST^PATIENT".to_string());
        full.study_date = Some("20240101".to_string());
        full.series_description = Some("T1 MPRAGE SAG".to_string());
        full.series_number = 5;
        favorites.add(full.clone());
        favorites.add(favorite("bare"));

        let reloaded = Favorites::load(Storage::new(dir.path()));
        assert_eq!(reloaded.all(), favorites.all());
        assert_eq!(reloaded.all()[0], full);

        let raw = std::fs::read_to_string(dir.path().join("openscans-favorites.json"))
            .expect("favorites file");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json[0]["sopInstanceUID"], "full");
        assert!(json[1].get("patientName").is_none());
    }

    #[test]
    fn from_instance_leaves_blank_fields_absent() {
        let mut record = crate::study::fixtures::record("s1", "a", "1", 3, 7);
        record.metadata.study_date.clear();
        let studies = crate::study::organize(vec![record]);
        let study = &studies[0];
        let series = &study.series[0];

        let favorite = FavoriteImage::from_instance(study, series, &series.instances[0]);
        assert_eq!(favorite.sop_instance_uid, "1");
        assert_eq!(favorite.series_number, 3);
        assert_eq!(favorite.instance_number, 7);
        assert_eq!(favorite.study_date, None);
        assert_eq!(favorite.patient_name.as_deref(), Some("TEST^PATIENT"));
    }
}
