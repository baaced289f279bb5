use std::fmt::Write as _;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::study::Instance;

#[derive(Debug, Clone, PartialEq)]
pub struct AiAnalysis {
    pub id: String,
    pub sop_instance_uid: String,
    pub instance_number: i32,
    pub findings: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub created_by: String,
    pub model_version: String,
}

/// What a detector needs to know about the image it is asked to read.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub sop_instance_uid: String,
    pub instance_number: i32,
    pub modality: String,
    pub series_description: String,
    pub rows: u32,
    pub columns: u32,
}

impl AnalysisRequest {
    pub fn for_instance(instance: &Instance) -> Self {
        Self {
            sop_instance_uid: instance.sop_instance_uid.clone(),
            instance_number: instance.instance_number,
            modality: instance.metadata.modality.clone(),
            series_description: instance.metadata.series_description.clone(),
            rows: instance.rows,
            columns: instance.columns,
        }
    }
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn model_version(&self) -> &str;
    fn detect(&self, request: &AnalysisRequest) -> Result<String>;
}

/// Simulated vertebral detector. Findings depend only on the request, so the
/// same image always yields the same text.
#[derive(Debug, Clone)]
pub struct MockDetector {
    pub latency: Duration,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(800),
        }
    }
}

const VERTEBRAE: &[&str] = &[
    "C7", "T1", "T2", "T3", "T4", "T5", "T6", "T7", "T8", "T9", "T10", "T11", "T12", "L1", "L2",
    "L3", "L4", "L5", "S1",
];

impl Detector for MockDetector {
    fn name(&self) -> &str {
        "Mock vertebral detector"
    }

    fn model_version(&self) -> &str {
        "mock-0.1"
    }

    fn detect(&self, request: &AnalysisRequest) -> Result<String> {
        if request.rows == 0 || request.columns == 0 {
            bail!("Image {} has no pixel dimensions", request.sop_instance_uid);
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let seed = fnv1a(request.sop_instance_uid.as_bytes());
        let count = 3 + (seed % 5) as usize;
        let start = (seed / 7) as usize % (VERTEBRAE.len() - count + 1);

        let mut findings = String::new();
        let _ = writeln!(
            findings,
            "Simulated analysis of instance #{} ({}, {}x{})",
            request.instance_number, request.modality, request.columns, request.rows
        );
        if !request.series_description.is_empty() {
            let _ = writeln!(findings, "Series: {}", request.series_description);
        }
        let _ = writeln!(findings, "Detected {count} vertebrae:");
        for (offset, label) in VERTEBRAE[start..start + count].iter().enumerate() {
            let confidence = 80 + ((seed >> (offset * 3)) % 20) as u32;
            let _ = writeln!(findings, "  {label}: confidence {confidence}%");
        }
        findings.push_str("Demonstration output only. Not for diagnostic use.");
        Ok(findings)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

pub fn run_detector(detector: &dyn Detector, request: &AnalysisRequest) -> Result<AiAnalysis> {
    let findings = detector.detect(request)?;
    Ok(AiAnalysis {
        id: Uuid::new_v4().to_string(),
        sop_instance_uid: request.sop_instance_uid.clone(),
        instance_number: request.instance_number,
        findings,
        created_at: Utc::now().to_rfc3339(),
        created_by: detector.name().to_string(),
        model_version: detector.model_version().to_string(),
    })
}

/// Runs the detector off the UI thread; poll the receiver from `update`.
pub fn spawn_analysis(
    detector: Arc<dyn Detector>,
    request: AnalysisRequest,
) -> Receiver<Result<AiAnalysis, String>> {
    let (tx, rx) = mpsc::channel::<Result<AiAnalysis, String>>();
    thread::spawn(move || {
        let result = run_detector(detector.as_ref(), &request).map_err(|err| format!("{err:#}"));
        let _ = tx.send(result);
    });
    rx
}

/// Analyses keyed by instance, plus the findings modal state.
#[derive(Debug, Default)]
pub struct AiAnalysisStore {
    analyses: Vec<AiAnalysis>,
    selected_id: Option<String>,
    analyzing: bool,
    modal_visible: bool,
}

impl AiAnalysisStore {
    pub fn analyses(&self) -> &[AiAnalysis] {
        &self.analyses
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn is_modal_visible(&self) -> bool {
        self.modal_visible
    }

    /// Replaces any analysis of the same instance, then selects and shows it.
    pub fn add(&mut self, analysis: AiAnalysis) {
        self.analyses
            .retain(|existing| existing.sop_instance_uid != analysis.sop_instance_uid);
        self.selected_id = Some(analysis.id.clone());
        self.modal_visible = true;
        self.analyses.push(analysis);
    }

    pub fn delete(&mut self, id: &str) {
        self.analyses.retain(|analysis| analysis.id != id);
        if self.selected_id.as_deref() == Some(id) {
            self.selected_id = None;
            self.modal_visible = false;
        }
    }

    pub fn delete_for_instance(&mut self, sop_instance_uid: &str) {
        self.analyses
            .retain(|analysis| analysis.sop_instance_uid != sop_instance_uid);
    }

    pub fn for_instance(&self, sop_instance_uid: &str) -> Option<&AiAnalysis> {
        self.analyses
            .iter()
            .find(|analysis| analysis.sop_instance_uid == sop_instance_uid)
    }

    pub fn set_analyzing(&mut self, analyzing: bool) {
        self.analyzing = analyzing;
    }

    pub fn show_modal(&mut self, id: &str) {
        self.selected_id = Some(id.to_string());
        self.modal_visible = true;
    }

    pub fn hide_modal(&mut self) {
        self.modal_visible = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uid: &str) -> AnalysisRequest {
        AnalysisRequest {
            sop_instance_uid: uid.to_string(),
            instance_number: 12,
            modality: "CT".to_string(),
            series_description: "Spine".to_string(),
            rows: 512,
            columns: 512,
        }
    }

    fn analysis(id: &str, uid: &str) -> AiAnalysis {
        AiAnalysis {
            id: id.to_string(),
            sop_instance_uid: uid.to_string(),
            instance_number: 1,
            findings: format!("findings {id}"),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            created_by: "test".to_string(),
            model_version: "0".to_string(),
        }
    }

    fn instant() -> MockDetector {
        MockDetector {
            latency: Duration::ZERO,
        }
    }

    #[test]
    fn add_replaces_per_instance_and_opens_modal() {
        let mut store = AiAnalysisStore::default();
        store.add(analysis("a1", "img-1"));
        store.hide_modal();
        store.add(analysis("a2", "img-1"));

        assert_eq!(store.analyses().len(), 1);
        assert_eq!(store.for_instance("img-1").map(|a| a.id.as_str()), Some("a2"));
        assert_eq!(store.selected_id(), Some("a2"));
        assert!(store.is_modal_visible());
    }

    #[test]
    fn deleting_selected_clears_selection() {
        let mut store = AiAnalysisStore::default();
        store.add(analysis("a1", "img-1"));
        store.add(analysis("a2", "img-2"));

        store.delete("a1");
        assert_eq!(store.selected_id(), Some("a2"));
        assert!(store.is_modal_visible());

        store.delete("a2");
        assert_eq!(store.selected_id(), None);
        assert!(!store.is_modal_visible());
        assert!(store.analyses().is_empty());
    }

    #[test]
    fn delete_for_instance_keeps_modal_state() {
        let mut store = AiAnalysisStore::default();
        store.add(analysis("a1", "img-1"));
        store.delete_for_instance("img-1");
        assert!(store.for_instance("img-1").is_none());
        assert!(store.is_modal_visible());
    }

    #[test]
    fn modal_and_reset() {
        let mut store = AiAnalysisStore::default();
        store.add(analysis("a1", "img-1"));
        store.hide_modal();
        assert!(!store.is_modal_visible());
        store.show_modal("a1");
        assert!(store.is_modal_visible());
        store.set_analyzing(true);

        store.reset();
        assert!(store.analyses().is_empty());
        assert!(!store.is_analyzing());
        assert!(!store.is_modal_visible());
        assert_eq!(store.selected_id(), None);
    }

    #[test]
    fn mock_detector_is_deterministic() {
        let detector = instant();
        let first = detector.detect(&request("1.2.3")).expect("detect");
        let second = detector.detect(&request("1.2.3")).expect("detect");
        assert_eq!(first, second);
        assert!(first.contains("instance #12"));
        assert!(first.contains("vertebrae"));
    }

    #[test]
    fn mock_detector_rejects_empty_images() {
        let mut empty = request("1.2.3");
        empty.rows = 0;
        assert!(instant().detect(&empty).is_err());
    }

    #[test]
    fn background_analysis_reports_through_channel() {
        let rx = spawn_analysis(Arc::new(instant()), request("9.8.7"));
        let analysis = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("analysis result")
            .expect("analysis succeeded");
        assert_eq!(analysis.sop_instance_uid, "9.8.7");
        assert_eq!(analysis.model_version, "mock-0.1");
        assert_eq!(analysis.instance_number, 12);
    }
}
