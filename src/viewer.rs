use crate::study::{Instance, Series, Study};
use crate::viewport::ViewportSettings;
use crate::windowing::{ModalityWindowLevels, WindowLevel, WindowPreset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub study: usize,
    pub series: usize,
    pub instance: usize,
}

/// Owns the loaded studies, the current selection and all display state.
///
/// Window/level is only touched through the three reconciliation operations;
/// every change of current instance routes through `apply_modality_defaults`.
#[derive(Debug, Default)]
pub struct ViewerSession {
    studies: Vec<Study>,
    selection: Option<Selection>,
    window_levels: ModalityWindowLevels,
    pub viewport: ViewportSettings,
}

impl ViewerSession {
    pub fn studies(&self) -> &[Study] {
        &self.studies
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn window_levels(&self) -> &ModalityWindowLevels {
        &self.window_levels
    }

    pub fn active_window(&self) -> WindowLevel {
        self.window_levels.active()
    }

    /// Replaces the study tree and shows the first image. Per-modality
    /// window state carries over.
    pub fn load_studies(&mut self, studies: Vec<Study>) {
        self.studies = studies;
        self.selection = None;
        self.viewport.reset();
        self.select_study(0);
    }

    pub fn clear(&mut self) {
        self.studies.clear();
        self.selection = None;
        self.viewport.reset();
    }

    pub fn current_study(&self) -> Option<&Study> {
        self.studies.get(self.selection?.study)
    }

    pub fn current_series(&self) -> Option<&Series> {
        let selection = self.selection?;
        self.current_study()?.series.get(selection.series)
    }

    pub fn current_instance(&self) -> Option<&Instance> {
        let selection = self.selection?;
        self.current_series()?.instances.get(selection.instance)
    }

    pub fn select_study(&mut self, study: usize) {
        if self.studies.get(study).is_some_and(|s| !s.series.is_empty()) {
            self.set_selection(Selection {
                study,
                series: 0,
                instance: 0,
            });
        }
    }

    pub fn select_series(&mut self, series: usize) {
        let Some(selection) = self.selection else {
            return;
        };
        let valid = self
            .studies
            .get(selection.study)
            .and_then(|study| study.series.get(series))
            .is_some_and(|s| !s.instances.is_empty());
        if valid {
            self.set_selection(Selection {
                series,
                instance: 0,
                ..selection
            });
        }
    }

    pub fn select_instance(&mut self, instance: usize) {
        let Some(selection) = self.selection else {
            return;
        };
        let count = self.current_series().map_or(0, |series| series.instances.len());
        if instance < count {
            self.set_selection(Selection {
                instance,
                ..selection
            });
        }
    }

    /// Moves within the current series, clamped at both ends. Returns whether
    /// the current instance changed.
    pub fn step_instance(&mut self, delta: i32) -> bool {
        let (Some(selection), Some(series)) = (self.selection, self.current_series()) else {
            return false;
        };
        let last = series.instances.len().saturating_sub(1) as i64;
        let target = (selection.instance as i64 + i64::from(delta)).clamp(0, last) as usize;
        if target == selection.instance {
            return false;
        }
        self.select_instance(target);
        true
    }

    /// Selects the image with `sop_instance_uid` anywhere in the loaded tree.
    pub fn select_by_sop_uid(&mut self, sop_instance_uid: &str) -> bool {
        let found = self.studies.iter().enumerate().find_map(|(study, s)| {
            s.series.iter().enumerate().find_map(|(series, se)| {
                se.instances
                    .iter()
                    .position(|instance| instance.sop_instance_uid == sop_instance_uid)
                    .map(|instance| Selection {
                        study,
                        series,
                        instance,
                    })
            })
        });
        match found {
            Some(selection) => {
                self.set_selection(selection);
                true
            }
            None => false,
        }
    }

    pub fn set_window_level(&mut self, center: f32, width: f32) {
        self.window_levels.set_window_level(center, width);
    }

    pub fn apply_preset(&mut self, preset: &WindowPreset) {
        self.set_window_level(preset.level.center, preset.level.width);
    }

    pub fn reset_window_level(&mut self) {
        self.window_levels.reset_current_modality();
    }

    fn set_selection(&mut self, selection: Selection) {
        let changed = self.selection != Some(selection);
        self.selection = Some(selection);
        if !changed {
            return;
        }
        if let Some(instance) = self.current_instance() {
            let modality = instance.metadata.modality.clone();
            let center = instance.metadata.window_center;
            let width = instance.metadata.window_width;
            self.window_levels
                .apply_modality_defaults(&modality, center, width);
        }
    }
}
