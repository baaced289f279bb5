use std::collections::HashMap;

/// Modality used when nothing has been displayed yet.
pub const INITIAL_MODALITY: &str = "MR";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLevel {
    pub center: f32,
    pub width: f32,
}

impl WindowLevel {
    pub const fn new(center: f32, width: f32) -> Self {
        Self { center, width }
    }

    /// Builds a pair from values read out of a source file. Absent, zero and
    /// non-finite values mean "not provided"; both halves must be usable.
    pub fn from_source(center: Option<f32>, width: Option<f32>) -> Option<Self> {
        let usable = |value: f32| value.is_finite() && value != 0.0;
        match (center, width) {
            (Some(center), Some(width)) if usable(center) && usable(width) => {
                Some(Self::new(center, width))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModalityWindowLevel {
    pub current: WindowLevel,
    pub source_default: Option<WindowLevel>,
}

impl ModalityWindowLevel {
    fn seeded(modality: &str) -> Self {
        Self {
            current: modality_default(modality),
            source_default: None,
        }
    }
}

/// Hard-coded fallback pairs, keyed by modality code.
pub fn modality_default(modality: &str) -> WindowLevel {
    match modality.trim().to_ascii_uppercase().as_str() {
        "CT" => WindowLevel::new(40.0, 400.0),
        "CR" | "DX" | "RF" | "XA" => WindowLevel::new(2048.0, 4096.0),
        "MG" => WindowLevel::new(1500.0, 3000.0),
        // MR, OT and anything unknown.
        _ => WindowLevel::new(600.0, 1200.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub level: WindowLevel,
}

pub const WINDOW_PRESETS: &[WindowPreset] = &[
    WindowPreset {
        name: "Soft Tissue",
        description: "General soft tissue imaging",
        level: WindowLevel::new(40.0, 400.0),
    },
    WindowPreset {
        name: "Lung",
        description: "Lung parenchyma",
        level: WindowLevel::new(-600.0, 1500.0),
    },
    WindowPreset {
        name: "Bone",
        description: "Bone structures",
        level: WindowLevel::new(480.0, 2500.0),
    },
    WindowPreset {
        name: "Brain",
        description: "Brain tissue",
        level: WindowLevel::new(40.0, 80.0),
    },
    WindowPreset {
        name: "Liver",
        description: "Liver parenchyma",
        level: WindowLevel::new(30.0, 150.0),
    },
    WindowPreset {
        name: "Abdomen",
        description: "General abdomen",
        level: WindowLevel::new(40.0, 350.0),
    },
];

/// Per-modality window/level state.
///
/// Each modality keeps the pair the user last looked at plus the most recent
/// pair embedded in a source image. `active` mirrors the pair for the current
/// modality and is what the renderer reads. The three `&mut self` operations
/// are the only mutators.
#[derive(Debug, Clone)]
pub struct ModalityWindowLevels {
    modalities: HashMap<String, ModalityWindowLevel>,
    current_modality: String,
    active: WindowLevel,
}

impl Default for ModalityWindowLevels {
    fn default() -> Self {
        Self {
            modalities: HashMap::new(),
            current_modality: INITIAL_MODALITY.to_string(),
            active: modality_default(INITIAL_MODALITY),
        }
    }
}

impl ModalityWindowLevels {
    pub fn active(&self) -> WindowLevel {
        self.active
    }

    pub fn current_modality(&self) -> &str {
        &self.current_modality
    }

    pub fn stored(&self, modality: &str) -> Option<&ModalityWindowLevel> {
        self.modalities.get(&normalize_modality(modality))
    }

    /// Switches to `modality`, reconciling its stored pair with the values
    /// embedded in the newly current image.
    pub fn apply_modality_defaults(
        &mut self,
        modality: &str,
        source_center: Option<f32>,
        source_width: Option<f32>,
    ) {
        let modality = normalize_modality(modality);
        let fallback = modality_default(&modality);
        let state = self
            .modalities
            .entry(modality.clone())
            .or_insert_with(|| ModalityWindowLevel::seeded(&modality));

        if let Some(source) = WindowLevel::from_source(source_center, source_width) {
            let at_fallback = state.current == fallback;
            let at_previous_source = state.source_default == Some(state.current);
            let never_saw_source = state.source_default.is_none();

            if at_fallback || at_previous_source || never_saw_source {
                log::debug!(
                    "{modality}: applying source window {}/{}",
                    source.center,
                    source.width
                );
                state.current = source;
            } else {
                log::debug!(
                    "{modality}: keeping user window {}/{}, reset target now {}/{}",
                    state.current.center,
                    state.current.width,
                    source.center,
                    source.width
                );
            }
            state.source_default = Some(source);
        }

        self.active = state.current;
        self.current_modality = modality;
    }

    /// Direct user adjustment for the current modality.
    pub fn set_window_level(&mut self, center: f32, width: f32) {
        let level = WindowLevel::new(center, width);
        let modality = self.current_modality.clone();
        let state = self
            .modalities
            .entry(modality)
            .or_insert_with_key(|key| ModalityWindowLevel::seeded(key));
        state.current = level;
        self.active = level;
    }

    /// Restores the current modality to its latest source pair, or to the
    /// hard-coded pair when no source pair was ever seen.
    pub fn reset_current_modality(&mut self) {
        let modality = self.current_modality.clone();
        let state = self
            .modalities
            .entry(modality)
            .or_insert_with_key(|key| ModalityWindowLevel::seeded(key));
        state.current = state
            .source_default
            .unwrap_or_else(|| modality_default(&self.current_modality));
        self.active = state.current;
    }
}

fn normalize_modality(modality: &str) -> String {
    let token = modality.trim().to_ascii_uppercase();
    if token.is_empty() {
        "OT".to_string()
    } else {
        token
    }
}
