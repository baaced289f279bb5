//! Display formatting for DICOM strings.

/// `YYYYMMDD` -> `YYYY-MM-DD`; anything else is returned unchanged.
pub fn format_dicom_date(date: &str) -> String {
    let date = date.trim();
    if date.len() != 8 || !date.is_ascii() {
        return date.to_string();
    }
    format!("{}-{}-{}", &date[0..4], &date[4..6], &date[6..8])
}

/// `HHMMSS[.ffffff]` -> `HH:MM:SS`; shorter values are returned unchanged.
pub fn format_dicom_time(time: &str) -> String {
    let time = time.trim();
    if time.len() < 6 || !time.is_ascii() {
        return time.to_string();
    }
    format!("{}:{}:{}", &time[0..2], &time[2..4], &time[4..6])
}

/// `Last^First^Middle` -> `First Last`.
pub fn format_patient_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return "Unknown".to_string();
    }
    let mut parts = name.split('^');
    match (parts.next(), parts.next()) {
        (Some(last), Some(first)) => format!("{first} {last}").trim().to_string(),
        _ => name.to_string(),
    }
}

/// Stand-in for identifying text while privacy mode is on.
pub fn mask_personal(value: &str, hide: bool) -> String {
    if hide {
        "***".to_string()
    } else {
        value.to_string()
    }
}

fn expand_abbreviation(word: &str) -> Option<&'static str> {
    let expanded = match word.to_ascii_lowercase().as_str() {
        "t1" => "T1",
        "t2" => "T2",
        "pd" => "PD",
        "flair" => "FLAIR",
        "stir" => "STIR",
        "dwi" => "DWI",
        "adc" => "ADC",
        "swi" => "SWI",
        "epi" => "EPI",
        "tse" => "TSE",
        "fse" => "FSE",
        "gre" => "GRE",
        "mpr" => "MPR",
        "mip" => "MIP",
        "mprage" => "MPRAGE",
        "2d" => "2D",
        "3d" => "3D",
        "sag" => "Sagittal",
        "cor" => "Coronal",
        "ax" => "Axial",
        "tra" => "Transverse",
        "pre" => "Pre-contrast",
        "post" => "Post-contrast",
        "gd" => "Gd",
        "fs" => "Fat Sat",
        _ => return None,
    };
    Some(expanded)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Expands common sequence and orientation abbreviations and title-cases the
/// rest. Underscores become spaces; runs of spaces are preserved.
pub fn format_series_description(description: Option<&str>) -> String {
    let description = description.unwrap_or_default();
    if description.trim().is_empty() {
        return "Unknown Series".to_string();
    }

    description
        .replace('_', " ")
        .split(' ')
        .map(|word| match expand_abbreviation(word) {
            Some(expanded) => expanded.to_string(),
            None if word.contains('/') => word.to_string(),
            None => capitalize(word),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(text: &str) -> String {
        format_series_description(Some(text))
    }

    #[test]
    fn dates_and_times() {
        assert_eq!(format_dicom_date("20240115"), "2024-01-15");
        assert_eq!(format_dicom_date("2024"), "2024");
        assert_eq!(format_dicom_date(""), "");
        assert_eq!(format_dicom_time("142530"), "14:25:30");
        assert_eq!(format_dicom_time("142530.123456"), "14:25:30");
        assert_eq!(format_dicom_time("1425"), "1425");
    }

    #[test]
    fn patient_names() {
        assert_eq!(format_patient_name("DOE^JANE"), "JANE DOE");
        assert_eq!(format_patient_name("DOE^JANE^Q"), "JANE DOE");
        assert_eq!(format_patient_name("Anonymous"), "Anonymous");
        assert_eq!(format_patient_name(""), "Unknown");
    }

    #[test]
    fn privacy_mask() {
        assert_eq!(mask_personal("DOE^JANE", true), "***");
        assert_eq!(mask_personal("DOE^JANE", false), "DOE^JANE");
    }

    #[test]
    fn abbreviations_any_case() {
        assert_eq!(series("t1"), "T1");
        assert_eq!(series("FLAIR"), "FLAIR");
        assert_eq!(series("stir"), "STIR");
        assert_eq!(series("dwi"), "DWI");
        assert_eq!(series("SAG"), "Sagittal");
        assert_eq!(series("cor"), "Coronal");
        assert_eq!(series("ax"), "Axial");
        assert_eq!(series("tra"), "Transverse");
        assert_eq!(series("pre"), "Pre-contrast");
        assert_eq!(series("post"), "Post-contrast");
        assert_eq!(series("gd"), "Gd");
    }

    #[test]
    fn multi_word_descriptions() {
        assert_eq!(series("t1_sag_mpr"), "T1 Sagittal MPR");
        assert_eq!(series("t1 dark fluid"), "T1 Dark Fluid");
        assert_eq!(series("FLAIR_AX_DARK_FLUID"), "FLAIR Axial Dark Fluid");
        assert_eq!(series("DWI_EPI_TRACE"), "DWI EPI Trace");
        assert_eq!(series("t1_post_gd_sag"), "T1 Post-contrast Gd Sagittal");
        assert_eq!(series("t1_fs_ax"), "T1 Fat Sat Axial");
        assert_eq!(series("3d t1"), "3D T1");
        assert_eq!(series("localizer"), "Localizer");
    }

    #[test]
    fn fractions_and_spacing_survive() {
        assert_eq!(series("2/1"), "2/1");
        assert_eq!(series("t1 3/2 sag"), "T1 3/2 Sagittal");
        assert_eq!(series("t1  sag  mpr"), "T1  Sagittal  MPR");
    }

    #[test]
    fn empty_descriptions() {
        assert_eq!(series(""), "Unknown Series");
        assert_eq!(format_series_description(None), "Unknown Series");
    }
}
