//! File classification and kind resolution
//!
//! Both functions are pure lookups over fixed tables. The validator is the
//! only place that turns an `Unknown` classification into a rejection.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::model::{AttachmentKind, StationCategory};

pub const DRILL_EXTENSIONS: &[&str] = &["drl", "txt"];

/// Gerber layers plus the NC/excellon family
pub const GERBER_EXTENSIONS: &[&str] = &[
    "gbr", "ger", "gtl", "gbl", "gts", "gbs", "gto", "gbo", "gtp", "gbp", "gko", "gm1", "gm2",
    "gml", "gpt", "gpb", "g1", "g2", "g3", "g4", "gd1", "gg1", "cmp", "sol", "stc", "sts", "plc",
    "pls", "art", "pho", "nc", "xln", "tap", "cnc",
];

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

pub const JOB_CARD_EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];

/// Semantic file category inferred from the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileCategory {
    Drill,
    Gerber,
    Image,
    JobCard,
    Unknown,
}

impl FileCategory {
    /// Categories in lookup order; the first table containing the extension wins
    pub const RECOGNISED: [FileCategory; 4] = [
        FileCategory::Drill,
        FileCategory::Gerber,
        FileCategory::Image,
        FileCategory::JobCard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drill => "drill",
            Self::Gerber => "gerber",
            Self::Image => "image",
            Self::JobCard => "jobCard",
            Self::Unknown => "unknown",
        }
    }

    /// Accepts both the camelCase tag and the snake_case spelling used in
    /// configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drill" => Some(Self::Drill),
            "gerber" => Some(Self::Gerber),
            "image" => Some(Self::Image),
            "jobcard" | "job_card" => Some(Self::JobCard),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Drill => DRILL_EXTENSIONS,
            Self::Gerber => GERBER_EXTENSIONS,
            Self::Image => IMAGE_EXTENSIONS,
            Self::JobCard => JOB_CARD_EXTENSIONS,
            Self::Unknown => &[],
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static ALL_EXTENSIONS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    FileCategory::RECOGNISED
        .iter()
        .flat_map(|c| c.extensions().iter().copied())
        .collect()
});

/// Lower-cased text after the last `.`, if there is any.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Map a filename to its file category. Total: unrecognised names are `Unknown`.
pub fn classify(filename: &str) -> FileCategory {
    let Some(ext) = extension_of(filename) else {
        return FileCategory::Unknown;
    };

    FileCategory::RECOGNISED
        .into_iter()
        .find(|category| category.extensions().contains(&ext.as_str()))
        .unwrap_or(FileCategory::Unknown)
}

/// Every extension any category recognises, in lookup order.
pub fn all_extensions() -> &'static [&'static str] {
    &ALL_EXTENSIONS
}

/// Kind chosen from the file category alone (generic intake behaviour).
pub fn kind_for_file_category(file_category: FileCategory) -> AttachmentKind {
    match file_category {
        FileCategory::Drill => AttachmentKind::DrillFile,
        FileCategory::Gerber => AttachmentKind::Gerber,
        FileCategory::Image => AttachmentKind::Spec,
        FileCategory::JobCard => AttachmentKind::JobCard,
        // Unreachable behind the validator; kept total.
        FileCategory::Unknown => AttachmentKind::Spec,
    }
}

/// Resolve the persisted kind. Single-purpose stations override the
/// extension-based answer.
pub fn resolve_kind(station: &StationCategory, file_category: FileCategory) -> AttachmentKind {
    station
        .default_kind_override()
        .unwrap_or_else(|| kind_for_file_category(file_category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::{Fake, Faker};

    const ALL_CATEGORIES: [FileCategory; 5] = [
        FileCategory::Drill,
        FileCategory::Gerber,
        FileCategory::Image,
        FileCategory::JobCard,
        FileCategory::Unknown,
    ];

    #[test]
    fn test_classify_tables() {
        assert_eq!(classify("holes.drl"), FileCategory::Drill);
        assert_eq!(classify("notes.TXT"), FileCategory::Drill);
        assert_eq!(classify("panel.gbr"), FileCategory::Gerber);
        assert_eq!(classify("top.GTL"), FileCategory::Gerber);
        assert_eq!(classify("board.xln"), FileCategory::Gerber);
        assert_eq!(classify("scan.JPEG"), FileCategory::Image);
        assert_eq!(classify("job.docx"), FileCategory::JobCard);
        assert_eq!(classify("archive.zip"), FileCategory::Unknown);
    }

    #[test]
    fn test_classify_uses_last_dot() {
        assert_eq!(classify("panel.pdf.gbr"), FileCategory::Gerber);
        assert_eq!(classify("panel.gbr.pdf"), FileCategory::JobCard);
        assert_eq!(classify("README"), FileCategory::Unknown);
        assert_eq!(classify("trailing."), FileCategory::Unknown);
        assert_eq!(classify(""), FileCategory::Unknown);
        assert_eq!(classify(".drl"), FileCategory::Drill);
    }

    #[test]
    fn test_tables_are_disjoint() {
        for (i, a) in FileCategory::RECOGNISED.iter().enumerate() {
            for b in FileCategory::RECOGNISED.iter().skip(i + 1) {
                for ext in a.extensions() {
                    assert!(
                        !b.extensions().contains(ext),
                        "{} is in both {} and {}",
                        ext,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_classify_total_and_deterministic() {
        for _ in 0..500 {
            let stem: String = Faker.fake();
            let ext: String = Faker.fake();
            let name = format!("{}.{}", stem, ext);

            let first = classify(&name);
            assert!(ALL_CATEGORIES.contains(&first));
            assert_eq!(first, classify(&name));
        }
    }

    #[test]
    fn test_every_listed_extension_classifies() {
        for category in FileCategory::RECOGNISED {
            for ext in category.extensions() {
                assert_eq!(classify(&format!("f.{}", ext)), category);
                assert_eq!(classify(&format!("F.{}", ext.to_uppercase())), category);
            }
        }
        assert_eq!(
            all_extensions().len(),
            DRILL_EXTENSIONS.len()
                + GERBER_EXTENSIONS.len()
                + IMAGE_EXTENSIONS.len()
                + JOB_CARD_EXTENSIONS.len()
        );
    }

    #[test]
    fn test_resolve_kind_table() {
        let stations = [
            StationCategory::Intake,
            StationCategory::NcDrill,
            StationCategory::Phototools,
            StationCategory::Inspection,
            StationCategory::Other("solder_mask".to_string()),
        ];

        for station in &stations {
            for file_category in ALL_CATEGORIES {
                let kind = resolve_kind(station, file_category);
                let expected = match station {
                    StationCategory::NcDrill => AttachmentKind::DrillFile,
                    StationCategory::Phototools => AttachmentKind::Film,
                    _ => match file_category {
                        FileCategory::Drill => AttachmentKind::DrillFile,
                        FileCategory::Gerber => AttachmentKind::Gerber,
                        FileCategory::Image | FileCategory::Unknown => AttachmentKind::Spec,
                        FileCategory::JobCard => AttachmentKind::JobCard,
                    },
                };
                assert_eq!(kind, expected, "{} / {}", station, file_category);
            }
        }
    }

    #[test]
    fn test_drill_station_overrides_extension() {
        let category = classify("holes.gbr");
        assert_eq!(category, FileCategory::Gerber);
        assert_eq!(
            resolve_kind(&StationCategory::NcDrill, category),
            AttachmentKind::DrillFile
        );
        assert_eq!(
            resolve_kind(&StationCategory::Intake, category),
            AttachmentKind::Gerber
        );
    }

    #[test]
    fn test_parse_file_category() {
        assert_eq!(FileCategory::parse("job_card"), Some(FileCategory::JobCard));
        assert_eq!(FileCategory::parse("jobCard"), Some(FileCategory::JobCard));
        assert_eq!(FileCategory::parse(" Gerber "), Some(FileCategory::Gerber));
        assert_eq!(FileCategory::parse("video"), None);
    }
}
