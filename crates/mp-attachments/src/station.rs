//! Upload station configuration
//!
//! A station is one upload surface of a work order (CAM intake, NC drill,
//! phototools, inspection). Stations are immutable values handed to the
//! pipeline components; nothing here is global.

use mp_core::config::{AppConfig, StationSettings};
use mp_core::ValidationErrors;

use crate::classify::{kind_for_file_category, FileCategory};
use crate::model::{AttachmentKind, StationCategory};

/// Per-station upload policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub category: StationCategory,
    /// Label of the identifier the operator must enter
    pub identifier_label: String,
    /// Extensions offered by the station's file picker
    pub accepted_extensions: Vec<String>,
    /// Size ceiling in bytes
    pub max_file_size: u64,
    /// Kind forced for every file uploaded here
    pub kind_override: Option<AttachmentKind>,
}

impl StationConfig {
    /// Station accepting every recognised file category, with the
    /// category's default kind override and the default size ceiling.
    pub fn new(category: StationCategory, identifier_label: impl Into<String>) -> Self {
        let kind_override = category.default_kind_override();
        Self {
            category,
            identifier_label: identifier_label.into(),
            accepted_extensions: extensions_for(&FileCategory::RECOGNISED),
            max_file_size: mp_core::config::DEFAULT_MAX_FILE_SIZE,
            kind_override,
        }
    }

    pub fn intake() -> Self {
        Self::new(StationCategory::Intake, "CAM Number")
    }

    pub fn nc_drill() -> Self {
        Self::new(StationCategory::NcDrill, "NC Drill Number")
            .with_file_categories(&[FileCategory::Drill, FileCategory::Gerber])
    }

    pub fn phototools() -> Self {
        Self::new(StationCategory::Phototools, "Film Number")
            .with_file_categories(&[FileCategory::Gerber, FileCategory::Image])
    }

    pub fn inspection() -> Self {
        Self::new(StationCategory::Inspection, "CAM Number")
            .with_file_categories(&[FileCategory::Image, FileCategory::JobCard])
    }

    pub fn with_file_categories(mut self, categories: &[FileCategory]) -> Self {
        self.accepted_extensions = extensions_for(categories);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_kind_override(mut self, kind: Option<AttachmentKind>) -> Self {
        self.kind_override = kind;
        self
    }

    /// Persisted kind for a file of `file_category` uploaded at this station.
    pub fn resolve_kind(&self, file_category: FileCategory) -> AttachmentKind {
        self.kind_override
            .clone()
            .unwrap_or_else(|| kind_for_file_category(file_category))
    }

    /// Picker filter in the `.ext,.ext` form browsers and dialogs use.
    pub fn accept_filter(&self) -> String {
        self.accepted_extensions
            .iter()
            .map(|ext| format!(".{}", ext))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Build from configuration, filling unset values from `default_max_file_size`.
    pub fn from_settings(
        settings: &StationSettings,
        default_max_file_size: u64,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let category = StationCategory::from(settings.category.trim());

        let mut file_categories = Vec::new();
        for name in &settings.file_categories {
            match FileCategory::parse(name) {
                Some(FileCategory::Unknown) | None => errors.add(
                    format!("stations.{}.file_categories", settings.category),
                    format!("unsupported file category {:?}", name),
                ),
                Some(category) => file_categories.push(category),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        if file_categories.is_empty() {
            file_categories.extend(FileCategory::RECOGNISED);
        }

        let kind_override = match &settings.kind_override {
            Some(kind) => Some(AttachmentKind::from(kind.trim())),
            None => category.default_kind_override(),
        };

        Ok(Self::new(category, settings.identifier_label.trim())
            .with_file_categories(&file_categories)
            .with_max_file_size(settings.max_file_size.unwrap_or(default_max_file_size))
            .with_kind_override(kind_override))
    }
}

fn extensions_for(categories: &[FileCategory]) -> Vec<String> {
    categories
        .iter()
        .flat_map(|c| c.extensions().iter().map(|ext| ext.to_string()))
        .collect()
}

/// The set of stations a portal offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationCatalog {
    stations: Vec<StationConfig>,
}

impl Default for StationCatalog {
    fn default() -> Self {
        Self {
            stations: vec![
                StationConfig::intake(),
                StationConfig::nc_drill(),
                StationConfig::phototools(),
                StationConfig::inspection(),
            ],
        }
    }
}

impl StationCatalog {
    pub fn new(stations: Vec<StationConfig>) -> Self {
        Self { stations }
    }

    /// Stations from configuration, or the built-in four when none are
    /// configured. The configured upload ceiling applies to both.
    pub fn from_config(config: &AppConfig) -> Result<Self, ValidationErrors> {
        let max = config.uploads.max_file_size;
        if config.stations.is_empty() {
            let stations = Self::default()
                .stations
                .into_iter()
                .map(|s| s.with_max_file_size(max))
                .collect();
            return Ok(Self { stations });
        }

        let mut errors = ValidationErrors::new();
        let mut stations = Vec::with_capacity(config.stations.len());
        for settings in &config.stations {
            match StationConfig::from_settings(settings, max) {
                Ok(station) => {
                    if stations
                        .iter()
                        .any(|s: &StationConfig| s.category == station.category)
                    {
                        errors.add(
                            format!("stations.{}", settings.category),
                            "is defined more than once",
                        );
                    } else {
                        stations.push(station);
                    }
                }
                Err(e) => errors.merge(e),
            }
        }

        if errors.is_empty() {
            Ok(Self { stations })
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, category: &StationCategory) -> Option<&StationConfig> {
        self.stations.iter().find(|s| &s.category == category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationConfig> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
