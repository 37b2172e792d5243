//! Per-dataset capability descriptors: which columns exist, which fill
//! class each belongs to, and whether the dataset is imputed at all.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fill::FillClass;
use crate::{ImputeError, ImputeParams, ZeroSentinel};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetProfile {
    pub time_column: String,
    pub subject_column: String,
    pub split_column: String,
    pub glucose_column: String,
    pub smoothed_column: String,
    pub forward_fill_columns: Vec<String>,
    pub zero_fill_columns: Vec<String>,
    pub forward_fill_limit: Option<usize>,
    pub zero_fill_limit: Option<usize>,
    pub invalidation_window: Option<usize>,
    pub zero_as_missing: Option<ZeroSentinel>,
    /// Datasets that need different handling are left alone entirely.
    pub skip: bool,
}

impl Default for DatasetProfile {
    fn default() -> Self {
        Self {
            time_column: "date".to_string(),
            subject_column: "id".to_string(),
            split_column: "is_test".to_string(),
            glucose_column: "CGM".to_string(),
            smoothed_column: "CGM_smoothed".to_string(),
            forward_fill_columns: names(&[
                "galvanic_skin_response",
                "skin_temp",
                "air_temp",
                "heartrate",
            ]),
            zero_fill_columns: names(&["carbs", "bolus", "basal", "steps", "acceleration"]),
            forward_fill_limit: None,
            zero_fill_limit: None,
            invalidation_window: None,
            zero_as_missing: None,
            skip: false,
        }
    }
}

impl DatasetProfile {
    /// Fill class of `column`, or `None` if the column passes through.
    pub fn class_of(&self, column: &str) -> Option<FillClass> {
        if self.forward_fill_columns.iter().any(|c| c == column) {
            Some(FillClass::ForwardFill)
        } else if self.zero_fill_columns.iter().any(|c| c == column) {
            Some(FillClass::ZeroFill)
        } else {
            None
        }
    }

    /// Classified columns in declaration order, forward-fill first.
    pub fn classified_columns(&self) -> impl Iterator<Item = (&str, FillClass)> {
        self.forward_fill_columns
            .iter()
            .map(|c| (c.as_str(), FillClass::ForwardFill))
            .chain(
                self.zero_fill_columns
                    .iter()
                    .map(|c| (c.as_str(), FillClass::ZeroFill)),
            )
    }

    /// `base` with this profile's overrides applied.
    pub fn effective_params(&self, base: &ImputeParams) -> ImputeParams {
        let mut params = base.clone();
        if let Some(limit) = self.forward_fill_limit {
            params.forward_fill_limit = limit;
        }
        if let Some(limit) = self.zero_fill_limit {
            params.zero_fill_limit = limit;
        }
        if let Some(window) = self.invalidation_window {
            params.invalidation_window = window;
        }
        if let Some(sentinel) = self.zero_as_missing {
            params.zero_as_missing = sentinel;
        }
        params
    }

    pub fn validate(&self) -> Result<(), ImputeError> {
        let mut seen = BTreeSet::new();
        for (column, _) in self.classified_columns() {
            if !seen.insert(column) {
                return Err(ImputeError::Profile(format!(
                    "column '{}' is listed in more than one fill class",
                    column
                )));
            }
        }
        for structural in [
            &self.time_column,
            &self.subject_column,
            &self.split_column,
            &self.smoothed_column,
        ] {
            if self.class_of(structural).is_some() {
                return Err(ImputeError::Profile(format!(
                    "structural column '{}' cannot have a fill class",
                    structural
                )));
            }
        }
        if self.smoothed_column == self.glucose_column {
            return Err(ImputeError::Profile(
                "smoothed column must differ from the glucose column".into(),
            ));
        }
        Ok(())
    }
}

/// Profiles for a whole sweep, usually loaded from one JSON file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileSet {
    pub default: DatasetProfile,
    pub datasets: BTreeMap<String, DatasetProfile>,
    pub denylist: BTreeSet<String>,
}

impl ProfileSet {
    pub fn load(path: &Path) -> Result<Self, ImputeError> {
        let text = fs::read_to_string(path).map_err(|e| ImputeError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ImputeError> {
        let set: ProfileSet =
            serde_json::from_str(text).map_err(|e| ImputeError::Profile(e.to_string()))?;
        set.default.validate()?;
        for (name, profile) in &set.datasets {
            profile
                .validate()
                .map_err(|e| ImputeError::Profile(format!("{}: {}", name, e)))?;
        }
        Ok(set)
    }

    /// Profile for a dataset name (file stem); `None` when it is denied or
    /// marked `skip`.
    pub fn resolve(&self, dataset: &str) -> Option<&DatasetProfile> {
        if self.denylist.contains(dataset) {
            return None;
        }
        let profile = self.datasets.get(dataset).unwrap_or(&self.default);
        (!profile.skip).then_some(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_classes() {
        let profile = DatasetProfile::default();
        assert_eq!(profile.class_of("heartrate"), Some(FillClass::ForwardFill));
        assert_eq!(profile.class_of("bolus"), Some(FillClass::ZeroFill));
        assert_eq!(profile.class_of("CGM"), None);
        assert_eq!(profile.class_of("exercise"), None);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn overrides_apply_on_top_of_base() {
        let profile = DatasetProfile {
            forward_fill_limit: Some(6),
            zero_as_missing: Some(ZeroSentinel {
                forward_fill: true,
                zero_fill: false,
            }),
            ..DatasetProfile::default()
        };
        let params = profile.effective_params(&ImputeParams::default());
        assert_eq!(params.forward_fill_limit, 6);
        assert_eq!(params.zero_fill_limit, 288);
        assert!(!params.zero_as_missing.zero_fill);
    }

    #[test]
    fn duplicate_class_is_rejected() {
        let profile = DatasetProfile {
            zero_fill_columns: names(&["heartrate"]),
            ..DatasetProfile::default()
        };
        assert!(matches!(profile.validate(), Err(ImputeError::Profile(_))));
    }

    #[test]
    fn json_profile_set_resolves() {
        let set = ProfileSet::from_json(
            r#"{
                "datasets": {
                    "tidepool": {"zero_fill_columns": ["bolus"], "forward_fill_columns": []},
                    "legacy": {"skip": true}
                },
                "denylist": ["broken"]
            }"#,
        )
        .unwrap();
        let tidepool = set.resolve("tidepool").unwrap();
        assert_eq!(tidepool.zero_fill_columns, vec!["bolus".to_string()]);
        assert_eq!(tidepool.glucose_column, "CGM");
        assert!(set.resolve("legacy").is_none());
        assert!(set.resolve("broken").is_none());
        assert_eq!(set.resolve("ohio_t1dm"), Some(&set.default));
    }

    #[test]
    fn bad_json_is_profile_error() {
        assert!(matches!(
            ProfileSet::from_json("{\"default\": 3}"),
            Err(ImputeError::Profile(_))
        ));
    }
}
