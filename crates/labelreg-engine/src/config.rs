//! Sectioned TOML configuration.
//!
//! A configuration file holds the `[SYSTEM]`, `[NETWORK]` and `[TRAINING]`
//! sections, one task section named by the application (for registration,
//! `[REGISTRATION]`), and any number of data sections. Every table that is not
//! one of the named sections is a data section describing where one input
//! modality lives on disk.

use labelreg_core::WindowShape;
use labelreg_model::RegistrationNetConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::error::{EngineError, Result};

/// What the application is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    #[serde(alias = "training")]
    Train,
    #[serde(alias = "infer")]
    Inference,
}

impl Action {
    pub fn is_training(&self) -> bool {
        matches!(self, Self::Train)
    }
}

/// `[SYSTEM]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemParams {
    pub action: Action,
    /// Root directory for checkpoints (`<model_dir>/models`).
    pub model_dir: PathBuf,
    /// Seed for window sampling; `None` draws from the OS.
    pub random_seed: Option<u64>,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            action: Action::Train,
            model_dir: PathBuf::from("model"),
            random_seed: None,
        }
    }
}

/// `[NETWORK]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetParams {
    pub name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Weight decay coefficient.
    #[serde(default)]
    pub decay: f32,
    /// Channels per resolution level of the dense stream.
    #[serde(default)]
    pub features: Option<Vec<usize>>,
    /// Channels per level of the affine stream.
    #[serde(default)]
    pub affine_features: Option<Vec<usize>>,
}

fn default_batch_size() -> usize {
    2
}

impl NetParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: default_batch_size(),
            decay: 0.0,
            features: None,
            affine_features: None,
        }
    }

    pub fn net_config(&self) -> RegistrationNetConfig {
        let defaults = RegistrationNetConfig::default();
        RegistrationNetConfig {
            affine_features: self
                .affine_features
                .clone()
                .unwrap_or(defaults.affine_features),
            dense_features: self.features.clone().unwrap_or(defaults.dense_features),
        }
    }
}

/// `[TRAINING]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParams {
    pub optimiser: String,
    pub lr: f64,
    /// Windows queued per sampled image pair.
    pub sample_per_volume: usize,
    pub max_iter: usize,
    /// Iteration to resume from; > 0 restores the matching checkpoint.
    pub starting_iter: usize,
    /// Checkpoint interval; 0 saves only when training ends.
    pub save_every_n: usize,
}

impl Default for ActionParams {
    fn default() -> Self {
        Self {
            optimiser: "adam".to_string(),
            lr: 0.01,
            sample_per_volume: 1,
            max_iter: 10_000,
            starting_iter: 0,
            save_every_n: 0,
        }
    }
}

/// One input modality on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    #[serde(deserialize_with = "one_or_many")]
    pub path_to_search: Vec<PathBuf>,
    /// Every token must appear in the file name.
    #[serde(deserialize_with = "one_or_many")]
    pub filename_contains: Vec<String>,
    /// No token may appear in the file name.
    #[serde(deserialize_with = "one_or_many")]
    pub filename_not_contains: Vec<String>,
    pub spatial_window_size: Option<WindowShape>,
    /// Zero-mean, unit-variance intensities for image fields.
    pub normalisation: bool,
}

/// Data sections keyed by section name.
pub type DataParams = BTreeMap<String, DataSection>;

/// Maps application input fields to data section names.
pub trait TaskSections {
    /// Data sections feeding `field`, or `None` if the field is unknown.
    fn sections(&self, field: &str) -> Option<&[String]>;
}

/// `[REGISTRATION]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    #[serde(deserialize_with = "one_or_many")]
    pub fixed_image: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub fixed_label: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub moving_image: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub moving_label: Vec<String>,
}

impl TaskSections for RegistrationParams {
    fn sections(&self, field: &str) -> Option<&[String]> {
        match field {
            "fixed_image" => Some(&self.fixed_image),
            "fixed_label" => Some(&self.fixed_label),
            "moving_image" => Some(&self.moving_image),
            "moving_label" => Some(&self.moving_label),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Accept either a single value or a list of values.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A complete application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationConfig<T> {
    pub system: SystemParams,
    pub network: NetParams,
    pub action: ActionParams,
    pub task: T,
    pub data: DataParams,
}

const SYSTEM_SECTION: &str = "SYSTEM";
const NETWORK_SECTION: &str = "NETWORK";
const TRAINING_SECTION: &str = "TRAINING";

impl<T: DeserializeOwned> ApplicationConfig<T> {
    pub fn load_from_file<P: AsRef<Path>>(path: P, task_section: &str) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            EngineError::invalid_configuration(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&contents, task_section)
    }

    pub fn from_toml_str(toml_str: &str, task_section: &str) -> Result<Self> {
        let mut table: Table = toml_str.parse()?;

        let system = match table.remove(SYSTEM_SECTION) {
            Some(value) => section::<SystemParams>(SYSTEM_SECTION, value)?,
            None => SystemParams::default(),
        };
        let network = table
            .remove(NETWORK_SECTION)
            .ok_or_else(|| missing_section(NETWORK_SECTION))
            .and_then(|value| section::<NetParams>(NETWORK_SECTION, value))?;
        let action = match table.remove(TRAINING_SECTION) {
            Some(value) => section::<ActionParams>(TRAINING_SECTION, value)?,
            None => ActionParams::default(),
        };
        let task = table
            .remove(task_section)
            .ok_or_else(|| missing_section(task_section))
            .and_then(|value| section::<T>(task_section, value))?;

        let mut data = DataParams::new();
        for (name, value) in table {
            data.insert(name.clone(), section::<DataSection>(&name, value)?);
        }

        let config = Self {
            system,
            network,
            action,
            task,
            data,
        };
        config.validate()?;
        Ok(config)
    }
}

impl<T> ApplicationConfig<T> {
    /// Check values that deserialisation alone cannot rule out.
    pub fn validate(&self) -> Result<()> {
        if self.network.batch_size == 0 {
            return Err(EngineError::invalid_configuration("batch_size must be positive"));
        }
        if !(self.action.lr.is_finite() && self.action.lr > 0.0) {
            return Err(EngineError::invalid_configuration(format!(
                "lr must be a positive number, got {}",
                self.action.lr
            )));
        }
        if self.action.sample_per_volume == 0 {
            return Err(EngineError::invalid_configuration(
                "sample_per_volume must be positive",
            ));
        }
        if self.action.starting_iter > self.action.max_iter {
            return Err(EngineError::invalid_configuration(format!(
                "starting_iter {} exceeds max_iter {}",
                self.action.starting_iter, self.action.max_iter
            )));
        }
        Ok(())
    }
}

fn missing_section(name: &str) -> EngineError {
    EngineError::invalid_configuration(format!("missing [{}] section", name))
}

fn section<S: DeserializeOwned>(name: &str, value: Value) -> Result<S> {
    if !value.is_table() {
        return Err(EngineError::invalid_configuration(format!(
            "'{}' must be a table",
            name
        )));
    }
    Ok(value.try_into()?)
}
