//! Subject discovery and volume loading.

use burn::tensor::backend::Backend;
use labelreg_core::Image;
use labelreg_io::{is_nifti_path, read_nifti};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DataParams, DataSection, TaskSections};
use crate::error::{EngineError, Result};

/// The volumes of one subject, keyed by field name.
pub type Subject<B> = BTreeMap<String, Image<B>>;

/// A source of subjects whose fields can be loaded as volumes.
pub trait ImageSource {
    /// Field names, sorted.
    fn fields(&self) -> Vec<&str>;

    /// Number of subjects available.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subject_id(&self, index: usize) -> Option<&str>;

    /// Data section that feeds `field`.
    fn section_name(&self, field: &str) -> Option<&str>;

    /// Load every field of one subject.
    fn load<B: Backend>(&self, index: usize, device: &B::Device) -> Result<Subject<B>>;
}

#[derive(Debug, Clone)]
struct SubjectFiles {
    id: String,
    files: BTreeMap<String, PathBuf>,
}

/// Reads NIfTI volumes for a fixed set of input fields.
///
/// Each field is bound to one data section by the task configuration. Files
/// are matched across fields by subject id: the file name with its extension
/// and the section's `filename_contains` tokens removed.
#[derive(Debug, Clone)]
pub struct ImageReader {
    fields: BTreeSet<String>,
    sections: BTreeMap<String, String>,
    subjects: Vec<SubjectFiles>,
}

impl ImageReader {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            sections: BTreeMap::new(),
            subjects: Vec::new(),
        }
    }

    pub fn is_initialised(&self) -> bool {
        !self.subjects.is_empty()
    }

    /// Resolve each field to its data section and list the subjects that
    /// have a file for every field.
    pub fn initialise<T: TaskSections>(&mut self, data_param: &DataParams, task_param: &T) -> Result<()> {
        let mut sections = BTreeMap::new();
        let mut per_field = BTreeMap::new();

        for field in &self.fields {
            let name = match task_param.sections(field) {
                Some([name]) => name,
                Some([]) | None => {
                    return Err(EngineError::invalid_configuration(format!(
                        "no data section assigned to '{}'",
                        field
                    )))
                }
                Some(names) => {
                    return Err(EngineError::invalid_configuration(format!(
                        "'{}' must name exactly one data section, got {:?}",
                        field, names
                    )))
                }
            };
            let section = data_param.get(name).ok_or_else(|| {
                EngineError::invalid_configuration(format!(
                    "data section [{}] for '{}' is not defined",
                    name, field
                ))
            })?;

            let files = list_files(section)?;
            debug!(field = %field, section = %name, files = files.len(), "Listed input files");
            sections.insert(field.clone(), name.clone());
            per_field.insert(field.clone(), files);
        }

        self.subjects = match_subjects(per_field);
        self.sections = sections;

        if self.subjects.is_empty() {
            return Err(EngineError::data(format!(
                "no subject has a file for every field of {:?}",
                self.fields
            )));
        }
        info!(
            fields = ?self.fields,
            subjects = self.subjects.len(),
            "Image reader initialised"
        );
        Ok(())
    }
}

impl ImageSource for ImageReader {
    fn fields(&self) -> Vec<&str> {
        self.fields.iter().map(String::as_str).collect()
    }

    fn len(&self) -> usize {
        self.subjects.len()
    }

    fn subject_id(&self, index: usize) -> Option<&str> {
        self.subjects.get(index).map(|s| s.id.as_str())
    }

    fn section_name(&self, field: &str) -> Option<&str> {
        self.sections.get(field).map(String::as_str)
    }

    fn load<B: Backend>(&self, index: usize, device: &B::Device) -> Result<Subject<B>> {
        let subject = self.subjects.get(index).ok_or_else(|| {
            EngineError::data(format!(
                "subject index {} out of range ({} subjects)",
                index,
                self.subjects.len()
            ))
        })?;

        subject
            .files
            .iter()
            .map(|(field, path)| {
                let image = read_nifti::<B, _>(path, device)
                    .map_err(|err| EngineError::data(format!("{}: {:#}", path.display(), err)))?;
                Ok((field.clone(), image))
            })
            .collect()
    }
}

/// Subject id of a file: name without extension and `filename_contains` tokens.
///
/// Each token is removed once: as a suffix, else as a prefix, else at its
/// last occurrence. Other occurrences are part of the id.
pub fn subject_id(file_name: &str, contains: &[String]) -> String {
    let stem = file_name
        .strip_suffix(".nii.gz")
        .or_else(|| file_name.strip_suffix(".nii"))
        .unwrap_or(file_name);

    let mut id = trim_separators(stem).to_string();
    for token in contains.iter().filter(|t| !t.is_empty()) {
        let token = token.as_str();
        let stripped = if let Some(rest) = id.strip_suffix(token) {
            rest.to_string()
        } else if let Some(rest) = id.strip_prefix(token) {
            rest.to_string()
        } else if let Some(at) = id.rfind(token) {
            format!("{}{}", &id[..at], &id[at + token.len()..])
        } else {
            continue;
        };
        id = trim_separators(&stripped).to_string();
    }
    id
}

fn trim_separators(name: &str) -> &str {
    name.trim_matches(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
}

fn matches_filters(file_name: &str, section: &DataSection) -> bool {
    section
        .filename_contains
        .iter()
        .all(|token| file_name.contains(token.as_str()))
        && !section
            .filename_not_contains
            .iter()
            .filter(|token| !token.is_empty())
            .any(|token| file_name.contains(token.as_str()))
}

/// Files of one data section keyed by subject id.
fn list_files(section: &DataSection) -> Result<BTreeMap<String, PathBuf>> {
    if section.path_to_search.is_empty() {
        return Err(EngineError::invalid_configuration(
            "data section has no path_to_search",
        ));
    }

    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
    for dir in &section.path_to_search {
        for path in read_dir_sorted(dir)? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !is_nifti_path(&path) || !matches_filters(file_name, section) {
                continue;
            }

            let id = subject_id(file_name, &section.filename_contains);
            if let Some(existing) = files.get(&id) {
                warn!(
                    subject = %id,
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "Duplicate subject id"
                );
                continue;
            }
            files.insert(id, path);
        }
    }
    Ok(files)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|err| EngineError::data(format!("cannot search {}: {}", dir.display(), err)))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Keep the subjects present for every field, sorted by id.
fn match_subjects(per_field: BTreeMap<String, BTreeMap<String, PathBuf>>) -> Vec<SubjectFiles> {
    let mut ids: Option<BTreeSet<String>> = None;
    for files in per_field.values() {
        let these: BTreeSet<String> = files.keys().cloned().collect();
        ids = Some(match ids {
            Some(common) => common.intersection(&these).cloned().collect(),
            None => these,
        });
    }
    let ids = ids.unwrap_or_default();

    for (field, files) in &per_field {
        for id in files.keys().filter(|id| !ids.contains(*id)) {
            warn!(field = %field, subject = %id, "Subject missing other fields, dropped");
        }
    }

    ids.into_iter()
        .map(|id| SubjectFiles {
            files: per_field
                .iter()
                .filter_map(|(field, files)| files.get(&id).map(|p| (field.clone(), p.clone())))
                .collect(),
            id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistrationParams;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    fn section(dir: &Path, contains: &str) -> DataSection {
        DataSection {
            path_to_search: vec![dir.to_path_buf()],
            filename_contains: vec![contains.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_subject_id_strips_tokens_and_extension() {
        let contains = vec!["_img".to_string()];
        assert_eq!(subject_id("case01_img.nii.gz", &contains), "case01");
        assert_eq!(subject_id("case01_img.nii", &contains), "case01");
        assert_eq!(subject_id("seg-case02.nii", &["seg".to_string()]), "case02");
        assert_eq!(subject_id("plain.nii", &[]), "plain");
    }

    #[test]
    fn test_subject_id_keeps_token_inside_name() {
        let img = ["img".to_string()];
        assert_eq!(subject_id("img01_img.nii", &img), "img01");
        assert_eq!(subject_id("img_img01.nii", &img), "img01");
        assert_eq!(subject_id("case_img_t1.nii", &img), "case__t1");
        assert_eq!(
            subject_id("seg01_T2_seg.nii.gz", &["T2".to_string(), "seg".to_string()]),
            "seg01"
        );
    }

    #[test]
    fn test_filters() {
        let section = DataSection {
            filename_contains: vec!["img".to_string()],
            filename_not_contains: vec!["old".to_string()],
            ..Default::default()
        };
        assert!(matches_filters("a_img.nii", &section));
        assert!(!matches_filters("a_seg.nii", &section));
        assert!(!matches_filters("a_img_old.nii", &section));
    }

    #[test]
    fn test_initialise_matches_subjects_across_fields() {
        let dir = TempDir::new().unwrap();
        for name in [
            "s1_img.nii", "s1_seg.nii", "s2_img.nii.gz", "s2_seg.nii", "s3_img.nii", "notes.txt",
        ] {
            touch(dir.path(), name);
        }

        let mut data = DataParams::new();
        data.insert("mr".to_string(), section(dir.path(), "_img"));
        data.insert("seg".to_string(), section(dir.path(), "_seg"));
        let task = RegistrationParams {
            fixed_image: vec!["mr".to_string()],
            fixed_label: vec!["seg".to_string()],
            ..Default::default()
        };

        let mut reader = ImageReader::new(["fixed_image", "fixed_label"]);
        reader.initialise(&data, &task).unwrap();

        assert!(reader.is_initialised());
        assert_eq!(reader.fields(), vec!["fixed_image", "fixed_label"]);
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.subject_id(0), Some("s1"));
        assert_eq!(reader.subject_id(1), Some("s2"));
        assert_eq!(reader.section_name("fixed_label"), Some("seg"));
    }

    #[test]
    fn test_initialise_rejects_bad_task_mapping() {
        let dir = TempDir::new().unwrap();
        let mut data = DataParams::new();
        data.insert("mr".to_string(), section(dir.path(), "_img"));

        let mut reader = ImageReader::new(["fixed_image"]);
        let missing = RegistrationParams::default();
        assert!(matches!(
            reader.initialise(&data, &missing),
            Err(EngineError::InvalidConfiguration(_))
        ));

        let two = RegistrationParams {
            fixed_image: vec!["mr".to_string(), "ct".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            reader.initialise(&data, &two),
            Err(EngineError::InvalidConfiguration(_))
        ));

        let undefined = RegistrationParams {
            fixed_image: vec!["ct".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            reader.initialise(&data, &undefined),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_initialise_without_subjects_is_data_error() {
        let dir = TempDir::new().unwrap();
        let mut data = DataParams::new();
        data.insert("mr".to_string(), section(dir.path(), "_img"));
        let task = RegistrationParams {
            fixed_image: vec!["mr".to_string()],
            ..Default::default()
        };

        let mut reader = ImageReader::new(["fixed_image"]);
        assert!(matches!(reader.initialise(&data, &task), Err(EngineError::Data(_))));
    }
}
