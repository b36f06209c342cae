use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::error::AppError;

/// Directory of server-resident models that clients upload and then refer to by
/// file name.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    extension: String,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        ModelStore {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Writes an uploaded model, replacing any model with the same name, and
    /// returns the name it was stored under. The bytes go to a temp file first
    /// so a concurrent reader never loads a half-written model.
    pub fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String, AppError> {
        let file_name = plain_file_name(file_name)?;
        if !self.accepts(file_name) {
            return Err(AppError::client(format!(
                "Only .{} model files allowed",
                self.extension
            )));
        }

        fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(file_name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| e.error)?;

        info!("Stored model {} ({} bytes)", file_name, bytes.len());
        Ok(file_name.to_string())
    }

    /// Names of stored models carrying the model extension, sorted.
    pub fn list(&self) -> Result<Vec<String>, AppError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.accepts(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn resolve(&self, model_name: &str) -> Result<PathBuf, AppError> {
        let model_name = plain_file_name(model_name)?;
        let path = self.dir.join(model_name);
        if !path.is_file() {
            return Err(AppError::NotFound(format!(
                "Model not found on server: {}",
                model_name
            )));
        }
        Ok(path)
    }
}

/// Rejects names that would escape the store directory.
pub fn plain_file_name(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    let is_plain = !name.is_empty()
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if is_plain {
        Ok(name)
    } else {
        Err(AppError::client(format!("Invalid model file name: {:?}", name)))
    }
}
