//! Configuration record reader.
//!
//! The configuration file is read exactly once per run. Its only required
//! field is `EvaluationFunctionName`; every other key is kept verbatim and
//! ignored by the pipeline.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::domain::{ConfigError, FunctionName};

/// Default location of the configuration file, relative to the repo root.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Field holding the grading function name.
pub const FUNCTION_NAME_FIELD: &str = "EvaluationFunctionName";

/// Immutable configuration record for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    path: PathBuf,
    function_name: FunctionName,
    fields: Map<String, Value>,
}

impl ConfigRecord {
    /// Read and validate the configuration file at `path`.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Validate already-loaded content; `path` is only used in error messages.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(content).map_err(|source| ConfigError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;

        let Value::Object(fields) = value else {
            return Err(ConfigError::NotAnObject {
                path: path.to_path_buf(),
            });
        };

        let raw = fields
            .get(FUNCTION_NAME_FIELD)
            .ok_or_else(|| ConfigError::MissingField {
                path: path.to_path_buf(),
                field: FUNCTION_NAME_FIELD,
            })?;

        let raw = raw.as_str().ok_or_else(|| ConfigError::NotAString {
            path: path.to_path_buf(),
            field: FUNCTION_NAME_FIELD,
        })?;

        let function_name = FunctionName::parse(raw).ok_or_else(|| ConfigError::EmptyField {
            path: path.to_path_buf(),
            field: FUNCTION_NAME_FIELD,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            function_name,
            fields,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn function_name(&self) -> &FunctionName {
        &self.function_name
    }

    /// Raw access to any field of the record.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
