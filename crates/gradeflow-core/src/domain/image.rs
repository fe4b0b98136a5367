//! Function names and container image references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a grading function.
///
/// Always non-empty and free of surrounding whitespace. The same value tags
/// the image and names the function in every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionName(String);

impl FunctionName {
    /// Parse a function name, returning `None` when it is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FunctionName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FunctionName::parse(&value).ok_or_else(|| "function name must not be empty".to_string())
    }
}

impl From<FunctionName> for String {
    fn from(name: FunctionName) -> Self {
        name.0
    }
}

/// A container image identified by `(registry, repository, tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Image reference tagged with the function name.
    pub fn new(registry: &str, repository: &str, name: &FunctionName) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            repository: repository.trim_matches('/').to_string(),
            tag: name.as_str().to_string(),
        }
    }

    /// Full `{registry}/{repository}:{tag}` URI.
    pub fn uri(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_name_trims() {
        let name = FunctionName::parse("  proof-eval-v1 \n").expect("name");
        assert_eq!(name.as_str(), "proof-eval-v1");
    }

    #[test]
    fn test_function_name_rejects_blank() {
        assert!(FunctionName::parse("").is_none());
        assert!(FunctionName::parse("   ").is_none());
    }

    #[test]
    fn test_function_name_deserialize_rejects_empty() {
        let ok: FunctionName = serde_json::from_str("\"proof-eval-v1\"").expect("parse");
        assert_eq!(ok.as_str(), "proof-eval-v1");
        assert!(serde_json::from_str::<FunctionName>("\"\"").is_err());
    }

    #[test]
    fn test_image_uri() {
        let name = FunctionName::parse("proof-eval-v1").unwrap();
        let image = ImageRef::new(
            "123456789012.dkr.ecr.eu-west-2.amazonaws.com/",
            "lambda-feedback-staging-functions-repository",
            &name,
        );
        assert_eq!(
            image.uri(),
            "123456789012.dkr.ecr.eu-west-2.amazonaws.com/lambda-feedback-staging-functions-repository:proof-eval-v1"
        );
        assert_eq!(image.to_string(), image.uri());
    }
}
