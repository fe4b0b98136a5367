//! Wire body of the control-plane ensure call.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::environment::DeploymentTarget;
use super::image::{FunctionName, ImageRef};

/// `{apiKey, dockerImageUri, functionName}` sent to `/grading-function/ensure`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub api_key: String,
    pub docker_image_uri: String,
    pub function_name: String,
}

impl DeploymentRequest {
    pub fn for_target(target: &DeploymentTarget, image: &ImageRef, name: &FunctionName) -> Self {
        Self {
            api_key: target.api_key.clone(),
            docker_image_uri: image.uri(),
            function_name: name.as_str().to_string(),
        }
    }
}

impl fmt::Debug for DeploymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentRequest")
            .field("api_key", &"<redacted>")
            .field("docker_image_uri", &self.docker_image_uri)
            .field("function_name", &self.function_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::Environment;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let name = FunctionName::parse("proof-eval-v1").unwrap();
        let target = DeploymentTarget::new(Environment::Staging, "reg.example.com", "k-123");
        let image = target.image_for(&name);
        let request = DeploymentRequest::for_target(&target, &image, &name);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "apiKey": "k-123",
                "dockerImageUri": "reg.example.com/lambda-feedback-staging-functions-repository:proof-eval-v1",
                "functionName": "proof-eval-v1",
            })
        );
    }

    #[test]
    fn test_request_debug_hides_api_key() {
        let request = DeploymentRequest {
            api_key: "super-secret".to_string(),
            docker_image_uri: "r/x:y".to_string(),
            function_name: "y".to_string(),
        };
        assert!(!format!("{request:?}").contains("super-secret"));
    }
}
