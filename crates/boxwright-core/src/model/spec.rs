//! ビルド定義

use super::output::OutputImage;
use super::step::Step;
use crate::error::{Result, SpecError};
use serde::{Deserialize, Serialize};

/// ビルド定義
///
/// YAML形式：
/// ```yaml
/// base: ubuntu:20.04
/// steps:
///   - run: apt-get update
/// output:
///   name: my-image
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// ベースイメージ
    #[serde(rename = "base")]
    pub base_image: String,
    /// 順序付きプロビジョニングステップ
    #[serde(default)]
    pub steps: Vec<Step>,
    pub output: OutputImage,
}

impl BuildSpec {
    /// 構造上の不変条件を検証
    pub fn validate(&self) -> Result<()> {
        if self.base_image.trim().is_empty() {
            return Err(SpecError::MissingBaseImage);
        }
        if self.output.name.trim().is_empty() {
            return Err(SpecError::MissingOutputName);
        }
        if self.output.name.contains('@') {
            return Err(SpecError::Invalid(format!(
                "output.name にダイジェストは指定できません: {}",
                self.output.name
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|message| SpecError::InvalidStep { index, message })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Command;

    fn spec(base: &str, output: &str) -> BuildSpec {
        BuildSpec {
            base_image: base.to_string(),
            steps: vec![Step::Run(Command::Shell("apt-get update".to_string()))],
            output: OutputImage::new(output),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(spec("ubuntu:20.04", "my-image").validate().is_ok());
    }

    #[test]
    fn test_validate_missing_base_image() {
        let result = spec("  ", "my-image").validate();
        assert!(matches!(result, Err(SpecError::MissingBaseImage)));
    }

    #[test]
    fn test_validate_missing_output_name() {
        let result = spec("ubuntu:20.04", "").validate();
        assert!(matches!(result, Err(SpecError::MissingOutputName)));
    }

    #[test]
    fn test_validate_digest_base_and_output() {
        assert!(spec("ubuntu@sha256:0123abcd", "my-image").validate().is_ok());
        let result = spec("ubuntu:20.04", "my-image@sha256:0123abcd").validate();
        assert!(matches!(result, Err(SpecError::Invalid(_))));
    }

    #[test]
    fn test_validate_reports_step_index() {
        let mut s = spec("ubuntu:20.04", "my-image");
        s.steps.push(Step::Run(Command::Shell(String::new())));
        match s.validate() {
            Err(SpecError::InvalidStep { index, .. }) => assert_eq!(index, 1),
            other => panic!("Expected InvalidStep, got {:?}", other),
        }
    }
}
