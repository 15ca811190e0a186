//! 소스 정의 로더 -- conf.d 디렉토리의 YAML 파일을 읽습니다.
//!
//! 각 파일은 `logs:` 목록을 가집니다.
//!
//! ```yaml
//! logs:
//!   - type: file
//!     path: /var/log/nginx/access.log
//!     service: nginx
//!     source: nginx
//! ```
//!
//! 파일 하나에 소스가 하나면 이름은 파일 stem, 여러 개면 `stem[i]`입니다.
//! 개별 파일 실패는 경고 로그를 남기고 건너뜁니다.

use std::path::Path;

use serde::Deserialize;

use logship_core::config::SourceConfig;

use crate::error::AgentError;
use crate::source::SourceDefinition;

const MAX_SOURCE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_SOURCES_COUNT: usize = 10_000;

#[derive(Debug, Deserialize)]
struct SourceFile {
    #[serde(default)]
    logs: Vec<SourceConfig>,
}

/// 소스 정의 로더
pub struct SourceLoader;

impl SourceLoader {
    /// 디렉토리의 `.yml`/`.yaml` 파일에서 소스 정의를 읽습니다.
    ///
    /// 결과는 파일 이름 순으로 정렬됩니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 소스 수가 `MAX_SOURCES_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
    ) -> Result<Vec<SourceDefinition>, AgentError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AgentError::SourceLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::SourceLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory entry: {e}"),
            })?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::new();
        for path in paths {
            match Self::load_file(&path).await {
                Ok(mut defs) => definitions.append(&mut defs),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load source file, skipping"
                    );
                }
            }

            if definitions.len() > MAX_SOURCES_COUNT {
                return Err(AgentError::SourceLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many sources: max {MAX_SOURCES_COUNT}"),
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = definitions.len(),
            "loaded log sources"
        );
        Ok(definitions)
    }

    /// 단일 YAML 파일에서 소스 정의를 읽습니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<SourceDefinition>, AgentError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| AgentError::SourceLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;
        if metadata.len() > MAX_SOURCE_FILE_SIZE {
            return Err(AgentError::SourceLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_SOURCE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::SourceLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse_yaml(&content, &stem).map_err(|e| AgentError::SourceLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// YAML 문자열을 파싱하여 소스 정의를 만듭니다.
    pub fn parse_yaml(yaml_str: &str, name: &str) -> Result<Vec<SourceDefinition>, AgentError> {
        let file: SourceFile = serde_yaml::from_str(yaml_str)?;
        Ok(Self::name_sources(name, file.logs))
    }

    /// 인라인(`[[logs.sources]]`) 소스에 이름을 붙입니다.
    pub fn from_inline(sources: &[SourceConfig]) -> Vec<SourceDefinition> {
        Self::name_sources("inline", sources.to_vec())
    }

    fn name_sources(name: &str, configs: Vec<SourceConfig>) -> Vec<SourceDefinition> {
        if configs.len() == 1 {
            return configs
                .into_iter()
                .map(|config| SourceDefinition::new(name, config))
                .collect();
        }
        configs
            .into_iter()
            .enumerate()
            .map(|(i, config)| SourceDefinition::new(format!("{name}[{i}]"), config))
            .collect()
    }
}
