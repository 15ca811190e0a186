//! 컴파일된 처리 규칙

use bytes::Bytes;
use regex::bytes::Regex;

use logship_core::config::{ProcessingRuleConfig, RuleKind};

use crate::error::AgentError;

/// 정규식 최대 크기 (컴파일된 프로그램 기준)
const MAX_REGEX_SIZE: usize = 1024 * 1024;

/// 컴파일된 처리 규칙
///
/// 소스 구성 시점에 한 번 컴파일되며 이후 변경되지 않습니다.
#[derive(Debug, Clone)]
pub struct ProcessingRule {
    /// 규칙 종류
    pub kind: RuleKind,
    /// 규칙 이름
    pub name: String,
    /// 원본 패턴
    pub pattern: String,
    /// 치환 문자열 (`mask_sequences` 전용)
    pub replace_placeholder: Option<String>,
    /// 치환 문자열 바이트 (`mask_sequences` 전용)
    pub replace_placeholder_bytes: Bytes,
    /// 컴파일된 정규식
    pub regex: Regex,
}

impl ProcessingRule {
    /// 원본 정의를 컴파일합니다.
    ///
    /// # Errors
    /// - 패턴이 유효한 정규식이 아닌 경우
    /// - `mask_sequences` 규칙에 `replace_placeholder`가 없는 경우
    pub fn compile(source_name: &str, config: &ProcessingRuleConfig) -> Result<Self, AgentError> {
        let compile_err = |reason: String| AgentError::RuleCompile {
            source_name: source_name.to_owned(),
            rule: config.name.clone(),
            reason,
        };

        if config.name.trim().is_empty() {
            return Err(compile_err("rule name must not be empty".to_owned()));
        }
        if config.pattern.is_empty() {
            return Err(compile_err("pattern must not be empty".to_owned()));
        }

        let placeholder = match config.kind {
            RuleKind::MaskSequences => match &config.replace_placeholder {
                Some(p) => Some(p.clone()),
                None => {
                    return Err(compile_err(
                        "mask_sequences requires replace_placeholder".to_owned(),
                    ));
                }
            },
            RuleKind::ExcludeAtMatch | RuleKind::IncludeAtMatch => None,
        };

        let regex = regex::bytes::RegexBuilder::new(&config.pattern)
            .size_limit(MAX_REGEX_SIZE)
            .build()
            .map_err(|e| compile_err(e.to_string()))?;

        Ok(Self {
            kind: config.kind,
            name: config.name.clone(),
            pattern: config.pattern.clone(),
            replace_placeholder_bytes: placeholder
                .as_deref()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .unwrap_or_default(),
            replace_placeholder: placeholder,
            regex,
        })
    }
}
