//! 처리 규칙 엔진 -- 메시지 필터링과 마스킹
//!
//! 소스마다 선언 순서가 있는 규칙 목록을 가지며, 세 종류를 지원합니다.
//!
//! ```yaml
//! log_processing_rules:
//!   - type: exclude_at_match
//!     name: exclude_healthchecks
//!     pattern: "GET /healthz"
//!   - type: include_at_match
//!     name: only_errors
//!     pattern: "ERROR|FATAL"
//!   - type: mask_sequences
//!     name: mask_api_keys
//!     pattern: "api_key=\\w+"
//!     replace_placeholder: "api_key=[redacted]"
//! ```
//!
//! # 평가 순서
//! 1. 규칙을 선언 순서대로 원본 내용에 대해 평가합니다.
//!    `exclude_at_match`가 매치되면 즉시 폐기합니다.
//!    `include_at_match`는 하나라도 매치되면 이후 include 규칙을 건너뜁니다.
//! 2. include 규칙이 있는데 어느 것도 매치되지 않았으면 폐기합니다.
//! 3. 통과한 메시지에 `mask_sequences` 규칙을 선언 순서대로 전역 치환합니다.

pub mod types;

pub use types::ProcessingRule;

use bytes::Bytes;
use regex::bytes::NoExpand;

use logship_core::config::RuleKind;

/// 규칙 평가 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// `exclude_at_match` 규칙에 매치되어 폐기
    Excluded {
        /// 매치된 규칙 이름
        rule: String,
    },
    /// include 규칙이 있었지만 어느 것도 매치되지 않아 폐기
    NotIncluded,
    /// 통과 (마스킹이 적용된 내용)
    Keep(Bytes),
}

impl RuleOutcome {
    /// 메시지를 계속 처리해야 하는지 여부
    pub fn should_process(&self) -> bool {
        matches!(self, Self::Keep(_))
    }

    /// 통과한 경우 변환된 내용을 반환합니다.
    pub fn into_content(self) -> Option<Bytes> {
        match self {
            Self::Keep(content) => Some(content),
            Self::Excluded { .. } | Self::NotIncluded => None,
        }
    }

    /// 메트릭 레이블용 드롭 사유
    pub fn drop_reason(&self) -> Option<&'static str> {
        match self {
            Self::Excluded { .. } => Some("excluded"),
            Self::NotIncluded => Some("not_included"),
            Self::Keep(_) => None,
        }
    }
}

/// 규칙 목록을 메시지 내용에 적용합니다.
pub fn apply_rules(rules: &[ProcessingRule], content: Bytes) -> RuleOutcome {
    let mut has_include = false;
    let mut included = false;

    for rule in rules {
        match rule.kind {
            RuleKind::ExcludeAtMatch => {
                if rule.regex.is_match(&content) {
                    return RuleOutcome::Excluded {
                        rule: rule.name.clone(),
                    };
                }
            }
            RuleKind::IncludeAtMatch => {
                has_include = true;
                if !included && rule.regex.is_match(&content) {
                    included = true;
                }
            }
            RuleKind::MaskSequences => {}
        }
    }

    if has_include && !included {
        return RuleOutcome::NotIncluded;
    }

    let mut content = content;
    for rule in rules.iter().filter(|r| r.kind == RuleKind::MaskSequences) {
        // 치환 문자열의 `$`는 그룹 참조가 아닌 문자 그대로
        let replaced = rule
            .regex
            .replace_all(&content, NoExpand(&rule.replace_placeholder_bytes[..]));
        if let std::borrow::Cow::Owned(masked) = replaced {
            content = Bytes::from(masked);
        }
    }

    RuleOutcome::Keep(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_core::config::ProcessingRuleConfig;

    fn compile(kind: RuleKind, name: &str, pattern: &str, placeholder: Option<&str>) -> ProcessingRule {
        ProcessingRule::compile(
            "test",
            &ProcessingRuleConfig {
                kind,
                name: name.to_owned(),
                pattern: pattern.to_owned(),
                replace_placeholder: placeholder.map(str::to_owned),
            },
        )
        .unwrap()
    }

    fn run(rules: &[ProcessingRule], content: &str) -> Option<String> {
        apply_rules(rules, Bytes::copy_from_slice(content.as_bytes()))
            .into_content()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    #[test]
    fn no_rules_passes_content_through() {
        assert_eq!(run(&[], "hello").as_deref(), Some("hello"));
    }

    #[test]
    fn exclusion() {
        let rules = [compile(RuleKind::ExcludeAtMatch, "e", "world", None)];
        assert_eq!(run(&rules, "hello").as_deref(), Some("hello"));
        assert_eq!(run(&rules, "world"), None);
        assert_eq!(run(&rules, "a brand new world"), None);

        // `$world`는 절대 매치되지 않음
        let rules = [compile(RuleKind::ExcludeAtMatch, "e", "$world", None)];
        assert_eq!(
            run(&rules, "a brand new world").as_deref(),
            Some("a brand new world")
        );
    }

    #[test]
    fn inclusion() {
        let rules = [compile(RuleKind::IncludeAtMatch, "i", "world", None)];
        assert_eq!(run(&rules, "hello"), None);
        assert_eq!(run(&rules, "world").as_deref(), Some("world"));
        assert_eq!(
            run(&rules, "a brand new world").as_deref(),
            Some("a brand new world")
        );

        let rules = [compile(RuleKind::IncludeAtMatch, "i", "^world", None)];
        assert_eq!(run(&rules, "a brand new world"), None);
    }

    #[test]
    fn exclusion_with_inclusion() {
        let rules = [
            compile(RuleKind::ExcludeAtMatch, "exclude_bob", "^bob", None),
            compile(RuleKind::IncludeAtMatch, "include_datadoghq", ".*@datadoghq.com$", None),
        ];
        assert_eq!(run(&rules, "bob@datadoghq.com"), None);
        assert_eq!(
            run(&rules, "bill@datadoghq.com").as_deref(),
            Some("bill@datadoghq.com")
        );
        assert_eq!(run(&rules, "bob@amail.com"), None);
        assert_eq!(run(&rules, "bill@amail.com"), None);
    }

    #[test]
    fn inclusion_declared_before_exclusion_gives_same_verdicts() {
        let rules = [
            compile(RuleKind::IncludeAtMatch, "include_datadoghq", ".*@datadoghq.com$", None),
            compile(RuleKind::ExcludeAtMatch, "exclude_bob", "^bob", None),
        ];
        assert_eq!(run(&rules, "bob@datadoghq.com"), None);
        assert_eq!(
            run(&rules, "bill@datadoghq.com").as_deref(),
            Some("bill@datadoghq.com")
        );
        assert_eq!(run(&rules, "bob@amail.com"), None);
        assert_eq!(run(&rules, "bill@amail.com"), None);
    }

    #[test]
    fn multiple_include_rules_are_or_ed() {
        let rules = [
            compile(RuleKind::IncludeAtMatch, "errors", "ERROR", None),
            compile(RuleKind::IncludeAtMatch, "warnings", "WARN", None),
        ];
        assert!(run(&rules, "WARN disk almost full").is_some());
        assert!(run(&rules, "ERROR disk full").is_some());
        assert!(run(&rules, "INFO all good").is_none());
    }

    #[test]
    fn mask() {
        let rules = [compile(RuleKind::MaskSequences, "m", "world", Some("[masked_world]"))];
        assert_eq!(run(&rules, "hello").as_deref(), Some("hello"));
        assert_eq!(
            run(&rules, "hello world!").as_deref(),
            Some("hello [masked_world]!")
        );

        let rules = [compile(
            RuleKind::MaskSequences,
            "m",
            r"User=\w+@datadoghq.com",
            Some("[masked_user]"),
        )];
        assert_eq!(
            run(&rules, "new test launched by User=beats@datadoghq.com on localhost").as_deref(),
            Some("new test launched by [masked_user] on localhost")
        );

        let rules = [compile(
            RuleKind::MaskSequences,
            "m",
            r"(?:4[0-9]{12}(?:[0-9]{3})?|[25][1-7][0-9]{14}|6(?:011|5[0-9][0-9])[0-9]{12}|3[47][0-9]{13}|3(?:0[0-5]|[68][0-9])[0-9]{11}|(?:2131|1800|35\d{3})\d{11})",
            Some("[masked_credit_card]"),
        )];
        assert_eq!(
            run(&rules, "The credit card 4323124312341234 was used to buy some time").as_deref(),
            Some("The credit card [masked_credit_card] was used to buy some time")
        );
    }

    #[test]
    fn mask_replaces_every_occurrence() {
        let rules = [compile(RuleKind::MaskSequences, "m", r"\d", Some("#"))];
        assert_eq!(run(&rules, "a1b22c333").as_deref(), Some("a#b##c###"));
    }

    #[test]
    fn mask_placeholder_dollar_is_literal() {
        let rules = [compile(RuleKind::MaskSequences, "m", r"(\d+)", Some("$1-$"))];
        assert_eq!(run(&rules, "id 42").as_deref(), Some("id $1-$"));
    }

    #[test]
    fn masks_apply_in_order_on_already_masked_content() {
        let rules = [
            compile(RuleKind::MaskSequences, "first", "secret", Some("[token]")),
            compile(RuleKind::MaskSequences, "second", r"\[token\]", Some("***")),
        ];
        assert_eq!(run(&rules, "my secret").as_deref(), Some("my ***"));
    }

    #[test]
    fn filters_see_raw_content_before_masking() {
        let rules = [
            compile(RuleKind::MaskSequences, "mask", "password=\\S+", Some("password=***")),
            compile(RuleKind::ExcludeAtMatch, "drop", "password=hunter2", None),
        ];
        assert_eq!(run(&rules, "login password=hunter2"), None);
        assert_eq!(
            run(&rules, "login password=other").as_deref(),
            Some("login password=***")
        );
    }

    #[test]
    fn outcome_helpers() {
        let excluded = RuleOutcome::Excluded { rule: "x".into() };
        assert!(!excluded.should_process());
        assert_eq!(excluded.drop_reason(), Some("excluded"));
        assert_eq!(RuleOutcome::NotIncluded.drop_reason(), Some("not_included"));
        assert!(RuleOutcome::Keep(Bytes::new()).should_process());
    }
}
