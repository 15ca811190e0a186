#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use logship_agent::{ProcessingRule, apply_rules};
use logship_core::config::{ProcessingRuleConfig, RuleKind};

#[derive(Arbitrary, Debug)]
struct FuzzRule {
    kind: FuzzKind,
    pattern: String,
    placeholder: Option<String>,
}

#[derive(Arbitrary, Debug)]
enum FuzzKind {
    Exclude,
    Include,
    Mask,
}

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    rules: Vec<FuzzRule>,
    content: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    // 컴파일에 실패하는 규칙은 소스 생성 시점에 걸러지므로 건너뜀
    let rules: Vec<ProcessingRule> = input
        .rules
        .iter()
        .take(8)
        .enumerate()
        .filter_map(|(i, r)| {
            let config = ProcessingRuleConfig {
                kind: match r.kind {
                    FuzzKind::Exclude => RuleKind::ExcludeAtMatch,
                    FuzzKind::Include => RuleKind::IncludeAtMatch,
                    FuzzKind::Mask => RuleKind::MaskSequences,
                },
                name: format!("rule{i}"),
                pattern: r.pattern.clone(),
                replace_placeholder: r.placeholder.clone(),
            };
            ProcessingRule::compile("fuzz", &config).ok()
        })
        .collect();

    let outcome = apply_rules(&rules, Bytes::from(input.content));
    if outcome.should_process() {
        assert!(outcome.drop_reason().is_none());
    } else {
        assert!(outcome.drop_reason().is_some());
    }
});
