#![no_main]

use libfuzzer_sys::fuzz_target;

use logship_agent::{LogSources, SourceLoader};

fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    // 파싱과 규칙 컴파일은 에러를 반환할 뿐 패닉하지 않아야 한다
    if let Ok(definitions) = SourceLoader::parse_yaml(yaml, "fuzz") {
        let _ = LogSources::compile(&definitions);
    }
});
