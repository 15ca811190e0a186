#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use logship_agent::decoder::LineSplitter;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 최대 라인 길이 (0은 1로 보정됨)
    max_len: u8,
    /// 순서대로 밀어 넣을 조각
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: FuzzInput| {
    let mut splitter = LineSplitter::with_max_len(usize::from(input.max_len));
    let mut lines = Vec::new();
    let mut total = 0usize;

    for chunk in input.chunks.iter().take(64) {
        total += chunk.len();
        splitter.push(chunk, &mut lines);
    }
    splitter.flush(&mut lines);

    // 모든 입력 바이트는 정확히 한 라인에 귀속되어야 한다
    let consumed: usize = lines.iter().map(|l| l.raw_len).sum();
    assert_eq!(consumed, total);
    assert_eq!(splitter.pending(), 0);
    assert!(lines.iter().all(|l| !l.content.contains(&b'\n')));
});
