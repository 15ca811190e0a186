//! 바이트 스트림 → 라인 디코더
//!
//! 입력이 읽은 청크를 줄바꿈 기준으로 나눕니다. 각 출력 라인은 자신이
//! 소비한 입력 바이트 수(`raw_len`, 줄바꿈 포함)를 가지므로, 테일러는
//! 라인 경계에 맞춘 오프셋을 계산할 수 있습니다.
//!
//! # 긴 라인
//! [`MAX_LINE_LEN`]을 넘는 라인은 잘리며, 첫 조각 끝과 이어지는 조각 앞에
//! [`TRUNCATED_MARKER`]가 붙습니다.
//!
//! # 미완성 라인
//! [`DecoderInput::Flush`]를 받으면 남은 부분 라인을 내보냅니다.
//! `Flush` 없이 입력 채널이 닫히면 부분 라인은 버려집니다.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// 최대 라인 길이 (바이트)
pub const MAX_LINE_LEN: usize = 256_000;

/// 잘린 라인 표시
pub const TRUNCATED_MARKER: &[u8] = b"...TRUNCATED...";

/// 디코더 입력
#[derive(Debug, Clone)]
pub enum DecoderInput {
    /// 읽은 바이트
    Data(Bytes),
    /// 남은 부분 라인을 내보냄
    Flush,
}

/// 디코딩된 라인
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    /// 라인 내용 (줄바꿈 제외)
    pub content: Bytes,
    /// 이 라인이 소비한 입력 바이트 수
    pub raw_len: usize,
}

/// 동기 라인 분리기
///
/// [`Decoder`]가 내부적으로 사용하며, 소켓 입력처럼 채널이 필요 없는 곳에서
/// 직접 쓸 수 있습니다.
#[derive(Debug)]
pub struct LineSplitter {
    buf: BytesMut,
    /// 이미 줄바꿈이 없음을 확인한 위치
    scanned: usize,
    /// 직전 조각이 잘렸는지 여부
    truncating: bool,
    max_len: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    /// 기본 최대 길이로 생성합니다.
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }

    /// 최대 라인 길이를 지정하여 생성합니다.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            truncating: false,
            max_len: max_len.max(1),
        }
    }

    /// 아직 라인으로 내보내지 않은 바이트 수
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// 데이터를 추가하고 완성된 라인을 `out`에 넣습니다.
    pub fn push(&mut self, data: &[u8], out: &mut Vec<DecodedLine>) {
        self.buf.extend_from_slice(data);

        loop {
            let newline = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + self.scanned);

            match newline {
                Some(i) if i <= self.max_len => {
                    let mut raw = self.buf.split_to(i + 1);
                    raw.truncate(i);
                    self.scanned = 0;
                    self.emit(raw, i + 1, false, out);
                }
                _ if self.buf.len() > self.max_len => {
                    let piece = self.buf.split_to(self.max_len);
                    self.scanned = 0;
                    self.emit(piece, self.max_len, true, out);
                }
                _ => {
                    self.scanned = self.buf.len();
                    break;
                }
            }
        }
    }

    /// 남은 부분 라인을 내보냅니다.
    pub fn flush(&mut self, out: &mut Vec<DecodedLine>) {
        if self.buf.is_empty() {
            return;
        }
        let rest = self.buf.split();
        let raw_len = rest.len();
        self.scanned = 0;
        self.emit(rest, raw_len, false, out);
    }

    fn emit(&mut self, content: BytesMut, raw_len: usize, truncated: bool, out: &mut Vec<DecodedLine>) {
        let content = if self.truncating || truncated {
            let mut line = BytesMut::with_capacity(content.len() + 2 * TRUNCATED_MARKER.len());
            if self.truncating {
                line.extend_from_slice(TRUNCATED_MARKER);
            }
            line.extend_from_slice(&content);
            if truncated {
                line.extend_from_slice(TRUNCATED_MARKER);
            }
            line.freeze()
        } else {
            content.freeze()
        };
        self.truncating = truncated;
        out.push(DecodedLine { content, raw_len });
    }
}

/// 채널 기반 디코더
pub struct Decoder {
    splitter: LineSplitter,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// 기본 최대 길이로 생성합니다.
    pub fn new() -> Self {
        Self {
            splitter: LineSplitter::new(),
        }
    }

    /// 입력 채널이 닫히거나 출력 채널 수신자가 사라질 때까지 디코딩합니다.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<DecoderInput>,
        output: mpsc::Sender<DecodedLine>,
    ) {
        let mut lines = Vec::new();
        while let Some(event) = input.recv().await {
            match event {
                DecoderInput::Data(data) => self.splitter.push(&data, &mut lines),
                DecoderInput::Flush => self.splitter.flush(&mut lines),
            }
            for line in lines.drain(..) {
                if output.send(line).await.is_err() {
                    tracing::debug!("decoder output closed");
                    return;
                }
            }
        }

        if self.splitter.pending() > 0 {
            tracing::trace!(
                pending = self.splitter.pending(),
                "decoder input closed, dropping partial line"
            );
        }
    }
}
