//! 테일링 전략 -- "데이터가 더 올 때까지 기다리거나 종료를 감지"
//!
//! 두 구현이 같은 오프셋/파일 식별 불변식을 지킵니다.
//!
//! - [`PollingStrategy`]: 핸들을 유지한 채 `sleep` 간격으로 다시 읽음
//! - [`ReopenStrategy`]: EOF에서 핸들을 닫고, 경로를 다시 열어 같은 파일이
//!   오프셋 이상으로 자랐을 때 그 위치부터 재개

use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio_util::sync::CancellationToken;

/// 플랫폼 파일 식별자 (Unix: device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    /// 메타데이터에서 식별자를 읽습니다. 지원하지 않는 플랫폼에서는 `None`입니다.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// 메타데이터에서 식별자를 읽습니다. 지원하지 않는 플랫폼에서는 `None`입니다.
    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// 테일러 정지 신호
///
/// `hard`는 즉시 중단, `soft`는 EOF까지 읽은 뒤 중단입니다.
/// 둘 다 설정되면 `hard`가 우선합니다.
#[derive(Debug, Clone, Default)]
pub struct StopSignals {
    /// 즉시 중단
    pub hard: CancellationToken,
    /// EOF 도달 시 중단
    pub soft: CancellationToken,
}

/// 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 다시 읽기
    Ready,
    /// 즉시 중단
    HardStop,
    /// EOF 이후 중단 요청
    SoftStop,
}

/// 리더 루프가 전략에 넘기는 상태
#[derive(Debug)]
pub struct WaitContext {
    /// 테일링 중인 경로
    pub path: PathBuf,
    /// 열린 핸들 (`ReopenStrategy`는 대기 중 `None`으로 둠)
    pub file: Option<File>,
    /// 다음에 읽을 위치
    pub offset: u64,
    /// 처음 열었을 때의 파일 식별자
    pub identity: Option<FileIdentity>,
    /// 대기 간격
    pub sleep: Duration,
    /// 정지 신호
    pub signals: StopSignals,
}

impl WaitContext {
    /// 대기 간격만큼 잠들거나 정지 신호를 받습니다.
    ///
    /// soft 신호는 `Ready`로 돌려 리더가 EOF까지 한 번 더 읽게 합니다.
    async fn sleep_or_stop(&self) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.signals.hard.cancelled() => WaitOutcome::HardStop,
            () = self.signals.soft.cancelled() => WaitOutcome::Ready,
            () = tokio::time::sleep(self.sleep) => WaitOutcome::Ready,
        }
    }
}

/// EOF에서의 대기 방식
pub trait TailStrategy: Send + Sync + 'static {
    /// 로그에 쓰는 이름
    fn name(&self) -> &'static str;

    /// 새 데이터가 올 때까지 기다리거나 정지 신호를 반환합니다.
    ///
    /// `Ready`를 반환할 때 `ctx.file`은 `ctx.offset`에 위치한 핸들이어야 합니다.
    fn wait(&self, ctx: &mut WaitContext) -> impl Future<Output = WaitOutcome> + Send;
}

/// 같은 핸들을 주기적으로 다시 읽는 전략
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingStrategy;

impl TailStrategy for PollingStrategy {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn wait(&self, ctx: &mut WaitContext) -> WaitOutcome {
        ctx.sleep_or_stop().await
    }
}

/// EOF에서 핸들을 닫고 경로를 다시 여는 전략
#[derive(Debug, Clone, Copy, Default)]
pub struct ReopenStrategy;

impl ReopenStrategy {
    /// 같은 파일이 오프셋보다 커졌으면 그 위치로 이동한 핸들을 반환합니다.
    async fn reopen_if_grown(ctx: &WaitContext) -> Option<File> {
        let mut file = File::open(&ctx.path).await.ok()?;
        let metadata = file.metadata().await.ok()?;

        if ctx.identity.is_some() && FileIdentity::from_metadata(&metadata) != ctx.identity {
            // 회전된 파일은 스캐너가 새 테일러로 처리
            return None;
        }
        if metadata.len() <= ctx.offset {
            return None;
        }
        file.seek(SeekFrom::Start(ctx.offset)).await.ok()?;
        Some(file)
    }
}

impl TailStrategy for ReopenStrategy {
    fn name(&self) -> &'static str {
        "reopen"
    }

    async fn wait(&self, ctx: &mut WaitContext) -> WaitOutcome {
        ctx.file = None;

        loop {
            let outcome = ctx.sleep_or_stop().await;
            if outcome == WaitOutcome::HardStop {
                return outcome;
            }

            if let Some(file) = Self::reopen_if_grown(ctx).await {
                ctx.file = Some(file);
                return WaitOutcome::Ready;
            }

            if ctx.signals.soft.is_cancelled() {
                return WaitOutcome::SoftStop;
            }
        }
    }
}
