//! 스테이지 그룹 -- 병렬/직렬 생명주기 합성
//!
//! 그룹도 [`Stage`]이므로 자유롭게 중첩할 수 있습니다.
//!
//! | 그룹 | start | stop |
//! |------|-------|------|
//! | [`ParallelGroup`] | 모든 자식을 동시에 시작하고 즉시 반환 | 모든 자식을 동시에 정지하고 전부 끝날 때까지 대기 |
//! | [`SerialGroup`] | 추가 역순으로 하나씩 시작 | 추가 순서대로 하나씩 정지 |
//!
//! 직렬 그룹에 `[입력, 파이프라인, 감사기]` 순서로 넣으면 소비자가 생산자보다
//! 먼저 시작되고, 정지 시에는 생산자가 먼저 멈춘 뒤 하류가 비워집니다.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use logship_core::pipeline::{BoxFuture, Stage};

/// 자식을 동시에 시작/정지하는 그룹
pub struct ParallelGroup {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    /// 아직 끝나지 않았을 수 있는 start 태스크
    starting: Mutex<Vec<JoinHandle<()>>>,
}

impl ParallelGroup {
    /// 새 병렬 그룹을 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            starting: Mutex::new(Vec::new()),
        }
    }

    /// 자식 스테이지를 추가합니다.
    pub fn add(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// 자식 스테이지를 추가하고 자신을 반환합니다.
    pub fn with(mut self, stage: Arc<dyn Stage>) -> Self {
        self.add(stage);
        self
    }

    /// 자식 수
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 자식이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Stage for ParallelGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut starting = self.starting.lock().await;
            for stage in &self.stages {
                let stage = Arc::clone(stage);
                starting.push(tokio::spawn(async move { stage.start().await }));
            }
            tracing::debug!(group = %self.name, children = self.stages.len(), "parallel group started");
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // 진행 중인 start가 끝난 뒤에 stop해야 시작 도중의 자원이 새지 않음
            let starting: Vec<_> = self.starting.lock().await.drain(..).collect();
            for handle in starting {
                if let Err(e) = handle.await {
                    tracing::warn!(group = %self.name, error = %e, "child start task failed");
                }
            }

            let mut set = JoinSet::new();
            for stage in &self.stages {
                let stage = Arc::clone(stage);
                set.spawn(async move { stage.stop().await });
            }
            while let Some(result) = set.join_next().await {
                if let Err(e) = result {
                    tracing::warn!(group = %self.name, error = %e, "child stop task failed");
                }
            }
            tracing::debug!(group = %self.name, "parallel group stopped");
        })
    }
}

/// 자식을 순서대로 시작/정지하는 그룹
pub struct SerialGroup {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl SerialGroup {
    /// 새 직렬 그룹을 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// 자식 스테이지를 추가합니다. 먼저 추가한 것이 데이터 흐름의 상류입니다.
    pub fn add(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// 자식 스테이지를 추가하고 자신을 반환합니다.
    pub fn with(mut self, stage: Arc<dyn Stage>) -> Self {
        self.add(stage);
        self
    }

    /// 자식 수
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 자식이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Stage for SerialGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for stage in self.stages.iter().rev() {
                tracing::debug!(group = %self.name, stage = stage.name(), "starting stage");
                stage.start().await;
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for stage in &self.stages {
                tracing::debug!(group = %self.name, stage = stage.name(), "stopping stage");
                stage.stop().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// 호출 순서를 공유 로그에 기록하는 스테이지
    struct Recorder {
        name: String,
        log: Arc<std::sync::Mutex<Vec<String>>>,
        stop_delay: Duration,
    }

    impl Recorder {
        fn new(name: &str, log: &Arc<std::sync::Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                log: Arc::clone(log),
                stop_delay: Duration::ZERO,
            })
        }

        fn slow(name: &str, log: &Arc<std::sync::Mutex<Vec<String>>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_owned(),
                log: Arc::clone(log),
                stop_delay: delay,
            })
        }
    }

    impl Stage for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("start:{}", self.name));
            })
        }

        fn stop(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                tokio::time::sleep(self.stop_delay).await;
                self.log.lock().unwrap().push(format!("stop:{}", self.name));
            })
        }
    }

    fn entries(log: &Arc<std::sync::Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn serial_group_starts_in_reverse_and_stops_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = SerialGroup::new("serial")
            .with(Recorder::new("A", &log))
            .with(Recorder::new("B", &log))
            .with(Recorder::new("C", &log));

        group.start().await;
        assert_eq!(entries(&log), vec!["start:C", "start:B", "start:A"]);

        log.lock().unwrap().clear();
        group.stop().await;
        assert_eq!(entries(&log), vec!["stop:A", "stop:B", "stop:C"]);
    }

    #[tokio::test]
    async fn parallel_stop_waits_for_every_child() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let delay = Duration::from_millis(100);
        let group = ParallelGroup::new("parallel")
            .with(Recorder::new("fast", &log))
            .with(Recorder::slow("slow", &log, delay));

        group.start().await;
        let begin = Instant::now();
        group.stop().await;
        assert!(begin.elapsed() >= delay);

        let log = entries(&log);
        assert!(log.contains(&"stop:fast".to_owned()));
        assert!(log.contains(&"stop:slow".to_owned()));
    }

    #[tokio::test]
    async fn parallel_stop_waits_for_pending_starts() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = ParallelGroup::new("parallel")
            .with(Recorder::new("A", &log))
            .with(Recorder::new("B", &log));

        group.start().await;
        group.stop().await;

        let log = entries(&log);
        for name in ["A", "B"] {
            let started = log.iter().position(|e| *e == format!("start:{name}")).unwrap();
            let stopped = log.iter().position(|e| *e == format!("stop:{name}")).unwrap();
            assert!(started < stopped);
        }
    }

    #[tokio::test]
    async fn nested_groups_drain_inputs_first() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let inputs = ParallelGroup::new("inputs")
            .with(Recorder::new("files", &log))
            .with(Recorder::new("network", &log));
        let pipeline = SerialGroup::new("agent")
            .with(Arc::new(inputs))
            .with(Recorder::new("pipeline", &log))
            .with(Recorder::new("auditor", &log));

        pipeline.start().await;
        pipeline.stop().await;

        let log = entries(&log);
        let pos = |e: &str| log.iter().position(|x| x == e).unwrap();
        assert!(pos("start:auditor") < pos("start:pipeline"));
        assert!(pos("stop:files") < pos("stop:pipeline"));
        assert!(pos("stop:network") < pos("stop:pipeline"));
        assert!(pos("stop:pipeline") < pos("stop:auditor"));
    }

    #[tokio::test]
    async fn empty_groups_are_noops() {
        let parallel = ParallelGroup::new("empty");
        let serial = SerialGroup::new("empty");
        assert!(parallel.is_empty());
        assert!(serial.is_empty());
        parallel.start().await;
        parallel.stop().await;
        serial.start().await;
        serial.stop().await;
    }
}
