//! 파이프라인 제공자
//!
//! 입력 스테이지는 [`PipelineChannels::next_pipeline_chan`]으로 메시지를 넣을 채널을
//! 받습니다. 채널은 파이프라인 사이에서 라운드로빈으로 돌아갑니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::mpsc;

use logship_core::pipeline::{BoxFuture, Stage};

use crate::config::AgentConfig;
use crate::health::Catalog;
use crate::message::Message;
use crate::pipeline::Pipeline;
use crate::pipeline::connection::ConnectionManager;
use crate::status::AgentCounters;

/// 입력이 메시지를 넣을 채널을 얻는 곳
///
/// [`Provider`]가 기본 구현이며, 테스트에서는 채널 하나로 대신할 수 있습니다.
pub trait PipelineChannels: Send + Sync {
    /// 다음 입력 채널
    fn next_pipeline_chan(&self) -> mpsc::Sender<Message>;
}

impl PipelineChannels for mpsc::Sender<Message> {
    fn next_pipeline_chan(&self) -> mpsc::Sender<Message> {
        self.clone()
    }
}

/// 파이프라인 구성 값
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// 파이프라인 수 (최소 1)
    pub pipelines: usize,
    /// 채널 용량
    pub chan_size: usize,
    /// API 키
    pub api_key: String,
    /// logset
    pub logset: String,
    /// 메타데이터에 쓰는 호스트명
    pub hostname: String,
}

impl ProviderOptions {
    /// 에이전트 설정에서 추출합니다.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            pipelines: config.pipelines,
            chan_size: config.chan_size,
            api_key: config.api_key.clone(),
            logset: config.logset.clone(),
            hostname: config.hostname.clone(),
        }
    }
}

/// 파이프라인 묶음 스테이지
pub struct Provider {
    pipelines: Vec<Pipeline>,
    inputs: Vec<mpsc::Sender<Message>>,
    cursor: AtomicUsize,
}

impl Provider {
    /// `options.pipelines`개의 파이프라인을 만듭니다.
    pub fn new(
        options: &ProviderOptions,
        auditor: mpsc::Sender<Message>,
        manager: Arc<ConnectionManager>,
        counters: Arc<AgentCounters>,
        catalog: &Catalog,
    ) -> Self {
        let pipelines: Vec<Pipeline> = (0..options.pipelines.max(1))
            .map(|i| {
                Pipeline::new(
                    i,
                    options,
                    auditor.clone(),
                    Arc::clone(&manager),
                    Arc::clone(&counters),
                    catalog,
                )
            })
            .collect();
        let inputs = pipelines.iter().map(Pipeline::input).collect();

        Self {
            pipelines,
            inputs,
            cursor: AtomicUsize::new(0),
        }
    }

    /// 파이프라인 수
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// 파이프라인이 없는지 여부 (생성자가 최소 1개를 보장하므로 항상 `false`)
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl PipelineChannels for Provider {
    /// 다음 파이프라인의 입력 채널 (라운드로빈)
    fn next_pipeline_chan(&self) -> mpsc::Sender<Message> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.inputs.len();
        self.inputs[i].clone()
    }
}

impl Stage for Provider {
    fn name(&self) -> &str {
        "pipeline-provider"
    }

    fn start(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            join_all(self.pipelines.iter().map(Pipeline::start)).await;
            tracing::info!(pipelines = self.pipelines.len(), "pipelines started");
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            join_all(self.pipelines.iter().map(Pipeline::stop)).await;
            tracing::info!("pipelines stopped");
        })
    }
}
