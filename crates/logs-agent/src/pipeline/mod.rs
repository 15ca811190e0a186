//! 처리/전송 파이프라인
//!
//! 하나의 [`Pipeline`]은 프로세서와 센더를 bounded 채널로 연결한 쌍이며,
//! [`Provider`]가 여러 파이프라인을 소유하고 입력에 라운드로빈으로 나눠 줍니다.
//!
//! ```text
//! input ─▶ [Processor] ─▶ chan ─▶ [Sender] ─▶ collector
//!                                     │
//!                                     └─▶ auditor chan
//! ```

pub mod connection;
pub mod processor;
pub mod provider;
pub mod sender;

use std::sync::Arc;

use tokio::sync::mpsc;

use logship_core::pipeline::Stage;

use crate::health::Catalog;
use crate::message::Message;
use crate::status::AgentCounters;

pub use connection::{BoxConnection, Connection, ConnectionManager, Connector, TcpConnector};
pub use processor::Processor;
pub use provider::{PipelineChannels, Provider, ProviderOptions};
pub use sender::Sender;

/// 프로세서 → 센더 쌍
pub struct Pipeline {
    input: mpsc::Sender<Message>,
    processor: Processor,
    sender: Sender,
}

impl Pipeline {
    /// `index`번째 파이프라인을 만듭니다.
    pub fn new(
        index: usize,
        options: &ProviderOptions,
        auditor: mpsc::Sender<Message>,
        manager: Arc<ConnectionManager>,
        counters: Arc<AgentCounters>,
        catalog: &Catalog,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(options.chan_size);
        let (sender_tx, sender_rx) = mpsc::channel(options.chan_size);

        let processor = Processor::new(
            format!("processor-{index}"),
            &options.api_key,
            &options.logset,
            options.hostname.clone(),
            input_rx,
            sender_tx,
            Arc::clone(&counters),
            catalog,
        );
        let sender = Sender::new(
            format!("sender-{index}"),
            sender_rx,
            auditor,
            manager,
            counters,
            catalog,
        );

        Self {
            input: input_tx,
            processor,
            sender,
        }
    }

    /// 파이프라인 입력 채널
    pub fn input(&self) -> mpsc::Sender<Message> {
        self.input.clone()
    }

    /// 센더, 프로세서 순으로 시작합니다.
    pub async fn start(&self) {
        self.sender.start().await;
        self.processor.start().await;
    }

    /// 프로세서, 센더 순으로 정지합니다.
    pub async fn stop(&self) {
        self.processor.stop().await;
        self.sender.stop().await;
    }
}
