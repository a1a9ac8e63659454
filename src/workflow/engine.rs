//! 工作流引擎
//!
//! 固定拓扑的执行器：按路由规则依次执行节点，每个节点完成后写断点
//! 并更新会话阶段。澄清暂停建模为"运行终止 + 断点"，不占用任何
//! 任务等待用户回答；恢复是一次全新调用，从断点记录的节点重入。
//! 同一会话的运行由会话级 FIFO 锁串行化（单写者约束），后到的
//! 消息排队而不是交错执行。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::collab::{MediaCollaborator, SearchCollaborator};
use crate::error::OrchestratorError;
use crate::llm::DecisionClient;
use crate::model::{ProductResult, WorkflowStage};
use crate::store::{SessionPatch, SessionStore};
use crate::workflow::events::{emit, EventSink, WorkflowEvent};
use crate::workflow::state::{Checkpoint, Node, TurnInput, WorkflowState};

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 每会话澄清上限，到达后强制进入检索
    pub max_clarifications: u32,
    /// 排序后保留的最大结果数
    pub max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_clarifications: 2,
            max_results: 10,
        }
    }
}

/// 一次运行的终态
#[derive(Debug)]
pub enum RunOutcome {
    /// 正常完成，结果已通过事件下发
    Completed {
        products: Vec<ProductResult>,
        summary: String,
    },
    /// 已发出澄清问题并暂停，等待下一轮输入
    Paused { question: String },
    /// 致命失败，会话置为 failed
    Failed {
        code: &'static str,
        message: String,
    },
}

/// 节点执行后的走向
pub(super) enum Transition {
    Next(Node),
    Pause,
    Finished,
}

/// 买方流程引擎
pub struct FlowEngine {
    pub(super) store: Arc<dyn SessionStore>,
    pub(super) llm: Arc<dyn DecisionClient>,
    pub(super) media: Arc<dyn MediaCollaborator>,
    pub(super) catalog: Arc<dyn SearchCollaborator>,
    pub(super) config: EngineConfig,
    /// 会话级运行锁：同一 session_id 至多一个运行在写
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FlowEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn DecisionClient>,
        media: Arc<dyn MediaCollaborator>,
        catalog: Arc<dyn SearchCollaborator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            llm,
            media,
            catalog,
            config,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 处理一轮用户输入：全新运行或从断点恢复
    pub async fn run_turn(&self, turn: TurnInput, events: &EventSink) -> RunOutcome {
        if let Err(reason) = turn.validate() {
            emit(
                events,
                WorkflowEvent::Failed {
                    code: "validation_error",
                    message: reason.clone(),
                    recoverable: false,
                },
            );
            return RunOutcome::Failed {
                code: "validation_error",
                message: reason,
            };
        }

        let lock = self.session_lock(&turn.session_id).await;
        let _guard = lock.lock().await;

        let checkpoint = match self.store.load_checkpoint(&turn.session_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(session_id = %turn.session_id, error = %e, "Checkpoint load failed, starting fresh");
                None
            }
        };

        let (mut state, mut node) = match checkpoint {
            Some(ckpt) => {
                tracing::info!(
                    session_id = %turn.session_id,
                    next_node = %ckpt.next_node,
                    "Resuming workflow from checkpoint"
                );
                let mut state = ckpt.state;
                state.merge_turn(&turn);
                // 恢复路径不经过 ParseInput，入站消息在此落库
                if let Err(e) = self
                    .store
                    .update(
                        &turn.session_id,
                        SessionPatch {
                            last_message: Some(state.user_message.clone()),
                            ..SessionPatch::default()
                        },
                    )
                    .await
                {
                    tracing::warn!(session_id = %turn.session_id, error = %e, "Failed to record resumed message");
                }
                (state, ckpt.next_node)
            }
            None => (WorkflowState::new(&turn), Node::ParseInput),
        };

        loop {
            emit(
                events,
                WorkflowEvent::Progress {
                    node,
                    message: format!("Executing: {}", node),
                },
            );

            match self.execute_node(node, &mut state, events).await {
                Ok(Transition::Next(next)) => {
                    if let Err(e) = self.checkpoint(&state, next).await {
                        return self.fail(&mut state, e.into(), events).await;
                    }
                    node = next;
                }
                Ok(Transition::Pause) => {
                    if let Err(e) = self.checkpoint(&state, Node::BuildRequirement).await {
                        return self.fail(&mut state, e.into(), events).await;
                    }
                    let question = state
                        .clarifying_question
                        .clone()
                        .unwrap_or_default();
                    emit(
                        events,
                        WorkflowEvent::Clarification {
                            question: question.clone(),
                            suggestions: state.clarifying_suggestions.clone(),
                            context: state.clarification_reason.clone(),
                        },
                    );
                    tracing::info!(session_id = %state.session_id, "Workflow paused for clarification");
                    return RunOutcome::Paused { question };
                }
                Ok(Transition::Finished) => {
                    if let Err(e) = self.store.clear_checkpoints(&state.session_id).await {
                        tracing::warn!(session_id = %state.session_id, error = %e, "Checkpoint cleanup failed");
                    }
                    let summary = state.final_response.clone().unwrap_or_default();
                    emit(
                        events,
                        WorkflowEvent::Results {
                            products: state.ranked_results.clone(),
                            requirement_spec: state.requirement_spec.clone(),
                            summary: summary.clone(),
                        },
                    );
                    emit(
                        events,
                        WorkflowEvent::Done {
                            message: summary.clone(),
                        },
                    );
                    return RunOutcome::Completed {
                        products: state.ranked_results.clone(),
                        summary,
                    };
                }
                Err(e) => return self.fail(&mut state, e, events).await,
            }
        }
    }

    /// 节点分派与路由
    async fn execute_node(
        &self,
        node: Node,
        state: &mut WorkflowState,
        events: &EventSink,
    ) -> Result<Transition, OrchestratorError> {
        state.trace(node);
        match node {
            Node::ParseInput => {
                self.parse_input(state).await?;
                Ok(Transition::Next(Node::NeedMediaOps))
            }
            Node::NeedMediaOps => {
                self.need_media_ops(state).await;
                let next = match (state.need_stt, state.need_vision) {
                    (false, false) => Node::BuildRequirement,
                    (true, _) => Node::TranscribeAudio,
                    (false, true) => Node::ExtractImageAttrs,
                };
                Ok(Transition::Next(next))
            }
            Node::TranscribeAudio => {
                if state.need_vision {
                    // 两个媒体步骤并行执行
                    state.trace(Node::ExtractImageAttrs);
                    let (transcript, attrs) = tokio::join!(
                        self.transcribe_audio(state),
                        self.extract_image_attrs(state)
                    );
                    state.transcript = transcript;
                    state.image_attributes = attrs;
                } else {
                    state.transcript = self.transcribe_audio(state).await;
                }
                Ok(Transition::Next(Node::BuildRequirement))
            }
            Node::ExtractImageAttrs => {
                state.image_attributes = self.extract_image_attrs(state).await;
                Ok(Transition::Next(Node::BuildRequirement))
            }
            Node::BuildRequirement => {
                self.build_requirement(state).await?;
                Ok(Transition::Next(Node::NeedClarify))
            }
            Node::NeedClarify => {
                self.need_clarify(state).await;
                let next = if state.needs_clarification {
                    Node::AskClarifyingQ
                } else {
                    Node::SearchMarketplaces
                };
                Ok(Transition::Next(next))
            }
            Node::AskClarifyingQ => {
                let paused = self.ask_clarifying_q(state, events).await?;
                if paused {
                    Ok(Transition::Pause)
                } else {
                    // 问题生成失败：跳过澄清，直接检索
                    Ok(Transition::Next(Node::SearchMarketplaces))
                }
            }
            Node::SearchMarketplaces => {
                self.search_marketplaces(state, events).await?;
                Ok(Transition::Next(Node::RankAndCompose))
            }
            Node::RankAndCompose => {
                self.rank_and_compose(state).await;
                Ok(Transition::Next(Node::Done))
            }
            Node::Done => {
                self.done(state).await?;
                Ok(Transition::Finished)
            }
        }
    }

    /// 节点执行后的持久化：断点 + 会话阶段
    async fn checkpoint(
        &self,
        state: &WorkflowState,
        next_node: Node,
    ) -> Result<(), crate::error::StoreError> {
        self.store
            .save_checkpoint(Checkpoint::new(state.clone(), next_node))
            .await?;
        self.store
            .update(&state.session_id, SessionPatch::stage(state.stage))
            .await?;
        Ok(())
    }

    /// 致命失败：会话置 failed、记录错误、发一条 error 事件后终止
    async fn fail(
        &self,
        state: &mut WorkflowState,
        error: OrchestratorError,
        events: &EventSink,
    ) -> RunOutcome {
        let node = state.node_trace.last().copied();
        tracing::error!(
            session_id = %state.session_id,
            node = node.map(|n| n.name()).unwrap_or("unknown"),
            error = %error,
            "Workflow run failed"
        );

        state.stage = WorkflowStage::Failed;
        state.error = Some(error.to_string());

        let patch = SessionPatch {
            stage: Some(WorkflowStage::Failed),
            error: Some(error.to_string()),
            ..SessionPatch::default()
        };
        if let Err(e) = self.store.update(&state.session_id, patch).await {
            tracing::error!(session_id = %state.session_id, error = %e, "Failed to persist error state");
        }
        if let Err(e) = self.store.clear_checkpoints(&state.session_id).await {
            tracing::warn!(session_id = %state.session_id, error = %e, "Checkpoint cleanup failed");
        }

        emit(
            events,
            WorkflowEvent::Failed {
                code: error.code(),
                message: error.to_string(),
                recoverable: error.recoverable(),
            },
        );

        RunOutcome::Failed {
            code: error.code(),
            message: error.to_string(),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
