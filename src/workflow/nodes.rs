//! 节点实现
//!
//! 错误分级遵循统一纪律：判定节点向"最不阻塞"方向 fail-open，可选
//! 媒体增强失败只记日志不阻断；需求构建与检索失败是致命的。所有
//! 吸收掉的错误都带 session_id 与节点名落日志，不存在静默丢弃。

use crate::error::{OrchestratorError, StoreError};
use crate::llm::traits::drain_stream;
use crate::llm::{invoke_structured, DecisionRequest};
use crate::model::{product, ImageAttributes, RequirementSpec, WorkflowStage};
use crate::store::SessionPatch;
use crate::workflow::decisions::{ClarifyDecision, ClarifyingQuestion, MediaOpsDecision};
use crate::workflow::engine::FlowEngine;
use crate::workflow::events::{emit, EventSink, WorkflowEvent};
use crate::workflow::prompts;
use crate::workflow::state::WorkflowState;

impl FlowEngine {
    /// 节点 1：加载或创建会话，归一化输入
    pub(super) async fn parse_input(
        &self,
        state: &mut WorkflowState,
    ) -> Result<(), OrchestratorError> {
        let session = match self.store.get(&state.session_id).await {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => {
                tracing::info!(session_id = %state.session_id, "Creating new session");
                self.store
                    .create(&state.session_id, &state.user_id)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        // 继承会话上的增量上下文
        state.clarification_count = session.clarification_count;
        if state.requirement_spec.is_none() {
            state.requirement_spec = session.requirement_spec;
        }
        state.stage = WorkflowStage::Initial;

        self.store
            .update(
                &state.session_id,
                SessionPatch {
                    last_message: Some(state.user_message.clone()),
                    ..SessionPatch::default()
                },
            )
            .await?;

        tracing::info!(
            session_id = %state.session_id,
            media_count = state.media_refs.len(),
            "Parsed turn input"
        );
        Ok(())
    }

    /// 节点 2：判定是否需要媒体处理（LLM，失败向跳过方向 fail-open）
    pub(super) async fn need_media_ops(&self, state: &mut WorkflowState) {
        let audio_count = state.media_refs.iter().filter(|r| r.is_audio()).count();
        let image_count = state.media_refs.iter().filter(|r| r.is_image()).count();

        // 无媒体则无需询问模型
        if audio_count == 0 && image_count == 0 {
            state.need_stt = false;
            state.need_vision = false;
            state.stage = WorkflowStage::RequirementBuilding;
            return;
        }

        let request =
            DecisionRequest::new(prompts::need_media_ops(&state.user_message, audio_count, image_count))
                .with_max_tokens(500);

        match invoke_structured::<MediaOpsDecision>(self.llm.as_ref(), &request).await {
            Ok(decision) => {
                state.need_stt = decision.need_stt && audio_count > 0;
                state.need_vision = decision.need_vision && image_count > 0;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    node = "need_media_ops",
                    error = %e,
                    "Media judgment unavailable, skipping enrichment"
                );
                state.need_stt = false;
                state.need_vision = false;
            }
        }

        state.stage = if state.need_stt || state.need_vision {
            WorkflowStage::MediaProcessing
        } else {
            WorkflowStage::RequirementBuilding
        };
        tracing::info!(
            session_id = %state.session_id,
            need_stt = state.need_stt,
            need_vision = state.need_vision,
            "Media ops decided"
        );
    }

    /// 节点 3：音频转写（非致命）
    pub(super) async fn transcribe_audio(&self, state: &WorkflowState) -> Option<String> {
        let audio = match state.first_audio_ref() {
            Some(r) => r,
            None => {
                tracing::warn!(session_id = %state.session_id, node = "transcribe_audio", "No audio ref present");
                return None;
            }
        };

        match self.media.transcribe(audio).await {
            Ok(result) => {
                tracing::info!(
                    session_id = %state.session_id,
                    chars = result.transcript.len(),
                    confidence = result.confidence,
                    "Audio transcribed"
                );
                Some(result.transcript)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    node = "transcribe_audio",
                    error = %e,
                    "Transcription failed, continuing without transcript"
                );
                None
            }
        }
    }

    /// 节点 4：图像属性抽取（非致命）
    pub(super) async fn extract_image_attrs(&self, state: &WorkflowState) -> Option<ImageAttributes> {
        let image = match state.first_image_ref() {
            Some(r) => r,
            None => {
                tracing::warn!(session_id = %state.session_id, node = "extract_image_attrs", "No image ref present");
                return None;
            }
        };

        match self.media.extract_image_attributes(image).await {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    node = "extract_image_attrs",
                    error = %e,
                    "Image analysis failed, continuing without attributes"
                );
                None
            }
        }
    }

    /// 节点 5：构建或更新 RequirementSpec（LLM，持续失败致命）
    pub(super) async fn build_requirement(
        &self,
        state: &mut WorkflowState,
    ) -> Result<(), OrchestratorError> {
        let prompt = prompts::build_requirement(
            &state.user_message,
            state.transcript.as_deref(),
            state.image_attributes.as_ref(),
            state.requirement_spec.as_ref(),
        );
        let request = DecisionRequest::new(prompt)
            .with_temperature(0.2)
            .with_max_tokens(1000);

        let spec = invoke_structured::<RequirementSpec>(self.llm.as_ref(), &request).await?;

        tracing::info!(
            session_id = %state.session_id,
            product_type = %spec.product_type,
            "Requirement spec built"
        );

        state.requirement_spec = Some(spec.clone());
        state.stage = WorkflowStage::RequirementBuilding;

        self.store
            .update(
                &state.session_id,
                SessionPatch {
                    requirement_spec: Some(spec),
                    transcript: state.transcript.clone(),
                    image_attributes: state.image_attributes.clone(),
                    ..SessionPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    /// 节点 6：判定是否需要澄清
    ///
    /// 优先级：计数上限强制放行 > 确定性门槛（缺类别或无任何约束）>
    /// LLM 判定（失败 fail-open 放行）。
    pub(super) async fn need_clarify(&self, state: &mut WorkflowState) {
        if state.clarification_count >= self.config.max_clarifications {
            tracing::info!(
                session_id = %state.session_id,
                count = state.clarification_count,
                "Max clarifications reached, proceeding to search"
            );
            state.needs_clarification = false;
            state.stage = WorkflowStage::Searching;
            return;
        }

        let spec = match &state.requirement_spec {
            Some(spec) => spec,
            None => {
                state.needs_clarification = true;
                state.clarification_reason = Some("No requirement spec built".to_string());
                state.stage = WorkflowStage::Clarifying;
                return;
            }
        };

        if !spec.has_product_type() || !spec.has_meaningful_constraint() {
            let mut missing = Vec::new();
            if !spec.has_product_type() {
                missing.push("product type");
            }
            if !spec.has_meaningful_constraint() {
                missing.push("at least one constraint (budget, brand, or key feature)");
            }
            state.needs_clarification = true;
            state.clarification_reason = Some(format!("Missing {}", missing.join(" and ")));
            state.stage = WorkflowStage::Clarifying;
            return;
        }

        let spec_json = serde_json::to_string_pretty(spec).unwrap_or_default();
        let request = DecisionRequest::new(prompts::need_clarify(&spec_json, state.clarification_count))
            .with_max_tokens(300);

        match invoke_structured::<ClarifyDecision>(self.llm.as_ref(), &request).await {
            Ok(decision) => {
                state.needs_clarification = decision.needs_clarification;
                state.clarification_reason = Some(decision.reason);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    node = "need_clarify",
                    error = %e,
                    "Clarify judgment unavailable, proceeding to search"
                );
                state.needs_clarification = false;
            }
        }

        state.stage = if state.needs_clarification {
            WorkflowStage::Clarifying
        } else {
            WorkflowStage::Searching
        };
    }

    /// 节点 7：生成澄清问题并暂停
    ///
    /// 返回 true 表示已暂停；生成失败返回 false，由引擎继续检索。
    pub(super) async fn ask_clarifying_q(
        &self,
        state: &mut WorkflowState,
        events: &EventSink,
    ) -> Result<bool, OrchestratorError> {
        let spec_json = state
            .requirement_spec
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .unwrap_or_else(|| "{}".to_string());
        let reason = state.clarification_reason.clone().unwrap_or_default();

        let request = DecisionRequest::new(prompts::ask_clarifying(
            &state.user_message,
            &spec_json,
            &reason,
            state.clarification_count,
        ))
        .with_temperature(0.3)
        .with_max_tokens(300);

        // 流式生成，Token 边到边转发
        let raw = match self.llm.complete_stream(&request).await {
            Ok(stream) => {
                match drain_stream(stream, |token| {
                    emit(
                        events,
                        WorkflowEvent::Token {
                            content: token.to_string(),
                        },
                    );
                })
                .await
                {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %state.session_id,
                            node = "ask_clarifying_q",
                            error = %e,
                            "Question generation failed, skipping clarification"
                        );
                        state.needs_clarification = false;
                        state.stage = WorkflowStage::Searching;
                        return Ok(false);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    node = "ask_clarifying_q",
                    error = %e,
                    "Question generation failed, skipping clarification"
                );
                state.needs_clarification = false;
                state.stage = WorkflowStage::Searching;
                return Ok(false);
            }
        };

        // 模型未按 JSON 回复时退化为原文问题
        let parsed: ClarifyingQuestion =
            match crate::llm::traits::parse_json_payload::<ClarifyingQuestion>(&raw) {
                Ok(q) => q,
                Err(_) => ClarifyingQuestion {
                    question: raw.trim().to_string(),
                    suggestions: Vec::new(),
                    context: None,
                },
            };

        let count = self
            .store
            .increment_clarification_count(&state.session_id)
            .await?;

        state.clarifying_question = Some(parsed.question.clone());
        state.clarifying_suggestions = parsed.suggestions;
        if parsed.context.is_some() {
            state.clarification_reason = parsed.context;
        }
        state.clarification_count = count;
        state.stage = WorkflowStage::Clarifying;

        tracing::info!(
            session_id = %state.session_id,
            count,
            question = %parsed.question,
            "Clarifying question generated"
        );
        Ok(true)
    }

    /// 节点 8：检索商品（重试耗尽致命）
    pub(super) async fn search_marketplaces(
        &self,
        state: &mut WorkflowState,
        events: &EventSink,
    ) -> Result<(), OrchestratorError> {
        let spec = state.requirement_spec.clone().ok_or_else(|| {
            OrchestratorError::Validation("cannot search without a requirement spec".to_string())
        })?;

        state.stage = WorkflowStage::Searching;
        let results = self.catalog.search(&spec).await?;

        tracing::info!(
            session_id = %state.session_id,
            count = results.products.len(),
            total = results.total_count,
            "Marketplace search completed"
        );
        emit(
            events,
            WorkflowEvent::Thinking {
                message: format!("Found {} products", results.products.len()),
            },
        );

        self.store
            .update(
                &state.session_id,
                SessionPatch {
                    search_results: Some(results.clone()),
                    ..SessionPatch::default()
                },
            )
            .await?;
        state.raw_results = Some(results);
        Ok(())
    }

    /// 节点 9：过滤、打分、排序并组织回复（确定性）
    pub(super) async fn rank_and_compose(&self, state: &mut WorkflowState) {
        state.stage = WorkflowStage::Ranking;

        let spec = state.requirement_spec.clone();
        let products = state
            .raw_results
            .take()
            .map(|r| r.products)
            .unwrap_or_default();

        // 超出价格区间的商品不参与排序
        let mut candidates: Vec<_> = match spec.as_ref().and_then(|s| s.price.as_ref()) {
            Some(price) => products
                .into_iter()
                .filter(|p| price.contains(p.price))
                .collect(),
            None => products,
        };

        if candidates.is_empty() {
            state.ranked_results = Vec::new();
            state.final_response = Some(
                "I couldn't find any products matching your requirements. \
                 Would you like to adjust your criteria?"
                    .to_string(),
            );
            return;
        }

        let default_spec = RequirementSpec::new("");
        let spec_ref = spec.as_ref().unwrap_or(&default_spec);
        candidates.sort_by(|a, b| {
            product::rank_score(b, spec_ref)
                .partial_cmp(&product::rank_score(a, spec_ref))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.max_results);

        for (i, item) in candidates.iter_mut().enumerate() {
            let rating = item
                .rating
                .map(|r| format!("rated {:.1}", r))
                .unwrap_or_else(|| "unrated".to_string());
            item.why_ranked = Some(format!(
                "#{}: {} at {:.2} {} on {}",
                i + 1,
                rating,
                item.price,
                item.currency,
                item.marketplace
            ));
        }

        let product_type = spec
            .as_ref()
            .map(|s| s.product_type.clone())
            .unwrap_or_else(|| "your query".to_string());
        state.final_response = Some(format!(
            "I found {} products matching your search for '{}'. Here are the top results:",
            candidates.len(),
            product_type
        ));
        state.ranked_results = candidates;

        tracing::info!(
            session_id = %state.session_id,
            count = state.ranked_results.len(),
            "Results ranked"
        );
    }

    /// 节点 10：终态，持久化最终回复
    pub(super) async fn done(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        state.stage = WorkflowStage::Completed;
        self.store
            .update(
                &state.session_id,
                SessionPatch {
                    stage: Some(WorkflowStage::Completed),
                    final_response: state.final_response.clone(),
                    ..SessionPatch::default()
                },
            )
            .await?;
        tracing::info!(
            session_id = %state.session_id,
            results = state.ranked_results.len(),
            "Workflow completed"
        );
        Ok(())
    }
}
