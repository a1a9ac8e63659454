//! 买方流程集成测试
//!
//! 用脚本化 LLM 与协作方桩件驱动完整引擎，覆盖：直达检索、澄清
//! 暂停与恢复、澄清上限、检索失败分级、单写者串行化。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use talkshop::collab::{MediaCollaborator, SearchCollaborator};
use talkshop::error::CollabError;
use talkshop::llm::MockDecisionClient;
use talkshop::model::{
    ImageAttributes, Marketplace, MediaKind, MediaReference, ProductResult, RequirementSpec,
    SearchResults, TranscriptionResult, WorkflowStage,
};
use talkshop::store::{MemorySessionStore, SessionStore};
use talkshop::workflow::{
    EngineConfig, FlowEngine, Node, RunOutcome, TurnInput, WorkflowEvent,
};

// ===== 桩件 =====

struct StubMedia;

#[async_trait]
impl MediaCollaborator for StubMedia {
    async fn transcribe(&self, _media: &MediaReference) -> Result<TranscriptionResult, CollabError> {
        Ok(TranscriptionResult {
            transcript: "I need a gaming laptop under twelve hundred".to_string(),
            confidence: 0.94,
            language: Some("en".to_string()),
        })
    }

    async fn extract_image_attributes(
        &self,
        _media: &MediaReference,
    ) -> Result<ImageAttributes, CollabError> {
        Ok(ImageAttributes {
            labels: vec!["laptop".to_string()],
            text: vec!["RTX 4060".to_string()],
            objects: vec!["computer".to_string()],
            colors: vec!["black".to_string()],
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// 可注入延迟与失败的检索桩件，并检测并发重入
struct StubSearch {
    products: Vec<ProductResult>,
    delay: Duration,
    fail: bool,
    calls: AtomicU32,
    active: AtomicUsize,
    overlapped: AtomicBool,
}

impl StubSearch {
    fn ok(products: Vec<ProductResult>) -> Self {
        Self {
            products,
            delay: Duration::from_millis(0),
            fail: false,
            calls: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
        }
    }

    fn slow(products: Vec<ProductResult>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok(products)
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok(Vec::new())
        }
    }
}

#[async_trait]
impl SearchCollaborator for StubSearch {
    async fn search(&self, _spec: &RequirementSpec) -> Result<SearchResults, CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(CollabError::Unavailable {
                service: "catalog-service",
                attempts: 3,
                reason: "HTTP 503".to_string(),
            });
        }
        Ok(SearchResults {
            products: self.products.clone(),
            total_count: self.products.len(),
            marketplaces_searched: vec![Marketplace::Amazon, Marketplace::Walmart],
            search_duration_ms: 12,
        })
    }

    async fn health_check(&self) -> bool {
        !self.fail
    }
}

fn product(id: &str, price: f64, rating: f64) -> ProductResult {
    ProductResult {
        product_id: id.to_string(),
        marketplace: Marketplace::Amazon,
        title: format!("Laptop {}", id),
        description: None,
        price,
        currency: "USD".to_string(),
        rating: Some(rating),
        review_count: Some(120),
        condition: None,
        availability: "in_stock".to_string(),
        image_url: None,
        deep_link: format!("https://example.com/p/{}", id),
        marketplace_url: None,
        seller_name: None,
        attributes: HashMap::new(),
        why_ranked: None,
    }
}

fn audio_ref() -> MediaReference {
    MediaReference {
        kind: MediaKind::Audio,
        storage_key: "uploads/a1.ogg".to_string(),
        content_type: "audio/ogg".to_string(),
        size_bytes: 20_480,
        uploaded_at: None,
    }
}

fn image_ref() -> MediaReference {
    MediaReference {
        kind: MediaKind::Image,
        storage_key: "uploads/i1.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        size_bytes: 81_920,
        uploaded_at: None,
    }
}

struct Harness {
    store: Arc<MemorySessionStore>,
    llm: Arc<MockDecisionClient>,
    search: Arc<StubSearch>,
    engine: Arc<FlowEngine>,
}

fn harness(search: StubSearch) -> Harness {
    let store = Arc::new(MemorySessionStore::new(chrono::Duration::hours(24)));
    let llm = Arc::new(MockDecisionClient::new());
    let search = Arc::new(search);
    let engine = Arc::new(FlowEngine::new(
        store.clone(),
        llm.clone(),
        Arc::new(StubMedia),
        search.clone(),
        EngineConfig::default(),
    ));
    Harness {
        store,
        llm,
        search,
        engine,
    }
}

fn turn(session_id: &str, message: &str) -> TurnInput {
    TurnInput {
        session_id: session_id.to_string(),
        user_id: "user_1".to_string(),
        message: message.to_string(),
        media_refs: Vec::new(),
    }
}

async fn run(engine: &FlowEngine, turn: TurnInput) -> (RunOutcome, Vec<WorkflowEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = engine.run_turn(turn, &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    (outcome, events)
}

const LAPTOP_SPEC: &str = r#"{"product_type": "laptop", "price": {"max": 1000, "currency": "USD"}}"#;
const NO_CLARIFY: &str = r#"{"needs_clarification": false, "reason": "Have product type and price", "confidence": 0.9}"#;
const WANT_CLARIFY: &str = r#"{"needs_clarification": true, "reason": "Budget range too broad", "confidence": 0.7}"#;
const BUDGET_QUESTION: &str = r#"{"question": "What's your budget?", "suggestions": ["Under $500", "Under $1000"], "context": "Budget missing"}"#;

// ===== 场景 A：清晰请求直达结果 =====

#[tokio::test]
async fn clear_request_completes_with_filtered_results() {
    let h = harness(StubSearch::ok(vec![
        product("cheap", 500.0, 4.0),
        product("good", 900.0, 4.7),
        product("over_budget", 1200.0, 5.0),
    ]));

    h.llm.push_reply(LAPTOP_SPEC).push_reply(NO_CLARIFY);

    let (outcome, events) = run(&h.engine, turn("sess_a", "laptop under $1000")).await;

    let products = match outcome {
        RunOutcome::Completed { products, .. } => products,
        other => panic!("expected completion, got {:?}", other),
    };

    // 超预算商品被过滤，剩余全部 ≤ 1000
    assert_eq!(products.len(), 2);
    assert!(products.iter().all(|p| p.price <= 1000.0));
    assert!(products.iter().all(|p| p.why_ranked.is_some()));

    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::Results { products, .. } if products.len() == 2)));
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::Done { .. })));

    let session = h.store.get("sess_a").await.unwrap();
    assert_eq!(session.stage, WorkflowStage::Completed);
    assert!(session.final_response.is_some());
    assert!(session.search_results.is_some());
    assert_eq!(
        session.requirement_spec.as_ref().unwrap().product_type,
        "laptop"
    );
}

// ===== 场景 B：模糊请求触发澄清暂停 =====

#[tokio::test]
async fn ambiguous_request_pauses_for_clarification() {
    let h = harness(StubSearch::ok(Vec::new()));

    // 规格无任何约束：确定性门槛触发澄清，不消耗 LLM 判定
    h.llm
        .push_reply(r#"{"product_type": "phone"}"#)
        .push_reply(BUDGET_QUESTION);

    let (outcome, events) = run(&h.engine, turn("sess_b", "phone")).await;

    match outcome {
        RunOutcome::Paused { question } => assert_eq!(question, "What's your budget?"),
        other => panic!("expected pause, got {:?}", other),
    }

    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::Clarification { suggestions, .. } if suggestions.len() == 2
    )));
    // 问题生成是流式的
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::Token { .. })));

    let session = h.store.get("sess_b").await.unwrap();
    assert_eq!(session.clarification_count, 1);
    assert_eq!(session.stage, WorkflowStage::Clarifying);

    // 断点指向需求构建节点，检索从未执行
    let ckpt = h.store.load_checkpoint("sess_b").await.unwrap().unwrap();
    assert_eq!(ckpt.next_node, Node::BuildRequirement);
    assert!(ckpt.state.node_trace.contains(&Node::AskClarifyingQ));
    assert!(!ckpt.state.node_trace.contains(&Node::SearchMarketplaces));
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
}

// ===== 断点恢复：回答澄清后从记录节点重入（进程重启等价） =====

#[tokio::test]
async fn answer_resumes_at_checkpointed_node() {
    let h = harness(StubSearch::ok(vec![product("p1", 700.0, 4.5)]));

    h.llm
        .push_reply(r#"{"product_type": "phone"}"#)
        .push_reply(BUDGET_QUESTION);
    let (outcome, _) = run(&h.engine, turn("sess_r", "phone")).await;
    assert!(matches!(outcome, RunOutcome::Paused { .. }));

    // 新引擎实例共享同一存储，模拟进程重启后的恢复
    let engine2 = Arc::new(FlowEngine::new(
        h.store.clone(),
        h.llm.clone(),
        Arc::new(StubMedia),
        h.search.clone(),
        EngineConfig::default(),
    ));

    h.llm
        .push_reply(r#"{"product_type": "phone", "price": {"max": 800, "currency": "USD"}}"#)
        .push_reply(NO_CLARIFY);

    let (outcome, events) = run(&engine2, turn("sess_r", "under $800")).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    // 恢复运行的第一个节点是 build_requirement，而非 parse_input
    let first_progress = events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::Progress { node, .. } => Some(*node),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_progress, Node::BuildRequirement);
    assert!(!events.iter().any(|e| matches!(
        e,
        WorkflowEvent::Progress { node: Node::ParseInput, .. }
    )));

    // 完成后断点清除，下一轮将重新从头开始
    assert!(h.store.load_checkpoint("sess_r").await.unwrap().is_none());
    let session = h.store.get("sess_r").await.unwrap();
    assert_eq!(session.stage, WorkflowStage::Completed);
    // 历史保留两个版本
    assert_eq!(session.requirement_history.len(), 2);
}

// ===== 澄清上限：第三轮强制放行 =====

#[tokio::test]
async fn clarification_count_never_exceeds_two() {
    let h = harness(StubSearch::ok(vec![product("p1", 900.0, 4.2)]));

    // 两轮均判定需要澄清
    h.llm
        .push_reply(LAPTOP_SPEC)
        .push_reply(WANT_CLARIFY)
        .push_reply(BUDGET_QUESTION);
    let (o1, _) = run(&h.engine, turn("sess_c", "a nice laptop")).await;
    assert!(matches!(o1, RunOutcome::Paused { .. }));

    h.llm
        .push_reply(LAPTOP_SPEC)
        .push_reply(WANT_CLARIFY)
        .push_reply(BUDGET_QUESTION);
    let (o2, _) = run(&h.engine, turn("sess_c", "a really nice one")).await;
    assert!(matches!(o2, RunOutcome::Paused { .. }));

    let session = h.store.get("sess_c").await.unwrap();
    assert_eq!(session.clarification_count, 2);

    // 第三轮：计数达到上限，不再咨询 LLM，直接检索
    h.llm.push_reply(LAPTOP_SPEC);
    let (o3, _) = run(&h.engine, turn("sess_c", "whatever you pick")).await;
    assert!(matches!(o3, RunOutcome::Completed { .. }));

    let session = h.store.get("sess_c").await.unwrap();
    assert_eq!(session.clarification_count, 2);
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);
}

// ===== 场景 C：检索重试耗尽是致命失败，连接层面可恢复 =====

#[tokio::test]
async fn search_exhaustion_fails_run_with_single_error_event() {
    let h = harness(StubSearch::failing());

    h.llm.push_reply(LAPTOP_SPEC).push_reply(NO_CLARIFY);

    let (outcome, events) = run(&h.engine, turn("sess_f", "laptop under $1000")).await;

    match outcome {
        RunOutcome::Failed { code, .. } => assert_eq!(code, "collaborator_unavailable"),
        other => panic!("expected failure, got {:?}", other),
    }

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Failed {
                code, recoverable, ..
            } => Some((*code, *recoverable)),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![("collaborator_unavailable", true)]);

    let session = h.store.get("sess_f").await.unwrap();
    assert_eq!(session.stage, WorkflowStage::Failed);
    assert!(session.error.is_some());
    // 失败清除断点，下一条消息从头开始
    assert!(h.store.load_checkpoint("sess_f").await.unwrap().is_none());
}

// ===== 单写者：背靠背消息排队执行，不交错 =====

#[tokio::test]
async fn back_to_back_messages_never_interleave() {
    let h = harness(StubSearch::slow(
        vec![product("p1", 600.0, 4.0)],
        Duration::from_millis(80),
    ));

    // 两轮脚本一次性入队：引擎会话锁保证消费顺序
    h.llm
        .push_reply(LAPTOP_SPEC)
        .push_reply(NO_CLARIFY)
        .push_reply(LAPTOP_SPEC)
        .push_reply(NO_CLARIFY);

    let e1 = h.engine.clone();
    let e2 = h.engine.clone();
    let t1 = tokio::spawn(async move { run(&e1, turn("sess_sw", "laptop under $1000")).await });
    let t2 = tokio::spawn(async move { run(&e2, turn("sess_sw", "laptop under $1000")).await });

    let (r1, r2) = tokio::join!(t1, t2);
    assert!(matches!(r1.unwrap().0, RunOutcome::Completed { .. }));
    assert!(matches!(r2.unwrap().0, RunOutcome::Completed { .. }));

    assert_eq!(h.search.calls.load(Ordering::SeqCst), 2);
    assert!(
        !h.search.overlapped.load(Ordering::SeqCst),
        "two runs for one session executed concurrently"
    );
}

// ===== 幂等：同输入两次构建得到相同规格 =====

#[tokio::test]
async fn same_input_builds_identical_spec() {
    let h = harness(StubSearch::ok(vec![product("p1", 600.0, 4.0)]));

    h.llm
        .push_reply(LAPTOP_SPEC)
        .push_reply(NO_CLARIFY)
        .push_reply(LAPTOP_SPEC)
        .push_reply(NO_CLARIFY);

    run(&h.engine, turn("sess_i1", "laptop under $1000")).await;
    run(&h.engine, turn("sess_i2", "laptop under $1000")).await;

    let s1 = h.store.get("sess_i1").await.unwrap();
    let s2 = h.store.get("sess_i2").await.unwrap();
    assert_eq!(s1.requirement_spec, s2.requirement_spec);
}

// ===== 媒体增强：双媒体并行处理后进入需求构建 =====

#[tokio::test]
async fn media_turn_runs_both_enrichment_steps() {
    let h = harness(StubSearch::ok(vec![product("p1", 1100.0, 4.6)]));

    h.llm
        .push_reply(r#"{"need_stt": true, "need_vision": true, "reasoning": "audio and image attached"}"#)
        .push_reply(r#"{"product_type": "laptop", "attributes": {"gpu": "RTX 4060"}, "price": {"max": 1200, "currency": "USD"}}"#)
        .push_reply(NO_CLARIFY);

    let mut t = turn("sess_m", "find me something like this");
    t.media_refs = vec![audio_ref(), image_ref()];

    let (outcome, _) = run(&h.engine, t).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let session = h.store.get("sess_m").await.unwrap();
    assert_eq!(
        session.transcript.as_deref(),
        Some("I need a gaming laptop under twelve hundred")
    );
    let attrs = session.image_attributes.unwrap();
    assert_eq!(attrs.labels, vec!["laptop"]);
}

// ===== 媒体判定失败：fail-open 跳过增强而非中断 =====

#[tokio::test]
async fn media_judgment_failure_skips_enrichment() {
    let h = harness(StubSearch::ok(vec![product("p1", 800.0, 4.1)]));

    h.llm
        .push_failure("model overloaded")
        .push_reply(LAPTOP_SPEC)
        .push_reply(NO_CLARIFY);

    let mut t = turn("sess_fo", "laptop under $1000");
    t.media_refs = vec![audio_ref()];

    let (outcome, _) = run(&h.engine, t).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let session = h.store.get("sess_fo").await.unwrap();
    assert!(session.transcript.is_none());
}

// ===== 结构化输出纠偏：首次非 JSON 时重试一次 =====

#[tokio::test]
async fn malformed_spec_output_is_reprompted_once() {
    let h = harness(StubSearch::ok(vec![product("p1", 800.0, 4.1)]));

    h.llm
        .push_reply("Sure! Let me think about that for you.") // 非 JSON
        .push_reply(LAPTOP_SPEC) // 纠偏后的重试
        .push_reply(NO_CLARIFY);

    let (outcome, _) = run(&h.engine, turn("sess_rp", "laptop under $1000")).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let session = h.store.get("sess_rp").await.unwrap();
    assert_eq!(
        session.requirement_spec.as_ref().unwrap().product_type,
        "laptop"
    );
}
