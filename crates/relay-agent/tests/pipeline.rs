use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use relay_agent::pipeline::{
    handle_inbound, process_message, Commands, ContextPolicy, MessageContext, Outcome,
    PipelineError, Reply,
};
use relay_agent::provider::CompletionResponse;
use relay_agent::{
    AgentRuntime, CompletionClient, CompletionRequest, ContextEntry, ContextStore, LlmProvider,
    Prompt, PromptBuilder, ProviderError, ResponseFilter, RetryPolicy,
};
use relay_core::config::{ContextScope, PromptMode};
use relay_core::{BannedSet, InboundMessage};
use relay_memory::{ExchangeLog, ExchangeTag};

/// Provider that replays a fixed list of results, one per call.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Self::with_latency(script, Duration::ZERO)
    }

    /// Every call sleeps for `latency` before answering.
    fn with_latency(script: Vec<Result<String, ProviderError>>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn systems(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| match &r.prompt {
                Prompt::Chat { system, .. } => system.clone(),
                Prompt::Text(t) => t.clone(),
            })
            .collect()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_system(&self) -> String {
        match &self.requests.lock().unwrap().last().unwrap().prompt {
            Prompt::Chat { system, .. } => system.clone(),
            Prompt::Text(t) => t.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.requests.lock().unwrap().push(req.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())));
        next.map(|content| CompletionResponse {
            content,
            model: req.model.clone(),
            stop_reason: "stop".into(),
        })
    }
}

fn fail() -> Result<String, ProviderError> {
    Err(ProviderError::Api {
        status: 500,
        message: "boom".into(),
    })
}

struct TestCtx {
    agent: AgentRuntime,
    windows: ContextStore,
    exchanges: Option<ExchangeLog>,
    banned: BannedSet,
    commands: Commands,
    policy: ContextPolicy,
    shutdown: CancellationToken,
}

impl MessageContext for TestCtx {
    fn agent(&self) -> &AgentRuntime {
        &self.agent
    }
    fn windows(&self) -> &ContextStore {
        &self.windows
    }
    fn exchanges(&self) -> Option<&ExchangeLog> {
        self.exchanges.as_ref()
    }
    fn banned(&self) -> &BannedSet {
        &self.banned
    }
    fn commands(&self) -> &Commands {
        &self.commands
    }
    fn policy(&self) -> &ContextPolicy {
        &self.policy
    }
    fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

fn ctx_with(provider: &Arc<ScriptedProvider>, capacity: usize, streaming: bool) -> TestCtx {
    let client = CompletionClient::new(provider.clone(), streaming, Duration::from_secs(5));
    let agent = AgentRuntime::new(client, PromptBuilder::new(PromptMode::Chat, "You relay."), "m")
        .with_retry(RetryPolicy::new(3, 2, Duration::ZERO))
        .with_filter(ResponseFilter::new("++++"));
    TestCtx {
        agent,
        windows: ContextStore::new(capacity, ContextScope::Chat),
        exchanges: Some(ExchangeLog::in_memory().unwrap()),
        banned: BannedSet::parse("# trolls\n@mallory\n"),
        commands: Commands::default(),
        policy: ContextPolicy::default(),
        shutdown: CancellationToken::new(),
    }
}

fn ctx(provider: &Arc<ScriptedProvider>) -> TestCtx {
    ctx_with(provider, 5, false)
}

fn inbound(user: &str, text: &str) -> InboundMessage {
    InboundMessage {
        conversation_id: "-100".into(),
        user: user.into(),
        user_id: "42".into(),
        text: text.into(),
    }
}

async fn window_of(ctx: &TestCtx, conversation: &str) -> Vec<ContextEntry> {
    let slot = ctx.windows.acquire(conversation);
    let conv = slot.lock().await;
    conv.window.snapshot()
}

#[tokio::test]
async fn ping_pong_exchange() {
    let provider = ScriptedProvider::new(vec![Ok("pong".into())]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("alice", "ping")).await.unwrap();
    assert_eq!(reply, Reply::Send("pong".into()));

    assert_eq!(
        window_of(&ctx, "-100").await,
        vec![ContextEntry::user("alice", "ping"), ContextEntry::response("pong")]
    );

    let log = ctx.exchanges.as_ref().unwrap();
    let rows = log.recent(ExchangeTag::Query, "alice", 10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].request, "ping");
    assert_eq!(rows[0].response, "pong");
    assert_eq!(log.count().unwrap(), 1);
}

#[tokio::test]
async fn streaming_mode_delivers_same_text() {
    let provider = ScriptedProvider::new(vec![Ok("pong".into())]);
    let ctx = ctx_with(&provider, 5, true);
    let reply = handle_inbound(&ctx, &inbound("alice", "ping")).await.unwrap();
    assert_eq!(reply, Reply::Send("pong".into()));
}

#[tokio::test]
async fn full_window_evicts_oldest() {
    let provider = ScriptedProvider::new(vec![Ok("r1".into()), Ok("r2".into()), Ok("r3".into())]);
    let ctx = ctx(&provider);

    for q in ["q1", "q2", "q3"] {
        handle_inbound(&ctx, &inbound("alice", q)).await.unwrap();
    }

    let window = window_of(&ctx, "-100").await;
    assert_eq!(window.len(), 5);
    let texts: Vec<_> = window.iter().map(|e| e.text().to_string()).collect();
    assert_eq!(texts, ["r1", "q2", "r2", "q3", "r3"]);
}

#[tokio::test]
async fn banned_user_gets_nothing() {
    let provider = ScriptedProvider::new(vec![Ok("should not be used".into())]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("mallory", "/ask hi")).await.unwrap();
    assert_eq!(reply, Reply::Silent);
    assert_eq!(provider.calls(), 0);
    assert_eq!(ctx.exchanges.as_ref().unwrap().count().unwrap(), 0);
    assert!(ctx.windows.is_empty());
}

#[tokio::test]
async fn banned_by_numeric_id() {
    let provider = ScriptedProvider::new(vec![]);
    let mut ctx = ctx(&provider);
    ctx.banned = BannedSet::parse("42");
    let reply = handle_inbound(&ctx, &inbound("alice", "hi")).await.unwrap();
    assert_eq!(reply, Reply::Silent);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn always_failing_exhausts_budget() {
    let provider = ScriptedProvider::new(vec![fail(), fail(), fail(), Ok("unused".into())]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("alice", "hi")).await.unwrap();
    assert_eq!(reply, Reply::Silent);
    assert_eq!(provider.calls(), 3);
    assert!(window_of(&ctx, "-100").await.is_empty());

    let rows = ctx
        .exchanges
        .as_ref()
        .unwrap()
        .recent(ExchangeTag::Exhausted, "alice", 10)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].response, "");
}

#[tokio::test]
async fn success_on_second_attempt() {
    let provider = ScriptedProvider::new(vec![fail(), Ok("late".into())]);
    let ctx = ctx(&provider);

    let outcome = process_message(&ctx, &inbound("alice", "hi"), "hi").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Delivered {
            response: "late".into(),
            attempts: 2
        }
    );
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn sentinel_response_is_suppressed_and_logged_empty() {
    let provider = ScriptedProvider::new(vec![Ok("++++".into())]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("alice", "chit chat")).await.unwrap();
    assert_eq!(reply, Reply::Silent);
    assert!(window_of(&ctx, "-100").await.is_empty());

    let rows = ctx
        .exchanges
        .as_ref()
        .unwrap()
        .recent(ExchangeTag::NonQuery, "alice", 10)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].request, "chit chat");
    assert_eq!(rows[0].response, "");
}

#[tokio::test]
async fn empty_response_is_suppressed() {
    let provider = ScriptedProvider::new(vec![Ok("   ".into())]);
    let ctx = ctx(&provider);
    let reply = handle_inbound(&ctx, &inbound("alice", "hm")).await.unwrap();
    assert_eq!(reply, Reply::Silent);
    assert_eq!(ctx.exchanges.as_ref().unwrap().count().unwrap(), 1);
}

#[tokio::test]
async fn remember_suppressed_keeps_user_fragment() {
    let provider = ScriptedProvider::new(vec![Ok("++++".into())]);
    let mut ctx = ctx(&provider);
    ctx.policy.remember_suppressed = true;

    handle_inbound(&ctx, &inbound("alice", "chit chat")).await.unwrap();
    assert_eq!(
        window_of(&ctx, "-100").await,
        vec![ContextEntry::user("alice", "chit chat")]
    );
}

#[tokio::test]
async fn help_bypasses_model() {
    let provider = ScriptedProvider::new(vec![]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("alice", "/help@relay_bot")).await.unwrap();
    assert_eq!(reply, Reply::Send(ctx.commands.help_text().to_string()));
    assert_eq!(provider.calls(), 0);
    assert_eq!(ctx.exchanges.as_ref().unwrap().count().unwrap(), 0);
}

#[tokio::test]
async fn ask_prefix_stripped_before_model() {
    let provider = ScriptedProvider::new(vec![Ok("hello".into())]);
    let ctx = ctx(&provider);

    let reply = handle_inbound(&ctx, &inbound("alice", "/ask hi")).await.unwrap();
    assert_eq!(reply, Reply::Send("hello".into()));

    let req = provider.requests.lock().unwrap()[0].clone();
    let Prompt::Chat { messages, .. } = req.prompt else {
        panic!("expected chat prompt");
    };
    assert_eq!(messages[0].content, ContextEntry::user("alice", "hi").render());

    let rows = ctx
        .exchanges
        .as_ref()
        .unwrap()
        .recent(ExchangeTag::Query, "alice", 1)
        .unwrap();
    assert_eq!(rows[0].request, "hi");
    assert_eq!(rows[0].response, "hello");
}

#[tokio::test]
async fn unknown_command_and_empty_text_are_silent() {
    let provider = ScriptedProvider::new(vec![]);
    let ctx = ctx(&provider);
    for text in ["/start", "", "/ask", "   "] {
        let reply = handle_inbound(&ctx, &inbound("alice", text)).await.unwrap();
        assert_eq!(reply, Reply::Silent, "text {text:?}");
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn conversations_are_isolated() {
    let provider = ScriptedProvider::new(vec![Ok("a".into()), Ok("b".into())]);
    let ctx = ctx(&provider);

    let mut other = inbound("bob", "yo");
    other.conversation_id = "-200".into();
    handle_inbound(&ctx, &inbound("alice", "hi")).await.unwrap();
    handle_inbound(&ctx, &other).await.unwrap();

    assert_eq!(window_of(&ctx, "-100").await.len(), 2);
    assert_eq!(window_of(&ctx, "-200").await.len(), 2);
    // second conversation's prompt carries none of the first one's context
    assert!(!provider.last_system().contains("hi"));
}

#[tokio::test]
async fn context_reaches_next_prompt() {
    let provider = ScriptedProvider::new(vec![Ok("pong".into()), Ok("again".into())]);
    let ctx = ctx(&provider);

    handle_inbound(&ctx, &inbound("alice", "ping")).await.unwrap();
    handle_inbound(&ctx, &inbound("alice", "more")).await.unwrap();

    let system = provider.last_system();
    assert!(system.starts_with("You relay.\nContext messages:"));
    assert!(system.contains("Message: ping"));
    assert!(system.contains("pong"));
}

#[tokio::test]
async fn rehydrates_fresh_window_from_log() {
    let provider = ScriptedProvider::new(vec![Ok("fresh".into())]);
    let mut ctx = ctx(&provider);
    ctx.policy.rehydrate = true;

    let log = ctx.exchanges.as_ref().unwrap();
    log.record(ExchangeTag::Query, "alice", "old q", "old a").unwrap();
    log.record(ExchangeTag::NonQuery, "alice", "noise", "").unwrap();

    handle_inbound(&ctx, &inbound("alice", "new q")).await.unwrap();

    let texts: Vec<_> = window_of(&ctx, "-100")
        .await
        .iter()
        .map(|e| e.text().to_string())
        .collect();
    assert_eq!(texts, ["old q", "old a", "new q", "fresh"]);
    assert!(provider.last_system().contains("old a"));
}

#[tokio::test]
async fn shutdown_cancels_without_logging() {
    let provider = ScriptedProvider::new(vec![Ok("unused".into())]);
    let ctx = ctx(&provider);
    ctx.shutdown.cancel();

    let err = handle_inbound(&ctx, &inbound("alice", "hi")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(ctx.exchanges.as_ref().unwrap().count().unwrap(), 0);
}

#[tokio::test]
async fn runs_without_exchange_log() {
    let provider = ScriptedProvider::new(vec![Ok("pong".into())]);
    let mut ctx = ctx(&provider);
    ctx.exchanges = None;
    let reply = handle_inbound(&ctx, &inbound("alice", "ping")).await.unwrap();
    assert_eq!(reply, Reply::Send("pong".into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_in_one_conversation_serialize() {
    let provider = ScriptedProvider::with_latency(
        (0..8).map(|i| Ok(format!("r{i}"))).collect(),
        Duration::from_millis(20),
    );
    let ctx = Arc::new(ctx_with(&provider, 100, false));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let ctx = Arc::clone(&ctx);
        tasks.push(tokio::spawn(async move {
            handle_inbound(&*ctx, &inbound("alice", &format!("q{i}")))
                .await
                .unwrap()
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    // the conversation lock spans the completion call
    assert_eq!(provider.peak_in_flight(), 1);

    // each prompt already carries the answer to the call before it
    let systems = provider.systems();
    assert_eq!(systems.len(), 8);
    for (i, system) in systems.iter().enumerate().skip(1) {
        assert!(
            system.contains(&format!("r{}", i - 1)),
            "prompt {i} is missing r{}",
            i - 1
        );
    }

    // every exchange landed as an adjacent user/response pair
    let window = window_of(&ctx, "-100").await;
    assert_eq!(window.len(), 16);
    for pair in window.chunks(2) {
        assert!(matches!(pair[0], ContextEntry::User { .. }));
        assert!(matches!(pair[1], ContextEntry::Response { .. }));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_conversations_complete_concurrently() {
    let provider = ScriptedProvider::with_latency(
        (0..4).map(|i| Ok(format!("r{i}"))).collect(),
        Duration::from_millis(100),
    );
    let ctx = Arc::new(ctx_with(&provider, 10, false));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let ctx = Arc::clone(&ctx);
        tasks.push(tokio::spawn(async move {
            let mut msg = inbound("alice", "hi");
            msg.conversation_id = format!("-{i}");
            handle_inbound(&*ctx, &msg).await.unwrap()
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert!(provider.peak_in_flight() > 1);
}

#[tokio::test]
async fn snapshotted_conversation_survives_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![Ok("pong".into()), Ok("again".into())]);
    let mut ctx = ctx(&provider);
    ctx.windows = ContextStore::new(5, ContextScope::Chat).with_snapshot_dir(dir.path());

    handle_inbound(&ctx, &inbound("alice", "ping")).await.unwrap();
    assert!(ctx.windows.is_empty());

    handle_inbound(&ctx, &inbound("alice", "more")).await.unwrap();
    assert!(provider.last_system().contains("pong"));
}

#[tokio::test]
async fn global_scope_shares_context_across_chats() {
    let provider = ScriptedProvider::new(vec![Ok("a".into()), Ok("b".into())]);
    let mut ctx = ctx(&provider);
    ctx.windows = ContextStore::new(5, ContextScope::Global);

    let mut other = inbound("bob", "yo");
    other.conversation_id = "-200".into();
    handle_inbound(&ctx, &inbound("alice", "hi there")).await.unwrap();
    handle_inbound(&ctx, &other).await.unwrap();

    assert_eq!(window_of(&ctx, relay_agent::store::GLOBAL_KEY).await.len(), 4);
    assert!(provider.last_system().contains("hi there"));
}
