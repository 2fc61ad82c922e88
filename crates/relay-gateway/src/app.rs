use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_agent::pipeline::{Commands, ContextPolicy, MessageContext};
use relay_agent::{
    AgentRuntime, CompletionClient, ContextStore, LlmProvider, OpenAiProvider, PromptBuilder,
    ResponseFilter, RetryPolicy,
};
use relay_core::config::read_optional_text;
use relay_core::{BannedSet, RelayConfig};
use relay_memory::ExchangeLog;

/// Central shared state, passed as `Arc<AppState>` to the channel adapter.
pub struct AppState {
    pub config: RelayConfig,
    pub agent: AgentRuntime,
    pub windows: ContextStore,
    pub exchanges: Option<ExchangeLog>,
    pub banned: BannedSet,
    pub commands: Commands,
    pub policy: ContextPolicy,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire every subsystem from config. Missing configured files are fatal.
    pub fn build(
        config: RelayConfig,
        provider: Arc<dyn LlmProvider>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let preamble = read_optional_text(config.agent.preamble_path.as_deref())?;
        let postamble = read_optional_text(config.agent.postamble_path.as_deref())?;
        let help = read_optional_text(config.commands.help_path.as_deref())?;
        let banned = match config.commands.banned_path.as_deref() {
            Some(path) => BannedSet::load(Path::new(path))?,
            None => BannedSet::default(),
        };
        info!(banned = banned.len(), "banned list loaded");

        let client = CompletionClient::new(
            provider,
            config.agent.stream,
            Duration::from_secs(config.agent.request_timeout_secs),
        );
        let prompt = PromptBuilder::new(config.agent.prompt_mode, preamble.unwrap_or_default())
            .with_postamble(postamble.unwrap_or_default());
        let agent = AgentRuntime::new(client, prompt, config.agent.resolved_model())
            .with_retry(RetryPolicy::new(
                config.context.retry_budget,
                config.context.shrink_step,
                Duration::from_millis(config.context.retry_delay_ms),
            ))
            .with_filter(ResponseFilter::new(config.filter.sentinel.clone()))
            .with_sampling(config.agent.max_tokens, config.agent.temperature);

        let mut windows = ContextStore::new(config.context.capacity, config.context.scope);
        if let Some(dir) = &config.context.snapshot_dir {
            windows = windows.with_snapshot_dir(dir);
        }

        let exchanges = if config.database.enabled {
            let path = Path::new(&config.database.path);
            ensure_parent_dir(path)?;
            info!(path = %path.display(), "opening SQLite database");
            Some(ExchangeLog::new(relay_memory::db::open(path)?))
        } else {
            info!("exchange log disabled");
            None
        };

        let commands = Commands::from_config(&config.commands, help);
        let policy = ContextPolicy {
            remember_suppressed: config.context.remember_suppressed,
            rehydrate: config.context.rehydrate,
        };

        Ok(Self {
            config,
            agent,
            windows,
            exchanges,
            banned,
            commands,
            policy,
            shutdown,
        })
    }
}

/// The production provider for a config.
pub fn build_provider(config: &RelayConfig, api_key: String) -> Arc<dyn LlmProvider> {
    Arc::new(OpenAiProvider::new(api_key, Some(config.agent.base_url.clone())))
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

impl MessageContext for AppState {
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
