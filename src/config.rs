//! Node configuration.
//!
//! Parsed from command-line flags with environment fallbacks.

use crate::coordinator::coordinator::CoordinatorSettings;
use crate::dataset::entity::EntitySettings;
use crate::membership::directory::DirectoryTiming;
use crate::membership::strategy::StrategyKind;
use crate::router::router::RouterSettings;
use crate::scoring::scorer::{ChatScorer, KeywordScorer, Scorer};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Port offset between the gossip socket and the HTTP listener.
const HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// One standalone node, no gossip.
    Single,
    /// Gossip with seeds and share datasets across nodes.
    Clustered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScorerKind {
    Keyword,
    Chat,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "dataset-node", version, about = "Distributed dataset search node")]
pub struct NodeConfig {
    /// UDP gossip address.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// HTTP address. Defaults to the gossip port + 1000.
    #[arg(long, env = "HTTP_ADDR")]
    pub http: Option<SocketAddr>,

    /// Seed node gossip addresses. Empty for the founder.
    #[arg(long = "seed", env = "SEED_NODES", value_delimiter = ',')]
    pub seeds: Vec<SocketAddr>,

    #[arg(long, value_enum, env = "NODE_PROFILE", default_value_t = Profile::Clustered)]
    pub profile: Profile,

    #[arg(long, value_enum, env = "PARTITION_STRATEGY", default_value_t = StrategyKind::KeepOldest)]
    pub strategy: StrategyKind,

    /// Root of the dataset store.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 5_000)]
    pub suspect_after_ms: u64,

    #[arg(long, default_value_t = 15_000)]
    pub stability_window_ms: u64,

    #[arg(long, default_value_t = 64)]
    pub inbox_capacity: usize,

    #[arg(long, default_value_t = 120)]
    pub idle_timeout_secs: u64,

    #[arg(long, default_value_t = 10_000)]
    pub scorer_timeout_ms: u64,

    /// Keep serving searches from loaded caches in a minority partition.
    #[arg(long)]
    pub allow_stale_reads: bool,

    #[arg(long, default_value_t = 3)]
    pub max_redirects: usize,

    #[arg(long, value_enum, env = "SCORER", default_value_t = ScorerKind::Keyword)]
    pub scorer: ScorerKind,

    #[arg(long, env = "SCORER_ENDPOINT", default_value = "https://api.openai.com/v1/chat/completions")]
    pub scorer_endpoint: String,

    #[arg(long, env = "SCORER_MODEL", default_value = "gpt-4o-mini")]
    pub scorer_model: String,

    #[arg(long, env = "SCORER_API_KEY", hide_env_values = true)]
    pub scorer_api_key: Option<String>,
}

impl NodeConfig {
    pub fn http_addr(&self) -> SocketAddr {
        self.http.unwrap_or_else(|| {
            SocketAddr::new(self.bind.ip(), self.bind.port().saturating_add(HTTP_PORT_OFFSET))
        })
    }

    pub fn directory_timing(&self) -> DirectoryTiming {
        DirectoryTiming {
            suspect_after: Duration::from_millis(self.suspect_after_ms),
            stability_window: Duration::from_millis(self.stability_window_ms),
        }
    }

    pub fn entity_settings(&self) -> EntitySettings {
        EntitySettings {
            inbox_capacity: self.inbox_capacity,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            scorer_timeout: Duration::from_millis(self.scorer_timeout_ms),
            allow_stale_reads: self.allow_stale_reads,
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            max_redirects: self.max_redirects,
            ..RouterSettings::default()
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings::default()
    }

    pub fn build_scorer(&self) -> Result<Arc<dyn Scorer>> {
        match self.scorer {
            ScorerKind::Keyword => Ok(Arc::new(KeywordScorer)),
            ScorerKind::Chat => {
                let Some(api_key) = self.scorer_api_key.clone().filter(|key| !key.trim().is_empty()) else {
                    bail!("SCORER_API_KEY is required for the chat scorer");
                };
                Ok(Arc::new(ChatScorer::new(
                    self.scorer_endpoint.clone(),
                    self.scorer_model.clone(),
                    api_key,
                    Duration::from_millis(self.scorer_timeout_ms),
                )))
            }
        }
    }

    /// Sanity checks clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.stability_window_ms < self.suspect_after_ms {
            bail!(
                "stability window ({} ms) must not be shorter than suspect_after ({} ms)",
                self.stability_window_ms,
                self.suspect_after_ms
            );
        }
        if self.inbox_capacity == 0 {
            bail!("inbox capacity must be positive");
        }
        if self.profile == Profile::Single && !self.seeds.is_empty() {
            bail!("seed nodes make no sense for the single profile");
        }
        Ok(())
    }
}
