//! Wiring of one node.
//!
//! Builds the membership directory, resolver, entity registry, router and
//! coordinator in dependency order and exposes them together with the HTTP
//! routes. Used by the binary and by in-process multi-node tests.

use crate::config::{NodeConfig, Profile};
use crate::coordinator::coordinator::{CoordinatorSettings, SearchCoordinator};
use crate::coordinator::handlers::{
    ENDPOINT_INDEX_DATASET, ENDPOINT_LIST_DATASETS, ENDPOINT_SEARCH, handle_index_dataset,
    handle_list_datasets, handle_search,
};
use crate::correlation::table::Correlations;
use crate::dataset::entity::{EntityContext, EntitySettings};
use crate::dataset::registry::EntityRegistry;
use crate::membership::directory::MembershipDirectory;
use crate::membership::handlers::{ENDPOINT_CLUSTER_STATUS, handle_cluster_status};
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::ownership::resolver::OwnershipResolver;
use crate::persistence::store::{FileStore, Persistence};
use crate::router::handlers::{handle_forward_command, handle_reply};
use crate::router::protocol::{ENDPOINT_FORWARD_COMMAND, ENDPOINT_REPLY};
use crate::router::router::{ReplyDispatcher, RequestRouter, RouterSettings};
use crate::router::transport::{HttpTransport, MemoryNetwork, Transport};
use crate::scoring::scorer::Scorer;

use anyhow::Result;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSettings {
    pub entity: EntitySettings,
    pub router: RouterSettings,
    pub coordinator: CoordinatorSettings,
}

pub struct ClusterNode {
    pub directory: Arc<MembershipDirectory>,
    /// `None` for the single profile and for in-memory nodes.
    pub membership: Option<Arc<MembershipService>>,
    pub resolver: Arc<OwnershipResolver>,
    pub correlations: Arc<Correlations>,
    pub registry: Arc<EntityRegistry>,
    pub router: Arc<RequestRouter>,
    pub coordinator: Arc<SearchCoordinator>,
}

impl ClusterNode {
    /// Wires the components around an existing directory. Must be called
    /// inside a tokio runtime: the hand-off watcher is spawned here.
    pub fn assemble(
        directory: Arc<MembershipDirectory>,
        persistence: Arc<dyn Persistence>,
        scorer: Arc<dyn Scorer>,
        transport: Arc<dyn Transport>,
        settings: NodeSettings,
    ) -> Self {
        let resolver = Arc::new(OwnershipResolver::new());
        let correlations = Correlations::new();

        let replies = Arc::new(ReplyDispatcher::new(
            directory.clone(),
            correlations.clone(),
            transport.clone(),
        ));

        let registry = EntityRegistry::new(EntityContext {
            directory: directory.clone(),
            resolver: resolver.clone(),
            persistence: persistence.clone(),
            scorer,
            replies,
            settings: settings.entity,
        });
        registry.spawn_handoff_watcher();

        let router = RequestRouter::new(
            directory.clone(),
            resolver.clone(),
            registry.clone(),
            transport,
            settings.router,
        );

        let coordinator = SearchCoordinator::new(
            router.clone(),
            correlations.clone(),
            persistence,
            settings.coordinator,
        );

        Self {
            directory,
            membership: None,
            resolver,
            correlations,
            registry,
            router,
            coordinator,
        }
    }

    /// Node reachable only through `network`, for single-process clusters.
    pub fn in_memory(
        network: &Arc<MemoryNetwork>,
        directory: Arc<MembershipDirectory>,
        persistence: Arc<dyn Persistence>,
        scorer: Arc<dyn Scorer>,
        settings: NodeSettings,
    ) -> Self {
        let local = directory.local_id().clone();
        let transport = Arc::new(network.transport(local.clone()));
        let node = Self::assemble(directory, persistence, scorer, transport, settings);
        network.register(local, &node.router, node.correlations.clone());
        node
    }

    /// Bootstraps a deployed node from its configuration.
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let http_addr = config.http_addr();
        let strategy = config.strategy.build();
        let timing = config.directory_timing();

        let membership = match config.profile {
            Profile::Single => None,
            Profile::Clustered => Some(
                MembershipService::bind(config.bind, http_addr, config.seeds.clone(), strategy.clone(), timing)
                    .await?,
            ),
        };

        let directory = match &membership {
            Some(service) => service.directory.clone(),
            None => MembershipDirectory::new(Node::new_local(config.bind, http_addr), Vec::new(), strategy, timing),
        };

        let persistence: Arc<dyn Persistence> = Arc::new(FileStore::new(&config.data_dir));
        let settings = NodeSettings {
            entity: config.entity_settings(),
            router: config.router_settings(),
            coordinator: config.coordinator_settings(),
        };

        let mut node = Self::assemble(
            directory,
            persistence,
            config.build_scorer()?,
            Arc::new(HttpTransport::new()),
            settings,
        );

        if let Some(service) = &membership {
            service.clone().start().await;
        }
        node.membership = membership;

        Ok(node)
    }

    pub fn local_id(&self) -> &NodeId {
        self.directory.local_id()
    }

    pub fn http_router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_INDEX_DATASET, post(handle_index_dataset))
            .route(ENDPOINT_SEARCH, post(handle_search))
            .route(ENDPOINT_LIST_DATASETS, get(handle_list_datasets))
            .route(ENDPOINT_CLUSTER_STATUS, get(handle_cluster_status))
            .route(ENDPOINT_FORWARD_COMMAND, post(handle_forward_command))
            .route(ENDPOINT_REPLY, post(handle_reply))
            .layer(Extension(self.coordinator.clone()))
            .layer(Extension(self.router.clone()))
            .layer(Extension(self.correlations.clone()))
            .layer(Extension(self.directory.clone()))
            .layer(Extension(self.registry.clone()))
    }

    /// Announces departure so peers hand off this node's datasets.
    pub async fn leave(&self) {
        match &self.membership {
            Some(service) => service.leave().await,
            None => {
                self.directory.leave();
            }
        }
    }
}
