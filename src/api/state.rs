// src/api/state.rs

//! # Application State
//!
//! Defines the shared state that will be accessible by all route handlers and
//! connection tasks. Every component receives the registry through here; there
//! is no global registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::Config,
    models::{GroupId, UserId},
    services::{
        bridge::BridgeHandle,
        connection_manager::ConnectionManager,
        dispatcher::Dispatcher,
        history_service::ChatHistory,
        identity_service::{Authenticator, GroupDirectory, NoGroups, StaticTokenAuthenticator},
    },
};

/// The core application state, cheap to clone into every handler and task.
#[derive(Clone)]
pub struct AppState {
    /// Identity stamped on bridge frames sent by this instance.
    pub instance_id: Uuid,
    pub config: Arc<Config>,
    // The registry of live connections on this instance.
    pub connection_manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<Dispatcher>,
    /// `None` when this instance runs without the bridge.
    pub bridge: Option<BridgeHandle>,
    pub authenticator: Arc<dyn Authenticator>,
    pub group_directory: Arc<dyn GroupDirectory>,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates the state for a stand-alone instance; attach a bridge with
    /// [`AppState::with_bridge`].
    pub fn new(config: Config, history: Arc<dyn ChatHistory>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&connection_manager),
            history,
            config.enqueue_timeout,
        ));
        let authenticator = Arc::new(StaticTokenAuthenticator::new(config.auth_token.clone()));

        AppState {
            instance_id: Uuid::new_v4(),
            config: Arc::new(config),
            connection_manager,
            dispatcher,
            bridge: None,
            authenticator,
            group_directory: Arc::new(NoGroups),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_bridge(mut self, bridge: BridgeHandle) -> Self {
        self.instance_id = bridge.instance_id();
        self.bridge = Some(bridge);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_group_directory(mut self, directory: Arc<dyn GroupDirectory>) -> Self {
        self.group_directory = directory;
        self
    }

    /// Adds a group to a user connected on this instance. No-op otherwise.
    pub async fn add_group_id(&self, user_id: UserId, group_id: GroupId) -> bool {
        self.connection_manager.add_group(user_id, group_id).await
    }
}
