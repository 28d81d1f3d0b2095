use axum::extract::FromRef;

use std::sync::Arc;
use std::time::Instant;

use super::auth::CredentialValidator;
use super::websocket::ConnectionManager;
use super::ServerConfig;
use crate::tools::Dispatcher;

pub type GuardedDispatcher = Arc<Dispatcher>;
pub type GuardedConnectionManager = Arc<ConnectionManager>;
pub type GuardedValidator = Arc<dyn CredentialValidator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub dispatcher: GuardedDispatcher,
    pub ws_connection_manager: GuardedConnectionManager,
    pub validator: GuardedValidator,
}

impl ServerState {
    pub fn new(config: ServerConfig, dispatcher: GuardedDispatcher, validator: GuardedValidator) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            hash: env!("GIT_HASH").to_string(),
            dispatcher,
            ws_connection_manager: Arc::new(ConnectionManager::new()),
            validator,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedDispatcher {
    fn from_ref(input: &ServerState) -> Self {
        input.dispatcher.clone()
    }
}

impl FromRef<ServerState> for GuardedConnectionManager {
    fn from_ref(input: &ServerState) -> Self {
        input.ws_connection_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedValidator {
    fn from_ref(input: &ServerState) -> Self {
        input.validator.clone()
    }
}
