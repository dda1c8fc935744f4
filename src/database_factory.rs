use crate::{
    env::{EnvSource, ProcessEnv, EVENTSTORE_DOCKER_TAG_ENV, SECURE_ENV},
    error::Result,
    eventstore::{EventStoreDatabase, EventStoreDatabaseBuilder, DEFAULT_VERSION},
};
use log::debug;

/// Spawns EventStoreDB containers configured from the environment.
///
/// `EVENTSTORE_DOCKER_TAG_ENV` selects the image tag (`latest` when unset) and
/// `SECURE=true` enables secure mode. Only the exact string `true` counts.
#[derive(Debug, Clone, Default)]
pub struct DatabaseFactory<E = ProcessEnv> {
    env: E,
}

impl DatabaseFactory<ProcessEnv> {
    pub fn from_env() -> Self {
        DatabaseFactory { env: ProcessEnv }
    }
}

impl<E: EnvSource> DatabaseFactory<E> {
    pub fn new(env: E) -> Self {
        DatabaseFactory { env }
    }

    pub fn version(&self) -> String {
        self.env.var_or(EVENTSTORE_DOCKER_TAG_ENV, DEFAULT_VERSION)
    }

    pub fn secure(&self) -> bool {
        self.env
            .var(SECURE_ENV)
            .and_then(|value| value.parse().ok())
            .unwrap_or(false)
    }

    pub fn spawn_builder(&self) -> EventStoreDatabaseBuilder {
        let version = self.version();
        let secure = self.secure();
        debug!("🐋 Resolved EventStoreDB settings: version={version}, secure={secure}");
        EventStoreDatabaseBuilder::default()
            .version(version)
            .secure(secure)
    }

    /// Leaves secure mode to the builder default.
    pub fn populated_database_builder(&self) -> EventStoreDatabaseBuilder {
        let version = self.version();
        debug!("🐋 Resolved populated EventStoreDB settings: version={version}");
        EventStoreDatabaseBuilder::default()
            .grpc_test_data_image()
            .version(version)
    }

    pub async fn spawn(&self) -> Result<EventStoreDatabase> {
        self.spawn_builder().build().await
    }

    pub async fn spawn_populated_database(&self) -> Result<EventStoreDatabase> {
        self.populated_database_builder().build().await
    }
}
