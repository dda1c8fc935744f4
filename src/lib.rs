pub use database_factory::DatabaseFactory;
pub use error::{Error, Result};
pub use eventstore::{EventStoreDatabase, EventStoreDatabaseBuilder, ImageKind};

pub mod container;
pub mod database_factory;
pub mod docker_client;
pub mod env;
pub mod error;
pub mod eventstore;
pub mod image;

pub fn eventstore() -> EventStoreDatabaseBuilder {
    EventStoreDatabaseBuilder::default()
}
