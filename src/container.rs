use crate::{
    docker_client::{ContainerClient, DockerClient},
    error::{Error, Result},
    image::DockerImage,
};
use docker_api::opts::{ContainerCreateOpts, HostPort, PublishPort};
use log::info;
use regex::Regex;
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct GenericContainerBuilder {
    image: DockerImage,
    environment_variables: HashMap<String, String>,
    exposed_tcp_ports: HashMap<u16, Option<u16>>,
    volumes: HashSet<String>,
    labels: HashMap<String, String>,
    wait_strategy_on_startup: ReadyStrategy,
    start_timeout: Duration,
}

impl GenericContainerBuilder {
    fn new(image: DockerImage) -> Self {
        GenericContainerBuilder {
            image,
            environment_variables: HashMap::new(),
            exposed_tcp_ports: HashMap::new(),
            volumes: HashSet::new(),
            labels: HashMap::new(),
            wait_strategy_on_startup: ReadyStrategy::None,
            start_timeout: Duration::from_secs(30),
        }
    }

    pub fn image(&self) -> &DockerImage {
        &self.image
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment_variables.get(key).map(String::as_str)
    }

    /// Container port to fixed host port, `None` for a random one.
    pub fn exposed_tcp_ports(&self) -> &HashMap<u16, Option<u16>> {
        &self.exposed_tcp_ports
    }

    pub fn volumes(&self) -> &HashSet<String> {
        &self.volumes
    }

    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    pub fn ready_strategy(&self) -> &ReadyStrategy {
        &self.wait_strategy_on_startup
    }

    pub fn add_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    /// Publishes `port/tcp` on a random host port.
    pub fn add_exposed_tcp_port(mut self, port: u16) -> Self {
        self.exposed_tcp_ports.insert(port, None);
        self
    }

    pub fn add_fixed_exposed_tcp_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.exposed_tcp_ports.insert(container_port, Some(host_port));
        self
    }

    /// `volume` uses the docker bind syntax, e.g. `/host/dir:/container/dir:ro`.
    pub fn add_volume<S: Into<String>>(mut self, volume: S) -> Self {
        self.volumes.insert(volume.into());
        self
    }

    pub fn add_label<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn wait_for_log_on_startup(mut self, log_regex: Regex) -> Self {
        self.wait_strategy_on_startup = ReadyStrategy::LogMessageRegExp(log_regex);
        self
    }

    pub fn wait_for_healthy_on_startup(mut self) -> Self {
        self.wait_strategy_on_startup = ReadyStrategy::StateHealthy;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Accepts human expressions such as `90s` or `2 minutes`.
    pub fn with_start_timeout_expr(self, duration_expression: &str) -> Result<Self> {
        let duration =
            parse_duration::parse(duration_expression).map_err(|e| Error::InvalidDuration {
                expression: duration_expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self.with_start_timeout(duration))
    }

    pub async fn create(self) -> Result<GenericContainer> {
        let docker = DockerClient::from_env()?;
        if !docker.image_exists_locally(&self.image).await? {
            info!("🐋 Pulling image {}", self.image);
            docker.pull(&self.image).await?;
        }
        let container = docker
            .create(self.image.full_name(), &self.create_opts())
            .await?;
        Ok(GenericContainer {
            params: self,
            container,
        })
    }

    fn create_opts(&self) -> ContainerCreateOpts {
        let mut opts = ContainerCreateOpts::builder()
            .image(self.image.full_name())
            .env(
                self.environment_variables
                    .iter()
                    .map(|(name, value)| format!("{name}={value}")),
            )
            .labels(self.labels.clone())
            .volumes(self.volumes.clone())
            .publish_all_ports();

        for (&container_port, host_port) in &self.exposed_tcp_ports {
            let exposed = PublishPort::tcp(container_port.into());
            opts = match host_port {
                Some(host_port) => opts.expose(exposed, HostPort::new((*host_port).into())),
                None => opts.publish(exposed),
            };
        }

        opts.build()
    }
}

#[derive(Clone, Debug)]
pub enum ReadyStrategy {
    LogMessageRegExp(Regex),
    StateHealthy,
    None,
}

impl ReadyStrategy {
    pub(crate) async fn wait(&self, container: &ContainerClient, timeout: Duration) -> Result<()> {
        let timeout_instant = Instant::now() + timeout;
        loop {
            let ready = match self {
                ReadyStrategy::LogMessageRegExp(regex) => regex.is_match(&container.logs().await?),
                ReadyStrategy::StateHealthy => {
                    container.health_state().await?.as_deref() == Some("healthy")
                }
                ReadyStrategy::None => true,
            };
            if ready {
                return Ok(());
            }
            if timeout_instant < Instant::now() {
                return Err(Error::StartTimeout {
                    image: container.image_name().to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

pub struct GenericContainer {
    params: GenericContainerBuilder,
    container: ContainerClient,
}

impl GenericContainer {
    pub fn from_image(image: DockerImage) -> GenericContainerBuilder {
        GenericContainerBuilder::new(image)
    }

    pub fn from_image_name(full_image_name: &str) -> Result<GenericContainerBuilder> {
        Ok(GenericContainerBuilder::new(full_image_name.parse()?))
    }

    pub fn params(&self) -> &GenericContainerBuilder {
        &self.params
    }

    pub async fn start(&self) -> Result<()> {
        self.container
            .start_and_wait(
                &self.params.wait_strategy_on_startup,
                self.params.start_timeout,
            )
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.container.stop().await
    }

    pub async fn kill(&self) -> Result<()> {
        self.container.kill().await
    }

    /// Force-removes the container along with its anonymous volumes.
    pub async fn remove(&self) -> Result<()> {
        self.container.remove().await
    }

    /// `Ok(None)` when the container is not running or the port is unpublished.
    pub fn get_host_port(&self, container_tcp_port: u16) -> Result<Option<u16>> {
        self.container
            .host_port(&format!("{container_tcp_port}/tcp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> GenericContainerBuilder {
        GenericContainer::from_image_name("eventstore/eventstore:latest").unwrap()
    }

    #[test]
    fn should_parse_start_timeout_expression() {
        let builder = builder().with_start_timeout_expr("2 minutes").unwrap();
        assert_eq!(builder.start_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn should_reject_invalid_start_timeout_expression() {
        assert!(matches!(
            builder().with_start_timeout_expr("soon"),
            Err(Error::InvalidDuration { .. })
        ));
    }

    #[test]
    fn should_keep_last_env_value() {
        let builder = builder()
            .add_env("EVENTSTORE_INSECURE", "false")
            .add_env("EVENTSTORE_INSECURE", "true");
        assert_eq!(builder.env("EVENTSTORE_INSECURE"), Some("true"));
        assert_eq!(builder.env("EVENTSTORE_MEM_DB"), None);
    }

    #[test]
    fn should_replace_random_port_with_fixed_one() {
        let builder = builder()
            .add_exposed_tcp_port(2113)
            .add_fixed_exposed_tcp_port(12113, 2113)
            .add_exposed_tcp_port(1113);
        assert_eq!(builder.exposed_tcp_ports().get(&2113), Some(&Some(12113)));
        assert_eq!(builder.exposed_tcp_ports().get(&1113), Some(&None));
    }

    #[test]
    fn should_wait_for_log_message() {
        let regex = Regex::new(r"IS LEADER\.\.\. SPARTA!").unwrap();
        match builder().wait_for_log_on_startup(regex).ready_strategy() {
            ReadyStrategy::LogMessageRegExp(regex) => {
                assert!(regex.is_match("[ 1, 1,12:00:00.000,INF] ========== [\"127.0.0.1:2113\"] IS LEADER... SPARTA!"))
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn should_default_to_no_ready_strategy() {
        assert!(matches!(builder().ready_strategy(), ReadyStrategy::None));
        assert!(matches!(
            builder().wait_for_healthy_on_startup().ready_strategy(),
            ReadyStrategy::StateHealthy
        ));
    }
}
