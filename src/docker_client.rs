use crate::{
    container::ReadyStrategy,
    env::{EnvSource, ProcessEnv},
    error::{Error, Result},
    image::DockerImage,
};
use docker_api::{
    models::{ContainerInspect200Response, ImageBuildChunk, PortBinding},
    opts::{
        ContainerCreateOpts, ContainerRemoveOpts, ContainerStopOpts, ImageListOpts, LogsOpts,
        PullOpts,
    },
    Container, Docker,
};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::{collections::HashMap, fmt::Display, pin::pin, sync::RwLock, time::Duration};

type PortMap = HashMap<String, Option<Vec<PortBinding>>>;

const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

pub(crate) struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    pub(crate) fn from_env() -> Result<Self> {
        Self::connect(&ProcessEnv)
    }

    pub(crate) fn connect<E: EnvSource + ?Sized>(env: &E) -> Result<Self> {
        let host = env.var_or(DOCKER_HOST_ENV, DEFAULT_DOCKER_HOST);
        debug!("🐋 Connecting to docker daemon at {host}");
        Ok(Self {
            docker: Docker::new(&host)?,
        })
    }

    pub(crate) async fn image_exists_locally(&self, image: &DockerImage) -> Result<bool> {
        let images = self
            .docker
            .images()
            .list(&ImageListOpts::builder().filter(vec![image.into()]).build())
            .await?;
        Ok(!images.is_empty())
    }

    pub(crate) async fn pull(&self, image: &DockerImage) -> Result<()> {
        let images = self.docker.images();
        let mut stream = images.pull(&PullOpts::builder().image(image.full_name()).build());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let ImageBuildChunk::Error { error, .. } = &chunk {
                return Err(Error::PullFailed {
                    image: image.full_name().to_string(),
                    reason: error.clone(),
                });
            }
            debug!("{}", PullProgress(&chunk));
        }
        Ok(())
    }

    pub(crate) async fn create(
        &self,
        image_name: &str,
        opts: &ContainerCreateOpts,
    ) -> Result<ContainerClient> {
        let container = self.docker.containers().create(opts).await?;
        Ok(ContainerClient::new(container, image_name))
    }
}

struct PullProgress<'a>(&'a ImageBuildChunk);

impl Display for PullProgress<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ImageBuildChunk::PullStatus {
                status,
                id,
                progress,
                ..
            } => {
                write!(f, "🐋 {status}")?;
                if let Some(id) = id {
                    write!(f, " {id}")?;
                }
                match progress.as_deref().map(str::trim) {
                    Some(progress) if !progress.is_empty() => write!(f, " {progress}"),
                    _ => Ok(()),
                }
            }
            ImageBuildChunk::Update { stream } => write!(f, "🐋 {}", stream.trim()),
            ImageBuildChunk::Digest { aux } => write!(f, "🐋 digest {}", aux.id),
            ImageBuildChunk::Error { error, .. } => write!(f, "🐋 pull error: {error}"),
        }
    }
}

pub(crate) struct ContainerClient {
    inner_container: Container,
    image_name: String,
    running_state: RwLock<Option<RunningState>>,
}

impl ContainerClient {
    fn new(container: Container, image_name: &str) -> Self {
        ContainerClient {
            inner_container: container,
            image_name: image_name.to_string(),
            running_state: RwLock::new(None),
        }
    }

    pub(crate) fn image_name(&self) -> &str {
        &self.image_name
    }

    pub(crate) async fn health_state(&self) -> Result<Option<String>> {
        let inspect = self.inner_container.inspect().await?;
        Ok(inspect.state.and_then(|state| state.health?.status))
    }

    pub(crate) async fn logs(&self) -> Result<String> {
        let opts = LogsOpts::builder().stdout(true).stderr(true).all().build();
        let mut chunks = pin!(self.inner_container.logs(&opts));
        let mut output = Vec::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => output.extend(chunk.to_vec()),
                Err(e) => warn!("🐋 Skipping unreadable log chunk of {}: {e}", self.image_name),
            }
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    pub(crate) async fn start_and_wait(
        &self,
        ready_strategy: &ReadyStrategy,
        timeout: Duration,
    ) -> Result<()> {
        self.inner_container.start().await?;
        ready_strategy.wait(self, timeout).await?;
        let inspect = self.inner_container.inspect().await?;
        let running_state = RunningState::try_from(inspect)?;
        info!(
            "🐋 Container {} ({}) is ready",
            running_state.name, self.image_name
        );
        *self.running_state.write().map_err(|_| Error::StatePoisoned)? = Some(running_state);
        Ok(())
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        self.inner_container
            .stop(&ContainerStopOpts::builder().build())
            .await?;
        let name = self.clear_running_state()?;
        info!("🐋 Container {name} is stopped");
        Ok(())
    }

    pub(crate) async fn kill(&self) -> Result<()> {
        self.inner_container
            .stop(&ContainerStopOpts::builder().signal("SIGKILL").build())
            .await?;
        let name = self.clear_running_state()?;
        info!("🐋 Container {name} killed");
        Ok(())
    }

    pub(crate) async fn remove(&self) -> Result<()> {
        self.inner_container
            .remove(&ContainerRemoveOpts::builder().force(true).volumes(true).build())
            .await?;
        let name = self.clear_running_state()?;
        info!("🐋 Container {name} removed");
        Ok(())
    }

    pub(crate) fn host_port(&self, container_port_spec: &str) -> Result<Option<u16>> {
        lookup_host_port(&self.running_state, container_port_spec)
    }

    fn clear_running_state(&self) -> Result<String> {
        let mut rw_state = self.running_state.write().map_err(|_| Error::StatePoisoned)?;
        let name = rw_state
            .take()
            .map_or_else(|| self.inner_container.id().to_string(), |s| s.name);
        Ok(name)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RunningState {
    name: String,
    pub(crate) ports: HashMap<String, u16>,
}

impl TryFrom<ContainerInspect200Response> for RunningState {
    type Error = Error;

    fn try_from(inspect: ContainerInspect200Response) -> Result<Self> {
        let name = inspect.name.or(inspect.id).ok_or(Error::NotRunning)?;
        Ok(RunningState {
            name,
            ports: inspect
                .network_settings
                .and_then(|settings| settings.ports)
                .map(extract_port_mapping)
                .unwrap_or_default(),
        })
    }
}

fn lookup_host_port(
    state: &RwLock<Option<RunningState>>,
    container_port_spec: &str,
) -> Result<Option<u16>> {
    let ro_state = state.read().map_err(|_| Error::StatePoisoned)?;
    Ok(ro_state
        .as_ref()
        .and_then(|running| running.ports.get(container_port_spec).copied()))
}

/// Keeps the bindings published on `0.0.0.0`, keyed by `port/proto`.
fn extract_port_mapping(ports: PortMap) -> HashMap<String, u16> {
    ports
        .into_iter()
        .filter_map(|(container_port_spec, bindings)| Some((container_port_spec, bindings?)))
        .flat_map(|(container_port_spec, bindings)| {
            bindings.into_iter().filter_map(move |binding| {
                match (binding.host_ip.as_deref(), binding.host_port) {
                    (Some("0.0.0.0"), Some(host_port)) => {
                        Some((container_port_spec.clone(), host_port.parse().ok()?))
                    }
                    _ => None,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(ip: &str, port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: Some(port.to_string()),
        }
    }

    #[test]
    fn should_keep_only_ipv4_wildcard_bindings() {
        let mut ports = HashMap::new();
        ports.insert(
            "2113/tcp".to_string(),
            Some(vec![binding("0.0.0.0", "49153"), binding("::", "49153")]),
        );
        ports.insert("1113/tcp".to_string(), None);

        let mapping = extract_port_mapping(ports);

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("2113/tcp"), Some(&49153));
    }

    #[test]
    fn should_skip_unbound_ports() {
        let mut ports = HashMap::new();
        ports.insert("2113/tcp".to_string(), Some(vec![]));
        ports.insert("1113/tcp".to_string(), None);
        assert!(extract_port_mapping(ports).is_empty());
    }

    #[test]
    fn should_describe_pull_progress() {
        let chunk = ImageBuildChunk::PullStatus {
            status: "Downloading".to_string(),
            id: Some("a1b2c3".to_string()),
            progress: None,
            progress_detail: None,
        };
        assert_eq!(PullProgress(&chunk).to_string(), "🐋 Downloading a1b2c3");
    }

    fn running(ports: &[(&str, u16)]) -> RunningState {
        RunningState {
            name: "/eventstore".to_string(),
            ports: ports
                .iter()
                .map(|(spec, port)| (spec.to_string(), *port))
                .collect(),
        }
    }

    #[test]
    fn should_look_up_published_host_port() {
        let state = RwLock::new(Some(running(&[("2113/tcp", 49153)])));
        assert_eq!(lookup_host_port(&state, "2113/tcp").unwrap(), Some(49153));
        assert_eq!(lookup_host_port(&state, "1113/tcp").unwrap(), None);
        assert_eq!(lookup_host_port(&RwLock::new(None), "2113/tcp").unwrap(), None);
    }

    #[test]
    fn should_report_poisoned_state_on_port_lookup() {
        let state = RwLock::new(Some(running(&[("2113/tcp", 49153)])));
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = state.write().unwrap();
                    panic!("poison the running state");
                })
                .join();
        });
        assert!(matches!(
            lookup_host_port(&state, "2113/tcp"),
            Err(Error::StatePoisoned)
        ));
    }
}
