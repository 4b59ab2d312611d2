//! Docker implementation of [`ContainerEngine`] via `bollard`.

use super::{AllowedImage, ContainerEngine, ContainerSpec, EngineFuture, ExecOutput, ExecRequest};
use crate::error::TaskError;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for a whole image pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Seconds Docker waits before killing a stopping container.
const STOP_GRACE_SECS: i64 = 5;

pub struct DockerEngine {
    client: Docker,
    pull_timeout: Duration,
}

impl DockerEngine {
    /// Connect using the local defaults (socket or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, TaskError> {
        let client = Docker::connect_with_defaults()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    async fn pull_image(&self, image: AllowedImage) -> Result<(), TaskError> {
        let reference = image.reference();
        info!("Pulling image: {reference} (timeout: {:?})", self.pull_timeout);

        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut last_status = String::new();
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| TaskError::ImagePull {
                    image: reference.to_string(),
                    reason: e.to_string(),
                })?;
                if let Some(error) = info.error {
                    return Err(TaskError::ImagePull {
                        image: reference.to_string(),
                        reason: error,
                    });
                }
                if let Some(status) = info.status
                    && status != last_status
                {
                    debug!("Pull status: {status}");
                    last_status = status;
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(TaskError::ImagePull {
                image: reference.to_string(),
                reason: format!("timed out after {:?}", self.pull_timeout),
            }),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, TaskError> {
        info!("Creating container: {} ({})", spec.name, spec.image);
        let config = Config {
            image: Some(spec.image.reference().to_string()),
            // Keep the container alive; work happens through exec.
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("mkdir -p '{}' && tail -f /dev/null", spec.working_dir.replace('\'', "")),
            ]),
            working_dir: Some("/".to_string()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| TaskError::ContainerCreate(e.to_string()))?;
        debug!("Created container: {}", container.id);
        Ok(container.id)
    }

    async fn run_exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, TaskError> {
        let exec_config = CreateExecOptions {
            cmd: Some(request.command.clone()),
            working_dir: request.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(id, exec_config)
            .await
            .map_err(|e| TaskError::CommandExecution(e.to_string()))?;
        let started = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| TaskError::CommandExecution(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match started {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            stdout.extend_from_slice(&message)
                        }
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => return Err(TaskError::CommandExecution(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(TaskError::CommandExecution(
                    "exec was detached unexpectedly".into(),
                ));
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| TaskError::CommandExecution(e.to_string()))?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>, TaskError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.client.download_from_container(id, Some(options));
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

/// 304 (not running) or 404 (gone).
fn is_already_stopped(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }
    )
}

/// 404 (gone) or 409 (removal already in progress).
fn is_already_removed(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

impl ContainerEngine for DockerEngine {
    fn pull(&self, image: AllowedImage) -> EngineFuture<'_, ()> {
        Box::pin(self.pull_image(image))
    }

    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> EngineFuture<'a, String> {
        Box::pin(self.create_container(spec))
    }

    fn start<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .start_container(id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| TaskError::ContainerCreate(format!("failed to start {id}: {e}")))
        })
    }

    fn exec<'a>(&'a self, id: &'a str, request: &'a ExecRequest) -> EngineFuture<'a, ExecOutput> {
        Box::pin(self.run_exec(id, request))
    }

    fn upload<'a>(
        &'a self,
        id: &'a str,
        dest_dir: &'a str,
        archive: Vec<u8>,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            // Docker requires the destination directory to exist.
            let mkdir = ExecRequest::argv(["mkdir", "-p", dest_dir]);
            self.run_exec(id, &mkdir).await?;
            let options = UploadToContainerOptions {
                path: dest_dir.to_string(),
                ..Default::default()
            };
            self.client
                .upload_to_container(id, Some(options), archive.into())
                .await?;
            Ok(())
        })
    }

    fn download<'a>(&'a self, id: &'a str, path: &'a str) -> EngineFuture<'a, Vec<u8>> {
        Box::pin(self.download_archive(id, path))
    }

    fn stop<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            info!("Stopping container: {id}");
            let options = StopContainerOptions { t: STOP_GRACE_SECS };
            match self.client.stop_container(id, Some(options)).await {
                Ok(()) => Ok(()),
                Err(e) if is_already_stopped(&e) => {
                    debug!("Container {id} already gone");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn remove<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let options = RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            };
            match self.client.remove_container(id, Some(options)).await {
                Ok(()) => Ok(()),
                // auto_remove usually wins the race after stop.
                Err(e) if is_already_removed(&e) => Ok(()),
                Err(e) => {
                    warn!("Failed to remove container {id}: {e}");
                    Err(e.into())
                }
            }
        })
    }
}
