//! Docker implementation of the container runtime
//!
//! Container-level operations go through the `docker` CLI, which is what the
//! tool supervises on the host; image-level queries (digests, pruning) use the
//! daemon API directly via bollard. Managed containers are named after their
//! service and carry a `managed-by=dockhand` label so this tool never touches
//! foreign containers.

use async_trait::async_trait;
use bollard::image::PruneImagesOptions;
use bollard::Docker;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use super::runner::CommandRunner;
use super::{ContainerRuntime, RuntimeError};
use crate::definition::ServiceDefinition;

/// Label applied to every container this tool creates.
pub const MANAGED_LABEL: &str = "managed-by=dockhand";

pub struct DockerCli {
    api: Docker,
    runner: CommandRunner,
}

impl DockerCli {
    /// Connects to the local Docker daemon.
    ///
    /// `command_timeout` bounds every CLI invocation except log following.
    pub fn connect(command_timeout: Duration) -> Result<Self, RuntimeError> {
        let api = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self {
            api,
            runner: CommandRunner::new(command_timeout),
        })
    }

    async fn docker_captured(&self, args: Vec<String>, label: &str) -> Result<(), RuntimeError> {
        let output = self.runner.run_captured("docker", &args, label).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(RuntimeError::CommandFailed {
            command: label.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn docker_streamed(&self, args: Vec<String>, label: &str) -> Result<(), RuntimeError> {
        let status = self.runner.run_streamed("docker", &args, label).await?;
        if status.success() {
            return Ok(());
        }
        Err(RuntimeError::CommandFailed {
            command: label.to_string(),
            code: status.code(),
            stderr: String::new(),
        })
    }
}

fn is_missing_container(err: &RuntimeError) -> bool {
    matches!(err, RuntimeError::CommandFailed { stderr, .. } if stderr.contains("No such container"))
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(
        &self,
        service: &ServiceDefinition,
        pull_base: bool,
    ) -> Result<(), RuntimeError> {
        let build = service.build.as_ref().ok_or_else(|| RuntimeError::Api(
            format!("service {} has no build section", service.name),
        ))?;

        let mut args = vec!["build".to_string(), "--no-cache".to_string()];
        if pull_base {
            args.push("--pull".to_string());
        }
        if let Some(dockerfile) = &build.dockerfile {
            args.push("--file".to_string());
            args.push(dockerfile.display().to_string());
        }
        args.push("--tag".to_string());
        args.push(service.image.clone());
        args.push(build.context.display().to_string());

        info!(service = %service.name, image = %service.image, "building image");
        self.docker_streamed(args, &format!("docker build {}", service.name))
            .await
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image = %image, "pulling image");
        self.docker_streamed(
            vec!["pull".to_string(), image.to_string()],
            &format!("docker pull {}", image),
        )
        .await
    }

    async fn start_service(
        &self,
        service: &ServiceDefinition,
        env: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            service.name.clone(),
            "--label".to_string(),
            MANAGED_LABEL.to_string(),
        ];
        if service.gpu {
            args.push("--gpus".to_string());
            args.push("all".to_string());
        }
        for port in &service.ports {
            args.push("--publish".to_string());
            args.push(format!("{}:{}", port.host, port.container));
        }
        for volume in &service.volumes {
            args.push("--volume".to_string());
            args.push(format!(
                "{}:{}:{}",
                volume.host_path,
                volume.container_path,
                volume.mode.as_flag()
            ));
        }
        // Values may be secrets; only the key names are ever logged.
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(service.image.clone());

        info!(
            service = %service.name,
            image = %service.image,
            env_keys = ?env.keys().collect::<Vec<_>>(),
            "starting container"
        );
        self.docker_captured(args, &format!("docker run {}", service.name))
            .await
    }

    async fn stop_service(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        info!(service = %name, grace_secs = grace.as_secs(), "stopping container");
        let stop = self
            .docker_captured(
                vec![
                    "stop".to_string(),
                    "--time".to_string(),
                    grace.as_secs().to_string(),
                    name.to_string(),
                ],
                &format!("docker stop {}", name),
            )
            .await;
        match stop {
            Ok(()) => {}
            // Already gone counts as stopped.
            Err(ref e) if is_missing_container(e) => return Ok(()),
            Err(e) => return Err(e),
        }

        let remove = self
            .docker_captured(
                vec!["rm".to_string(), name.to_string()],
                &format!("docker rm {}", name),
            )
            .await;
        match remove {
            Err(ref e) if is_missing_container(e) => Ok(()),
            other => other,
        }
    }

    async fn running_services(&self) -> Result<Vec<String>, RuntimeError> {
        let args = vec![
            "ps".to_string(),
            "--filter".to_string(),
            format!("label={}", MANAGED_LABEL),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let output = self.runner.run_captured("docker", &args, "docker ps").await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: "docker ps".to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let names = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        debug!(?names, "running managed containers");
        Ok(names)
    }

    async fn exec_health_command(
        &self,
        service: &str,
        argv: &[String],
    ) -> Result<bool, RuntimeError> {
        let mut args = vec!["exec".to_string(), service.to_string()];
        args.extend(argv.iter().cloned());

        let output = self
            .runner
            .run_captured("docker", &args, &format!("docker exec {}", service))
            .await?;
        Ok(output.status.success())
    }

    async fn stream_logs(&self, services: &[String]) -> Result<(), RuntimeError> {
        if services.is_empty() {
            return Ok(());
        }
        info!(?services, "following container logs, interrupt to stop");

        let mut tasks = Vec::with_capacity(services.len());
        for name in services {
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                // No timeout: following logs runs until interrupted.
                let runner = CommandRunner::new(Duration::MAX);
                runner
                    .run_inherited(
                        "docker",
                        &[
                            "logs".to_string(),
                            "--follow".to_string(),
                            "--tail".to_string(),
                            "100".to_string(),
                            name.clone(),
                        ],
                        &format!("docker logs {}", name),
                    )
                    .await
            }));
        }

        for task in tasks {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(RuntimeError::Api(e.to_string())),
            }
        }
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<usize, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("dangling".to_string(), vec!["true".to_string()]);

        let response = self
            .api
            .prune_images(Some(PruneImagesOptions { filters }))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        let removed = response.images_deleted.map(|d| d.len()).unwrap_or(0);
        info!(removed, "pruned dangling images");
        Ok(removed)
    }

    async fn image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        match self.api.inspect_image(image).await {
            Ok(inspect) => Ok(inspect.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(RuntimeError::Api(e.to_string())),
        }
    }
}
