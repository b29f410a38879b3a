//! Shared fakes for integration tests.
//!
//! The lifecycle controller reaches the outside world only through traits,
//! so these in-memory implementations let tests script whole invocations
//! without a Docker daemon or real host ports.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use dockhand::config::DockhandConfig;
use dockhand::definition::{Deployment, ServiceDefinition};
use dockhand::lifecycle::OperatorConfirmation;
use dockhand::probe::ports::PortError;
use dockhand::probe::{CapabilityReport, PortAuthority};
use dockhand::runtime::{ContainerRuntime, RuntimeError};

#[derive(Default)]
struct RuntimeState {
    running: BTreeSet<String>,
    digests: BTreeMap<String, String>,
    build_count: u64,
    dangling_images: usize,
    env_keys: BTreeMap<String, Vec<String>>,
    health_scripts: BTreeMap<String, VecDeque<bool>>,
    events: Vec<String>,
}

/// In-memory container runtime with scriptable failures.
///
/// Images live in a name-to-digest map; each build produces a fresh digest
/// and turns the replaced image into a dangling one, which `prune` counts.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    fail_build: BTreeSet<String>,
    fail_start: BTreeSet<String>,
    fail_stop: BTreeSet<String>,
}

#[allow(dead_code)]
impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for name in names {
                state.running.insert(name.to_string());
            }
        }
        self
    }

    pub fn with_dangling_images(self, count: usize) -> Self {
        self.state.lock().unwrap().dangling_images = count;
        self
    }

    pub fn failing_build(mut self, service: &str) -> Self {
        self.fail_build.insert(service.to_string());
        self
    }

    pub fn failing_start(mut self, service: &str) -> Self {
        self.fail_start.insert(service.to_string());
        self
    }

    pub fn failing_stop(mut self, service: &str) -> Self {
        self.fail_stop.insert(service.to_string());
        self
    }

    /// Scripts the results of successive health command executions for one
    /// service. Once the script is exhausted, further checks succeed.
    pub fn scripting_health(self, service: &str, results: &[bool]) -> Self {
        self.state
            .lock()
            .unwrap()
            .health_scripts
            .insert(service.to_string(), results.iter().copied().collect());
        self
    }

    pub fn running(&self) -> Vec<String> {
        self.state.lock().unwrap().running.iter().cloned().collect()
    }

    pub fn digest_of(&self, image: &str) -> Option<String> {
        self.state.lock().unwrap().digests.get(image).cloned()
    }

    pub fn dangling_images(&self) -> usize {
        self.state.lock().unwrap().dangling_images
    }

    /// Keys of the environment the named service was started with. Values
    /// are deliberately not exposed.
    pub fn env_keys_of(&self, service: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .env_keys
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn command_failed(command: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            code: Some(1),
            stderr: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(
        &self,
        service: &ServiceDefinition,
        pull_base: bool,
    ) -> Result<(), RuntimeError> {
        if self.fail_build.contains(&service.name) {
            return Err(Self::command_failed(&format!(
                "docker build {}",
                service.name
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.build_count += 1;
        let digest = format!("sha256:{:08x}", state.build_count);
        if state.digests.insert(service.image.clone(), digest).is_some() {
            // The replaced image loses its tag and becomes dangling.
            state.dangling_images += 1;
        }
        state
            .events
            .push(format!("build {} pull_base={}", service.name, pull_base));
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state
            .digests
            .entry(image.to_string())
            .or_insert_with(|| "sha256:pulled".to_string());
        state.events.push(format!("pull {}", image));
        Ok(())
    }

    async fn start_service(
        &self,
        service: &ServiceDefinition,
        env: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        if self.fail_start.contains(&service.name) {
            return Err(Self::command_failed(&format!(
                "docker run {}",
                service.name
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.running.insert(service.name.clone());
        state
            .env_keys
            .insert(service.name.clone(), env.keys().cloned().collect());
        state.events.push(format!("start {}", service.name));
        Ok(())
    }

    async fn stop_service(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        if self.fail_stop.contains(name) {
            return Err(Self::command_failed(&format!("docker stop {}", name)));
        }
        let mut state = self.state.lock().unwrap();
        state.running.remove(name);
        state.events.push(format!("stop {}", name));
        Ok(())
    }

    async fn running_services(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.running())
    }

    async fn exec_health_command(
        &self,
        service: &str,
        _argv: &[String],
    ) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let result = state
            .health_scripts
            .get_mut(service)
            .and_then(VecDeque::pop_front)
            .unwrap_or(true);
        Ok(result)
    }

    async fn stream_logs(&self, services: &[String]) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("logs {}", services.join(",")));
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<usize, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let pruned = state.dangling_images;
        state.dangling_images = 0;
        state.events.push(format!("prune {}", pruned));
        Ok(pruned)
    }

    async fn image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        Ok(self.digest_of(image))
    }
}

/// Port authority over an in-memory set of held ports.
pub struct FakePortAuthority {
    held: Mutex<BTreeSet<u16>>,
    release_on_terminate: bool,
    terminated: Mutex<Vec<u16>>,
}

#[allow(dead_code)]
impl FakePortAuthority {
    pub fn all_free() -> Self {
        Self::holding(&[])
    }

    pub fn holding(ports: &[u16]) -> Self {
        Self {
            held: Mutex::new(ports.iter().copied().collect()),
            release_on_terminate: true,
            terminated: Mutex::new(Vec::new()),
        }
    }

    /// Listeners that survive SIGTERM: terminate succeeds but the port stays
    /// held.
    pub fn stubborn(ports: &[u16]) -> Self {
        Self {
            release_on_terminate: false,
            ..Self::holding(ports)
        }
    }

    pub fn terminated(&self) -> Vec<u16> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortAuthority for FakePortAuthority {
    fn is_free(&self, port: u16) -> bool {
        !self.held.lock().unwrap().contains(&port)
    }

    async fn terminate_listener(&self, port: u16) -> Result<(), PortError> {
        self.terminated.lock().unwrap().push(port);
        if self.release_on_terminate {
            self.held.lock().unwrap().remove(&port);
        }
        Ok(())
    }
}

/// Confirmation that records every prompt and answers with a fixed value.
pub struct ScriptedConfirmation {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedConfirmation {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl OperatorConfirmation for ScriptedConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }
}

#[allow(dead_code)]
pub fn deployment(yaml: &str) -> Deployment {
    dockhand::definition::parse(yaml).expect("test fixture must parse")
}

#[allow(dead_code)]
pub fn report(runtime_present: bool, conflicts: &[u16]) -> CapabilityReport {
    CapabilityReport {
        gpu_present: false,
        gpu_name: None,
        runtime_present,
        runtime_version: runtime_present.then(|| "27.0.3".to_string()),
        port_conflicts: conflicts.iter().copied().collect(),
        probed_at: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn test_config() -> DockhandConfig {
    DockhandConfig {
        definition_file: PathBuf::from("dockhand.yaml"),
        stop_grace_secs: 1,
        command_timeout_secs: 60,
        health_ceiling_secs: 60,
        log_level: "info".to_string(),
    }
}
