//! Common test utilities for reconciler integration tests
//!
//! Recording fakes for every collaborator the reconciler consumes.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use stack_reconciler::config::loader::parse_document;
use stack_reconciler::config::{ConfigDocument, ConfigError, ConfigLoader, ReconcilerSettings};
use stack_reconciler::console::UserInteraction;
use stack_reconciler::provider::{
    ControlPlane, ControlPlaneError, CreateStackRequest, StackDescription, StackOutput,
    UpdateStackRequest, WaitCondition, WaiterConfig,
};
use stack_reconciler::secrets::Decryptor;
use stack_reconciler::stack::{StackReconciler, StackStatus};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APP: &str = "billing";
pub const STACK: &str = "billing-production";
pub const STACK_ID: &str =
    "arn:aws:cloudformation:ap-southeast-2:123456789012:stack/billing-production/6f1c";
pub const TEMPLATE: &str = "/stacks/billing.yml";
pub const TEMPLATE_BODY: &str = "AWSTemplateFormatVersion: '2010-09-09'\nResources: {}\n";

type ErrorFactory = Box<dyn Fn() -> ControlPlaneError + Send + Sync>;

/// A control-plane call as seen by the fake
#[derive(Debug, Clone)]
pub enum Call {
    Describe,
    Create(CreateStackRequest),
    Update(UpdateStackRequest),
    Delete,
    Wait(WaitCondition),
    DescribeResource(String),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Call::Create(_) | Call::Update(_) | Call::Delete)
    }
}

/// Scripted control plane that records every call
///
/// `describe_stack` walks through the scripted statuses, repeating the last
/// one; `None` means the stack does not exist.
#[derive(Default)]
pub struct FakeControlPlane {
    statuses: Mutex<VecDeque<Option<StackStatus>>>,
    outputs: Vec<StackOutput>,
    resource: BTreeMap<String, String>,
    create_error: Option<ErrorFactory>,
    update_error: Option<ErrorFactory>,
    delete_error: Option<ErrorFactory>,
    wait_errors: Vec<(WaitCondition, ErrorFactory)>,
    calls: Mutex<Vec<Call>>,
}

impl FakeControlPlane {
    /// No stack exists
    pub fn absent() -> Self {
        Self::with_statuses(vec![None])
    }

    pub fn with_status(status: StackStatus) -> Self {
        Self::with_statuses(vec![Some(status)])
    }

    pub fn with_statuses(statuses: Vec<Option<StackStatus>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, key: &str, value: &str) -> Self {
        self.outputs.push(StackOutput {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn with_resource(mut self, fields: &[(&str, &str)]) -> Self {
        self.resource = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self
    }

    pub fn fail_create(
        mut self,
        error: impl Fn() -> ControlPlaneError + Send + Sync + 'static,
    ) -> Self {
        self.create_error = Some(Box::new(error));
        self
    }

    pub fn fail_update(
        mut self,
        error: impl Fn() -> ControlPlaneError + Send + Sync + 'static,
    ) -> Self {
        self.update_error = Some(Box::new(error));
        self
    }

    pub fn fail_delete(
        mut self,
        error: impl Fn() -> ControlPlaneError + Send + Sync + 'static,
    ) -> Self {
        self.delete_error = Some(Box::new(error));
        self
    }

    pub fn fail_wait(
        mut self,
        condition: WaitCondition,
        error: impl Fn() -> ControlPlaneError + Send + Sync + 'static,
    ) -> Self {
        self.wait_errors.push((condition, Box::new(error)));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_mutating()).count()
    }

    pub fn creates(&self) -> Vec<CreateStackRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<UpdateStackRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete))
            .count()
    }

    pub fn waits(&self, condition: WaitCondition) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Wait(w) if *w == condition))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_status(&self, status: Option<StackStatus>) {
        let mut statuses = self.statuses.lock().unwrap();
        statuses.clear();
        statuses.push_back(status);
    }

    fn next_status(&self) -> Option<StackStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().flatten()
        } else {
            statuses.front().cloned().flatten()
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<StackDescription, ControlPlaneError> {
        self.record(Call::Describe);
        let status = self
            .next_status()
            .ok_or_else(|| ControlPlaneError::NotFound(stack_name.to_string()))?;

        Ok(StackDescription {
            stack_name: stack_name.to_string(),
            stack_id: Some(STACK_ID.to_string()),
            status,
            status_reason: None,
            outputs: self.outputs.clone(),
        })
    }

    async fn create_stack(&self, request: CreateStackRequest) -> Result<(), ControlPlaneError> {
        self.record(Call::Create(request));
        match &self.create_error {
            Some(error) => Err(error()),
            None => {
                self.set_status(Some(StackStatus::CreateInProgress));
                Ok(())
            }
        }
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<(), ControlPlaneError> {
        self.record(Call::Update(request));
        match &self.update_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    async fn delete_stack(&self, _stack_name: &str) -> Result<(), ControlPlaneError> {
        self.record(Call::Delete);
        match &self.delete_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    async fn wait_until(
        &self,
        condition: WaitCondition,
        _stack_name: &str,
        _waiter: &WaiterConfig,
    ) -> Result<(), ControlPlaneError> {
        self.record(Call::Wait(condition));
        if let Some((_, error)) = self.wait_errors.iter().find(|(c, _)| *c == condition) {
            return Err(error());
        }

        self.set_status(match condition {
            WaitCondition::CreateComplete => Some(StackStatus::CreateComplete),
            WaitCondition::UpdateComplete => Some(StackStatus::UpdateComplete),
            WaitCondition::DeleteComplete => None,
        });
        Ok(())
    }

    async fn describe_stack_resource(
        &self,
        _stack_name: &str,
        logical_resource_id: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        self.record(Call::DescribeResource(logical_resource_id.to_string()));
        Ok(self.resource.clone())
    }
}

/// Console that answers the confirmation prompt with a fixed reply
#[derive(Default)]
pub struct FakeConsole {
    confirm: bool,
    prompts: AtomicUsize,
    lines: Mutex<Vec<String>>,
    banners: Mutex<Vec<String>>,
}

impl FakeConsole {
    pub fn confirming() -> Self {
        Self {
            confirm: true,
            ..Self::default()
        }
    }

    pub fn declining() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn banners(&self) -> Vec<String> {
        self.banners.lock().unwrap().clone()
    }

    pub fn said(&self, fragment: &str) -> bool {
        self.lines().iter().any(|line| line.contains(fragment))
    }
}

#[async_trait]
impl UserInteraction for FakeConsole {
    async fn prompt_yes_no(&self, _timeout: Duration) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.confirm
    }

    fn write_line(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn flash_banner(&self, message: &str) {
        self.banners.lock().unwrap().push(message.to_string());
    }
}

/// In-memory documents keyed by path
#[derive(Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    /// Loader holding only the stack template
    pub fn with_template() -> Self {
        Self::default().with(TEMPLATE, TEMPLATE_BODY)
    }

    pub fn with(mut self, path: &str, text: &str) -> Self {
        self.files.insert(PathBuf::from(path), text.to_string());
        self
    }
}

impl ConfigLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<ConfigDocument, ConfigError> {
        match self.files.get(path) {
            Some(text) => parse_document(path, text),
            None => Ok(ConfigDocument::new()),
        }
    }

    fn read_text(&self, path: &Path) -> Result<Option<String>, ConfigError> {
        Ok(self.files.get(path).cloned())
    }
}

/// Decrypts `<x>` to `plain(<x>)`; the ciphertext `broken` fails
#[derive(Default)]
pub struct FakeDecryptor {
    calls: AtomicUsize,
}

impl FakeDecryptor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decryptor for FakeDecryptor {
    async fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ciphertext == "broken" {
            anyhow::bail!("InvalidCiphertextException");
        }
        Ok(format!("plain({ciphertext})"))
    }
}

/// Settings with no real waiting
pub fn fast_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        waiter_delay_secs: 0,
        waiter_max_attempts: 5,
        settle_poll_secs: 0,
        confirmation_timeout_secs: 0,
        region: "ap-southeast-2".to_string(),
        ..ReconcilerSettings::default()
    }
}

/// Everything a reconciler test needs to inspect afterwards
pub struct Harness {
    pub control_plane: Arc<FakeControlPlane>,
    pub console: Arc<FakeConsole>,
    pub decryptor: Arc<FakeDecryptor>,
    pub reconciler: StackReconciler,
}

impl Harness {
    pub fn new(control_plane: FakeControlPlane, loader: MemoryLoader, console: FakeConsole) -> Self {
        Self::for_environment("production", control_plane, loader, console)
    }

    pub fn for_environment(
        env_name: &str,
        control_plane: FakeControlPlane,
        loader: MemoryLoader,
        console: FakeConsole,
    ) -> Self {
        let control_plane = Arc::new(control_plane);
        let console = Arc::new(console);
        let decryptor = Arc::new(FakeDecryptor::default());

        let reconciler = StackReconciler::new(
            APP,
            env_name,
            Arc::clone(&control_plane) as Arc<dyn ControlPlane>,
            Arc::new(loader),
            Arc::clone(&decryptor) as Arc<dyn Decryptor>,
            Arc::clone(&console) as Arc<dyn UserInteraction>,
        )
        .with_settings(fast_settings());

        Self {
            control_plane,
            console,
            decryptor,
            reconciler,
        }
    }
}
