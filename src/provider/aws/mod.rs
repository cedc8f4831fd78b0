//! # AWS CloudFormation Control Plane
//!
//! [`ControlPlane`] implementation backed by the AWS CloudFormation API.
//!
//! This module provides:
//! - Stack describe/create/update/delete calls
//! - A polling waiter with a fixed delay and bounded attempt count
//! - Mapping of CloudFormation `ValidationError` responses onto
//!   [`ControlPlaneError::NotFound`] and [`ControlPlaneError::Validation`]

use crate::observability::metrics;
use crate::provider::{
    ControlPlane, ControlPlaneError, CreateStackRequest, OnFailure, Parameter,
    StackDescription, StackOutput, UpdateStackRequest, WaitCondition, WaitVerdict, WaiterConfig,
};
use crate::stack::StackStatus;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{
    Capability, OnFailure as CfnOnFailure, Parameter as CfnParameter, Stack,
};
use aws_sdk_cloudformation::Client as CloudFormationClient;
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};

/// CloudFormation-backed control plane
pub struct CloudFormationControlPlane {
    client: CloudFormationClient,
    region: String,
}

impl std::fmt::Debug for CloudFormationControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFormationControlPlane")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl CloudFormationControlPlane {
    /// Build a client from the default credential chain
    ///
    /// `region` overrides the region resolved from the environment/profile.
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        Self::from_sdk_config(&sdk_config)
    }

    #[must_use]
    pub fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
        let region = sdk_config
            .region()
            .map(ToString::to_string)
            .unwrap_or_default();
        info!("Using CloudFormation in region '{}'", region);

        Self {
            client: CloudFormationClient::new(sdk_config),
            region,
        }
    }
}

/// Map an SDK error onto the control-plane taxonomy
///
/// CloudFormation reports a missing stack as a `ValidationError` whose
/// message ends in "does not exist".
fn classify_error<E, R>(call: &str, stack_name: &str, err: SdkError<E, R>) -> ControlPlaneError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    metrics::increment_control_plane_errors(call);

    if err.code() == Some("ValidationError") {
        let message = err.message().unwrap_or_default().to_string();
        if message.contains("does not exist") {
            return ControlPlaneError::NotFound(stack_name.to_string());
        }
        return ControlPlaneError::Validation(message);
    }

    ControlPlaneError::Other(anyhow::anyhow!(
        "CloudFormation {call} failed for {stack_name}: {}",
        DisplayErrorContext(&err)
    ))
}

fn to_cfn_parameters(parameters: &[Parameter]) -> Vec<CfnParameter> {
    parameters
        .iter()
        .map(|parameter| {
            CfnParameter::builder()
                .parameter_key(&parameter.key)
                .parameter_value(&parameter.value)
                .build()
        })
        .collect()
}

fn to_cfn_capabilities(capabilities: &[String]) -> Vec<Capability> {
    capabilities
        .iter()
        .map(|capability| Capability::from(capability.as_str()))
        .collect()
}

fn to_description(stack: &Stack) -> StackDescription {
    StackDescription {
        stack_name: stack.stack_name().unwrap_or_default().to_string(),
        stack_id: stack.stack_id().map(ToString::to_string),
        status: stack
            .stack_status()
            .map_or_else(|| StackStatus::Unknown(String::new()), |s| {
                StackStatus::from(s.as_str())
            }),
        status_reason: stack.stack_status_reason().map(ToString::to_string),
        outputs: stack
            .outputs()
            .iter()
            .filter_map(|output| {
                Some(StackOutput {
                    key: output.output_key()?.to_string(),
                    value: output.output_value().unwrap_or_default().to_string(),
                })
            })
            .collect(),
    }
}

fn insert_field(fields: &mut BTreeMap<String, String>, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        fields.insert(name.to_string(), value.to_string());
    }
}

#[async_trait]
impl ControlPlane for CloudFormationControlPlane {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<StackDescription, ControlPlaneError> {
        metrics::increment_control_plane_calls("describe_stacks");

        let response = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .instrument(info_span!("cloudformation.describe_stacks", stack.name = stack_name))
            .await
            .map_err(|e| classify_error("describe_stacks", stack_name, e))?;

        response
            .stacks()
            .iter()
            .find(|stack| stack.stack_name() == Some(stack_name))
            .map(to_description)
            .ok_or_else(|| ControlPlaneError::NotFound(stack_name.to_string()))
    }

    async fn create_stack(&self, request: CreateStackRequest) -> Result<(), ControlPlaneError> {
        metrics::increment_control_plane_calls("create_stack");
        info!(
            "Creating CloudFormation stack {} with {} parameters",
            request.stack_name,
            request.parameters.len()
        );

        let on_failure = match request.on_failure {
            OnFailure::Delete => CfnOnFailure::Delete,
            OnFailure::Rollback => CfnOnFailure::Rollback,
            OnFailure::DoNothing => CfnOnFailure::DoNothing,
        };

        self.client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(to_cfn_parameters(&request.parameters)))
            .set_capabilities(Some(to_cfn_capabilities(&request.capabilities)))
            .on_failure(on_failure)
            .send()
            .instrument(info_span!(
                "cloudformation.create_stack",
                stack.name = request.stack_name.as_str()
            ))
            .await
            .map_err(|e| classify_error("create_stack", &request.stack_name, e))?;

        Ok(())
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<(), ControlPlaneError> {
        metrics::increment_control_plane_calls("update_stack");
        info!(
            "Updating CloudFormation stack {} with {} parameters",
            request.stack_name,
            request.parameters.len()
        );

        self.client
            .update_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(to_cfn_parameters(&request.parameters)))
            .set_capabilities(Some(to_cfn_capabilities(&request.capabilities)))
            .send()
            .instrument(info_span!(
                "cloudformation.update_stack",
                stack.name = request.stack_name.as_str()
            ))
            .await
            .map_err(|e| classify_error("update_stack", &request.stack_name, e))?;

        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ControlPlaneError> {
        metrics::increment_control_plane_calls("delete_stack");
        info!("Deleting CloudFormation stack {}", stack_name);

        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .instrument(info_span!("cloudformation.delete_stack", stack.name = stack_name))
            .await
            .map_err(|e| classify_error("delete_stack", stack_name, e))?;

        Ok(())
    }

    async fn wait_until(
        &self,
        condition: WaitCondition,
        stack_name: &str,
        waiter: &WaiterConfig,
    ) -> Result<(), ControlPlaneError> {
        let span = info_span!(
            "cloudformation.wait",
            stack.name = stack_name,
            waiter = condition.as_str()
        );

        async move {
            for attempt in 1..=waiter.max_attempts {
                metrics::increment_waiter_polls();

                let status = match self.describe_stack(stack_name).await {
                    Ok(description) => Some(description.status),
                    Err(ControlPlaneError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                };

                match condition.evaluate(status.as_ref()) {
                    WaitVerdict::Success => {
                        debug!("Waiter {} satisfied after {} polls", condition.as_str(), attempt);
                        return Ok(());
                    }
                    WaitVerdict::Failure(observed) => {
                        return Err(ControlPlaneError::FailureState(format!(
                            "Waiter {} failed: stack {stack_name} entered status {observed}",
                            condition.as_str()
                        )));
                    }
                    WaitVerdict::Missing => {
                        return Err(ControlPlaneError::Unexpected(format!(
                            "Stack with id {stack_name} does not exist"
                        )));
                    }
                    WaitVerdict::Retry => {
                        debug!(
                            "Waiting for {} to reach {}, current: {} (attempt {}/{})",
                            stack_name,
                            condition.as_str(),
                            status.as_ref().map_or("absent", StackStatus::as_str),
                            attempt,
                            waiter.max_attempts
                        );
                        if attempt < waiter.max_attempts {
                            tokio::time::sleep(waiter.delay).await;
                        }
                    }
                }
            }

            Err(ControlPlaneError::MaxAttemptsExceeded {
                stack: stack_name.to_string(),
                attempts: waiter.max_attempts,
            })
        }
        .instrument(span)
        .await
    }

    async fn describe_stack_resource(
        &self,
        stack_name: &str,
        logical_resource_id: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        metrics::increment_control_plane_calls("describe_stack_resource");

        let response = self
            .client
            .describe_stack_resource()
            .stack_name(stack_name)
            .logical_resource_id(logical_resource_id)
            .send()
            .instrument(info_span!(
                "cloudformation.describe_stack_resource",
                stack.name = stack_name,
                resource.logical_id = logical_resource_id
            ))
            .await
            .map_err(|e| classify_error("describe_stack_resource", stack_name, e))?;

        let detail = response.stack_resource_detail().ok_or_else(|| {
            ControlPlaneError::Other(anyhow::anyhow!(
                "No resource detail returned for {logical_resource_id} in {stack_name}"
            ))
        })?;

        let mut fields = BTreeMap::new();
        insert_field(&mut fields, "stack_name", detail.stack_name());
        insert_field(&mut fields, "stack_id", detail.stack_id());
        insert_field(&mut fields, "logical_resource_id", detail.logical_resource_id());
        insert_field(&mut fields, "physical_resource_id", detail.physical_resource_id());
        insert_field(&mut fields, "resource_type", detail.resource_type());
        insert_field(
            &mut fields,
            "resource_status",
            detail.resource_status().map(|status| status.as_str()),
        );
        insert_field(
            &mut fields,
            "resource_status_reason",
            detail.resource_status_reason(),
        );
        insert_field(&mut fields, "description", detail.description());
        insert_field(&mut fields, "metadata", detail.metadata());

        let last_updated = detail.last_updated_timestamp().and_then(|timestamp| {
            chrono::DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
                .map(|datetime| datetime.to_rfc3339())
        });
        insert_field(&mut fields, "last_updated_timestamp", last_updated.as_deref());

        Ok(fields)
    }
}
