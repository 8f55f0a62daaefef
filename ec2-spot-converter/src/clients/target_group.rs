// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::clients::retry::with_backoff;
use crate::error::CloudError;
use crate::model::instance::{TargetGroupMembership, TargetHealthState};
use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_elasticloadbalancingv2::types as elbv2;

const SERVICE: &str = "elbv2";

/// Load-balancer membership operations used by the optional target-group
/// reconciliation step.
#[async_trait]
pub trait TargetGroupClient: Send + Sync {
    async fn list_target_group_arns(&self) -> Result<Vec<String>, CloudError>;

    /// Every (target group, port) pair the given instance is registered in.
    async fn instance_memberships(
        &self,
        target_group_arn: &str,
        instance_id: &str,
    ) -> Result<Vec<TargetGroupMembership>, CloudError>;

    async fn register_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<(), CloudError>;

    async fn deregister_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<(), CloudError>;

    async fn target_health(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<TargetHealthState, CloudError>;
}

pub struct TargetGroupClientLive {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl TargetGroupClientLive {
    pub fn new(client: aws_sdk_elasticloadbalancingv2::Client) -> Self {
        Self { client }
    }
}

fn elbv2_error<E, R>(err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    CloudError::Api {
        service: SERVICE,
        code: err.code().unwrap_or("Unknown").to_string(),
        message: err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{err:?}")),
    }
}

fn target(instance_id: &str, port: i32) -> Result<elbv2::TargetDescription, CloudError> {
    elbv2::TargetDescription::builder()
        .id(instance_id)
        .port(port)
        .build()
        .map_err(|err| CloudError::malformed(SERVICE, format!("invalid target: {err}")))
}

#[async_trait]
impl TargetGroupClient for TargetGroupClientLive {
    async fn list_target_group_arns(&self) -> Result<Vec<String>, CloudError> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = with_backoff(SERVICE, "describe_target_groups", || async {
                self.client
                    .describe_target_groups()
                    .set_marker(marker.clone())
                    .send()
                    .await
                    .map_err(elbv2_error)
            })
            .await?;
            arns.extend(
                output
                    .target_groups()
                    .iter()
                    .filter_map(|tg| tg.target_group_arn().map(str::to_string)),
            );
            match output.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }
        Ok(arns)
    }

    async fn instance_memberships(
        &self,
        target_group_arn: &str,
        instance_id: &str,
    ) -> Result<Vec<TargetGroupMembership>, CloudError> {
        let output = with_backoff(SERVICE, "describe_target_health", || async {
            self.client
                .describe_target_health()
                .target_group_arn(target_group_arn)
                .send()
                .await
                .map_err(elbv2_error)
        })
        .await?;
        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(|description| {
                let target = description.target()?;
                if target.id() != Some(instance_id) {
                    return None;
                }
                Some(TargetGroupMembership {
                    target_group_arn: target_group_arn.to_string(),
                    port: target.port()?,
                })
            })
            .collect())
    }

    async fn register_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "register_targets", || async {
            self.client
                .register_targets()
                .target_group_arn(target_group_arn)
                .targets(target(instance_id, port)?)
                .send()
                .await
                .map_err(elbv2_error)
        })
        .await?;
        Ok(())
    }

    async fn deregister_target(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "deregister_targets", || async {
            self.client
                .deregister_targets()
                .target_group_arn(target_group_arn)
                .targets(target(instance_id, port)?)
                .send()
                .await
                .map_err(elbv2_error)
        })
        .await?;
        Ok(())
    }

    async fn target_health(
        &self,
        target_group_arn: &str,
        instance_id: &str,
        port: i32,
    ) -> Result<TargetHealthState, CloudError> {
        let output = with_backoff(SERVICE, "describe_target_health", || async {
            self.client
                .describe_target_health()
                .target_group_arn(target_group_arn)
                .targets(target(instance_id, port)?)
                .send()
                .await
                .map_err(elbv2_error)
        })
        .await?;
        Ok(output
            .target_health_descriptions()
            .first()
            .and_then(|d| d.target_health())
            .and_then(|h| h.state())
            .map(|s| TargetHealthState::from_provider(s.as_str()))
            .unwrap_or(TargetHealthState::Unknown))
    }
}
