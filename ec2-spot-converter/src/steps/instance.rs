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

use crate::context::Job;
use crate::error::StepError;
use crate::launch_spec::project;
use crate::model::instance::{InstanceState, SpotRequestState, Tag};
use crate::model::record::BillingModel;
use crate::model::JOB_TAG_KEY;
use crate::steps::{StepOutcome, StepResult};
use futures_util::future::BoxFuture;

pub fn discover_instance_state(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if job.record.original_instance_state.is_some() {
            return Ok(StepOutcome::success("Instance state already captured."));
        }

        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();
        let mut snapshot = compute.describe_instance(&instance_id).await?;
        if !job.record.request.ignore_userdata {
            snapshot.user_data = compute.describe_instance_user_data(&instance_id).await?;
        }

        let source = if snapshot.is_spot() {
            BillingModel::Spot
        } else {
            BillingModel::OnDemand
        };
        let detail = format!(
            "Captured {} ({}); source billing model is {source}.",
            instance_id, snapshot.instance_type
        );
        job.record.source_billing_model = Some(source);
        job.record.original_instance_state = Some(snapshot);
        Ok(StepOutcome::success(detail))
    })
}

pub fn wait_stopped_instance(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let compute = job.ctx.compute.clone();
        let snapshot = compute.describe_instance(&job.record.instance_id).await?;
        match snapshot.state {
            InstanceState::Stopped => Ok(StepOutcome::success("Instance is stopped.")),
            InstanceState::Stopping => Ok(StepOutcome::retry(
                job.ctx.waiters.instance_poll,
                "instance is stopping",
            )),
            state if job.record.request.do_not_require_stopped_instance => {
                Ok(StepOutcome::skipped(format!(
                    "Instance is {state} and cannot reach the stopped state; continuing as \
                     requested."
                )))
            }
            state => Ok(StepOutcome::retry(
                job.ctx.waiters.instance_poll,
                format!("instance is {state}"),
            )),
        }
    })
}

/// Freezes the detailed ENI, elastic IP and target-group snapshots. This is
/// the point of no return: everything before it is reversible, the next step
/// destroys the original instance.
pub fn checkpoint_instance_state(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if job.record.checkpointed {
            return Ok(StepOutcome::success("Instance state already checkpointed."));
        }

        let original = job.record.original_instance()?.clone();
        let compute = job.ctx.compute.clone();

        let mut interfaces = Vec::with_capacity(original.network_interfaces.len());
        for eni in &original.network_interfaces {
            interfaces.push(compute.describe_network_interface(&eni.interface_id).await?);
        }
        let addresses = compute
            .describe_addresses_for_instance(&original.instance_id)
            .await?;

        let target_groups = match &job.record.request.target_group_filter {
            None => None,
            Some(filter) => {
                let target_groups = job.ctx.target_groups.clone();
                let arns = if filter.is_empty() {
                    target_groups.list_target_group_arns().await?
                } else {
                    filter.clone()
                };
                let mut memberships = Vec::new();
                for arn in &arns {
                    memberships.extend(
                        target_groups
                            .instance_memberships(arn, &original.instance_id)
                            .await?,
                    );
                }
                Some(memberships)
            }
        };

        let detail = format!(
            "Checkpointed {} interface(s), {} address(es){}.",
            interfaces.len(),
            addresses.len(),
            target_groups
                .as_ref()
                .map(|tg| format!(", {} target group membership(s)", tg.len()))
                .unwrap_or_default()
        );
        job.record.original_network_interfaces = Some(interfaces);
        job.record.original_addresses = Some(addresses);
        job.record.original_target_groups = target_groups;
        job.record.checkpointed = true;
        Ok(StepOutcome::success(detail))
    })
}

/// Terminates the original instance. For a spot source the persistent spot
/// request is cancelled first, otherwise the provider would immediately
/// relaunch a replacement of its own.
pub fn terminate_instance(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();

        match compute.try_describe_instance(&instance_id).await? {
            None => Ok(StepOutcome::success("Instance already terminated.")),
            Some(snapshot) if snapshot.state.is_gone() => {
                Ok(StepOutcome::success("Instance termination already initiated."))
            }
            Some(snapshot) => {
                if job.record.source_billing_model == Some(BillingModel::Spot) {
                    if let Some(request_id) = &snapshot.spot_instance_request_id {
                        let state = compute.describe_spot_request(request_id).await?;
                        if state != SpotRequestState::Cancelled {
                            compute.cancel_spot_request(request_id).await?;
                        }
                    }
                }
                compute.terminate_instance(&instance_id).await?;
                Ok(StepOutcome::success(format!(
                    "Termination of {instance_id} initiated."
                )))
            }
        }
    })
}

/// Launches the replacement from the frozen launch specification. A crashed
/// previous attempt is recognised through the job tag, so at most one
/// replacement ever exists.
pub fn create_new_instance(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if let Some(new_instance_id) = &job.record.new_instance_id {
            return Ok(StepOutcome::success(format!(
                "Replacement instance {new_instance_id} already created."
            )));
        }

        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();
        if let Some(existing) = compute
            .find_instance_by_tag(JOB_TAG_KEY, &job.record.job_id, &instance_id)
            .await?
        {
            let detail = format!(
                "Recovered replacement instance {} by job tag.",
                existing.instance_id
            );
            job.record.new_instance_id = Some(existing.instance_id);
            return Ok(StepOutcome::success(detail));
        }

        if job.record.launch_spec.is_none() {
            let original = job.record.original_instance()?.clone();
            let ami_id = job.record.ami_id.clone().ok_or_else(|| {
                StepError::Internal("record has no backup image id".to_string())
            })?;
            let image = compute.describe_image(&ami_id).await?.ok_or_else(|| {
                StepError::Divergence(format!("backup image {ami_id} no longer exists"))
            })?;
            let projection = project(&original, &image, &job.record.request);
            for warning in projection.warnings {
                job.warn(warning);
            }
            job.record.launch_spec = Some(projection.spec);
        }

        let spec = job
            .record
            .launch_spec
            .clone()
            .ok_or_else(|| StepError::Internal("record has no launch specification".to_string()))?;
        let job_tag = Tag::new(JOB_TAG_KEY, &job.record.job_id);
        let new_instance_id = compute.run_instances(&spec, &[job_tag]).await?;
        let detail = format!("Replacement instance {new_instance_id} created.");
        job.record.new_instance_id = Some(new_instance_id);
        Ok(StepOutcome::success(detail))
    })
}

pub fn wait_new_instance_running(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let new_instance_id = job.record.replacement_instance_id()?.to_string();
        let compute = job.ctx.compute.clone();

        match compute.try_describe_instance(&new_instance_id).await? {
            None => Ok(StepOutcome::retry(
                job.ctx.waiters.instance_poll,
                format!("instance {new_instance_id} is not visible yet"),
            )),
            Some(snapshot) => match snapshot.state {
                InstanceState::Running => Ok(StepOutcome::success(format!(
                    "Replacement instance {new_instance_id} is running."
                ))),
                InstanceState::Pending => Ok(StepOutcome::retry(
                    job.ctx.waiters.instance_poll,
                    format!("instance {new_instance_id} is pending"),
                )),
                state if snapshot.state.is_gone() => Err(StepError::Divergence(format!(
                    "replacement instance {new_instance_id} is {state}; it was terminated \
                     outside of this conversion"
                ))),
                state => Ok(StepOutcome::retry(
                    job.ctx.waiters.instance_poll,
                    format!("instance {new_instance_id} is {state}"),
                )),
            },
        }
    })
}

pub fn reboot_if_needed(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if !job.record.reboot_recommended {
            return Ok(StepOutcome::skipped("No reboot required."));
        }
        if !job.record.request.reboot_if_needed {
            job.warn(
                "a reboot of the replacement instance is recommended; re-run with \
                 --reboot-if-needed or reboot it manually",
            );
            return Ok(StepOutcome::skipped(
                "Reboot recommended but --reboot-if-needed not set.",
            ));
        }

        let new_instance_id = job.record.replacement_instance_id()?.to_string();
        let compute = job.ctx.compute.clone();
        compute.reboot_instance(&new_instance_id).await?;
        Ok(StepOutcome::success(format!(
            "Replacement instance {new_instance_id} rebooted."
        )))
    })
}
