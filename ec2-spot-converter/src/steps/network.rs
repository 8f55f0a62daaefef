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
use crate::error::{CloudError, StepError};
use crate::model::instance::NetworkInterfaceSnapshot;
use crate::steps::{StepOutcome, StepResult};
use futures_util::future::BoxFuture;

const ENI_STATUS_AVAILABLE: &str = "available";

fn divergence_if_gone(interface_id: &str, error: CloudError) -> StepError {
    if error.is_not_found() {
        StepError::Divergence(format!(
            "network interface {interface_id} no longer exists; it may have been removed by \
             external automation"
        ))
    } else {
        error.into()
    }
}

fn checkpointed_interfaces(job: &Job) -> Result<Vec<NetworkInterfaceSnapshot>, StepError> {
    job.record
        .original_network_interfaces
        .clone()
        .ok_or_else(|| {
            StepError::Internal("record is missing the network interface snapshots".to_string())
        })
}

/// Flips `DeleteOnTermination` off on every attached ENI so terminating the
/// original instance preserves the interfaces and their private IPs.
pub fn prepare_network_interfaces(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let original = job.record.original_instance()?.clone();
        let compute = job.ctx.compute.clone();

        let mut updated = 0;
        for eni in &original.network_interfaces {
            let current = compute
                .describe_network_interface(&eni.interface_id)
                .await?;
            if let Some(attachment) = current.attachment {
                if attachment.delete_on_termination {
                    compute
                        .set_interface_delete_on_termination(
                            &eni.interface_id,
                            &attachment.attachment_id,
                            false,
                        )
                        .await?;
                    updated += 1;
                }
            }
        }
        Ok(StepOutcome::success(format!(
            "Preserved {} network interface(s) ({updated} updated).",
            original.network_interfaces.len()
        )))
    })
}

/// After termination the preserved ENIs must become `available` and the
/// elastic IPs must lose their association before anything can be re-bound.
pub fn wait_resource_release(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let interfaces = checkpointed_interfaces(job)?;
        let addresses = job.record.original_addresses.clone().unwrap_or_default();
        let compute = job.ctx.compute.clone();

        for eni in &interfaces {
            let current = compute
                .describe_network_interface(&eni.interface_id)
                .await
                .map_err(|error| divergence_if_gone(&eni.interface_id, error))?;
            if current.status != ENI_STATUS_AVAILABLE {
                return Ok(StepOutcome::retry(
                    job.ctx.waiters.instance_poll,
                    format!(
                        "network interface {} is still {}",
                        eni.interface_id, current.status
                    ),
                ));
            }
        }

        for address in &addresses {
            if let Some(current) = compute.describe_address(&address.allocation_id).await? {
                if current.association_id.is_some() {
                    return Ok(StepOutcome::retry(
                        job.ctx.waiters.instance_poll,
                        format!(
                            "elastic IP {} is still associated",
                            address.allocation_id
                        ),
                    ));
                }
            }
        }

        Ok(StepOutcome::success(format!(
            "{} interface(s) and {} address(es) released.",
            interfaces.len(),
            addresses.len()
        )))
    })
}

/// Restores each preserved ENI's original `DeleteOnTermination` value on its
/// new attachment. The original values come from the discover-time snapshot;
/// by checkpoint time `prepare_network_interfaces` has already forced them
/// all to false.
pub fn configure_network_interfaces(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let original = job.record.original_instance()?.clone();
        let interfaces = checkpointed_interfaces(job)?;
        let compute = job.ctx.compute.clone();

        let mut restored = 0;
        for eni in &interfaces {
            let desired = original
                .network_interfaces
                .iter()
                .find(|original_eni| original_eni.interface_id == eni.interface_id)
                .map(|original_eni| original_eni.delete_on_termination)
                .unwrap_or(false);
            let current = compute
                .describe_network_interface(&eni.interface_id)
                .await
                .map_err(|error| divergence_if_gone(&eni.interface_id, error))?;
            if let Some(attachment) = current.attachment {
                if attachment.delete_on_termination != desired {
                    compute
                        .set_interface_delete_on_termination(
                            &eni.interface_id,
                            &attachment.attachment_id,
                            desired,
                        )
                        .await?;
                    restored += 1;
                }
            }
        }
        Ok(StepOutcome::success(format!(
            "Restored settings on {} interface(s) ({restored} updated).",
            interfaces.len()
        )))
    })
}

/// Re-associates each captured elastic IP with the private IP it was bound
/// to; the private IPs survived on the preserved ENIs.
pub fn manage_elastic_ip(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let addresses = job.record.original_addresses.clone().unwrap_or_default();
        let interfaces = checkpointed_interfaces(job)?;
        let compute = job.ctx.compute.clone();

        let mut associated = 0;
        let mut lost: Vec<String> = Vec::new();
        for address in &addresses {
            match compute.describe_address(&address.allocation_id).await? {
                None => lost.push(format!(
                    "elastic IP allocation {} no longer exists",
                    address.allocation_id
                )),
                Some(current) if current.association_id.is_some() => {}
                Some(_) => {
                    let holder = interfaces
                        .iter()
                        .find(|eni| eni.holds_private_ip(&address.private_ip));
                    match holder {
                        Some(eni) => {
                            compute
                                .associate_address(
                                    &address.allocation_id,
                                    &eni.interface_id,
                                    &address.private_ip,
                                )
                                .await?;
                            associated += 1;
                        }
                        None => lost.push(format!(
                            "no preserved interface holds private IP {} for elastic IP {}",
                            address.private_ip, address.allocation_id
                        )),
                    }
                }
            }
        }
        for message in lost {
            job.warn(message);
        }
        Ok(StepOutcome::success(format!(
            "Re-associated {associated} of {} elastic IP(s).",
            addresses.len()
        )))
    })
}
