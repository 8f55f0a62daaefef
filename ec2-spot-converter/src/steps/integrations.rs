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
use crate::steps::{StepOutcome, StepResult};
use futures_util::future::BoxFuture;

/// Moves the captured target-group memberships from the original to the
/// replacement instance, then waits until every new registration reaches one
/// of the accepted health states.
pub fn reconcile_target_groups(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let memberships = job.record.original_target_groups.clone().unwrap_or_default();
        if memberships.is_empty() {
            return Ok(StepOutcome::success(
                "Instance was not registered in any target group in scope.",
            ));
        }

        let target_groups = job.ctx.target_groups.clone();
        let old_instance_id = job.record.instance_id.clone();
        let new_instance_id = job.record.replacement_instance_id()?.to_string();

        for membership in &memberships {
            let old_ports = target_groups
                .instance_memberships(&membership.target_group_arn, &old_instance_id)
                .await?;
            if old_ports.iter().any(|m| m.port == membership.port) {
                target_groups
                    .deregister_target(
                        &membership.target_group_arn,
                        &old_instance_id,
                        membership.port,
                    )
                    .await?;
            }
            let new_ports = target_groups
                .instance_memberships(&membership.target_group_arn, &new_instance_id)
                .await?;
            if !new_ports.iter().any(|m| m.port == membership.port) {
                target_groups
                    .register_target(
                        &membership.target_group_arn,
                        &new_instance_id,
                        membership.port,
                    )
                    .await?;
            }
        }

        let accepted = &job.record.request.wait_for_tg_states;
        for membership in &memberships {
            let health = target_groups
                .target_health(
                    &membership.target_group_arn,
                    &new_instance_id,
                    membership.port,
                )
                .await?;
            if !accepted.contains(&health) {
                return Ok(StepOutcome::retry(
                    job.ctx.waiters.instance_poll,
                    format!(
                        "target {new_instance_id}:{} in {} is {health}",
                        membership.port, membership.target_group_arn
                    ),
                ));
            }
        }

        Ok(StepOutcome::success(format!(
            "Reconciled {} target group membership(s).",
            memberships.len()
        )))
    })
}

/// Rewrites the `InstanceId` dimension of every alarm in scope from the
/// original to the replacement instance id.
pub fn update_cloudwatch_alarms(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let prefixes = job
            .record
            .request
            .cloudwatch_alarm_prefixes
            .clone()
            .unwrap_or_default();
        let alarms = job.ctx.alarms.clone();
        let old_instance_id = job.record.instance_id.clone();
        let new_instance_id = job.record.replacement_instance_id()?.to_string();

        let names = alarms
            .alarm_names_for_instance(&prefixes, &old_instance_id)
            .await?;
        for name in &names {
            alarms
                .retarget_alarm(name, &old_instance_id, &new_instance_id)
                .await?;
        }

        Ok(StepOutcome::success(format!(
            "Updated {} CloudWatch alarm(s).",
            names.len()
        )))
    })
}
