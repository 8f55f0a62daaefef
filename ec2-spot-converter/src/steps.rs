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

//! The ordered step registry. Step names are part of the external contract:
//! `--reset-step` accepts them, and the job record stores the last completed
//! one, so they must stay stable across releases.

use crate::context::{Job, WaiterPolicy};
use crate::error::StepError;
use crate::model::record::ConversionRequest;
use futures_util::future::BoxFuture;
use std::time::Duration;

pub mod image;
pub mod instance;
pub mod integrations;
pub mod network;
pub mod table;
pub mod tags;
pub mod volumes;

pub mod names {
    pub const READ_STATE_TABLE: &str = "read_state_table";
    pub const DISCOVER_INSTANCE_STATE: &str = "discover_instance_state";
    pub const WAIT_STOPPED_INSTANCE: &str = "wait_stopped_instance";
    pub const TAG_RESOURCES: &str = "tag_resources";
    pub const GET_VOLUME_DETAILS: &str = "get_volume_details";
    pub const DETACH_VOLUMES: &str = "detach_volumes";
    pub const WAIT_VOLUME_DETACH: &str = "wait_volume_detach";
    pub const START_AMI_CREATION: &str = "start_ami_creation";
    pub const PREPARE_NETWORK_INTERFACES: &str = "prepare_network_interfaces";
    pub const WAIT_AMI_READY: &str = "wait_ami_ready";
    pub const CHECKPOINT_INSTANCE_STATE: &str = "checkpoint_instance_state";
    pub const TERMINATE_INSTANCE: &str = "terminate_instance";
    pub const WAIT_RESOURCE_RELEASE: &str = "wait_resource_release";
    pub const CREATE_NEW_INSTANCE: &str = "create_new_instance";
    pub const WAIT_NEW_INSTANCE_RUNNING: &str = "wait_new_instance_running";
    pub const REATTACH_VOLUMES: &str = "reattach_volumes";
    pub const CONFIGURE_NETWORK_INTERFACES: &str = "configure_network_interfaces";
    pub const MANAGE_ELASTIC_IP: &str = "manage_elastic_ip";
    pub const REBOOT_IF_NEEDED: &str = "reboot_if_needed";
    pub const RECONCILE_TARGET_GROUPS: &str = "reconcile_target_groups";
    pub const UPDATE_CLOUDWATCH_ALARMS: &str = "update_cloudwatch_alarms";
    pub const UNTAG_RESOURCES: &str = "untag_resources";
    pub const DEREGISTER_IMAGE: &str = "deregister_image";
}

/// Outcome of one step execution. `RetryAfter` does not advance the step;
/// the executor re-runs the same action after the delay until the step's
/// waiter budget runs out.
#[derive(Debug)]
pub enum StepOutcome {
    Success { detail: String },
    Skipped { detail: String },
    RetryAfter { delay: Duration, detail: String },
}

impl StepOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self::Success {
            detail: detail.into(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self::Skipped {
            detail: detail.into(),
        }
    }

    pub fn retry(delay: Duration, detail: impl Into<String>) -> Self {
        Self::RetryAfter {
            delay,
            detail: detail.into(),
        }
    }
}

pub type StepResult = Result<StepOutcome, StepError>;

pub type StepFn = for<'a> fn(&'a mut Job) -> BoxFuture<'a, StepResult>;

/// A named step: calling `run` twice with no intervening external change is
/// equivalent to calling it once.
pub struct StepDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub run: StepFn,
}

/// The ordered step list for one job. The canonical sequence is fixed; the
/// optional target-group and alarm reconciliation steps are inserted before
/// `untag_resources` only when the job enables those features, so a plain
/// conversion always observes the same positions.
pub fn registry(request: &ConversionRequest) -> Vec<StepDescriptor> {
    let mut steps = vec![
        StepDescriptor {
            name: names::READ_STATE_TABLE,
            description: "Reading the job state table",
            run: table::read_state_table,
        },
        StepDescriptor {
            name: names::DISCOVER_INSTANCE_STATE,
            description: "Discovering the instance state",
            run: instance::discover_instance_state,
        },
        StepDescriptor {
            name: names::WAIT_STOPPED_INSTANCE,
            description: "Waiting for a stopped instance",
            run: instance::wait_stopped_instance,
        },
        StepDescriptor {
            name: names::TAG_RESOURCES,
            description: "Tagging all job resources",
            run: tags::tag_resources,
        },
        StepDescriptor {
            name: names::GET_VOLUME_DETAILS,
            description: "Capturing volume details",
            run: volumes::get_volume_details,
        },
        StepDescriptor {
            name: names::DETACH_VOLUMES,
            description: "Detaching persistent volumes",
            run: volumes::detach_volumes,
        },
        StepDescriptor {
            name: names::WAIT_VOLUME_DETACH,
            description: "Waiting for volume detachment",
            run: volumes::wait_volume_detach,
        },
        StepDescriptor {
            name: names::START_AMI_CREATION,
            description: "Starting the backup image creation",
            run: image::start_ami_creation,
        },
        StepDescriptor {
            name: names::PREPARE_NETWORK_INTERFACES,
            description: "Preserving network interfaces",
            run: network::prepare_network_interfaces,
        },
        StepDescriptor {
            name: names::WAIT_AMI_READY,
            description: "Waiting for the backup image",
            run: image::wait_ami_ready,
        },
        StepDescriptor {
            name: names::CHECKPOINT_INSTANCE_STATE,
            description: "Checkpointing the instance state",
            run: instance::checkpoint_instance_state,
        },
        StepDescriptor {
            name: names::TERMINATE_INSTANCE,
            description: "Terminating the original instance",
            run: instance::terminate_instance,
        },
        StepDescriptor {
            name: names::WAIT_RESOURCE_RELEASE,
            description: "Waiting for resource release",
            run: network::wait_resource_release,
        },
        StepDescriptor {
            name: names::CREATE_NEW_INSTANCE,
            description: "Creating the replacement instance",
            run: instance::create_new_instance,
        },
        StepDescriptor {
            name: names::WAIT_NEW_INSTANCE_RUNNING,
            description: "Waiting for the replacement instance",
            run: instance::wait_new_instance_running,
        },
        StepDescriptor {
            name: names::REATTACH_VOLUMES,
            description: "Re-attaching persistent volumes",
            run: volumes::reattach_volumes,
        },
        StepDescriptor {
            name: names::CONFIGURE_NETWORK_INTERFACES,
            description: "Restoring network interface settings",
            run: network::configure_network_interfaces,
        },
        StepDescriptor {
            name: names::MANAGE_ELASTIC_IP,
            description: "Re-associating elastic IPs",
            run: network::manage_elastic_ip,
        },
        StepDescriptor {
            name: names::REBOOT_IF_NEEDED,
            description: "Rebooting if needed",
            run: instance::reboot_if_needed,
        },
        StepDescriptor {
            name: names::UNTAG_RESOURCES,
            description: "Removing job tags",
            run: tags::untag_resources,
        },
        StepDescriptor {
            name: names::DEREGISTER_IMAGE,
            description: "Deregistering the backup image",
            run: image::deregister_image,
        },
    ];

    let untag_position = position(&steps, names::UNTAG_RESOURCES)
        .unwrap_or(steps.len() - 1);
    let mut insert_at = untag_position;
    if request.target_group_filter.is_some() {
        steps.insert(
            insert_at,
            StepDescriptor {
                name: names::RECONCILE_TARGET_GROUPS,
                description: "Reconciling target group memberships",
                run: integrations::reconcile_target_groups,
            },
        );
        insert_at += 1;
    }
    if request.cloudwatch_alarm_prefixes.is_some() {
        steps.insert(
            insert_at,
            StepDescriptor {
                name: names::UPDATE_CLOUDWATCH_ALARMS,
                description: "Updating CloudWatch alarms",
                run: integrations::update_cloudwatch_alarms,
            },
        );
    }

    steps
}

pub fn position(steps: &[StepDescriptor], name: &str) -> Option<usize> {
    steps.iter().position(|step| step.name == name)
}

/// Index of the point of no return: every step before or at this index is
/// reversible, everything after has destroyed external state.
pub fn checkpoint_position(steps: &[StepDescriptor]) -> usize {
    position(steps, names::CHECKPOINT_INSTANCE_STATE).unwrap_or(0)
}

/// Overall poll budget of a step; only the waiter steps ever exercise it.
pub fn waiter_budget(name: &str, policy: &WaiterPolicy) -> Duration {
    if name == names::WAIT_AMI_READY {
        policy.image_timeout
    } else {
        policy.instance_timeout
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::record::{BillingModel, ConversionRequest};
    use assert2::check;
    use pretty_assertions::assert_eq;
    use test_r::test;

    #[test]
    fn canonical_step_order_is_stable() {
        let steps = registry(&ConversionRequest::new(BillingModel::Spot));
        let step_names: Vec<&str> = steps.iter().map(|s| s.name).collect();
        assert_eq!(
            step_names,
            vec![
                "read_state_table",
                "discover_instance_state",
                "wait_stopped_instance",
                "tag_resources",
                "get_volume_details",
                "detach_volumes",
                "wait_volume_detach",
                "start_ami_creation",
                "prepare_network_interfaces",
                "wait_ami_ready",
                "checkpoint_instance_state",
                "terminate_instance",
                "wait_resource_release",
                "create_new_instance",
                "wait_new_instance_running",
                "reattach_volumes",
                "configure_network_interfaces",
                "manage_elastic_ip",
                "reboot_if_needed",
                "untag_resources",
                "deregister_image",
            ]
        );
    }

    #[test]
    fn optional_steps_are_inserted_before_untag_resources() {
        let mut request = ConversionRequest::new(BillingModel::Spot);
        request.target_group_filter = Some(vec![]);
        request.cloudwatch_alarm_prefixes = Some(vec!["prod-".to_string()]);
        let steps = registry(&request);

        let tg = position(&steps, names::RECONCILE_TARGET_GROUPS).unwrap();
        let cw = position(&steps, names::UPDATE_CLOUDWATCH_ALARMS).unwrap();
        let untag = position(&steps, names::UNTAG_RESOURCES).unwrap();
        let reboot = position(&steps, names::REBOOT_IF_NEEDED).unwrap();
        check!(reboot < tg);
        check!(tg < cw);
        check!(cw < untag);
        check!(steps.len() == 23);
    }

    #[test]
    fn checkpoint_splits_the_reversible_prefix() {
        let steps = registry(&ConversionRequest::new(BillingModel::Spot));
        let checkpoint = checkpoint_position(&steps);
        check!(steps[checkpoint].name == names::CHECKPOINT_INSTANCE_STATE);
        let terminate = position(&steps, names::TERMINATE_INSTANCE).unwrap();
        check!(terminate == checkpoint + 1);
    }

    #[test]
    fn image_waiter_gets_the_longer_budget() {
        let policy = WaiterPolicy::default();
        check!(waiter_budget(names::WAIT_AMI_READY, &policy) == policy.image_timeout);
        check!(waiter_budget(names::WAIT_STOPPED_INSTANCE, &policy) == policy.instance_timeout);
        check!(waiter_budget(names::TAG_RESOURCES, &policy) == policy.instance_timeout);
    }
}
