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

use crate::model::instance::{
    AddressSnapshot, CpuOptions, InstanceSnapshot, NetworkInterfaceSnapshot, TargetGroupMembership,
    TargetHealthState, VolumeSnapshot,
};
use crate::model::launch::LaunchSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BillingModel {
    Spot,
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConversionStatus {
    InProgress,
    Success,
}

/// How the replacement's CPU options are derived: inherit from the original,
/// suppress entirely (`--cpu-options ignore`), or pin an explicit topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CpuOptionsRequest {
    #[default]
    Inherit,
    Ignore,
    Override(CpuOptions),
}

/// Operator inputs, embedded into the job record so a resumed run does not
/// need the original command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub target_billing_model: BillingModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_instance_type: Option<String>,
    #[serde(default)]
    pub cpu_options: CpuOptionsRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spot_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_kms_key_id: Option<String>,
    #[serde(default)]
    pub ignore_userdata: bool,
    #[serde(default)]
    pub ignore_hibernation_options: bool,
    #[serde(default)]
    pub reboot_if_needed: bool,
    /// `None` disables target-group reconciliation; `Some(vec![])` means all
    /// target groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_filter: Option<Vec<String>>,
    #[serde(default)]
    pub wait_for_tg_states: Vec<TargetHealthState>,
    /// `None` disables alarm reconciliation; `Some(vec![])` or a `*` entry
    /// means all alarms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudwatch_alarm_prefixes: Option<Vec<String>>,

    // Per-invocation flags; refreshed from the command line on every resume.
    #[serde(default)]
    pub stop_instance: bool,
    #[serde(default)]
    pub do_not_require_stopped_instance: bool,
    #[serde(default)]
    pub delete_ami: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub do_not_pause_on_major_warnings: bool,
}

impl ConversionRequest {
    pub fn new(target_billing_model: BillingModel) -> Self {
        Self {
            target_billing_model,
            target_instance_type: None,
            cpu_options: CpuOptionsRequest::Inherit,
            max_spot_price: None,
            volume_kms_key_id: None,
            ignore_userdata: false,
            ignore_hibernation_options: false,
            reboot_if_needed: false,
            target_group_filter: None,
            wait_for_tg_states: vec![TargetHealthState::Unused, TargetHealthState::Healthy],
            cloudwatch_alarm_prefixes: None,
            stop_instance: false,
            do_not_require_stopped_instance: false,
            delete_ami: false,
            force: false,
            do_not_pause_on_major_warnings: false,
        }
    }

    /// Whether the request changes anything besides the billing model; used
    /// by the same-model sanity check.
    pub fn changes_instance_configuration(&self) -> bool {
        self.target_instance_type.is_some()
            || self.cpu_options != CpuOptionsRequest::Inherit
            || self.volume_kms_key_id.is_some()
    }

    /// A resumed run keeps the remembered inputs of the stored request and
    /// refreshes only the per-invocation flags from the current command line.
    pub fn merge_resumed(stored: &Self, current: &Self) -> Self {
        Self {
            stop_instance: current.stop_instance,
            do_not_require_stopped_instance: current.do_not_require_stopped_instance,
            delete_ami: current.delete_ami,
            force: current.force,
            do_not_pause_on_major_warnings: current.do_not_pause_on_major_warnings,
            ..stored.clone()
        }
    }
}

/// The single persisted entity of a conversion job, keyed by the original
/// instance id. Snapshots under `original_*` are captured once and never
/// mutated afterwards; the executor owns every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub instance_id: String,
    /// Opaque token tagged onto every transient resource; equal to the
    /// original instance id.
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_status: Option<ConversionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_step_name: Option<String>,
    #[serde(default)]
    pub step_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_billing_model: Option<BillingModel>,
    pub request: ConversionRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_instance_state: Option<InstanceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_volume_details: Option<Vec<VolumeSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_network_interfaces: Option<Vec<NetworkInterfaceSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_addresses: Option<Vec<AddressSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_target_groups: Option<Vec<TargetGroupMembership>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_spec: Option<LaunchSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_instance_id: Option<String>,
    #[serde(default)]
    pub reboot_recommended: bool,
    /// Set once `checkpoint_instance_state` has completed; the point of no
    /// return for `--reset-step`.
    #[serde(default)]
    pub checkpointed: bool,
}

impl ConversionRecord {
    pub fn new(instance_id: impl Into<String>, request: ConversionRequest) -> Self {
        let instance_id = instance_id.into();
        Self {
            job_id: instance_id.clone(),
            instance_id,
            start_date: Some(Utc::now()),
            last_update_date: None,
            end_date: None,
            conversion_status: Some(ConversionStatus::InProgress),
            last_successful_step_name: None,
            step_count: 0,
            source_billing_model: None,
            request,
            original_instance_state: None,
            original_volume_details: None,
            original_network_interfaces: None,
            original_addresses: None,
            original_target_groups: None,
            ami_id: None,
            ami_creation_date: None,
            launch_spec: None,
            new_instance_id: None,
            reboot_recommended: false,
            checkpointed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.conversion_status == Some(ConversionStatus::Success)
    }

    pub fn mark_step_done(&mut self, step_name: &str) {
        self.last_successful_step_name = Some(step_name.to_string());
        self.last_update_date = Some(Utc::now());
        self.step_count += 1;
    }

    pub fn mark_success(&mut self) {
        self.conversion_status = Some(ConversionStatus::Success);
        self.end_date = Some(Utc::now());
        self.last_update_date = self.end_date;
    }

    pub fn original_instance(&self) -> Result<&InstanceSnapshot, crate::error::StepError> {
        self.original_instance_state.as_ref().ok_or_else(|| {
            crate::error::StepError::Internal(
                "record is missing the original instance snapshot".to_string(),
            )
        })
    }

    pub fn original_volumes(&self) -> Result<&[VolumeSnapshot], crate::error::StepError> {
        self.original_volume_details
            .as_deref()
            .ok_or_else(|| {
                crate::error::StepError::Internal(
                    "record is missing the original volume details".to_string(),
                )
            })
    }

    pub fn replacement_instance_id(&self) -> Result<&str, crate::error::StepError> {
        self.new_instance_id.as_deref().ok_or_else(|| {
            crate::error::StepError::Internal(
                "record is missing the replacement instance id".to_string(),
            )
        })
    }
}
