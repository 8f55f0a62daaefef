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

//! Crate-owned snapshots of provider describe responses. Everything here is
//! serde-able so snapshots round-trip through the persisted job record; no
//! SDK type leaks out of the client layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpotRequestState {
    Open,
    Active,
    Closed,
    Cancelled,
    Failed,
    #[serde(other)]
    Unknown,
}

impl SpotRequestState {
    pub fn from_provider(name: &str) -> Self {
        match name {
            "open" => Self::Open,
            "active" => Self::Active,
            "closed" => Self::Closed,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ImageState {
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "available" => Self::Available,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// CPU topology of an instance; also the JSON shape accepted by
/// `--cpu-options` (`{"CoreCount":N,"ThreadsPerCore":M}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CpuOptions {
    pub core_count: i32,
    pub threads_per_core: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetadataOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_put_response_hop_limit: Option<i32>,
}

/// One ENI attachment as seen from the instance describe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EniAttachmentRef {
    pub interface_id: String,
    pub attachment_id: String,
    pub device_index: i32,
    pub delete_on_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_private_ip: Option<String>,
}

/// One block device as seen from the instance describe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceRef {
    pub device_name: String,
    pub volume_id: String,
    pub delete_on_termination: bool,
}

/// Full snapshot of the original instance, captured exactly once at the
/// discover step and never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub instance_type: String,
    pub image_id: String,
    pub state: InstanceState,
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile_arn: Option<String>,
    #[serde(default)]
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub ebs_optimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_instance_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_lifecycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_options: Option<CpuOptions>,
    #[serde(default)]
    pub hibernation_configured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_options: Option<MetadataOptions>,
    #[serde(default)]
    pub enclave_enabled: bool,
    /// Base64 as stored by the provider; fetched through the instance
    /// attribute API because the describe response does not include it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub network_interfaces: Vec<EniAttachmentRef>,
    #[serde(default)]
    pub block_device_mappings: Vec<BlockDeviceRef>,
    #[serde(default)]
    pub elastic_gpu_specs: Vec<String>,
    #[serde(default)]
    pub elastic_inference_accelerators: Vec<String>,
}

impl InstanceSnapshot {
    pub fn is_spot(&self) -> bool {
        self.spot_instance_request_id.is_some()
            || self.instance_lifecycle.as_deref() == Some("spot")
    }

    /// Volumes that are detached before the image is taken and reattached to
    /// the replacement: every attached volume except the root device and
    /// except those that travel inside the image.
    pub fn detachable_volume_ids(&self) -> Vec<&BlockDeviceRef> {
        self.block_device_mappings
            .iter()
            .filter(|bdm| {
                !bdm.delete_on_termination
                    && Some(bdm.device_name.as_str()) != self.root_device_name.as_deref()
            })
            .collect()
    }

    pub fn volume_ids(&self) -> Vec<String> {
        self.block_device_mappings
            .iter()
            .map(|bdm| bdm.volume_id.clone())
            .collect()
    }

    pub fn interface_ids(&self) -> Vec<String> {
        self.network_interfaces
            .iter()
            .map(|eni| eni.interface_id.clone())
            .collect()
    }
}

/// Volume descriptor captured at `get_volume_details`, attachment fields
/// relative to the original instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub volume_id: String,
    pub device_name: String,
    #[serde(default)]
    pub multi_attach_enabled: bool,
    #[serde(default)]
    pub delete_on_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gib: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i32>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

/// Live attachment state of a volume, used by the detach/reattach waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttachmentView {
    pub volume_id: String,
    pub state: String,
    pub attached_instance_ids: Vec<String>,
}

impl VolumeAttachmentView {
    pub fn is_attached_to(&self, instance_id: &str) -> bool {
        self.attached_instance_ids
            .iter()
            .any(|id| id == instance_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EniAttachmentState {
    pub attachment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub device_index: i32,
    pub delete_on_termination: bool,
}

/// Detailed ENI descriptor captured at the checkpoint step; holds everything
/// needed to restore the interface on the replacement instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceSnapshot {
    pub interface_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    pub primary_private_ip: String,
    #[serde(default)]
    pub secondary_private_ips: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub source_dest_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<EniAttachmentState>,
}

impl NetworkInterfaceSnapshot {
    pub fn holds_private_ip(&self, ip: &str) -> bool {
        self.primary_private_ip == ip || self.secondary_private_ips.iter().any(|s| s == ip)
    }
}

/// Elastic IP binding captured before the original instance is terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub allocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_id: Option<String>,
    pub public_ip: String,
    pub private_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlockDevice {
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_on_termination: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub image_id: String,
    pub name: String,
    pub state: ImageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub block_device_mappings: Vec<ImageBlockDevice>,
}

impl ImageSnapshot {
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.block_device_mappings
            .iter()
            .filter_map(|bdm| bdm.snapshot_id.clone())
            .collect()
    }
}

/// One (target group, port) membership of the original instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupMembership {
    pub target_group_arn: String,
    pub port: i32,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TargetHealthState {
    Unused,
    Unhealthy,
    Healthy,
    Initial,
    Draining,
    #[serde(other)]
    #[value(skip)]
    Unknown,
}

impl TargetHealthState {
    pub fn from_provider(name: &str) -> Self {
        name.parse().unwrap_or(Self::Unknown)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::check;
    use test_r::test;

    #[test]
    fn instance_state_provider_names_round_trip() {
        for name in [
            "pending",
            "running",
            "shutting-down",
            "stopping",
            "stopped",
            "terminated",
        ] {
            check!(InstanceState::from_provider(name).to_string() == name);
        }
        check!(InstanceState::from_provider("rebooting") == InstanceState::Unknown);
    }

    #[test]
    fn cpu_options_json_shape_matches_cli_contract() {
        let parsed: CpuOptions =
            serde_json::from_str(r#"{"CoreCount":2,"ThreadsPerCore":1}"#).unwrap();
        check!(
            parsed
                == CpuOptions {
                    core_count: 2,
                    threads_per_core: 1
                }
        );
    }

    #[test]
    fn detachable_volumes_exclude_root_and_ephemeral() {
        let snapshot = InstanceSnapshot {
            instance_id: "i-1".to_string(),
            instance_type: "m5.large".to_string(),
            image_id: "ami-1".to_string(),
            state: InstanceState::Stopped,
            availability_zone: "eu-west-1a".to_string(),
            tenancy: None,
            placement_group: None,
            key_name: None,
            iam_instance_profile_arn: None,
            monitoring_enabled: false,
            ebs_optimized: false,
            root_device_name: Some("/dev/xvda".to_string()),
            spot_instance_request_id: None,
            instance_lifecycle: None,
            cpu_options: None,
            hibernation_configured: false,
            metadata_options: None,
            enclave_enabled: false,
            user_data: None,
            tags: vec![],
            security_group_ids: vec![],
            network_interfaces: vec![],
            block_device_mappings: vec![
                BlockDeviceRef {
                    device_name: "/dev/xvda".to_string(),
                    volume_id: "vol-root".to_string(),
                    delete_on_termination: true,
                },
                BlockDeviceRef {
                    device_name: "/dev/xvdb".to_string(),
                    volume_id: "vol-data".to_string(),
                    delete_on_termination: false,
                },
                BlockDeviceRef {
                    device_name: "/dev/xvdc".to_string(),
                    volume_id: "vol-scratch".to_string(),
                    delete_on_termination: true,
                },
            ],
            elastic_gpu_specs: vec![],
            elastic_inference_accelerators: vec![],
        };

        let detachable = snapshot.detachable_volume_ids();
        check!(detachable.len() == 1);
        check!(detachable[0].volume_id == "vol-data");
    }
}
