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

use crate::model::instance::{CpuOptions, MetadataOptions, Tag};
use serde::{Deserialize, Serialize};

/// Persistent spot market options for the replacement instance. The
/// interruption behaviour is always `stop`; anything else would lose the
/// instance the conversion just worked to preserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
}

/// Reference to a preserved ENI; attaching by id re-binds the original
/// private IPs and security groups automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchNetworkInterface {
    pub interface_id: String,
    pub device_index: i32,
}

/// Block device entry derived from the backup image's mapping, with any
/// KMS re-encryption rewrite already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchBlockDevice {
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

/// The exact launch specification handed to the provider to create the
/// replacement instance. Projected once, frozen into the job record, and
/// never references the original instance id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile_arn: Option<String>,
    #[serde(default)]
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub ebs_optimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_options: Option<CpuOptions>,
    #[serde(default)]
    pub hibernation_configured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_options: Option<MetadataOptions>,
    #[serde(default)]
    pub enclave_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// `Some` for a persistent-spot target, `None` for on-demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_options: Option<MarketOptions>,
    #[serde(default)]
    pub network_interfaces: Vec<LaunchNetworkInterface>,
    #[serde(default)]
    pub block_device_mappings: Vec<LaunchBlockDevice>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub elastic_gpu_specs: Vec<String>,
    #[serde(default)]
    pub elastic_inference_accelerators: Vec<String>,
}
