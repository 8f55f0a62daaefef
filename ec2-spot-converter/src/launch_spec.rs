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

//! Pure projection of a captured instance snapshot plus a conversion request
//! into the launch specification of the replacement instance. This is the
//! compatibility matrix of the conversion: everything the provider lets us
//! carry over is carried over here, and nowhere else.

use crate::model::instance::{ImageSnapshot, InstanceSnapshot};
use crate::model::launch::{
    LaunchBlockDevice, LaunchNetworkInterface, LaunchSpec, MarketOptions,
};
use crate::model::record::{BillingModel, ConversionRequest, CpuOptionsRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub spec: LaunchSpec,
    pub warnings: Vec<String>,
}

/// Deterministic: the same snapshot, image and request always produce the
/// same specification. The original instance id never appears in the output.
pub fn project(
    original: &InstanceSnapshot,
    image: &ImageSnapshot,
    request: &ConversionRequest,
) -> Projection {
    let mut warnings = Vec::new();

    let cpu_options = match &request.cpu_options {
        CpuOptionsRequest::Inherit => original.cpu_options,
        CpuOptionsRequest::Ignore => None,
        CpuOptionsRequest::Override(options) => Some(*options),
    };

    let market_options = match request.target_billing_model {
        BillingModel::Spot => Some(MarketOptions {
            max_price: request.max_spot_price.map(|price| price.to_string()),
        }),
        BillingModel::OnDemand => None,
    };

    let block_device_mappings = image
        .block_device_mappings
        .iter()
        .filter(|bdm| bdm.snapshot_id.is_some())
        .map(|bdm| {
            let mut mapped = LaunchBlockDevice {
                device_name: bdm.device_name.clone(),
                snapshot_id: bdm.snapshot_id.clone(),
                encrypted: bdm.encrypted,
                kms_key_id: bdm.kms_key_id.clone(),
                volume_size: bdm.volume_size,
                volume_type: bdm.volume_type.clone(),
                iops: bdm.iops,
                throughput: bdm.throughput,
                delete_on_termination: bdm.delete_on_termination,
            };
            if let Some(kms_key_id) = &request.volume_kms_key_id {
                if mapped.encrypted == Some(true) {
                    warnings.push(format!(
                        "volume mapping {} is already encrypted; KMS key {} ignored for it",
                        mapped.device_name, kms_key_id
                    ));
                } else {
                    mapped.encrypted = Some(true);
                    mapped.kms_key_id = Some(kms_key_id.clone());
                }
            }
            mapped
        })
        .collect();

    let network_interfaces = original
        .network_interfaces
        .iter()
        .map(|eni| LaunchNetworkInterface {
            interface_id: eni.interface_id.clone(),
            device_index: eni.device_index,
        })
        .collect();

    let spec = LaunchSpec {
        image_id: image.image_id.clone(),
        instance_type: request
            .target_instance_type
            .clone()
            .unwrap_or_else(|| original.instance_type.clone()),
        key_name: original.key_name.clone(),
        availability_zone: original.availability_zone.clone(),
        tenancy: original.tenancy.clone(),
        placement_group: original.placement_group.clone(),
        iam_instance_profile_arn: original.iam_instance_profile_arn.clone(),
        monitoring_enabled: original.monitoring_enabled,
        ebs_optimized: original.ebs_optimized,
        cpu_options,
        hibernation_configured: if request.ignore_hibernation_options {
            false
        } else {
            original.hibernation_configured
        },
        metadata_options: original.metadata_options.clone(),
        enclave_enabled: original.enclave_enabled,
        user_data: if request.ignore_userdata {
            None
        } else {
            original.user_data.clone()
        },
        market_options,
        network_interfaces,
        block_device_mappings,
        tags: original.tags.clone(),
        elastic_gpu_specs: original.elastic_gpu_specs.clone(),
        elastic_inference_accelerators: original.elastic_inference_accelerators.clone(),
    };

    Projection { spec, warnings }
}
