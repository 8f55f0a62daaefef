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
use crate::model::instance::{
    AddressSnapshot, BlockDeviceRef, CpuOptions, EniAttachmentRef, EniAttachmentState,
    ImageBlockDevice, ImageSnapshot, ImageState, InstanceSnapshot, InstanceState, MetadataOptions,
    NetworkInterfaceSnapshot, SpotRequestState, Tag, VolumeAttachmentView, VolumeSnapshot,
};
use crate::model::launch::LaunchSpec;
use async_trait::async_trait;
use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types as ec2;

const SERVICE: &str = "ec2";

/// Compute-plane operations the conversion needs. Implementations must not
/// cache: every invocation observes fresh provider state.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceSnapshot, CloudError>;

    /// Like [`describe_instance`], but a missing instance is `None` instead
    /// of an error (used after termination).
    async fn try_describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceSnapshot>, CloudError>;

    /// The instance's user-data (base64) via the attribute API; the describe
    /// response does not carry it.
    async fn describe_instance_user_data(
        &self,
        instance_id: &str,
    ) -> Result<Option<String>, CloudError>;

    async fn describe_spot_request(
        &self,
        spot_request_id: &str,
    ) -> Result<SpotRequestState, CloudError>;

    async fn cancel_spot_request(&self, spot_request_id: &str) -> Result<(), CloudError>;

    async fn stop_instance(&self, instance_id: &str) -> Result<(), CloudError>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), CloudError>;
    async fn reboot_instance(&self, instance_id: &str) -> Result<(), CloudError>;

    /// Volume descriptors for every volume currently attached to the given
    /// instance, with device name and delete-on-termination taken from that
    /// instance's attachment entry.
    async fn describe_instance_volumes(
        &self,
        instance_id: &str,
    ) -> Result<Vec<VolumeSnapshot>, CloudError>;

    async fn volume_attachment_view(
        &self,
        volume_id: &str,
    ) -> Result<VolumeAttachmentView, CloudError>;

    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> Result<(), CloudError>;

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device_name: &str,
    ) -> Result<(), CloudError>;

    /// No-reboot image creation, tagged at creation time so a crashed
    /// invocation can re-discover the image.
    async fn create_image(
        &self,
        instance_id: &str,
        image_name: &str,
        job_tag: &Tag,
    ) -> Result<String, CloudError>;

    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageSnapshot>, CloudError>;
    async fn find_image_by_name(&self, name: &str) -> Result<Option<ImageSnapshot>, CloudError>;
    async fn deregister_image(&self, image_id: &str) -> Result<(), CloudError>;
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CloudError>;

    async fn describe_network_interface(
        &self,
        interface_id: &str,
    ) -> Result<NetworkInterfaceSnapshot, CloudError>;

    async fn set_interface_delete_on_termination(
        &self,
        interface_id: &str,
        attachment_id: &str,
        delete_on_termination: bool,
    ) -> Result<(), CloudError>;

    async fn describe_addresses_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<AddressSnapshot>, CloudError>;

    async fn describe_address(
        &self,
        allocation_id: &str,
    ) -> Result<Option<AddressSnapshot>, CloudError>;

    async fn associate_address(
        &self,
        allocation_id: &str,
        interface_id: &str,
        private_ip: &str,
    ) -> Result<(), CloudError>;

    async fn create_tags(
        &self,
        resource_ids: &[String],
        key: &str,
        value: &str,
    ) -> Result<(), CloudError>;

    async fn delete_tags(&self, resource_ids: &[String], key: &str) -> Result<(), CloudError>;

    /// Launches the replacement instance; `extra_tags` (the job tag) are
    /// applied atomically with the launch so a crash right after the call
    /// still leaves the instance discoverable by tag.
    async fn run_instances(
        &self,
        spec: &LaunchSpec,
        extra_tags: &[Tag],
    ) -> Result<String, CloudError>;

    /// A pending or running instance carrying the given tag, excluding the
    /// original; used to recognise a replacement created by a crashed
    /// attempt.
    async fn find_instance_by_tag(
        &self,
        key: &str,
        value: &str,
        exclude_instance_id: &str,
    ) -> Result<Option<InstanceSnapshot>, CloudError>;
}

pub struct ComputeClientLive {
    client: aws_sdk_ec2::Client,
}

impl ComputeClientLive {
    pub fn new(client: aws_sdk_ec2::Client) -> Self {
        Self { client }
    }

    async fn snapshot_from_instance(
        &self,
        instance: &ec2::Instance,
    ) -> Result<InstanceSnapshot, CloudError> {
        let instance_id = instance
            .instance_id()
            .ok_or_else(|| CloudError::malformed(SERVICE, "instance without id"))?
            .to_string();
        let placement = instance.placement();

        let network_interfaces = instance
            .network_interfaces()
            .iter()
            .filter_map(|eni| {
                let attachment = eni.attachment()?;
                Some(EniAttachmentRef {
                    interface_id: eni.network_interface_id()?.to_string(),
                    attachment_id: attachment.attachment_id()?.to_string(),
                    device_index: attachment.device_index().unwrap_or(0),
                    delete_on_termination: attachment.delete_on_termination().unwrap_or(false),
                    subnet_id: eni.subnet_id().map(str::to_string),
                    primary_private_ip: eni.private_ip_address().map(str::to_string),
                })
            })
            .collect();

        let block_device_mappings = instance
            .block_device_mappings()
            .iter()
            .filter_map(|bdm| {
                let ebs = bdm.ebs()?;
                Some(BlockDeviceRef {
                    device_name: bdm.device_name()?.to_string(),
                    volume_id: ebs.volume_id()?.to_string(),
                    delete_on_termination: ebs.delete_on_termination().unwrap_or(false),
                })
            })
            .collect();

        let elastic_gpu_ids: Vec<String> = instance
            .elastic_gpu_associations()
            .iter()
            .filter_map(|a| a.elastic_gpu_id().map(str::to_string))
            .collect();
        let elastic_gpu_specs = if elastic_gpu_ids.is_empty() {
            Vec::new()
        } else {
            self.elastic_gpu_types(&elastic_gpu_ids).await?
        };

        Ok(InstanceSnapshot {
            instance_id,
            instance_type: instance
                .instance_type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            image_id: instance.image_id().unwrap_or_default().to_string(),
            state: instance
                .state()
                .and_then(|s| s.name())
                .map(|n| InstanceState::from_provider(n.as_str()))
                .unwrap_or(InstanceState::Unknown),
            availability_zone: placement
                .and_then(|p| p.availability_zone())
                .unwrap_or_default()
                .to_string(),
            tenancy: placement
                .and_then(|p| p.tenancy())
                .map(|t| t.as_str().to_string()),
            placement_group: placement
                .and_then(|p| p.group_name())
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            key_name: instance.key_name().map(str::to_string),
            iam_instance_profile_arn: instance
                .iam_instance_profile()
                .and_then(|p| p.arn())
                .map(str::to_string),
            monitoring_enabled: matches!(
                instance.monitoring().and_then(|m| m.state()),
                Some(ec2::MonitoringState::Enabled)
            ),
            ebs_optimized: instance.ebs_optimized().unwrap_or(false),
            root_device_name: instance.root_device_name().map(str::to_string),
            spot_instance_request_id: instance.spot_instance_request_id().map(str::to_string),
            instance_lifecycle: instance
                .instance_lifecycle()
                .map(|l| l.as_str().to_string()),
            cpu_options: instance.cpu_options().and_then(|c| {
                Some(CpuOptions {
                    core_count: c.core_count()?,
                    threads_per_core: c.threads_per_core()?,
                })
            }),
            hibernation_configured: instance
                .hibernation_options()
                .and_then(|h| h.configured())
                .unwrap_or(false),
            metadata_options: instance.metadata_options().map(|m| MetadataOptions {
                http_tokens: m.http_tokens().map(|t| t.as_str().to_string()),
                http_endpoint: m.http_endpoint().map(|e| e.as_str().to_string()),
                http_put_response_hop_limit: m.http_put_response_hop_limit(),
            }),
            enclave_enabled: instance
                .enclave_options()
                .and_then(|e| e.enabled())
                .unwrap_or(false),
            user_data: None,
            tags: instance
                .tags()
                .iter()
                .filter_map(|t| Some(Tag::new(t.key()?, t.value()?)))
                .collect(),
            security_group_ids: instance
                .security_groups()
                .iter()
                .filter_map(|g| g.group_id().map(str::to_string))
                .collect(),
            network_interfaces,
            block_device_mappings,
            elastic_gpu_specs,
            // The describe response only exposes accelerator ARNs, not the
            // accelerator type needed for a launch specification.
            elastic_inference_accelerators: Vec::new(),
        })
    }

    async fn elastic_gpu_types(&self, gpu_ids: &[String]) -> Result<Vec<String>, CloudError> {
        let output = with_backoff(SERVICE, "describe_elastic_gpus", || async {
            self.client
                .describe_elastic_gpus()
                .set_elastic_gpu_ids(Some(gpu_ids.to_vec()))
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(output
            .elastic_gpu_set()
            .iter()
            .filter_map(|g| g.elastic_gpu_type().map(str::to_string))
            .collect())
    }

    async fn first_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<ec2::Instance>, CloudError> {
        let result = with_backoff(SERVICE, "describe_instances", || async {
            self.client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await;
        match result {
            Ok(output) => Ok(output
                .reservations()
                .iter()
                .flat_map(|r| r.instances())
                .next()
                .cloned()),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }
}

fn ec2_error<E, R>(err: SdkError<E, R>) -> CloudError
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

fn build_error(err: impl std::fmt::Display) -> CloudError {
    CloudError::malformed(SERVICE, format!("invalid request: {err}"))
}

fn image_snapshot(image: &ec2::Image) -> Option<ImageSnapshot> {
    Some(ImageSnapshot {
        image_id: image.image_id()?.to_string(),
        name: image.name().unwrap_or_default().to_string(),
        state: image
            .state()
            .map(|s| ImageState::from_provider(s.as_str()))
            .unwrap_or(ImageState::Unknown),
        creation_date: image.creation_date().map(str::to_string),
        block_device_mappings: image
            .block_device_mappings()
            .iter()
            .filter_map(|bdm| {
                let device_name = bdm.device_name()?.to_string();
                let ebs = bdm.ebs();
                Some(ImageBlockDevice {
                    device_name,
                    snapshot_id: ebs.and_then(|e| e.snapshot_id()).map(str::to_string),
                    encrypted: ebs.and_then(|e| e.encrypted()),
                    kms_key_id: ebs.and_then(|e| e.kms_key_id()).map(str::to_string),
                    volume_size: ebs.and_then(|e| e.volume_size()),
                    volume_type: ebs
                        .and_then(|e| e.volume_type())
                        .map(|t| t.as_str().to_string()),
                    iops: ebs.and_then(|e| e.iops()),
                    throughput: ebs.and_then(|e| e.throughput()),
                    delete_on_termination: ebs.and_then(|e| e.delete_on_termination()),
                })
            })
            .collect(),
    })
}

fn address_snapshot(address: &ec2::Address) -> Option<AddressSnapshot> {
    Some(AddressSnapshot {
        allocation_id: address.allocation_id()?.to_string(),
        association_id: address.association_id().map(str::to_string),
        public_ip: address.public_ip().unwrap_or_default().to_string(),
        private_ip: address.private_ip_address()?.to_string(),
        network_interface_id: address.network_interface_id().map(str::to_string),
    })
}

fn interface_snapshot(eni: &ec2::NetworkInterface) -> Option<NetworkInterfaceSnapshot> {
    Some(NetworkInterfaceSnapshot {
        interface_id: eni.network_interface_id()?.to_string(),
        status: eni
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        subnet_id: eni.subnet_id().map(str::to_string),
        primary_private_ip: eni.private_ip_address()?.to_string(),
        secondary_private_ips: eni
            .private_ip_addresses()
            .iter()
            .filter(|ip| !ip.primary().unwrap_or(false))
            .filter_map(|ip| ip.private_ip_address().map(str::to_string))
            .collect(),
        security_group_ids: eni
            .groups()
            .iter()
            .filter_map(|g| g.group_id().map(str::to_string))
            .collect(),
        source_dest_check: eni.source_dest_check().unwrap_or(true),
        attachment: eni.attachment().and_then(|a| {
            Some(EniAttachmentState {
                attachment_id: a.attachment_id()?.to_string(),
                instance_id: a.instance_id().map(str::to_string),
                device_index: a.device_index().unwrap_or(0),
                delete_on_termination: a.delete_on_termination().unwrap_or(false),
            })
        }),
    })
}

#[async_trait]
impl ComputeClient for ComputeClientLive {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceSnapshot, CloudError> {
        match self.first_instance(instance_id).await? {
            Some(instance) => self.snapshot_from_instance(&instance).await,
            None => Err(CloudError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            }),
        }
    }

    async fn try_describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceSnapshot>, CloudError> {
        match self.first_instance(instance_id).await? {
            Some(instance) => Ok(Some(self.snapshot_from_instance(&instance).await?)),
            None => Ok(None),
        }
    }

    async fn describe_instance_user_data(
        &self,
        instance_id: &str,
    ) -> Result<Option<String>, CloudError> {
        let output = with_backoff(SERVICE, "describe_instance_attribute", || async {
            self.client
                .describe_instance_attribute()
                .instance_id(instance_id)
                .attribute(ec2::InstanceAttributeName::UserData)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(output
            .user_data()
            .and_then(|u| u.value())
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }

    async fn describe_spot_request(
        &self,
        spot_request_id: &str,
    ) -> Result<SpotRequestState, CloudError> {
        let output = with_backoff(SERVICE, "describe_spot_instance_requests", || async {
            self.client
                .describe_spot_instance_requests()
                .spot_instance_request_ids(spot_request_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        output
            .spot_instance_requests()
            .first()
            .and_then(|r| r.state())
            .map(|s| SpotRequestState::from_provider(s.as_str()))
            .ok_or_else(|| CloudError::NotFound {
                kind: "spot instance request",
                id: spot_request_id.to_string(),
            })
    }

    async fn cancel_spot_request(&self, spot_request_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "cancel_spot_instance_requests", || async {
            self.client
                .cancel_spot_instance_requests()
                .spot_instance_request_ids(spot_request_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "stop_instances", || async {
            self.client
                .stop_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "terminate_instances", || async {
            self.client
                .terminate_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "reboot_instances", || async {
            self.client
                .reboot_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn describe_instance_volumes(
        &self,
        instance_id: &str,
    ) -> Result<Vec<VolumeSnapshot>, CloudError> {
        let output = with_backoff(SERVICE, "describe_volumes", || async {
            self.client
                .describe_volumes()
                .filters(
                    ec2::Filter::builder()
                        .name("attachment.instance-id")
                        .values(instance_id)
                        .build(),
                )
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;

        Ok(output
            .volumes()
            .iter()
            .filter_map(|volume| {
                let attachment = volume
                    .attachments()
                    .iter()
                    .find(|a| a.instance_id() == Some(instance_id))?;
                Some(VolumeSnapshot {
                    volume_id: volume.volume_id()?.to_string(),
                    device_name: attachment.device().unwrap_or_default().to_string(),
                    multi_attach_enabled: volume.multi_attach_enabled().unwrap_or(false),
                    delete_on_termination: attachment.delete_on_termination().unwrap_or(false),
                    size_gib: volume.size(),
                    volume_type: volume.volume_type().map(|t| t.as_str().to_string()),
                    iops: volume.iops(),
                    throughput: volume.throughput(),
                    encrypted: volume.encrypted().unwrap_or(false),
                    kms_key_id: volume.kms_key_id().map(str::to_string),
                })
            })
            .collect())
    }

    async fn volume_attachment_view(
        &self,
        volume_id: &str,
    ) -> Result<VolumeAttachmentView, CloudError> {
        let output = with_backoff(SERVICE, "describe_volumes", || async {
            self.client
                .describe_volumes()
                .volume_ids(volume_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        let volume = output
            .volumes()
            .first()
            .ok_or_else(|| CloudError::NotFound {
                kind: "volume",
                id: volume_id.to_string(),
            })?;
        Ok(VolumeAttachmentView {
            volume_id: volume_id.to_string(),
            state: volume
                .state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            attached_instance_ids: volume
                .attachments()
                .iter()
                .filter(|a| {
                    !matches!(
                        a.state(),
                        Some(ec2::VolumeAttachmentState::Detached)
                            | Some(ec2::VolumeAttachmentState::Detaching)
                    )
                })
                .filter_map(|a| a.instance_id().map(str::to_string))
                .collect(),
        })
    }

    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "detach_volume", || async {
            self.client
                .detach_volume()
                .volume_id(volume_id)
                .instance_id(instance_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device_name: &str,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "attach_volume", || async {
            self.client
                .attach_volume()
                .volume_id(volume_id)
                .instance_id(instance_id)
                .device(device_name)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn create_image(
        &self,
        instance_id: &str,
        image_name: &str,
        job_tag: &Tag,
    ) -> Result<String, CloudError> {
        let output = with_backoff(SERVICE, "create_image", || async {
            self.client
                .create_image()
                .instance_id(instance_id)
                .name(image_name)
                .no_reboot(true)
                .tag_specifications(
                    ec2::TagSpecification::builder()
                        .resource_type(ec2::ResourceType::Image)
                        .tags(
                            ec2::Tag::builder()
                                .key(&job_tag.key)
                                .value(&job_tag.value)
                                .build(),
                        )
                        .build(),
                )
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        output
            .image_id()
            .map(str::to_string)
            .ok_or_else(|| CloudError::malformed(SERVICE, "create_image returned no image id"))
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageSnapshot>, CloudError> {
        let result = with_backoff(SERVICE, "describe_images", || async {
            self.client
                .describe_images()
                .image_ids(image_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await;
        match result {
            Ok(output) => Ok(output.images().first().and_then(image_snapshot)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn find_image_by_name(&self, name: &str) -> Result<Option<ImageSnapshot>, CloudError> {
        let output = with_backoff(SERVICE, "describe_images", || async {
            self.client
                .describe_images()
                .owners("self")
                .filters(ec2::Filter::builder().name("name").values(name).build())
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(output.images().first().and_then(image_snapshot))
    }

    async fn deregister_image(&self, image_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "deregister_image", || async {
            self.client
                .deregister_image()
                .image_id(image_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "delete_snapshot", || async {
            self.client
                .delete_snapshot()
                .snapshot_id(snapshot_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn describe_network_interface(
        &self,
        interface_id: &str,
    ) -> Result<NetworkInterfaceSnapshot, CloudError> {
        let output = with_backoff(SERVICE, "describe_network_interfaces", || async {
            self.client
                .describe_network_interfaces()
                .network_interface_ids(interface_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        output
            .network_interfaces()
            .first()
            .and_then(interface_snapshot)
            .ok_or_else(|| CloudError::NotFound {
                kind: "network interface",
                id: interface_id.to_string(),
            })
    }

    async fn set_interface_delete_on_termination(
        &self,
        interface_id: &str,
        attachment_id: &str,
        delete_on_termination: bool,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "modify_network_interface_attribute", || async {
            self.client
                .modify_network_interface_attribute()
                .network_interface_id(interface_id)
                .attachment(
                    ec2::NetworkInterfaceAttachmentChanges::builder()
                        .attachment_id(attachment_id)
                        .delete_on_termination(delete_on_termination)
                        .build(),
                )
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn describe_addresses_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<AddressSnapshot>, CloudError> {
        let output = with_backoff(SERVICE, "describe_addresses", || async {
            self.client
                .describe_addresses()
                .filters(
                    ec2::Filter::builder()
                        .name("instance-id")
                        .values(instance_id)
                        .build(),
                )
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(output
            .addresses()
            .iter()
            .filter_map(address_snapshot)
            .collect())
    }

    async fn describe_address(
        &self,
        allocation_id: &str,
    ) -> Result<Option<AddressSnapshot>, CloudError> {
        let result = with_backoff(SERVICE, "describe_addresses", || async {
            self.client
                .describe_addresses()
                .allocation_ids(allocation_id)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await;
        match result {
            Ok(output) => Ok(output.addresses().first().and_then(address_snapshot)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn associate_address(
        &self,
        allocation_id: &str,
        interface_id: &str,
        private_ip: &str,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "associate_address", || async {
            self.client
                .associate_address()
                .allocation_id(allocation_id)
                .network_interface_id(interface_id)
                .private_ip_address(private_ip)
                .allow_reassociation(true)
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn create_tags(
        &self,
        resource_ids: &[String],
        key: &str,
        value: &str,
    ) -> Result<(), CloudError> {
        with_backoff(SERVICE, "create_tags", || async {
            self.client
                .create_tags()
                .set_resources(Some(resource_ids.to_vec()))
                .tags(ec2::Tag::builder().key(key).value(value).build())
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn delete_tags(&self, resource_ids: &[String], key: &str) -> Result<(), CloudError> {
        with_backoff(SERVICE, "delete_tags", || async {
            self.client
                .delete_tags()
                .set_resources(Some(resource_ids.to_vec()))
                .tags(ec2::Tag::builder().key(key).build())
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;
        Ok(())
    }

    async fn run_instances(
        &self,
        spec: &LaunchSpec,
        extra_tags: &[Tag],
    ) -> Result<String, CloudError> {
        let mut placement = ec2::Placement::builder().availability_zone(&spec.availability_zone);
        if let Some(tenancy) = &spec.tenancy {
            placement = placement.tenancy(ec2::Tenancy::from(tenancy.as_str()));
        }
        if let Some(group) = &spec.placement_group {
            placement = placement.group_name(group);
        }

        let instance_tags: Vec<ec2::Tag> = spec
            .tags
            .iter()
            .filter(|t| !extra_tags.iter().any(|e| e.key == t.key))
            .chain(extra_tags)
            .map(|t| ec2::Tag::builder().key(&t.key).value(&t.value).build())
            .collect();

        let mut request = self
            .client
            .run_instances()
            .min_count(1)
            .max_count(1)
            .image_id(&spec.image_id)
            .instance_type(ec2::InstanceType::from(spec.instance_type.as_str()))
            .placement(placement.build())
            .monitoring(
                ec2::RunInstancesMonitoringEnabled::builder()
                    .enabled(spec.monitoring_enabled)
                    .build()
                    .map_err(build_error)?,
            )
            .ebs_optimized(spec.ebs_optimized)
            .tag_specifications(
                ec2::TagSpecification::builder()
                    .resource_type(ec2::ResourceType::Instance)
                    .set_tags(Some(instance_tags))
                    .build(),
            );

        if let Some(key_name) = &spec.key_name {
            request = request.key_name(key_name);
        }
        if let Some(arn) = &spec.iam_instance_profile_arn {
            request = request.iam_instance_profile(
                ec2::IamInstanceProfileSpecification::builder()
                    .arn(arn)
                    .build(),
            );
        }
        if let Some(cpu) = &spec.cpu_options {
            request = request.cpu_options(
                ec2::CpuOptionsRequest::builder()
                    .core_count(cpu.core_count)
                    .threads_per_core(cpu.threads_per_core)
                    .build(),
            );
        }
        if spec.hibernation_configured {
            request = request.hibernation_options(
                ec2::HibernationOptionsRequest::builder()
                    .configured(true)
                    .build(),
            );
        }
        if let Some(metadata) = &spec.metadata_options {
            let mut builder = ec2::InstanceMetadataOptionsRequest::builder();
            if let Some(tokens) = &metadata.http_tokens {
                builder = builder.http_tokens(ec2::HttpTokensState::from(tokens.as_str()));
            }
            if let Some(endpoint) = &metadata.http_endpoint {
                builder = builder
                    .http_endpoint(ec2::InstanceMetadataEndpointState::from(endpoint.as_str()));
            }
            if let Some(hop_limit) = metadata.http_put_response_hop_limit {
                builder = builder.http_put_response_hop_limit(hop_limit);
            }
            request = request.metadata_options(builder.build());
        }
        if spec.enclave_enabled {
            request = request
                .enclave_options(ec2::EnclaveOptionsRequest::builder().enabled(true).build());
        }
        if let Some(user_data) = &spec.user_data {
            request = request.user_data(user_data);
        }
        if let Some(market) = &spec.market_options {
            request = request.instance_market_options(
                ec2::InstanceMarketOptionsRequest::builder()
                    .market_type(ec2::MarketType::Spot)
                    .spot_options(
                        ec2::SpotMarketOptions::builder()
                            .spot_instance_type(ec2::SpotInstanceType::Persistent)
                            .instance_interruption_behavior(
                                ec2::InstanceInterruptionBehavior::Stop,
                            )
                            .set_max_price(market.max_price.clone())
                            .build(),
                    )
                    .build(),
            );
        }
        for eni in &spec.network_interfaces {
            request = request.network_interfaces(
                ec2::InstanceNetworkInterfaceSpecification::builder()
                    .network_interface_id(&eni.interface_id)
                    .device_index(eni.device_index)
                    .build(),
            );
        }
        for bdm in &spec.block_device_mappings {
            let mut ebs = ec2::EbsBlockDevice::builder()
                .set_snapshot_id(bdm.snapshot_id.clone())
                .set_encrypted(bdm.encrypted)
                .set_kms_key_id(bdm.kms_key_id.clone())
                .set_volume_size(bdm.volume_size)
                .set_iops(bdm.iops)
                .set_throughput(bdm.throughput)
                .set_delete_on_termination(bdm.delete_on_termination);
            if let Some(volume_type) = &bdm.volume_type {
                ebs = ebs.volume_type(ec2::VolumeType::from(volume_type.as_str()));
            }
            request = request.block_device_mappings(
                ec2::BlockDeviceMapping::builder()
                    .device_name(&bdm.device_name)
                    .ebs(ebs.build())
                    .build(),
            );
        }
        for gpu_type in &spec.elastic_gpu_specs {
            request = request.elastic_gpu_specification(
                ec2::ElasticGpuSpecification::builder()
                    .r#type(gpu_type)
                    .build()
                    .map_err(build_error)?,
            );
        }
        for accelerator_type in &spec.elastic_inference_accelerators {
            request = request.elastic_inference_accelerators(
                ec2::ElasticInferenceAccelerator::builder()
                    .r#type(accelerator_type)
                    .build()
                    .map_err(build_error)?,
            );
        }

        let output = with_backoff(SERVICE, "run_instances", || {
            let request = request.clone();
            async move { request.send().await.map_err(ec2_error) }
        })
        .await?;

        output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::malformed(SERVICE, "run_instances returned no instance"))
    }

    async fn find_instance_by_tag(
        &self,
        key: &str,
        value: &str,
        exclude_instance_id: &str,
    ) -> Result<Option<InstanceSnapshot>, CloudError> {
        let output = with_backoff(SERVICE, "describe_instances", || async {
            self.client
                .describe_instances()
                .filters(
                    ec2::Filter::builder()
                        .name(format!("tag:{key}"))
                        .values(value)
                        .build(),
                )
                .filters(
                    ec2::Filter::builder()
                        .name("instance-state-name")
                        .values("pending")
                        .values("running")
                        .build(),
                )
                .send()
                .await
                .map_err(ec2_error)
        })
        .await?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id().is_some_and(|id| id != exclude_instance_id))
            .cloned();
        match instance {
            Some(instance) => Ok(Some(self.snapshot_from_instance(&instance).await?)),
            None => Ok(None),
        }
    }
}
