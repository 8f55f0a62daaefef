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

//! End-to-end conversion scenarios against the in-memory cloud: the full
//! step sequence, crash-resume, replay, reset-step and the preservation
//! properties of the replacement instance.

use crate::mock::{MockAddress, MockCloud, MockInstance, MockStore, MockVolume, MockVolumeAttachment};
use assert2::check;
use ec2_spot_converter::context::{Context, WaiterPolicy};
use ec2_spot_converter::error::ConversionError;
use ec2_spot_converter::executor::{run_conversion, StepStatus};
use ec2_spot_converter::model::instance::{
    AddressSnapshot, BlockDeviceRef, EniAttachmentRef, EniAttachmentState, InstanceSnapshot,
    InstanceState, NetworkInterfaceSnapshot, SpotRequestState, Tag,
};
use ec2_spot_converter::model::record::{BillingModel, ConversionRequest};
use ec2_spot_converter::model::JOB_TAG_KEY;
use ec2_spot_converter::steps;
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

const ORIGINAL: &str = "i-0aabbccddeeff0011";
const USER_DATA: &str = "IyEvYmluL3NoCmVjaG8gaGkK";

fn test_context(cloud: Arc<MockCloud>, store: Arc<MockStore>) -> Arc<Context> {
    Arc::new(Context::new(
        cloud.clone(),
        cloud.clone(),
        cloud,
        store,
        WaiterPolicy {
            instance_poll: Duration::from_millis(1),
            instance_timeout: Duration::from_secs(5),
            image_poll: Duration::from_millis(1),
            image_timeout: Duration::from_secs(5),
        },
    ))
}

struct SeedOptions {
    state: InstanceState,
    spot_request: Option<SpotRequestState>,
    encrypted_image_volume: bool,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            state: InstanceState::Running,
            spot_request: None,
            encrypted_image_volume: false,
        }
    }
}

/// Seeds the standard topology: two ENIs (primary with an elastic IP), a
/// root volume, a plain data volume and a multi-attached volume shared with
/// another instance.
fn seed(cloud: &MockCloud, options: SeedOptions) {
    cloud.with_state(|state| {
        state.interfaces.insert(
            "eni-a".to_string(),
            NetworkInterfaceSnapshot {
                interface_id: "eni-a".to_string(),
                status: "in-use".to_string(),
                subnet_id: Some("subnet-1".to_string()),
                primary_private_ip: "10.0.0.10".to_string(),
                secondary_private_ips: vec!["10.0.0.12".to_string()],
                security_group_ids: vec!["sg-1".to_string()],
                source_dest_check: true,
                attachment: Some(EniAttachmentState {
                    attachment_id: "eni-attach-a".to_string(),
                    instance_id: Some(ORIGINAL.to_string()),
                    device_index: 0,
                    delete_on_termination: true,
                }),
            },
        );
        state.interfaces.insert(
            "eni-b".to_string(),
            NetworkInterfaceSnapshot {
                interface_id: "eni-b".to_string(),
                status: "in-use".to_string(),
                subnet_id: Some("subnet-1".to_string()),
                primary_private_ip: "10.0.0.11".to_string(),
                secondary_private_ips: vec![],
                security_group_ids: vec!["sg-1".to_string()],
                source_dest_check: true,
                attachment: Some(EniAttachmentState {
                    attachment_id: "eni-attach-b".to_string(),
                    instance_id: Some(ORIGINAL.to_string()),
                    device_index: 1,
                    delete_on_termination: false,
                }),
            },
        );

        state.volumes.insert(
            "vol-root".to_string(),
            MockVolume {
                volume_id: "vol-root".to_string(),
                multi_attach_enabled: false,
                encrypted: false,
                kms_key_id: None,
                size_gib: 20,
                volume_type: "gp3".to_string(),
                attachments: vec![MockVolumeAttachment {
                    instance_id: ORIGINAL.to_string(),
                    device_name: "/dev/xvda".to_string(),
                    delete_on_termination: true,
                }],
            },
        );
        state.volumes.insert(
            "vol-data".to_string(),
            MockVolume {
                volume_id: "vol-data".to_string(),
                multi_attach_enabled: false,
                encrypted: false,
                kms_key_id: None,
                size_gib: 100,
                volume_type: "gp3".to_string(),
                attachments: vec![MockVolumeAttachment {
                    instance_id: ORIGINAL.to_string(),
                    device_name: "/dev/xvdf".to_string(),
                    delete_on_termination: false,
                }],
            },
        );
        state.volumes.insert(
            "vol-shared".to_string(),
            MockVolume {
                volume_id: "vol-shared".to_string(),
                multi_attach_enabled: true,
                encrypted: false,
                kms_key_id: None,
                size_gib: 50,
                volume_type: "io2".to_string(),
                attachments: vec![
                    MockVolumeAttachment {
                        instance_id: ORIGINAL.to_string(),
                        device_name: "/dev/xvdg".to_string(),
                        delete_on_termination: false,
                    },
                    MockVolumeAttachment {
                        instance_id: "i-other".to_string(),
                        device_name: "/dev/xvdg".to_string(),
                        delete_on_termination: false,
                    },
                ],
            },
        );

        let mut block_device_mappings = vec![
            BlockDeviceRef {
                device_name: "/dev/xvda".to_string(),
                volume_id: "vol-root".to_string(),
                delete_on_termination: true,
            },
            BlockDeviceRef {
                device_name: "/dev/xvdf".to_string(),
                volume_id: "vol-data".to_string(),
                delete_on_termination: false,
            },
            BlockDeviceRef {
                device_name: "/dev/xvdg".to_string(),
                volume_id: "vol-shared".to_string(),
                delete_on_termination: false,
            },
        ];
        if options.encrypted_image_volume {
            state.volumes.insert(
                "vol-enc".to_string(),
                MockVolume {
                    volume_id: "vol-enc".to_string(),
                    multi_attach_enabled: false,
                    encrypted: true,
                    kms_key_id: Some("kms-original".to_string()),
                    size_gib: 30,
                    volume_type: "gp3".to_string(),
                    attachments: vec![MockVolumeAttachment {
                        instance_id: ORIGINAL.to_string(),
                        device_name: "/dev/xvdh".to_string(),
                        delete_on_termination: true,
                    }],
                },
            );
            block_device_mappings.push(BlockDeviceRef {
                device_name: "/dev/xvdh".to_string(),
                volume_id: "vol-enc".to_string(),
                delete_on_termination: true,
            });
        }

        state.addresses.insert(
            "eipalloc-1".to_string(),
            MockAddress {
                snapshot: AddressSnapshot {
                    allocation_id: "eipalloc-1".to_string(),
                    association_id: Some("eipassoc-1".to_string()),
                    public_ip: "3.3.3.3".to_string(),
                    private_ip: "10.0.0.10".to_string(),
                    network_interface_id: Some("eni-a".to_string()),
                },
                instance_id: Some(ORIGINAL.to_string()),
            },
        );

        let spot_request_id = options.spot_request.map(|_| "sir-1".to_string());
        if let Some(spot_state) = options.spot_request {
            state.spot_requests.insert("sir-1".to_string(), spot_state);
        }

        state.instances.insert(
            ORIGINAL.to_string(),
            MockInstance {
                snapshot: InstanceSnapshot {
                    instance_id: ORIGINAL.to_string(),
                    instance_type: "t3.medium".to_string(),
                    image_id: "ami-base".to_string(),
                    state: options.state,
                    availability_zone: "eu-west-1a".to_string(),
                    tenancy: Some("default".to_string()),
                    placement_group: None,
                    key_name: Some("ops".to_string()),
                    iam_instance_profile_arn: Some(
                        "arn:aws:iam::123456789012:instance-profile/app".to_string(),
                    ),
                    monitoring_enabled: true,
                    ebs_optimized: true,
                    root_device_name: Some("/dev/xvda".to_string()),
                    instance_lifecycle: spot_request_id.as_ref().map(|_| "spot".to_string()),
                    spot_instance_request_id: spot_request_id,
                    cpu_options: None,
                    hibernation_configured: false,
                    metadata_options: None,
                    enclave_enabled: false,
                    user_data: None,
                    tags: vec![Tag::new("Name", "app-1")],
                    security_group_ids: vec!["sg-1".to_string()],
                    network_interfaces: vec![
                        EniAttachmentRef {
                            interface_id: "eni-a".to_string(),
                            attachment_id: "eni-attach-a".to_string(),
                            device_index: 0,
                            delete_on_termination: true,
                            subnet_id: Some("subnet-1".to_string()),
                            primary_private_ip: Some("10.0.0.10".to_string()),
                        },
                        EniAttachmentRef {
                            interface_id: "eni-b".to_string(),
                            attachment_id: "eni-attach-b".to_string(),
                            device_index: 1,
                            delete_on_termination: false,
                            subnet_id: Some("subnet-1".to_string()),
                            primary_private_ip: Some("10.0.0.11".to_string()),
                        },
                    ],
                    block_device_mappings,
                    elastic_gpu_specs: vec![],
                    elastic_inference_accelerators: vec![],
                },
                user_data: Some(USER_DATA.to_string()),
                transition: None,
                launch_spec: None,
            },
        );
    });
}

fn base_request(target: BillingModel) -> ConversionRequest {
    let mut request = ConversionRequest::new(target);
    request.do_not_pause_on_major_warnings = true;
    request
}

#[test]
async fn on_demand_to_spot_preserves_network_storage_and_identity() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();

    check!(summary.steps.len() == 21);
    for step in &summary.steps[..summary.steps.len() - 1] {
        check!(
            step.status == StepStatus::Success,
            "step {} should succeed",
            step.name
        );
    }
    let last = summary.steps.last().unwrap();
    check!(last.name == "deregister_image");
    check!(last.status == StepStatus::Skipped);

    let new_id = summary.new_instance_id.clone().unwrap();
    check!(new_id != ORIGINAL);

    cloud.with_state(|state| {
        let replacement = &state.instances[&new_id];
        check!(replacement.snapshot.state == InstanceState::Running);
        check!(replacement.snapshot.instance_type == "t3.medium");
        check!(replacement.snapshot.user_data.as_deref() == Some(USER_DATA));
        let spec = replacement.launch_spec.as_ref().unwrap();
        check!(spec.market_options.is_some());

        // Both ENIs moved over with their private IPs.
        for interface_id in ["eni-a", "eni-b"] {
            let eni = &state.interfaces[interface_id];
            check!(
                eni.attachment.as_ref().unwrap().instance_id.as_deref() == Some(new_id.as_str())
            );
        }
        check!(state.interfaces["eni-a"].primary_private_ip == "10.0.0.10");
        // The originally DeleteOnTermination=true primary ENI got its value
        // back on the new attachment.
        check!(state.interfaces["eni-a"].attachment.as_ref().unwrap().delete_on_termination);
        check!(!state.interfaces["eni-b"].attachment.as_ref().unwrap().delete_on_termination);

        // Elastic IP re-bound to the original primary private IP.
        let address = &state.addresses["eipalloc-1"];
        check!(address.snapshot.association_id.is_some());
        check!(address.snapshot.network_interface_id.as_deref() == Some("eni-a"));
        check!(address.snapshot.private_ip == "10.0.0.10");
        check!(address.instance_id.as_deref() == Some(new_id.as_str()));

        // Data volume re-attached on its device; the multi-attach volume is
        // shared with the other instance throughout.
        let data = &state.volumes["vol-data"];
        check!(data.attachments.len() == 1);
        check!(data.attachments[0].instance_id == new_id);
        check!(data.attachments[0].device_name == "/dev/xvdf");
        let shared = &state.volumes["vol-shared"];
        check!(shared.attachments.iter().any(|a| a.instance_id == "i-other"));
        check!(shared.attachments.iter().any(|a| a.instance_id == new_id));

        // The original instance is gone, the backup image is retained, job
        // tags are removed from everything that still exists.
        check!(state.instances[ORIGINAL].snapshot.state == InstanceState::Terminated);
        check!(state.images.len() == 1);
        let ami_id = state.images.keys().next().unwrap().clone();
        for resource in ["eni-a", "eni-b", "vol-data", "vol-shared", new_id.as_str(), ami_id.as_str()]
        {
            let tagged = state
                .tags
                .get(resource)
                .map(|tags| tags.contains_key(JOB_TAG_KEY))
                .unwrap_or(false);
            check!(!tagged, "resource {resource} should not carry the job tag");
        }
    });

    let record = store.record(ORIGINAL).unwrap();
    check!(record.is_success());
    check!(record.reboot_recommended);
    check!(record.new_instance_id.as_deref() == Some(new_id.as_str()));
    // The discover-time snapshot is still intact, including the original
    // DeleteOnTermination values that were flipped during the conversion.
    let original = record.original_instance_state.as_ref().unwrap();
    check!(original.network_interfaces[0].delete_on_termination);
    check!(original.user_data.as_deref() == Some(USER_DATA));
}

#[test]
async fn spot_to_spot_with_new_instance_type_cancels_the_old_request() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(
        &cloud,
        SeedOptions {
            state: InstanceState::Stopped,
            spot_request: Some(SpotRequestState::Active),
            ..SeedOptions::default()
        },
    );
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.target_instance_type = Some("m5.large".to_string());
    request.reboot_if_needed = true;

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();
    let new_id = summary.new_instance_id.unwrap();

    cloud.with_state(|state| {
        let replacement = &state.instances[&new_id];
        check!(replacement.snapshot.instance_type == "m5.large");
        check!(replacement.launch_spec.as_ref().unwrap().market_options.is_some());
        // The original persistent spot request was cancelled before the
        // terminate, otherwise the provider would have respawned it.
        check!(state.spot_requests["sir-1"] == SpotRequestState::Cancelled);
    });
}

#[test]
async fn orphan_spot_request_converts_without_a_stop() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(
        &cloud,
        SeedOptions {
            state: InstanceState::Running,
            spot_request: Some(SpotRequestState::Cancelled),
            ..SeedOptions::default()
        },
    );
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::OnDemand);
    request.do_not_require_stopped_instance = true;
    request.reboot_if_needed = true;

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();

    let wait_stopped = summary
        .steps
        .iter()
        .find(|s| s.name == "wait_stopped_instance")
        .unwrap();
    check!(wait_stopped.status == StepStatus::Skipped);

    let new_id = summary.new_instance_id.unwrap();
    cloud.with_state(|state| {
        let replacement = &state.instances[&new_id];
        check!(replacement.launch_spec.as_ref().unwrap().market_options.is_none());
        check!(replacement.snapshot.spot_instance_request_id.is_none());
    });
    check!(cloud.calls("stop_instance") == 0);
}

#[test]
async fn crash_after_create_new_instance_reuses_the_tagged_replacement() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;

    store.fail_save_after_step("create_new_instance");
    let error = run_conversion(ctx.clone(), ORIGINAL, request.clone(), None)
        .await
        .unwrap_err();
    check!(matches!(error, ConversionError::Persistence { .. }));
    check!(cloud.calls("run_instances") == 1);
    check!(
        store.record(ORIGINAL).unwrap().last_successful_step_name.as_deref()
            == Some("wait_resource_release")
    );

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();
    check!(cloud.calls("run_instances") == 1);
    let create = summary
        .steps
        .iter()
        .find(|s| s.name == "create_new_instance")
        .unwrap();
    check!(create.status == StepStatus::Success);
    check!(create.detail.contains("Recovered"));

    let record = store.record(ORIGINAL).unwrap();
    check!(record.is_success());
    let replay_count = summary
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Replayed)
        .count();
    check!(replay_count == 13);
}

#[test]
async fn kms_key_rewrites_only_unencrypted_image_volumes() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(
        &cloud,
        SeedOptions {
            encrypted_image_volume: true,
            ..SeedOptions::default()
        },
    );
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;
    request.volume_kms_key_id = Some("kms-new".to_string());

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();
    check!(summary
        .warnings
        .iter()
        .any(|w| w.contains("already encrypted")));

    let record = store.record(ORIGINAL).unwrap();
    let spec = record.launch_spec.as_ref().unwrap();
    let root = spec
        .block_device_mappings
        .iter()
        .find(|bdm| bdm.device_name == "/dev/xvda")
        .unwrap();
    check!(root.encrypted == Some(true));
    check!(root.kms_key_id.as_deref() == Some("kms-new"));
    let encrypted = spec
        .block_device_mappings
        .iter()
        .find(|bdm| bdm.device_name == "/dev/xvdh")
        .unwrap();
    check!(encrypted.kms_key_id.as_deref() == Some("kms-original"));
}

#[test]
async fn replay_after_success_deletes_the_image_on_request() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;
    run_conversion(ctx.clone(), ORIGINAL, request.clone(), None)
        .await
        .unwrap();
    check!(cloud.with_state(|state| state.images.len()) == 1);

    request.delete_ami = true;
    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();

    check!(summary.steps.len() == 21);
    for step in &summary.steps[..summary.steps.len() - 1] {
        check!(step.status == StepStatus::Replayed);
    }
    let last = summary.steps.last().unwrap();
    check!(last.name == "deregister_image");
    check!(last.status == StepStatus::Success);

    cloud.with_state(|state| {
        check!(state.images.is_empty());
        check!(state.deleted_snapshots == vec!["snap-of-vol-root".to_string()]);
    });
    check!(store.record(ORIGINAL).unwrap().ami_id.is_none());
}

#[test]
async fn target_groups_and_alarms_move_to_the_replacement() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    cloud.with_state(|state| {
        state.target_groups.insert(
            "arn:aws:elasticloadbalancing:eu-west-1:1:targetgroup/app/abc".to_string(),
            vec![crate::mock::MockTarget {
                instance_id: ORIGINAL.to_string(),
                port: 8080,
                health: ec2_spot_converter::model::instance::TargetHealthState::Healthy,
            }],
        );
        state.alarms.insert(
            "prod-cpu-high".to_string(),
            vec![("InstanceId".to_string(), ORIGINAL.to_string())],
        );
        state.alarms.insert(
            "other-disk-full".to_string(),
            vec![("InstanceId".to_string(), "i-unrelated".to_string())],
        );
    });
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;
    request.target_group_filter = Some(vec![]);
    request.cloudwatch_alarm_prefixes = Some(vec!["*".to_string()]);

    let summary = run_conversion(ctx, ORIGINAL, request, None).await.unwrap();
    check!(summary.steps.len() == 23);
    let new_id = summary.new_instance_id.unwrap();

    cloud.with_state(|state| {
        let targets =
            &state.target_groups["arn:aws:elasticloadbalancing:eu-west-1:1:targetgroup/app/abc"];
        check!(!targets.iter().any(|t| t.instance_id == ORIGINAL));
        check!(targets.iter().any(|t| t.instance_id == new_id && t.port == 8080));
        check!(state.alarms["prod-cpu-high"][0].1 == new_id);
        check!(state.alarms["other-disk-full"][0].1 == "i-unrelated");
    });
}

#[test]
async fn same_billing_model_without_other_changes_is_refused() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(
        &cloud,
        SeedOptions {
            state: InstanceState::Stopped,
            spot_request: Some(SpotRequestState::Active),
            ..SeedOptions::default()
        },
    );
    let ctx = test_context(cloud.clone(), store.clone());

    let error = run_conversion(ctx, ORIGINAL, base_request(BillingModel::Spot), None)
        .await
        .unwrap_err();
    check!(matches!(error, ConversionError::Precondition(_)));
    // Nothing was touched and nothing was persisted.
    check!(store.record(ORIGINAL).is_none());
    check!(cloud.calls("create_image") == 0);
}

#[test]
async fn reset_step_crossing_the_checkpoint_is_refused_without_force() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;
    run_conversion(ctx.clone(), ORIGINAL, request.clone(), None)
        .await
        .unwrap();

    let error = run_conversion(ctx.clone(), ORIGINAL, request.clone(), Some("detach_volumes"))
        .await
        .unwrap_err();
    check!(matches!(error, ConversionError::Precondition(_)));

    let error = run_conversion(ctx, ORIGINAL, request, Some("no_such_step"))
        .await
        .unwrap_err();
    check!(matches!(error, ConversionError::UnknownStep(_)));
}

#[test]
async fn reset_step_after_the_checkpoint_re_runs_the_tail() {
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(&cloud, SeedOptions::default());
    let ctx = test_context(cloud.clone(), store.clone());

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    request.reboot_if_needed = true;
    run_conversion(ctx.clone(), ORIGINAL, request.clone(), None)
        .await
        .unwrap();

    let summary = run_conversion(ctx, ORIGINAL, request, Some("manage_elastic_ip"))
        .await
        .unwrap();
    let manage_position = summary
        .steps
        .iter()
        .position(|s| s.name == "manage_elastic_ip")
        .unwrap();
    for step in &summary.steps[..manage_position] {
        check!(step.status == StepStatus::Replayed);
    }
    for step in &summary.steps[manage_position..] {
        check!(step.status != StepStatus::Replayed, "step {} re-ran", step.name);
    }

    // The elastic IP kept its association through the re-run.
    cloud.with_state(|state| {
        check!(state.addresses["eipalloc-1"].snapshot.association_id.is_some());
    });
    check!(store.record(ORIGINAL).unwrap().is_success());
}

#[test]
async fn capture_and_image_steps_are_idempotent_under_direct_replay() {
    use ec2_spot_converter::context::Job;
    use ec2_spot_converter::model::record::ConversionRecord;

    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(MockStore::new());
    seed(
        &cloud,
        SeedOptions {
            state: InstanceState::Stopped,
            ..SeedOptions::default()
        },
    );
    let ctx = test_context(cloud.clone(), store);

    let mut request = base_request(BillingModel::Spot);
    request.stop_instance = true;
    let mut job = Job::new(ctx, ConversionRecord::new(ORIGINAL, request));

    steps::instance::discover_instance_state(&mut job).await.unwrap();
    let captured = job.record.original_instance_state.clone();
    steps::instance::discover_instance_state(&mut job).await.unwrap();
    check!(job.record.original_instance_state == captured);

    steps::tags::tag_resources(&mut job).await.unwrap();
    let tags_after_first = cloud.with_state(|state| state.tags.clone());
    steps::tags::tag_resources(&mut job).await.unwrap();
    check!(cloud.with_state(|state| state.tags.clone()) == tags_after_first);

    steps::volumes::get_volume_details(&mut job).await.unwrap();
    steps::volumes::detach_volumes(&mut job).await.unwrap();
    let volumes_after_first = cloud.with_state(|state| {
        state.volumes["vol-data"].attachments.len() + state.volumes["vol-shared"].attachments.len()
    });
    steps::volumes::detach_volumes(&mut job).await.unwrap();
    check!(
        cloud.with_state(|state| {
            state.volumes["vol-data"].attachments.len()
                + state.volumes["vol-shared"].attachments.len()
        }) == volumes_after_first
    );

    steps::image::start_ami_creation(&mut job).await.unwrap();
    let ami_id = job.record.ami_id.clone();
    steps::image::start_ami_creation(&mut job).await.unwrap();
    check!(job.record.ami_id == ami_id);
    check!(cloud.calls("create_image") == 1);
}
