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

use crate::clients::alarm::{AlarmClient, AlarmClientLive};
use crate::clients::compute::{ComputeClient, ComputeClientLive};
use crate::clients::target_group::{TargetGroupClient, TargetGroupClientLive};
use crate::log::log_warn_action;
use crate::model::record::ConversionRecord;
use crate::store::{RecordStore, RecordStoreLive};
use aws_config::BehaviorVersion;
use std::sync::Arc;
use std::time::Duration;

/// Poll cadence and overall budget of the waiter steps.
#[derive(Debug, Clone, Copy)]
pub struct WaiterPolicy {
    pub instance_poll: Duration,
    pub instance_timeout: Duration,
    pub image_poll: Duration,
    pub image_timeout: Duration,
}

impl Default for WaiterPolicy {
    fn default() -> Self {
        Self {
            instance_poll: Duration::from_secs(15),
            instance_timeout: Duration::from_secs(10 * 60),
            image_poll: Duration::from_secs(30),
            image_timeout: Duration::from_secs(20 * 60),
        }
    }
}

/// Context stores the shared clients and policies of a run; it is not
/// responsible for producing CLI output.
pub struct Context {
    pub compute: Arc<dyn ComputeClient>,
    pub target_groups: Arc<dyn TargetGroupClient>,
    pub alarms: Arc<dyn AlarmClient>,
    pub store: Arc<dyn RecordStore>,
    pub waiters: WaiterPolicy,
}

impl Context {
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        target_groups: Arc<dyn TargetGroupClient>,
        alarms: Arc<dyn AlarmClient>,
        store: Arc<dyn RecordStore>,
        waiters: WaiterPolicy,
    ) -> Self {
        Self {
            compute,
            target_groups,
            alarms,
            store,
            waiters,
        }
    }

    /// Live clients from the ambient credential and region chain.
    pub async fn from_env(state_table_name: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(
            Arc::new(ComputeClientLive::new(aws_sdk_ec2::Client::new(&sdk_config))),
            Arc::new(TargetGroupClientLive::new(
                aws_sdk_elasticloadbalancingv2::Client::new(&sdk_config),
            )),
            Arc::new(AlarmClientLive::new(aws_sdk_cloudwatch::Client::new(
                &sdk_config,
            ))),
            Arc::new(RecordStoreLive::new(
                aws_sdk_dynamodb::Client::new(&sdk_config),
                state_table_name,
            )),
            WaiterPolicy::default(),
        )
    }
}

/// The conversion context threaded through the executor and every step
/// handler: the shared clients, the mutable job record, and the warnings
/// accumulated for the end-of-run summary.
pub struct Job {
    pub ctx: Arc<Context>,
    pub record: ConversionRecord,
    pub warnings: Vec<String>,
}

impl Job {
    pub fn new(ctx: Arc<Context>, record: ConversionRecord) -> Self {
        Self {
            ctx,
            record,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log_warn_action("Warning", &message);
        self.warnings.push(message);
    }
}
