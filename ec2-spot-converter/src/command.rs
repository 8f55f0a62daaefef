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

use crate::model::instance::TargetHealthState;
use crate::model::record::{BillingModel, ConversionRequest, CpuOptionsRequest};
use crate::model::DEFAULT_STATE_TABLE;
use clap::Parser;

/// Convert an EC2 instance between the on-demand and persistent-spot billing
/// models, or replace it with a different instance type, while preserving
/// its network identity, storage, tags and integrations.
#[derive(Parser, Debug)]
#[command(
    name = "ec2-spot-converter",
    version = option_env!("VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
    about,
    rename_all = "kebab-case"
)]
pub struct ConverterCommand {
    /// Id of the EC2 instance to convert
    #[arg(long, required_unless_present = "generate_dynamodb_table")]
    pub instance_id: Option<String>,

    /// Billing model of the replacement instance
    #[arg(long, value_enum, default_value_t = BillingModel::Spot)]
    pub target_billing_model: BillingModel,

    /// Instance type of the replacement instance (default: same as the
    /// original)
    #[arg(long)]
    pub target_instance_type: Option<String>,

    /// CPU options of the replacement instance as JSON
    /// ('{"CoreCount":N,"ThreadsPerCore":M}'), or the literal string
    /// 'ignore' to suppress CPU options entirely
    #[arg(long, value_parser = parse_cpu_options)]
    pub cpu_options: Option<CpuOptionsRequest>,

    /// Maximum hourly price of the spot replacement
    #[arg(long)]
    pub max_spot_price: Option<f64>,

    /// KMS key used to encrypt the (so far unencrypted) volumes carried in
    /// the backup image
    #[arg(long)]
    pub volume_kms_key_id: Option<String>,

    /// Do not copy the original user-data onto the replacement
    #[arg(long)]
    pub ignore_userdata: bool,

    /// Do not copy the original hibernation options onto the replacement
    #[arg(long)]
    pub ignore_hibernation_options: bool,

    /// Stop the instance if it is running
    #[arg(long)]
    pub stop_instance: bool,

    /// Reboot the replacement if a volume had to be attached after boot
    #[arg(long)]
    pub reboot_if_needed: bool,

    /// Convert even if the instance cannot reach the stopped state (unsafe
    /// for in-flight writes)
    #[arg(long)]
    pub do_not_require_stopped_instance: bool,

    /// Move target-group memberships to the replacement; without ARNs, all
    /// target groups are scanned
    #[arg(long, num_args = 0.., value_name = "ARN")]
    pub check_targetgroups: Option<Vec<String>>,

    /// Health states accepted when waiting for the new target registrations
    /// (default: unused, healthy)
    #[arg(long, num_args = 0.., value_enum, value_name = "STATE")]
    pub wait_for_tg_states: Option<Vec<TargetHealthState>>,

    /// Update CloudWatch alarms referencing the instance; without prefixes
    /// (or with '*'), all alarms are scanned
    #[arg(long, num_args = 0.., value_name = "PREFIX")]
    pub update_cw_alarms: Option<Vec<String>>,

    /// Delete the backup image (and its snapshots) at the end of the
    /// conversion, or on replay of an already completed one
    #[arg(long)]
    pub delete_ami: bool,

    /// Name of the DynamoDB table holding the job records
    #[arg(long, default_value = DEFAULT_STATE_TABLE)]
    pub dynamodb_tablename: String,

    /// Create the DynamoDB state table and exit
    #[arg(long)]
    pub generate_dynamodb_table: bool,

    /// Override the sanity checks and the reset-step safety barrier
    #[arg(long)]
    pub force: bool,

    /// Do not pause for 10 seconds after a major warning
    #[arg(long)]
    pub do_not_pause_on_major_warnings: bool,

    /// Rewind the conversion so the named step runs again on the next pass
    #[arg(long, value_name = "STEP_NAME")]
    pub reset_step: Option<String>,

    /// Print the original and replacement instance states for side-by-side
    /// review after the conversion
    #[arg(long)]
    pub review_conversion_result: bool,

    /// Verbose tracing output on stderr
    #[arg(long)]
    pub debug: bool,
}

fn parse_cpu_options(value: &str) -> Result<CpuOptionsRequest, String> {
    if value == "ignore" {
        return Ok(CpuOptionsRequest::Ignore);
    }
    serde_json::from_str(value)
        .map(CpuOptionsRequest::Override)
        .map_err(|err| {
            format!(
                "expected 'ignore' or JSON like {{\"CoreCount\":1,\"ThreadsPerCore\":2}}: {err}"
            )
        })
}

impl ConverterCommand {
    pub fn to_request(&self) -> ConversionRequest {
        let mut request = ConversionRequest::new(self.target_billing_model);
        request.target_instance_type = self.target_instance_type.clone();
        if let Some(cpu_options) = &self.cpu_options {
            request.cpu_options = *cpu_options;
        }
        request.max_spot_price = self.max_spot_price;
        request.volume_kms_key_id = self.volume_kms_key_id.clone();
        request.ignore_userdata = self.ignore_userdata;
        request.ignore_hibernation_options = self.ignore_hibernation_options;
        request.reboot_if_needed = self.reboot_if_needed;
        request.target_group_filter = self.check_targetgroups.clone();
        if let Some(states) = &self.wait_for_tg_states {
            if !states.is_empty() {
                request.wait_for_tg_states = states.clone();
            }
        }
        request.cloudwatch_alarm_prefixes = self.update_cw_alarms.clone();
        request.stop_instance = self.stop_instance;
        request.do_not_require_stopped_instance = self.do_not_require_stopped_instance;
        request.delete_ami = self.delete_ami;
        request.force = self.force;
        request.do_not_pause_on_major_warnings = self.do_not_pause_on_major_warnings;
        request
    }
}
