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

pub mod instance;
pub mod launch;
pub mod record;

/// Tag key applied to every resource touched by a conversion job. External
/// automation is expected to leave tagged resources alone for the duration of
/// the job.
pub const JOB_TAG_KEY: &str = "ec2-spot-converter:job-id";

/// Name given to the backup image; also used to re-discover the image when a
/// retry races a previous, partially recorded creation.
pub fn backup_image_name(instance_id: &str) -> String {
    format!("ec2-spot-converter-{instance_id}")
}

/// Default name of the DynamoDB table backing the job records.
pub const DEFAULT_STATE_TABLE: &str = "ec2-spot-converter-state-table";
