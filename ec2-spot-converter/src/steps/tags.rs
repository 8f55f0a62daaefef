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

use crate::context::Job;
use crate::model::JOB_TAG_KEY;
use crate::steps::volumes::detachable_volumes;
use crate::steps::{StepOutcome, StepResult};
use futures_util::future::BoxFuture;

/// Tags the original instance, its ENIs and all its volumes with the job id.
/// The tag doubles as a soft lease visible to external automation and as the
/// idempotency anchor for retried resource creation.
pub fn tag_resources(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let original = job.record.original_instance()?;
        let mut resources = vec![original.instance_id.clone()];
        resources.extend(original.interface_ids());
        resources.extend(original.volume_ids());

        let compute = job.ctx.compute.clone();
        compute
            .create_tags(&resources, JOB_TAG_KEY, &job.record.job_id)
            .await?;
        Ok(StepOutcome::success(format!(
            "Tagged {} resource(s) with {JOB_TAG_KEY}.",
            resources.len()
        )))
    })
}

/// Removes the job tag from every resource that still exists after the
/// conversion: the replacement instance, the preserved ENIs, the re-attached
/// volumes and the backup image.
pub fn untag_resources(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let mut resources = vec![job.record.replacement_instance_id()?.to_string()];
        resources.extend(job.record.original_instance()?.interface_ids());
        resources.extend(
            detachable_volumes(&job.record)?
                .into_iter()
                .map(|volume| volume.volume_id),
        );
        if let Some(ami_id) = &job.record.ami_id {
            resources.push(ami_id.clone());
        }

        let compute = job.ctx.compute.clone();
        compute.delete_tags(&resources, JOB_TAG_KEY).await?;
        Ok(StepOutcome::success(format!(
            "Removed the job tag from {} resource(s).",
            resources.len()
        )))
    })
}
