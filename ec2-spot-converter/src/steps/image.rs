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
use crate::error::StepError;
use crate::model::instance::{ImageState, Tag};
use crate::model::{backup_image_name, JOB_TAG_KEY};
use crate::steps::{StepOutcome, StepResult};
use chrono::Utc;
use futures_util::future::BoxFuture;

pub fn start_ami_creation(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if let Some(ami_id) = &job.record.ami_id {
            return Ok(StepOutcome::success(format!(
                "Backup image {ami_id} already requested."
            )));
        }

        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();
        let image_name = backup_image_name(&instance_id);

        // A previous attempt may have created the image without living long
        // enough to record it; the deterministic name finds it again.
        if let Some(existing) = compute.find_image_by_name(&image_name).await? {
            let detail = format!("Recovered backup image {} by name.", existing.image_id);
            job.record.ami_id = Some(existing.image_id);
            job.record.ami_creation_date = Some(Utc::now());
            return Ok(StepOutcome::success(detail));
        }

        let job_tag = Tag::new(JOB_TAG_KEY, &job.record.job_id);
        let ami_id = compute
            .create_image(&instance_id, &image_name, &job_tag)
            .await?;
        let detail = format!("Backup image {ami_id} creation started (no reboot).");
        job.record.ami_id = Some(ami_id);
        job.record.ami_creation_date = Some(Utc::now());
        Ok(StepOutcome::success(detail))
    })
}

pub fn wait_ami_ready(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let ami_id = job
            .record
            .ami_id
            .clone()
            .ok_or_else(|| StepError::Internal("record has no backup image id".to_string()))?;
        let compute = job.ctx.compute.clone();

        match compute.describe_image(&ami_id).await? {
            None => Ok(StepOutcome::retry(
                job.ctx.waiters.image_poll,
                format!("image {ami_id} is not visible yet"),
            )),
            Some(image) => match image.state {
                ImageState::Available => {
                    Ok(StepOutcome::success(format!("Backup image {ami_id} is available.")))
                }
                ImageState::Pending => Ok(StepOutcome::retry(
                    job.ctx.waiters.image_poll,
                    format!("image {ami_id} is still pending"),
                )),
                state => Err(StepError::Internal(format!(
                    "backup image {ami_id} entered state {state}"
                ))),
            },
        }
    })
}

pub fn deregister_image(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if !job.record.request.delete_ami {
            return Ok(StepOutcome::skipped(
                "Backup image retained; pass --delete-ami to remove it.",
            ));
        }
        let Some(ami_id) = job.record.ami_id.clone() else {
            return Ok(StepOutcome::success("No backup image recorded."));
        };
        let compute = job.ctx.compute.clone();

        match compute.describe_image(&ami_id).await? {
            None => {
                job.record.ami_id = None;
                Ok(StepOutcome::success(format!(
                    "Backup image {ami_id} already deregistered."
                )))
            }
            Some(image) => {
                let snapshot_ids = image.snapshot_ids();
                compute.deregister_image(&ami_id).await?;
                for snapshot_id in &snapshot_ids {
                    compute.delete_snapshot(snapshot_id).await?;
                }
                job.record.ami_id = None;
                Ok(StepOutcome::success(format!(
                    "Deregistered backup image {ami_id} and deleted {} snapshot(s).",
                    snapshot_ids.len()
                )))
            }
        }
    })
}
