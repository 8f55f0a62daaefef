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
use crate::model::instance::VolumeSnapshot;
use crate::model::record::ConversionRecord;
use crate::steps::{StepOutcome, StepResult};
use futures_util::future::BoxFuture;

/// The volumes that are detached before the image is taken and re-attached
/// to the replacement: `DeleteOnTermination=false` and not the root device
/// (the root travels through the backup image).
pub fn detachable_volumes(record: &ConversionRecord) -> Result<Vec<VolumeSnapshot>, StepError> {
    let root_device = record.original_instance()?.root_device_name.clone();
    Ok(record
        .original_volumes()?
        .iter()
        .filter(|volume| {
            !volume.delete_on_termination
                && Some(volume.device_name.as_str()) != root_device.as_deref()
        })
        .cloned()
        .collect())
}

pub fn get_volume_details(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        if let Some(volumes) = &job.record.original_volume_details {
            return Ok(StepOutcome::success(format!(
                "Volume details already captured ({} volume(s)).",
                volumes.len()
            )));
        }

        let compute = job.ctx.compute.clone();
        let volumes = compute
            .describe_instance_volumes(&job.record.instance_id)
            .await?;
        let detail = format!("Captured {} volume(s).", volumes.len());
        job.record.original_volume_details = Some(volumes);
        Ok(StepOutcome::success(detail))
    })
}

pub fn detach_volumes(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let volumes = detachable_volumes(&job.record)?;
        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();

        let mut detached = 0;
        for volume in &volumes {
            let view = compute.volume_attachment_view(&volume.volume_id).await?;
            if view.is_attached_to(&instance_id) {
                compute
                    .detach_volume(&volume.volume_id, &instance_id)
                    .await?;
                detached += 1;
            }
        }
        Ok(StepOutcome::success(format!(
            "Detached {detached} of {} persistent volume(s).",
            volumes.len()
        )))
    })
}

/// A multi-attach volume never reaches the `available` state while other
/// instances hold it; it counts as detached as soon as this instance leaves
/// its attachment list.
pub fn wait_volume_detach(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let volumes = detachable_volumes(&job.record)?;
        let compute = job.ctx.compute.clone();
        let instance_id = job.record.instance_id.clone();

        for volume in &volumes {
            let view = compute.volume_attachment_view(&volume.volume_id).await?;
            let released = if volume.multi_attach_enabled {
                !view.is_attached_to(&instance_id)
            } else {
                view.state == "available"
            };
            if !released {
                return Ok(StepOutcome::retry(
                    job.ctx.waiters.instance_poll,
                    format!("volume {} is still {}", volume.volume_id, view.state),
                ));
            }
        }
        Ok(StepOutcome::success(format!(
            "{} volume(s) detached.",
            volumes.len()
        )))
    })
}

pub fn reattach_volumes(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let volumes = detachable_volumes(&job.record)?;
        let compute = job.ctx.compute.clone();
        let new_instance_id = job.record.replacement_instance_id()?.to_string();

        let mut attached = 0;
        for volume in &volumes {
            let view = compute.volume_attachment_view(&volume.volume_id).await?;
            if view.is_attached_to(&new_instance_id) {
                continue;
            }
            compute
                .attach_volume(&volume.volume_id, &new_instance_id, &volume.device_name)
                .await?;
            attached += 1;
        }

        if !volumes.is_empty() && !job.record.reboot_recommended {
            job.record.reboot_recommended = true;
            job.warn(
                "volume(s) were attached after boot; a reboot of the replacement instance \
                 is recommended",
            );
        }
        Ok(StepOutcome::success(format!(
            "Re-attached {attached} of {} volume(s).",
            volumes.len()
        )))
    })
}
