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

//! The resumable state-machine executor. It owns the job record, runs the
//! registered steps in order and persists the record after every completed
//! step, so an interrupted run resumes exactly where it left off.

use crate::context::{Context, Job};
use crate::error::{CloudError, ConversionError, StepError};
use crate::log::{
    log_action, log_step_banner, log_step_failed, log_step_skipped, log_step_success,
    log_warn_action, log_warnings_summary,
};
use crate::model::record::{ConversionRecord, ConversionRequest, ConversionStatus};
use crate::preflight::preflight;
use crate::steps::{
    checkpoint_position, names, position, registry, waiter_budget, StepDescriptor, StepOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Skipped,
    Replayed,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct ConversionSummary {
    pub instance_id: String,
    pub new_instance_id: Option<String>,
    pub steps: Vec<StepReport>,
    pub warnings: Vec<String>,
}

fn persistence(source: CloudError) -> ConversionError {
    ConversionError::Persistence { source }
}

fn map_step_error(step: &str, instance_id: &str, error: StepError) -> ConversionError {
    match error {
        StepError::Divergence(detail) => ConversionError::IrreversibleDivergence {
            step: step.to_string(),
            instance_id: instance_id.to_string(),
            detail,
        },
        other => ConversionError::StepFailure {
            step: step.to_string(),
            source: other,
        },
    }
}

pub async fn run_conversion(
    ctx: Arc<Context>,
    instance_id: &str,
    cli_request: ConversionRequest,
    reset_step: Option<&str>,
) -> Result<ConversionSummary, ConversionError> {
    ctx.store.ensure_table().await.map_err(persistence)?;
    let existing = ctx.store.load(instance_id).await.map_err(persistence)?;

    if existing.is_none() && reset_step.is_some() {
        return Err(ConversionError::precondition(format!(
            "--reset-step given but no conversion record exists for {instance_id}"
        )));
    }

    let record = match existing {
        Some(stored) => {
            debug!(
                instance_id,
                last_step = ?stored.last_successful_step_name,
                "resuming from persisted record"
            );
            let request = ConversionRequest::merge_resumed(&stored.request, &cli_request);
            ConversionRecord { request, ..stored }
        }
        None => ConversionRecord::new(instance_id, cli_request),
    };

    if record.is_success() && reset_step.is_none() {
        return replay_completed(ctx, record).await;
    }

    let steps = registry(&record.request);
    let mut job = Job::new(ctx, record);

    if let Some(reset) = reset_step {
        apply_reset(&mut job, &steps, reset).await?;
    }

    if job.record.last_successful_step_name.is_none() {
        let report = preflight(&job.ctx, instance_id, &job.record.request).await?;
        job.warnings.extend(report.major_warnings);
    }

    let resume_index = match &job.record.last_successful_step_name {
        None => 0,
        Some(name) => position(&steps, name)
            .map(|index| index + 1)
            .ok_or_else(|| ConversionError::UnknownStep(name.clone()))?,
    };

    let total = steps.len();
    let mut reports = Vec::with_capacity(total);
    for (index, step) in steps.iter().enumerate().take(resume_index) {
        log_step_banner(index + 1, total, step.description);
        log_step_success("(already completed)");
        reports.push(StepReport {
            name: step.name.to_string(),
            status: StepStatus::Replayed,
            detail: "already completed".to_string(),
        });
    }

    for (index, step) in steps.iter().enumerate().skip(resume_index) {
        log_step_banner(index + 1, total, step.description);
        let report = execute_step(&mut job, step).await?;
        reports.push(report);
    }

    job.record.mark_success();
    job.ctx.store.save(&job.record).await.map_err(persistence)?;

    log_action(
        "Converted",
        format!(
            "{instance_id} to {}; replacement instance: {}",
            job.record.request.target_billing_model,
            job.record.new_instance_id.as_deref().unwrap_or("<none>")
        ),
    );
    log_warnings_summary(&job.warnings);

    Ok(ConversionSummary {
        instance_id: instance_id.to_string(),
        new_instance_id: job.record.new_instance_id.clone(),
        steps: reports,
        warnings: job.warnings,
    })
}

/// Runs one step to completion: waiter outcomes poll until the step's budget
/// runs out, success and skip advance and persist the record, failures
/// persist the record unchanged so the next invocation retries the same step.
async fn execute_step(job: &mut Job, step: &StepDescriptor) -> Result<StepReport, ConversionError> {
    let budget = waiter_budget(step.name, &job.ctx.waiters);
    let started = Instant::now();

    loop {
        match (step.run)(job).await {
            Ok(StepOutcome::RetryAfter { delay, detail }) => {
                if started.elapsed() + delay >= budget {
                    job.ctx
                        .store
                        .save(&job.record)
                        .await
                        .map_err(persistence)?;
                    log_step_failed(format!("timed out: {detail}"));
                    return Err(ConversionError::WaiterTimeout {
                        step: step.name.to_string(),
                        timeout: budget,
                    });
                }
                debug!(step = step.name, %detail, "waiting");
                tokio::time::sleep(delay).await;
            }
            Ok(StepOutcome::Success { detail }) => {
                job.record.mark_step_done(step.name);
                job.ctx
                    .store
                    .save(&job.record)
                    .await
                    .map_err(persistence)?;
                log_step_success(&detail);
                return Ok(StepReport {
                    name: step.name.to_string(),
                    status: StepStatus::Success,
                    detail,
                });
            }
            Ok(StepOutcome::Skipped { detail }) => {
                job.record.mark_step_done(step.name);
                job.ctx
                    .store
                    .save(&job.record)
                    .await
                    .map_err(persistence)?;
                log_step_skipped(&detail);
                return Ok(StepReport {
                    name: step.name.to_string(),
                    status: StepStatus::Skipped,
                    detail,
                });
            }
            Err(error) => {
                // The step pointer is left untouched; partial in-memory
                // progress (for example a recorded image id) is persisted so
                // the retry can pick it up.
                if let Err(save_error) = job.ctx.store.save(&job.record).await {
                    log_warn_action(
                        "Warning",
                        format!("failed to persist the record after a step failure: {save_error}"),
                    );
                }
                log_step_failed(error.to_string());
                return Err(map_step_error(step.name, &job.record.instance_id, error));
            }
        }
    }
}

/// Rewrites the resume pointer so that the given step re-runs next. Resets
/// that cross back over the point of no return are refused without
/// `--force`, because the steps before it operate on resources that no
/// longer exist.
async fn apply_reset(
    job: &mut Job,
    steps: &[StepDescriptor],
    reset_name: &str,
) -> Result<(), ConversionError> {
    let target = position(steps, reset_name)
        .ok_or_else(|| ConversionError::UnknownStep(reset_name.to_string()))?;
    let checkpoint = checkpoint_position(steps);
    let completed = job
        .record
        .last_successful_step_name
        .as_deref()
        .and_then(|name| position(steps, name));

    let crosses_checkpoint =
        target <= checkpoint && completed.map(|index| index > checkpoint).unwrap_or(false);
    if crosses_checkpoint {
        if !job.record.request.force {
            return Err(ConversionError::precondition(format!(
                "--reset-step {reset_name} crosses back over {}; the original instance has \
                 already been destroyed. Use --force if you really want this",
                names::CHECKPOINT_INSTANCE_STATE
            )));
        }
        job.warn(format!(
            "--reset-step {reset_name} crosses back over {}; steps before it cannot observe \
             the destroyed original instance",
            names::CHECKPOINT_INSTANCE_STATE
        ));
    }

    job.record.last_successful_step_name = if target == 0 {
        None
    } else {
        Some(steps[target - 1].name.to_string())
    };
    job.record.conversion_status = Some(ConversionStatus::InProgress);
    job.record.end_date = None;
    job.ctx.store.save(&job.record).await.map_err(persistence)?;
    log_warn_action(
        "Reset",
        format!("conversion will resume at step {reset_name}"),
    );
    Ok(())
}

/// A completed conversion replays its display output; the only live work
/// still permitted is a late `--delete-ami`.
async fn replay_completed(
    ctx: Arc<Context>,
    record: ConversionRecord,
) -> Result<ConversionSummary, ConversionError> {
    let steps = registry(&record.request);
    let total = steps.len();
    let instance_id = record.instance_id.clone();
    let mut job = Job::new(ctx, record);
    let mut reports = Vec::with_capacity(total);

    for (index, step) in steps.iter().enumerate() {
        log_step_banner(index + 1, total, step.description);
        let run_delete_ami = step.name == names::DEREGISTER_IMAGE
            && job.record.request.delete_ami
            && job.record.ami_id.is_some();
        if run_delete_ami {
            let report = execute_step(&mut job, step).await?;
            reports.push(report);
        } else {
            log_step_success("(from record)");
            reports.push(StepReport {
                name: step.name.to_string(),
                status: StepStatus::Replayed,
                detail: "from record".to_string(),
            });
        }
    }

    log_action(
        "Replayed",
        format!(
            "completed conversion of {instance_id}; replacement instance: {}",
            job.record.new_instance_id.as_deref().unwrap_or("<none>")
        ),
    );
    log_warnings_summary(&job.warnings);

    Ok(ConversionSummary {
        instance_id,
        new_instance_id: job.record.new_instance_id.clone(),
        steps: reports,
        warnings: job.warnings,
    })
}
