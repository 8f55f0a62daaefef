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

//! Sanity checks that run once, before the first step of a fresh conversion.
//! Nothing here mutates the job record; the only side effect is the optional
//! `--stop-instance` stop request.

use crate::context::Context;
use crate::error::ConversionError;
use crate::log::{log_action, log_warn_action};
use crate::model::instance::{InstanceState, SpotRequestState};
use crate::model::record::{BillingModel, ConversionRequest};
use std::time::Duration;

const MAJOR_WARNING_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct PreflightReport {
    pub source_billing_model: BillingModel,
    pub major_warnings: Vec<String>,
}

pub async fn preflight(
    ctx: &Context,
    instance_id: &str,
    request: &ConversionRequest,
) -> Result<PreflightReport, ConversionError> {
    let snapshot = ctx
        .compute
        .describe_instance(instance_id)
        .await
        .map_err(|error| {
            if error.is_not_found() {
                ConversionError::precondition(format!("instance {instance_id} does not exist"))
            } else {
                ConversionError::precondition(format!(
                    "unable to describe instance {instance_id}: {error}"
                ))
            }
        })?;

    let source_billing_model = if snapshot.is_spot() {
        BillingModel::Spot
    } else {
        BillingModel::OnDemand
    };

    let mut major_warnings = Vec::new();

    if let Some(request_id) = &snapshot.spot_instance_request_id {
        let state = ctx
            .compute
            .describe_spot_request(request_id)
            .await
            .map_err(|error| {
                ConversionError::precondition(format!(
                    "unable to describe spot request {request_id}: {error}"
                ))
            })?;
        if state == SpotRequestState::Cancelled && !snapshot.state.is_gone() {
            major_warnings.push(format!(
                "spot request {request_id} is cancelled while the instance is still alive; the \
                 provider can neither stop nor restart this instance (orphan spot request)"
            ));
        }
    }

    if source_billing_model == request.target_billing_model
        && !request.changes_instance_configuration()
        && !request.force
    {
        return Err(ConversionError::precondition(format!(
            "instance {instance_id} already uses the {source_billing_model} billing model and \
             no instance type, CPU options or KMS key change was requested; use --force to \
             convert anyway"
        )));
    }

    match snapshot.state {
        InstanceState::Stopped | InstanceState::Stopping => {}
        state if request.stop_instance => {
            log_action(
                "Stopping",
                format!("instance {instance_id} (currently {state})"),
            );
            ctx.compute
                .stop_instance(instance_id)
                .await
                .map_err(|error| {
                    ConversionError::precondition(format!(
                        "unable to stop instance {instance_id}: {error}"
                    ))
                })?;
        }
        _ if request.do_not_require_stopped_instance => {
            major_warnings.push(format!(
                "instance {instance_id} is not stopped; converting a live instance can lose \
                 in-flight writes"
            ));
        }
        state => {
            return Err(ConversionError::precondition(format!(
                "instance {instance_id} is {state}; stop it first, or pass --stop-instance or \
                 --do-not-require-stopped-instance"
            )))
        }
    }

    if !major_warnings.is_empty() {
        for warning in &major_warnings {
            log_warn_action("MAJOR WARNING", warning);
        }
        if !request.do_not_pause_on_major_warnings {
            log_warn_action(
                "Pausing",
                format!(
                    "{}s to let you interrupt (--do-not-pause-on-major-warnings disables this)",
                    MAJOR_WARNING_PAUSE.as_secs()
                ),
            );
            tokio::time::sleep(MAJOR_WARNING_PAUSE).await;
        }
    }

    Ok(PreflightReport {
        source_billing_model,
        major_warnings,
    })
}
