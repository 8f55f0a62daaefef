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
use async_trait::async_trait;
use aws_sdk_cloudwatch::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatch::types as cw;

const SERVICE: &str = "cloudwatch";
const INSTANCE_DIMENSION: &str = "InstanceId";

/// Metric-alarm operations used by the optional alarm reconciliation step.
#[async_trait]
pub trait AlarmClient: Send + Sync {
    /// Names of the alarms matching any of the given name prefixes (empty or
    /// a `*` entry means all alarms) whose dimensions reference the given
    /// instance id.
    async fn alarm_names_for_instance(
        &self,
        prefixes: &[String],
        instance_id: &str,
    ) -> Result<Vec<String>, CloudError>;

    /// Rewrites the alarm's `InstanceId` dimension from the old to the new
    /// instance id, keeping every other alarm attribute intact.
    async fn retarget_alarm(
        &self,
        alarm_name: &str,
        old_instance_id: &str,
        new_instance_id: &str,
    ) -> Result<(), CloudError>;
}

pub struct AlarmClientLive {
    client: aws_sdk_cloudwatch::Client,
}

impl AlarmClientLive {
    pub fn new(client: aws_sdk_cloudwatch::Client) -> Self {
        Self { client }
    }

    async fn alarms_with_prefix(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<cw::MetricAlarm>, CloudError> {
        let mut alarms = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = with_backoff(SERVICE, "describe_alarms", || async {
                self.client
                    .describe_alarms()
                    .set_alarm_name_prefix(prefix.map(str::to_string))
                    .set_next_token(next_token.clone())
                    .send()
                    .await
                    .map_err(cw_error)
            })
            .await?;
            alarms.extend(output.metric_alarms().iter().cloned());
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(alarms)
    }

    async fn find_alarm(&self, alarm_name: &str) -> Result<Option<cw::MetricAlarm>, CloudError> {
        let output = with_backoff(SERVICE, "describe_alarms", || async {
            self.client
                .describe_alarms()
                .alarm_names(alarm_name)
                .send()
                .await
                .map_err(cw_error)
        })
        .await?;
        Ok(output.metric_alarms().first().cloned())
    }
}

fn cw_error<E, R>(err: SdkError<E, R>) -> CloudError
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

fn references_instance(alarm: &cw::MetricAlarm, instance_id: &str) -> bool {
    alarm
        .dimensions()
        .iter()
        .any(|d| d.name() == Some(INSTANCE_DIMENSION) && d.value() == Some(instance_id))
}

#[async_trait]
impl AlarmClient for AlarmClientLive {
    async fn alarm_names_for_instance(
        &self,
        prefixes: &[String],
        instance_id: &str,
    ) -> Result<Vec<String>, CloudError> {
        let all = prefixes.is_empty() || prefixes.iter().any(|p| p == "*");
        let mut alarms = Vec::new();
        if all {
            alarms = self.alarms_with_prefix(None).await?;
        } else {
            for prefix in prefixes {
                alarms.extend(self.alarms_with_prefix(Some(prefix)).await?);
            }
        }

        let mut names: Vec<String> = alarms
            .iter()
            .filter(|alarm| references_instance(alarm, instance_id))
            .filter_map(|alarm| alarm.alarm_name().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn retarget_alarm(
        &self,
        alarm_name: &str,
        old_instance_id: &str,
        new_instance_id: &str,
    ) -> Result<(), CloudError> {
        let Some(alarm) = self.find_alarm(alarm_name).await? else {
            return Err(CloudError::NotFound {
                kind: "alarm",
                id: alarm_name.to_string(),
            });
        };
        if !references_instance(&alarm, old_instance_id) {
            // Already rewritten by a previous attempt.
            return Ok(());
        }

        let dimensions: Vec<cw::Dimension> = alarm
            .dimensions()
            .iter()
            .map(|d| {
                let value = if d.name() == Some(INSTANCE_DIMENSION)
                    && d.value() == Some(old_instance_id)
                {
                    Some(new_instance_id.to_string())
                } else {
                    d.value().map(str::to_string)
                };
                cw::Dimension::builder()
                    .set_name(d.name().map(str::to_string))
                    .set_value(value)
                    .build()
            })
            .collect();

        with_backoff(SERVICE, "put_metric_alarm", || {
            let dimensions = dimensions.clone();
            let alarm = alarm.clone();
            async move {
                self.client
                    .put_metric_alarm()
                    .alarm_name(alarm_name)
                    .set_alarm_description(alarm.alarm_description().map(str::to_string))
                    .set_actions_enabled(alarm.actions_enabled())
                    .set_ok_actions(Some(alarm.ok_actions().to_vec()))
                    .set_alarm_actions(Some(alarm.alarm_actions().to_vec()))
                    .set_insufficient_data_actions(
                        Some(alarm.insufficient_data_actions().to_vec()),
                    )
                    .set_metric_name(alarm.metric_name().map(str::to_string))
                    .set_namespace(alarm.namespace().map(str::to_string))
                    .set_statistic(alarm.statistic().cloned())
                    .set_extended_statistic(alarm.extended_statistic().map(str::to_string))
                    .set_dimensions(Some(dimensions))
                    .set_period(alarm.period())
                    .set_unit(alarm.unit().cloned())
                    .set_evaluation_periods(alarm.evaluation_periods())
                    .set_datapoints_to_alarm(alarm.datapoints_to_alarm())
                    .set_threshold(alarm.threshold())
                    .set_comparison_operator(alarm.comparison_operator().cloned())
                    .set_treat_missing_data(alarm.treat_missing_data().map(str::to_string))
                    .set_evaluate_low_sample_count_percentile(
                        alarm
                            .evaluate_low_sample_count_percentile()
                            .map(str::to_string),
                    )
                    .set_metrics((!alarm.metrics().is_empty()).then(|| alarm.metrics().to_vec()))
                    .set_threshold_metric_id(alarm.threshold_metric_id().map(str::to_string))
                    .send()
                    .await
                    .map_err(cw_error)
            }
        })
        .await?;
        Ok(())
    }
}
