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
use crate::steps::{StepOutcome, StepResult};
use crate::store::TableStatus;
use futures_util::future::BoxFuture;

pub fn read_state_table(job: &mut Job) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        let status = job.ctx.store.ensure_table().await?;
        Ok(StepOutcome::success(match status {
            TableStatus::Created => "State table created.",
            TableStatus::AlreadyExists => "State table ready.",
        }))
    })
}
