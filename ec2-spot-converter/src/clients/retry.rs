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

use crate::error::CloudError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Runs a provider call, retrying throttling and availability errors with
/// bounded exponential backoff. Non-transient errors are returned unchanged;
/// eventual-consistency misses surface as not-found and are left to the
/// waiter steps, which re-query anyway.
pub async fn with_backoff<T, F, Fut>(
    service: &'static str,
    operation: &'static str,
    mut call: F,
) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                debug!(
                    service,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
            Err(error) if error.is_transient() => {
                return Err(CloudError::Throttled {
                    service,
                    attempts: attempt,
                    message: error.to_string(),
                })
            }
            Err(error) => return Err(error),
        }
    }
}
