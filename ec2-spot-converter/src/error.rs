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

use std::time::Duration;

/// Error codes the adapter retries with backoff before giving up.
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "RequestTimeout",
];

/// Failure of a single provider call, after the adapter's retry policy has
/// already been applied.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CloudError {
    #[error("{service} request throttled, giving up after {attempts} attempts: {message}")]
    Throttled {
        service: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("{service} error {code}: {message}")]
    Api {
        service: &'static str,
        code: String,
        message: String,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

impl CloudError {
    pub fn api(
        service: &'static str,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            service,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { code, .. } => TRANSIENT_ERROR_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    /// Missing-resource responses show up either as typed `NotFound` values or
    /// as provider error codes such as `InvalidInstanceID.NotFound` and
    /// `ResourceNotFoundException`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api { code, .. } => {
                code.ends_with(".NotFound")
                    || code.ends_with(".Unavailable")
                    || code == "ResourceNotFoundException"
            }
            _ => false,
        }
    }
}

/// Outcome-side error of a single step handler. The executor wraps these into
/// [`ConversionError`] together with the step name.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// External state diverged after the point of no return and the handler
    /// cannot re-converge on it.
    #[error("{0}")]
    Divergence(String),

    /// The persisted record does not contain what this step needs; this means
    /// a bug or a manually edited record, not a provider failure.
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("step {step} did not converge within {timeout:?}; the conversion is safe to retry")]
    WaiterTimeout { step: String, timeout: Duration },

    #[error("step {step} failed: {source}")]
    StepFailure {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("record store unavailable: {source}")]
    Persistence {
        #[source]
        source: CloudError,
    },

    #[error(
        "step {step} cannot re-converge: {detail}. External state diverged after the point of \
         no return; inspect the persisted record for {instance_id} and reconstruct manually"
    )]
    IrreversibleDivergence {
        step: String,
        instance_id: String,
        detail: String,
    },

    #[error("unknown step name {0:?}")]
    UnknownStep(String),
}

impl ConversionError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}
