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
use crate::model::record::ConversionRecord;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types as ddb;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "dynamodb";
const KEY_ATTRIBUTE: &str = "instance_id";
const RECORD_ATTRIBUTE: &str = "record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    AlreadyExists,
}

/// Get/put of the single job record, keyed by the original instance id.
/// Reads must be strongly consistent: a `load` following a completed `save`
/// returns the just-written value.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn ensure_table(&self) -> Result<TableStatus, CloudError>;
    async fn load(&self, instance_id: &str) -> Result<Option<ConversionRecord>, CloudError>;
    async fn save(&self, record: &ConversionRecord) -> Result<(), CloudError>;
}

pub struct RecordStoreLive {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl RecordStoreLive {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn wait_table_active(&self) -> Result<(), CloudError> {
        for _ in 0..60 {
            let output = with_backoff(SERVICE, "describe_table", || async {
                self.client
                    .describe_table()
                    .table_name(&self.table_name)
                    .send()
                    .await
                    .map_err(ddb_error)
            })
            .await?;
            if output
                .table()
                .and_then(|t| t.table_status())
                .map(|s| *s == ddb::TableStatus::Active)
                .unwrap_or(false)
            {
                return Ok(());
            }
            debug!(table = %self.table_name, "waiting for table to become active");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(CloudError::api(
            SERVICE,
            "TableNotActive",
            format!("table {} did not become active", self.table_name),
        ))
    }
}

fn ddb_error<E, R>(err: SdkError<E, R>) -> CloudError
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

fn build_error(err: impl std::fmt::Display) -> CloudError {
    CloudError::malformed(SERVICE, format!("invalid request: {err}"))
}

#[async_trait]
impl RecordStore for RecordStoreLive {
    async fn ensure_table(&self) -> Result<TableStatus, CloudError> {
        let result = with_backoff(SERVICE, "create_table", || async {
            self.client
                .create_table()
                .table_name(&self.table_name)
                .attribute_definitions(
                    ddb::AttributeDefinition::builder()
                        .attribute_name(KEY_ATTRIBUTE)
                        .attribute_type(ddb::ScalarAttributeType::S)
                        .build()
                        .map_err(build_error)?,
                )
                .key_schema(
                    ddb::KeySchemaElement::builder()
                        .attribute_name(KEY_ATTRIBUTE)
                        .key_type(ddb::KeyType::Hash)
                        .build()
                        .map_err(build_error)?,
                )
                .billing_mode(ddb::BillingMode::PayPerRequest)
                .send()
                .await
                .map_err(ddb_error)
        })
        .await;

        match result {
            Ok(_) => {
                self.wait_table_active().await?;
                Ok(TableStatus::Created)
            }
            Err(CloudError::Api { code, .. }) if code == "ResourceInUseException" => {
                self.wait_table_active().await?;
                Ok(TableStatus::AlreadyExists)
            }
            Err(error) => Err(error),
        }
    }

    async fn load(&self, instance_id: &str) -> Result<Option<ConversionRecord>, CloudError> {
        let output = with_backoff(SERVICE, "get_item", || async {
            self.client
                .get_item()
                .table_name(&self.table_name)
                .key(
                    KEY_ATTRIBUTE,
                    ddb::AttributeValue::S(instance_id.to_string()),
                )
                .consistent_read(true)
                .send()
                .await
                .map_err(ddb_error)
        })
        .await?;

        let Some(item) = output.item() else {
            return Ok(None);
        };
        let json = item
            .get(RECORD_ATTRIBUTE)
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| {
                CloudError::malformed(SERVICE, format!("item {instance_id} has no record payload"))
            })?;
        let record = serde_json::from_str(json).map_err(|err| {
            CloudError::malformed(SERVICE, format!("record {instance_id} is not valid: {err}"))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &ConversionRecord) -> Result<(), CloudError> {
        let json = serde_json::to_string(record)
            .map_err(|err| CloudError::malformed(SERVICE, format!("record serialization: {err}")))?;
        with_backoff(SERVICE, "put_item", || async {
            self.client
                .put_item()
                .table_name(&self.table_name)
                .item(
                    KEY_ATTRIBUTE,
                    ddb::AttributeValue::S(record.instance_id.clone()),
                )
                .item(RECORD_ATTRIBUTE, ddb::AttributeValue::S(json.clone()))
                .send()
                .await
                .map_err(ddb_error)
        })
        .await?;
        Ok(())
    }
}
