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

use clap::Parser;
use ec2_spot_converter::command::ConverterCommand;
use ec2_spot_converter::context::Context;
use ec2_spot_converter::executor::run_conversion;
use ec2_spot_converter::init_tracing;
use ec2_spot_converter::log::{log_action, log_error_action, log_warn_action, logln, LogColorize};
use ec2_spot_converter::store::TableStatus;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let command = ConverterCommand::parse();
    init_tracing(command.debug);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime")
        .block_on(async_main(command))
}

async fn async_main(command: ConverterCommand) -> ExitCode {
    let ctx = Arc::new(Context::from_env(&command.dynamodb_tablename).await);

    if command.generate_dynamodb_table {
        return match ctx.store.ensure_table().await {
            Ok(TableStatus::Created) => {
                log_action("Created", format!("table {}", command.dynamodb_tablename));
                ExitCode::SUCCESS
            }
            Ok(TableStatus::AlreadyExists) => {
                log_warn_action(
                    "Skipping",
                    format!("table {} already exists", command.dynamodb_tablename),
                );
                ExitCode::SUCCESS
            }
            Err(error) => {
                log_error_action("Error", error.to_string());
                ExitCode::FAILURE
            }
        };
    }

    let Some(instance_id) = command.instance_id.clone() else {
        log_error_action("Error", "--instance-id is required");
        return ExitCode::FAILURE;
    };

    let request = command.to_request();
    match run_conversion(
        ctx.clone(),
        &instance_id,
        request,
        command.reset_step.as_deref(),
    )
    .await
    {
        Ok(summary) => {
            if command.review_conversion_result {
                review_conversion(&ctx, &instance_id, summary.new_instance_id.as_deref()).await;
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            log_error_action("Error", error.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Prints the captured original state and the replacement's current state as
/// JSON, for side-by-side review with an external diff tool.
async fn review_conversion(ctx: &Context, instance_id: &str, new_instance_id: Option<&str>) {
    let original = match ctx.store.load(instance_id).await {
        Ok(record) => record.and_then(|r| r.original_instance_state),
        Err(error) => {
            log_warn_action("Warning", format!("cannot load the job record: {error}"));
            None
        }
    };
    if let Some(original) = original {
        logln("Original instance state:".log_color_highlight().to_string());
        match serde_json::to_string_pretty(&original) {
            Ok(json) => logln(json),
            Err(error) => log_warn_action("Warning", error.to_string()),
        }
    }
    if let Some(new_instance_id) = new_instance_id {
        match ctx.compute.try_describe_instance(new_instance_id).await {
            Ok(Some(snapshot)) => {
                logln(
                    "Replacement instance state:"
                        .log_color_highlight()
                        .to_string(),
                );
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => logln(json),
                    Err(error) => log_warn_action("Warning", error.to_string()),
                }
            }
            Ok(None) => log_warn_action(
                "Warning",
                format!("replacement instance {new_instance_id} is not visible"),
            ),
            Err(error) => log_warn_action("Warning", error.to_string()),
        }
    }
}
