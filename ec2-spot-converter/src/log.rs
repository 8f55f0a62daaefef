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

use colored::{ColoredString, Colorize};

pub trait LogColorize {
    fn as_str(&self) -> impl Colorize;

    fn log_color_action(&self) -> ColoredString {
        self.as_str().green()
    }

    fn log_color_warn(&self) -> ColoredString {
        self.as_str().yellow().bold()
    }

    fn log_color_error(&self) -> ColoredString {
        self.as_str().red().bold()
    }

    fn log_color_highlight(&self) -> ColoredString {
        self.as_str().bold()
    }

    fn log_color_ok_highlight(&self) -> ColoredString {
        self.as_str().bold().green()
    }
}

impl LogColorize for &str {
    fn as_str(&self) -> impl Colorize {
        *self
    }
}

impl LogColorize for String {
    fn as_str(&self) -> impl Colorize {
        self.as_str()
    }
}

pub fn logln<T: AsRef<str>>(message: T) {
    println!("{}", message.as_ref());
}

pub fn log_action<T: AsRef<str>>(action: &str, subject: T) {
    println!("{} {}", action.log_color_action(), subject.as_ref());
}

pub fn log_warn_action<T: AsRef<str>>(action: &str, subject: T) {
    println!("{} {}", action.log_color_warn(), subject.as_ref());
}

pub fn log_error_action<T: AsRef<str>>(action: &str, subject: T) {
    eprintln!("{} {}", action.log_color_error(), subject.as_ref());
}

pub fn log_step_banner(position: usize, total: usize, description: &str) {
    println!(
        "{} {}...",
        format!("[STEP {position}/{total}]").log_color_highlight(),
        description
    );
}

pub fn log_step_success<T: AsRef<str>>(detail: T) {
    println!(
        "  => {} {}",
        "SUCCESS.".log_color_ok_highlight(),
        detail.as_ref()
    );
}

pub fn log_step_skipped<T: AsRef<str>>(detail: T) {
    println!(
        "  => {} {}",
        "SKIPPED!".log_color_warn(),
        detail.as_ref()
    );
}

pub fn log_step_failed<T: AsRef<str>>(detail: T) {
    eprintln!("  => {} {}", "FAILED!".log_color_error(), detail.as_ref());
}

pub fn log_warnings_summary(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    log_warn_action("Warnings", "encountered during the conversion:");
    for warning in warnings {
        println!("  - {}", warning.log_color_warn());
    }
}
