// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

/// Named-pipe path for out-of-band telemetry delivery. Unset selects the
/// stdout sink.
pub const PIPE_PATH_ENV: &str = "DD_SERVERLESS_PIPE_PATH";

/// Environment-driven collector configuration, read once at construction.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Destination pipe for flushed records; `None` means stdout.
    pub pipe_path: Option<PathBuf>,
    /// Monitored function's name, recorded in flush metadata.
    pub function_name: Option<String>,
    /// Host execution environment identifier, recorded in flush metadata.
    pub execution_environment: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            pipe_path: env::var_os(PIPE_PATH_ENV)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            function_name: env::var("AWS_LAMBDA_FUNCTION_NAME").ok(),
            execution_environment: env::var("AWS_EXECUTION_ENV").ok(),
        }
    }
}
