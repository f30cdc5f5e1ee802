// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Engine status codes.
//!
//! `EndOfFile` is not a failure: operators return it from `pull_chunk` to say
//! they have nothing more to produce, and the driver treats it accordingly.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Status {
    #[error("End of file: {0}")]
    EndOfFile(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Memory limit exceeded: {0}")]
    MemLimitExceeded(String),
}

pub type Result<T, E = Status> = std::result::Result<T, E>;

impl Status {
    pub fn end_of_file(msg: impl Into<String>) -> Self {
        Status::EndOfFile(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Status::Cancelled(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Status::NotSupported(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Status::InternalError(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Status::NotFound(msg.into())
    }

    pub fn is_end_of_file(&self) -> bool {
        matches!(self, Status::EndOfFile(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Status::Cancelled(_))
    }
}

impl From<String> for Status {
    fn from(msg: String) -> Self {
        Status::InternalError(msg)
    }
}

impl From<arrow::error::ArrowError> for Status {
    fn from(err: arrow::error::ArrowError) -> Self {
        Status::InternalError(format!("arrow: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn display_carries_category_and_message() {
        assert_eq!(
            Status::not_supported("reader type 42").to_string(),
            "Not supported: reader type 42"
        );
        assert_eq!(
            Status::internal("Unknown keys type").to_string(),
            "Internal error: Unknown keys type"
        );
    }

    #[test]
    fn eof_is_distinguished() {
        assert!(Status::end_of_file("").is_end_of_file());
        assert!(!Status::internal("x").is_end_of_file());
        assert!(Status::cancelled("query").is_cancelled());
    }
}
