// Copyright 2017 Dmitry Tantsur <divius.inside@gmail.com>
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

//! Error and Result implementations.

use std::fmt;

/// Kind of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The object-store transport reported a failure unrelated to the
    /// protocol (connection refused, DNS failure, ...).
    TransportError,

    /// The object-store call exceeded its configured timeout.
    OperationTimedOut,

    /// A nodeid argument was invalid (e.g. a numeric nodeid of
    /// `u32::MAX`, or an empty string).
    InvalidNodeId,

    /// Referenced object does not exist (on a non-create path).
    NoSuchObject,

    /// Configuration is missing a required value or could not be parsed.
    InvalidConfig,

    /// Exclusive create was attempted on an object that already exists.
    AlreadyExists,

    /// The grace object's data payload or node map violates an
    /// invariant (wrong payload size, `R == 0` with non-empty map, or a
    /// node-map scan overflowing its cap).
    Corruption,

    #[allow(missing_docs)]
    __Nonexhaustive,
}

/// Error from a grace-protocol call.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

/// Result of a grace-protocol call.
pub type Result<T> = ::std::result::Result<T, Error>;

impl Error {
    /// Build an error of the given kind with a message.
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Error {
        Error {
            kind,
            message: message.into(),
        }
    }

    /// Error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl ErrorKind {
    /// Short description of the error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::TransportError => "object-store transport error",
            ErrorKind::OperationTimedOut => "time out reached while waiting for the object store",
            ErrorKind::InvalidNodeId => "nodeid is invalid",
            ErrorKind::NoSuchObject => "no such object",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::AlreadyExists => "object already exists",
            ErrorKind::Corruption => "grace object state is corrupted",
            ErrorKind::__Nonexhaustive => unreachable!(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl ::std::error::Error for Error {}

impl From<crate::object_store::ObjectError> for Error {
    fn from(value: crate::object_store::ObjectError) -> Error {
        use crate::object_store::ObjectError as OE;
        match value {
            OE::AlreadyExists => Error::new(ErrorKind::AlreadyExists, "object already exists"),
            OE::NoSuchObject => Error::new(ErrorKind::NoSuchObject, "no such object"),
            OE::VersionMismatch => {
                // A VersionMismatch escaping here means a retry loop gave up
                // without absorbing it; treat it as a transport-level failure
                // rather than silently retrying further.
                Error::new(ErrorKind::TransportError, "version conflict was not retried")
            }
            OE::Timeout => Error::new(ErrorKind::OperationTimedOut, "object-store call timed out"),
            OE::Transport(msg) => Error::new(ErrorKind::TransportError, msg),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn test_error_display() {
        let e = Error::new(ErrorKind::Corruption, "payload is 8 bytes, expected 16");
        assert_eq!(
            e.to_string(),
            "grace object state is corrupted: payload is 8 bytes, expected 16"
        );
        assert_eq!(e.kind(), ErrorKind::Corruption);
    }
}
