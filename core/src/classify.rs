//! Response classification.
//!
//! Maps a broker's `(status, body)` to one of three outcomes: synchronous
//! completion, asynchronous acceptance (with the operation token, if the
//! broker sent one), or a typed failure. Pure function of its inputs.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{BrokerError, BrokerResult};
use crate::http::HttpResponse;

/// The broker operations this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Catalog,
    Provision,
    Deprovision,
    GetInstance,
    InstanceLastOperation,
    Bind,
    Unbind,
    GetBinding,
    BindingLastOperation,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Catalog => "get catalog",
            Operation::Provision => "provision",
            Operation::Deprovision => "deprovision",
            Operation::GetInstance => "get instance",
            Operation::InstanceLastOperation => "get instance last operation",
            Operation::Bind => "bind",
            Operation::Unbind => "unbind",
            Operation::GetBinding => "get binding",
            Operation::BindingLastOperation => "get binding last operation",
        }
    }

    /// State-changing operations are sent with `accepts_incomplete=true`
    /// and are the only ones a broker may answer with 202.
    pub fn accepts_incomplete(self) -> bool {
        matches!(
            self,
            Operation::Provision | Operation::Deprovision | Operation::Bind | Operation::Unbind
        )
    }

    /// Whether the endpoint addresses a specific instance or binding, which
    /// is what gives a 410 its "already gone" meaning.
    pub fn targets_resource(self) -> bool {
        !matches!(self, Operation::Catalog)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Successful outcome of a broker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Finished synchronously; the body (possibly empty) carries the result.
    Complete,
    /// Accepted for asynchronous processing.
    Accepted { operation: Option<String> },
}

#[derive(Debug, Default, Deserialize)]
struct AcceptedBody {
    #[serde(default)]
    operation: Option<String>,
}

/// Classify a broker response for `operation`.
pub fn classify(operation: Operation, response: &HttpResponse) -> BrokerResult<Classification> {
    use Operation::*;

    match (operation, response.status) {
        (op, 410) if op.targets_resource() => Err(BrokerError::Gone { operation: op }),
        (Bind, 409) => Err(BrokerError::Conflict {
            operation,
            body: response.body.clone(),
        }),
        (op, 202) if op.accepts_incomplete() => {
            let body: AcceptedBody = parse_body(op, &response.body)?;
            Ok(Classification::Accepted {
                operation: body.operation.filter(|token| !token.is_empty()),
            })
        }
        (Provision | Bind, 200 | 201) => Ok(Classification::Complete),
        (Deprovision | Unbind, 200) => Ok(Classification::Complete),
        (op, 200) if !op.accepts_incomplete() => Ok(Classification::Complete),
        (op, status) => Err(BrokerError::operation_failed(op, status, &response.body)),
    }
}

/// Deserialize a response body, treating an absent or blank body as the
/// type's default.
pub(crate) fn parse_body<T>(operation: Operation, body: &str) -> BrokerResult<T>
where
    T: DeserializeOwned + Default,
{
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|source| BrokerError::MalformedResponse { operation, source })
}
