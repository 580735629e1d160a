//! Operation lifecycle driver.
//!
//! # Overview
//! Drives provision, deprovision, bind and unbind through to a terminal
//! state. The initiating call either completes synchronously or is accepted
//! with an operation token; accepted operations are then polled through the
//! matching last-operation endpoint until the broker reports `succeeded` or
//! `failed`.
//!
//! # Design
//! - `start_*` issues exactly one initiating call. `poll` issues exactly one
//!   last-operation request, plus one get-binding call when an asynchronous
//!   bind succeeds (the 202 never carries credentials).
//! - The only state carried between polls is `TrackedOperation`, which the
//!   caller persists. The original request is never re-sent to resume.
//! - A 410 while polling a delete means the resource is gone, which is the
//!   goal. A 410 while polling a create is a terminal failure.
//! - `poll_until_terminal` is the explicit loop for callers without their
//!   own scheduler. It waits on a `CancellationToken` between polls.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::{LifecycleConfig, MissingTokenPolicy};
use crate::cancel::CancellationToken;
use crate::client::BrokerClient;
use crate::error::BrokerResult;
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    AsyncResult, BindRequest, Binding, BindingLastOperationRequest, Credentials, DeprovisionRequest,
    GetBindingRequest, InstanceLastOperationRequest, LastOperationState, ProvisionRequest,
    UnbindRequest,
};

/// What an in-flight operation is doing, and to which binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Deprovision,
    Bind { binding_id: String },
    Unbind { binding_id: String },
}

impl OperationKind {
    /// Deletes treat "gone" as success.
    pub fn is_delete(&self) -> bool {
        matches!(self, OperationKind::Deprovision | OperationKind::Unbind { .. })
    }

    pub fn binding_id(&self) -> Option<&str> {
        match self {
            OperationKind::Bind { binding_id } | OperationKind::Unbind { binding_id } => Some(binding_id),
            _ => None,
        }
    }
}

/// Everything needed to resume polling an accepted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOperation {
    #[serde(flatten)]
    pub kind: OperationKind,
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Finished synchronously by the initiating call.
    Complete,
    /// Accepted; waiting on last-operation polls.
    InFlight,
    Succeeded,
    Failed,
}

/// Why an operation ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Last operation reported `failed`.
    Broker { description: Option<String> },
    /// The broker answered 410 while a create was in flight.
    Gone,
}

/// Caller-visible result of one driver step.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Complete { binding: Option<Binding> },
    InFlight {
        tracked: TrackedOperation,
        description: Option<String>,
    },
    Succeeded { binding: Option<Binding> },
    Failed { failure: Failure },
}

impl Progress {
    pub fn state(&self) -> LifecycleState {
        match self {
            Progress::Complete { .. } => LifecycleState::Complete,
            Progress::InFlight { .. } => LifecycleState::InFlight,
            Progress::Succeeded { .. } => LifecycleState::Succeeded,
            Progress::Failed { .. } => LifecycleState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Progress::InFlight { .. })
    }

    /// Credentials of a finished bind.
    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            Progress::Complete { binding } | Progress::Succeeded { binding } => {
                binding.as_ref().map(|b| &b.credentials)
            }
            _ => None,
        }
    }

    pub fn tracked(&self) -> Option<&TrackedOperation> {
        match self {
            Progress::InFlight { tracked, .. } => Some(tracked),
            _ => None,
        }
    }
}

pub struct LifecycleDriver<T = UreqTransport> {
    client: BrokerClient<T>,
    config: LifecycleConfig,
}

impl<T: Transport> LifecycleDriver<T> {
    pub fn new(client: BrokerClient<T>, config: LifecycleConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &BrokerClient<T> {
        &self.client
    }

    pub fn start_provision(&self, input: &ProvisionRequest) -> BrokerResult<Progress> {
        match self.client.provision(input)? {
            AsyncResult::Complete(_) => Ok(Progress::Complete { binding: None }),
            AsyncResult::Accepted { operation } => self.accepted(TrackedOperation {
                kind: OperationKind::Provision,
                instance_id: input.instance_id.clone(),
                service_id: input.service_id.clone(),
                plan_id: input.plan_id.clone(),
                operation,
            }),
        }
    }

    pub fn start_deprovision(&self, input: &DeprovisionRequest) -> BrokerResult<Progress> {
        match self.client.deprovision(input)? {
            AsyncResult::Complete(()) => Ok(Progress::Complete { binding: None }),
            AsyncResult::Accepted { operation } => self.accepted(TrackedOperation {
                kind: OperationKind::Deprovision,
                instance_id: input.instance_id.clone(),
                service_id: input.service_id.clone(),
                plan_id: input.plan_id.clone(),
                operation,
            }),
        }
    }

    /// A 409 is returned as `BrokerError::Conflict`; adopting or rejecting the
    /// existing binding is up to the caller.
    pub fn start_bind(&self, input: &BindRequest) -> BrokerResult<Progress> {
        match self.client.bind(input)? {
            AsyncResult::Complete(binding) => Ok(Progress::Complete {
                binding: Some(binding),
            }),
            AsyncResult::Accepted { operation } => self.accepted(TrackedOperation {
                kind: OperationKind::Bind {
                    binding_id: input.binding_id.clone(),
                },
                instance_id: input.instance_id.clone(),
                service_id: input.service_id.clone(),
                plan_id: input.plan_id.clone(),
                operation,
            }),
        }
    }

    pub fn start_unbind(&self, input: &UnbindRequest) -> BrokerResult<Progress> {
        match self.client.unbind(input)? {
            AsyncResult::Complete(()) => Ok(Progress::Complete { binding: None }),
            AsyncResult::Accepted { operation } => self.accepted(TrackedOperation {
                kind: OperationKind::Unbind {
                    binding_id: input.binding_id.clone(),
                },
                instance_id: input.instance_id.clone(),
                service_id: input.service_id.clone(),
                plan_id: input.plan_id.clone(),
                operation,
            }),
        }
    }

    fn accepted(&self, tracked: TrackedOperation) -> BrokerResult<Progress> {
        if tracked.operation.is_none() && self.config.missing_token == MissingTokenPolicy::AssumeSucceeded {
            debug!(instance_id = %tracked.instance_id, "accepted without operation token, assuming success");
            return self.succeeded(&tracked);
        }
        debug!(
            instance_id = %tracked.instance_id,
            operation = ?tracked.operation,
            "operation accepted"
        );
        Ok(Progress::InFlight {
            tracked,
            description: None,
        })
    }

    /// Issue one last-operation poll for `tracked`.
    pub fn poll(&self, tracked: &TrackedOperation) -> BrokerResult<Progress> {
        let service_id = Some(tracked.service_id.clone());
        let plan_id = Some(tracked.plan_id.clone());
        let result = match tracked.kind.binding_id() {
            None => self
                .client
                .get_instance_last_operation(&InstanceLastOperationRequest {
                    instance_id: tracked.instance_id.clone(),
                    service_id,
                    plan_id,
                    operation: tracked.operation.clone(),
                }),
            Some(binding_id) => self
                .client
                .get_binding_last_operation(&BindingLastOperationRequest {
                    instance_id: tracked.instance_id.clone(),
                    binding_id: binding_id.to_string(),
                    service_id,
                    plan_id,
                    operation: tracked.operation.clone(),
                }),
        };

        let last = match result {
            Ok(last) => last,
            Err(e) if e.is_gone() && tracked.kind.is_delete() => {
                debug!(instance_id = %tracked.instance_id, "resource gone while deleting");
                return Ok(Progress::Succeeded { binding: None });
            }
            Err(e) if e.is_gone() => {
                debug!(instance_id = %tracked.instance_id, "resource gone while creating");
                return Ok(Progress::Failed {
                    failure: Failure::Gone,
                });
            }
            Err(e) => return Err(e),
        };

        debug!(
            instance_id = %tracked.instance_id,
            state = ?last.state,
            description = ?last.description,
            "last operation"
        );
        match last.state {
            LastOperationState::InProgress => Ok(Progress::InFlight {
                tracked: tracked.clone(),
                description: last.description,
            }),
            LastOperationState::Succeeded => self.succeeded(tracked),
            LastOperationState::Failed => Ok(Progress::Failed {
                failure: Failure::Broker {
                    description: last.description,
                },
            }),
        }
    }

    fn succeeded(&self, tracked: &TrackedOperation) -> BrokerResult<Progress> {
        let binding = match &tracked.kind {
            OperationKind::Bind { binding_id } => {
                let fetched = self.client.get_binding(&GetBindingRequest {
                    instance_id: tracked.instance_id.clone(),
                    binding_id: binding_id.clone(),
                    service_id: tracked.service_id.clone(),
                    plan_id: tracked.plan_id.clone(),
                });
                match fetched {
                    Ok(binding) => Some(binding),
                    Err(e) if e.is_gone() => {
                        debug!(instance_id = %tracked.instance_id, %binding_id, "binding gone after bind succeeded");
                        return Ok(Progress::Failed {
                            failure: Failure::Gone,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };
        Ok(Progress::Succeeded { binding })
    }

    /// Poll every `interval` until the operation is terminal or `cancel`
    /// fires. On cancellation the latest `InFlight` progress is returned so
    /// the caller can persist the token and resume later. Errors end the
    /// loop; the operation's outcome is then unknown, not failed.
    pub fn poll_until_terminal(
        &self,
        tracked: &TrackedOperation,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> BrokerResult<Progress> {
        if cancel.is_cancelled() {
            return Ok(Progress::InFlight {
                tracked: tracked.clone(),
                description: None,
            });
        }
        let mut progress = self.poll(tracked)?;
        while let Progress::InFlight { tracked, .. } = &progress {
            if cancel.wait(interval) {
                debug!(instance_id = %tracked.instance_id, "polling cancelled");
                break;
            }
            progress = self.poll(tracked)?;
        }
        Ok(progress)
    }
}
