//! Broker client: one blocking round trip per operation.
//!
//! # Design
//! `BrokerClient` pairs a `WireCodec` with a `Transport`. Each public method
//! builds the request, executes it once and parses the answer. The client
//! keeps no state between calls, so one instance can serve any number of
//! threads; calls against the same instance or binding must be serialized
//! by the caller.

use tracing::{debug, trace};

use crate::broker::{Broker, TransportConfig};
use crate::classify::Operation;
use crate::codec::WireCodec;
use crate::error::BrokerResult;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    BindRequest, BindResult, Binding, BindingLastOperationRequest, Catalog, DeprovisionRequest,
    DeprovisionResult, GetBindingRequest, InstanceDetails, InstanceLastOperationRequest,
    LastOperation, ProvisionRequest, ProvisionResult, UnbindRequest, UnbindResult,
};

#[derive(Debug, Clone)]
pub struct BrokerClient<T = UreqTransport> {
    codec: WireCodec,
    transport: T,
}

impl BrokerClient<UreqTransport> {
    /// Client over a blocking `ureq` transport.
    pub fn new(broker: Broker, config: &TransportConfig) -> Self {
        Self::with_transport(broker, UreqTransport::new(config))
    }
}

impl<T: Transport> BrokerClient<T> {
    pub fn with_transport(broker: Broker, transport: T) -> Self {
        Self {
            codec: WireCodec::new(broker),
            transport,
        }
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    fn send(&self, operation: Operation, request: HttpRequest) -> BrokerResult<HttpResponse> {
        debug!(
            %operation,
            method = request.method.as_str(),
            path = %request.path,
            "sending broker request"
        );
        let response = self.transport.execute(&request)?;
        debug!(%operation, status = response.status, "broker responded");
        trace!(%operation, body = %response.body, "broker response body");
        Ok(response)
    }

    pub fn get_catalog(&self) -> BrokerResult<Catalog> {
        let response = self.send(Operation::Catalog, self.codec.build_catalog())?;
        self.codec.parse_catalog(response)
    }

    pub fn provision(&self, input: &ProvisionRequest) -> BrokerResult<ProvisionResult> {
        let request = self.codec.build_provision(input)?;
        let response = self.send(Operation::Provision, request)?;
        self.codec.parse_provision(response)
    }

    /// Idempotent: an instance the broker no longer knows counts as deprovisioned.
    pub fn deprovision(&self, input: &DeprovisionRequest) -> BrokerResult<DeprovisionResult> {
        let response = self.send(Operation::Deprovision, self.codec.build_deprovision(input))?;
        self.codec.parse_deprovision(response)
    }

    pub fn get_instance(&self, instance_id: &str) -> BrokerResult<InstanceDetails> {
        let response = self.send(Operation::GetInstance, self.codec.build_get_instance(instance_id))?;
        self.codec.parse_get_instance(response)
    }

    pub fn get_instance_last_operation(
        &self,
        input: &InstanceLastOperationRequest,
    ) -> BrokerResult<LastOperation> {
        let request = self.codec.build_instance_last_operation(input);
        let response = self.send(Operation::InstanceLastOperation, request)?;
        self.codec.parse_instance_last_operation(response)
    }

    pub fn bind(&self, input: &BindRequest) -> BrokerResult<BindResult> {
        let request = self.codec.build_bind(input)?;
        let response = self.send(Operation::Bind, request)?;
        self.codec.parse_bind(response)
    }

    /// Idempotent: a binding the broker no longer knows counts as unbound.
    pub fn unbind(&self, input: &UnbindRequest) -> BrokerResult<UnbindResult> {
        let response = self.send(Operation::Unbind, self.codec.build_unbind(input))?;
        self.codec.parse_unbind(response)
    }

    pub fn get_binding(&self, input: &GetBindingRequest) -> BrokerResult<Binding> {
        let response = self.send(Operation::GetBinding, self.codec.build_get_binding(input))?;
        self.codec.parse_get_binding(response)
    }

    pub fn get_binding_last_operation(
        &self,
        input: &BindingLastOperationRequest,
    ) -> BrokerResult<LastOperation> {
        let request = self.codec.build_binding_last_operation(input);
        let response = self.send(Operation::BindingLastOperation, request)?;
        self.codec.parse_binding_last_operation(response)
    }
}
