//! Stateless request builder and response parser for the broker API.
//!
//! # Design
//! `WireCodec` holds only the immutable `Broker` identity. Each operation is
//! split into a `build_*` method that produces an `HttpRequest` and a
//! `parse_*` method that consumes an `HttpResponse`. The round trip in
//! between belongs to a `Transport`, so everything here is deterministic.
//!
//! State-changing requests always carry `accepts_incomplete=true`; GET
//! requests never do. Instance and binding ids go into the path verbatim.

use serde::Serialize;

use crate::broker::Broker;
use crate::classify::{classify, parse_body, Classification, Operation};
use crate::error::{BrokerError, BrokerResult};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    AsyncResult, BindRequest, BindResource, BindResult, Binding, BindingLastOperationRequest, Catalog,
    DeprovisionRequest, DeprovisionResult, GetBindingRequest, InstanceDetails,
    InstanceLastOperationRequest, JsonObject, LastOperation, ProvisionRequest, ProvisionResult,
    Provisioned, UnbindRequest, UnbindResult,
};

pub const API_VERSION_HEADER: &str = "X-Broker-Api-Version";

#[derive(Serialize)]
struct ProvisionBody<'a> {
    service_id: &'a str,
    plan_id: &'a str,
    organization_guid: &'a str,
    space_guid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a JsonObject>,
}

#[derive(Serialize)]
struct BindBody<'a> {
    service_id: &'a str,
    plan_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_guid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_resource: Option<&'a BindResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a JsonObject>,
}

/// Builds broker requests and parses broker responses without I/O.
#[derive(Debug, Clone)]
pub struct WireCodec {
    broker: Broker,
}

impl WireCodec {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    fn instance_path(&self, instance_id: &str) -> String {
        format!("{}/v2/service_instances/{instance_id}", self.broker.base_url())
    }

    fn binding_path(&self, instance_id: &str, binding_id: &str) -> String {
        format!(
            "{}/service_bindings/{binding_id}",
            self.instance_path(instance_id)
        )
    }

    fn request(
        &self,
        operation: Operation,
        method: HttpMethod,
        path: String,
        correlation: &[(&str, Option<&str>)],
        body: Option<String>,
    ) -> HttpRequest {
        let mut query = Vec::new();
        if operation.accepts_incomplete() {
            query.push(("accepts_incomplete".to_string(), "true".to_string()));
        }
        for &(name, value) in correlation {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                query.push((name.to_string(), value.to_string()));
            }
        }

        let mut headers = vec![
            ("Authorization".to_string(), self.broker.authorization()),
            (API_VERSION_HEADER.to_string(), self.broker.api_version.clone()),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        HttpRequest {
            method,
            path,
            query,
            headers,
            body,
        }
    }

    pub fn build_catalog(&self) -> HttpRequest {
        let path = format!("{}/v2/catalog", self.broker.base_url());
        self.request(Operation::Catalog, HttpMethod::Get, path, &[], None)
    }

    pub fn build_provision(&self, input: &ProvisionRequest) -> BrokerResult<HttpRequest> {
        let body = serde_json::to_string(&ProvisionBody {
            service_id: &input.service_id,
            plan_id: &input.plan_id,
            organization_guid: &input.organization_guid,
            space_guid: &input.space_guid,
            parameters: input.parameters.as_ref(),
            context: input.context.as_ref(),
        })?;
        Ok(self.request(
            Operation::Provision,
            HttpMethod::Put,
            self.instance_path(&input.instance_id),
            &[],
            Some(body),
        ))
    }

    pub fn build_deprovision(&self, input: &DeprovisionRequest) -> HttpRequest {
        self.request(
            Operation::Deprovision,
            HttpMethod::Delete,
            self.instance_path(&input.instance_id),
            &[
                ("service_id", Some(input.service_id.as_str())),
                ("plan_id", Some(input.plan_id.as_str())),
            ],
            None,
        )
    }

    pub fn build_get_instance(&self, instance_id: &str) -> HttpRequest {
        self.request(
            Operation::GetInstance,
            HttpMethod::Get,
            self.instance_path(instance_id),
            &[],
            None,
        )
    }

    pub fn build_instance_last_operation(&self, input: &InstanceLastOperationRequest) -> HttpRequest {
        self.request(
            Operation::InstanceLastOperation,
            HttpMethod::Get,
            format!("{}/last_operation", self.instance_path(&input.instance_id)),
            &[
                ("service_id", input.service_id.as_deref()),
                ("plan_id", input.plan_id.as_deref()),
                ("operation", input.operation.as_deref()),
            ],
            None,
        )
    }

    pub fn build_bind(&self, input: &BindRequest) -> BrokerResult<HttpRequest> {
        let body = serde_json::to_string(&BindBody {
            service_id: &input.service_id,
            plan_id: &input.plan_id,
            app_guid: input.app_guid.as_deref(),
            bind_resource: input.bind_resource.as_ref(),
            parameters: input.parameters.as_ref(),
            context: input.context.as_ref(),
        })?;
        Ok(self.request(
            Operation::Bind,
            HttpMethod::Put,
            self.binding_path(&input.instance_id, &input.binding_id),
            &[],
            Some(body),
        ))
    }

    pub fn build_unbind(&self, input: &UnbindRequest) -> HttpRequest {
        self.request(
            Operation::Unbind,
            HttpMethod::Delete,
            self.binding_path(&input.instance_id, &input.binding_id),
            &[
                ("service_id", Some(input.service_id.as_str())),
                ("plan_id", Some(input.plan_id.as_str())),
            ],
            None,
        )
    }

    pub fn build_get_binding(&self, input: &GetBindingRequest) -> HttpRequest {
        self.request(
            Operation::GetBinding,
            HttpMethod::Get,
            self.binding_path(&input.instance_id, &input.binding_id),
            &[
                ("service_id", Some(input.service_id.as_str())),
                ("plan_id", Some(input.plan_id.as_str())),
            ],
            None,
        )
    }

    pub fn build_binding_last_operation(&self, input: &BindingLastOperationRequest) -> HttpRequest {
        self.request(
            Operation::BindingLastOperation,
            HttpMethod::Get,
            format!(
                "{}/last_operation",
                self.binding_path(&input.instance_id, &input.binding_id)
            ),
            &[
                ("service_id", input.service_id.as_deref()),
                ("plan_id", input.plan_id.as_deref()),
                ("operation", input.operation.as_deref()),
            ],
            None,
        )
    }

    pub fn parse_catalog(&self, response: HttpResponse) -> BrokerResult<Catalog> {
        classify(Operation::Catalog, &response)?;
        parse_body(Operation::Catalog, &response.body)
    }

    pub fn parse_provision(&self, response: HttpResponse) -> BrokerResult<ProvisionResult> {
        match classify(Operation::Provision, &response)? {
            Classification::Complete => {
                let provisioned: Provisioned = parse_body(Operation::Provision, &response.body)?;
                Ok(AsyncResult::Complete(provisioned))
            }
            Classification::Accepted { operation } => Ok(AsyncResult::Accepted { operation }),
        }
    }

    /// A 410 means the instance is already gone, which completes the delete.
    pub fn parse_deprovision(&self, response: HttpResponse) -> BrokerResult<DeprovisionResult> {
        delete_outcome(Operation::Deprovision, &response)
    }

    pub fn parse_get_instance(&self, response: HttpResponse) -> BrokerResult<InstanceDetails> {
        classify(Operation::GetInstance, &response)?;
        parse_body(Operation::GetInstance, &response.body)
    }

    pub fn parse_instance_last_operation(&self, response: HttpResponse) -> BrokerResult<LastOperation> {
        last_operation(Operation::InstanceLastOperation, &response)
    }

    pub fn parse_bind(&self, response: HttpResponse) -> BrokerResult<BindResult> {
        match classify(Operation::Bind, &response)? {
            Classification::Complete => {
                let binding: Binding = parse_body(Operation::Bind, &response.body)?;
                Ok(AsyncResult::Complete(binding))
            }
            Classification::Accepted { operation } => Ok(AsyncResult::Accepted { operation }),
        }
    }

    /// Same idempotent-delete semantics as `parse_deprovision`.
    pub fn parse_unbind(&self, response: HttpResponse) -> BrokerResult<UnbindResult> {
        delete_outcome(Operation::Unbind, &response)
    }

    pub fn parse_get_binding(&self, response: HttpResponse) -> BrokerResult<Binding> {
        classify(Operation::GetBinding, &response)?;
        parse_body(Operation::GetBinding, &response.body)
    }

    pub fn parse_binding_last_operation(&self, response: HttpResponse) -> BrokerResult<LastOperation> {
        last_operation(Operation::BindingLastOperation, &response)
    }
}

fn delete_outcome(operation: Operation, response: &HttpResponse) -> BrokerResult<AsyncResult<()>> {
    match classify(operation, response) {
        Ok(Classification::Complete) | Err(BrokerError::Gone { .. }) => Ok(AsyncResult::Complete(())),
        Ok(Classification::Accepted { operation }) => Ok(AsyncResult::Accepted { operation }),
        Err(e) => Err(e),
    }
}

fn last_operation(operation: Operation, response: &HttpResponse) -> BrokerResult<LastOperation> {
    classify(operation, response)?;
    serde_json::from_str(&response.body).map_err(|source| BrokerError::MalformedResponse { operation, source })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::LastOperationState;

    const BASE: &str = "http://localhost:3000";

    fn codec() -> WireCodec {
        WireCodec::new(Broker::new(BASE, "admin", "secret"))
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, body)
    }

    fn provision_request() -> ProvisionRequest {
        ProvisionRequest {
            instance_id: "inst-1".to_string(),
            service_id: "svc".to_string(),
            plan_id: "plan".to_string(),
            organization_guid: "org".to_string(),
            space_guid: "space".to_string(),
            parameters: None,
            context: None,
        }
    }

    fn bind_request() -> BindRequest {
        BindRequest {
            instance_id: "inst-1".to_string(),
            binding_id: "bind-1".to_string(),
            service_id: "svc".to_string(),
            plan_id: "plan".to_string(),
            app_guid: None,
            bind_resource: None,
            parameters: None,
            context: None,
        }
    }

    fn body_json(req: &HttpRequest) -> serde_json::Value {
        serde_json::from_str(req.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn build_catalog_produces_correct_request() {
        let req = codec().build_catalog();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:3000/v2/catalog");
        assert!(req.query.is_empty());
        assert!(req.body.is_none());
        assert_eq!(
            req.headers,
            vec![
                ("Authorization".to_string(), "Basic YWRtaW46c2VjcmV0".to_string()),
                ("X-Broker-Api-Version".to_string(), "2.17".to_string()),
            ]
        );
    }

    #[test]
    fn build_provision_produces_correct_request() {
        let req = codec().build_provision(&provision_request()).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.path, "http://localhost:3000/v2/service_instances/inst-1");
        assert_eq!(req.query_param("accepts_incomplete"), Some("true"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(
            body_json(&req),
            json!({"service_id":"svc","plan_id":"plan","organization_guid":"org","space_guid":"space"})
        );
    }

    #[test]
    fn build_provision_passes_parameters_through() {
        let mut input = provision_request();
        let params = json!({"size": 3, "nested": {"tags": ["a", "b"]}, "flag": null});
        input.parameters = params.as_object().cloned();
        let req = codec().build_provision(&input).unwrap();
        assert_eq!(body_json(&req)["parameters"], params);
    }

    #[test]
    fn build_provision_keeps_parameter_key_order() {
        let mut input = provision_request();
        input.parameters = serde_json::from_str(r#"{"zeta":1,"alpha":{"y":2,"x":1}}"#).unwrap();
        let req = codec().build_provision(&input).unwrap();
        assert!(req
            .body
            .as_deref()
            .unwrap()
            .contains(r#""parameters":{"zeta":1,"alpha":{"y":2,"x":1}}"#));
    }

    #[test]
    fn build_deprovision_carries_correlation_query() {
        let req = codec().build_deprovision(&DeprovisionRequest {
            instance_id: "inst-1".to_string(),
            service_id: "svc".to_string(),
            plan_id: "plan".to_string(),
        });
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(
            req.query,
            vec![
                ("accepts_incomplete".to_string(), "true".to_string()),
                ("service_id".to_string(), "svc".to_string()),
                ("plan_id".to_string(), "plan".to_string()),
            ]
        );
        assert!(req.body.is_none());
        assert_eq!(req.header("content-type"), None);
    }

    #[test]
    fn build_last_operation_omits_missing_fields() {
        let req = codec().build_instance_last_operation(&InstanceLastOperationRequest {
            instance_id: "inst-1".to_string(),
            operation: Some("op1".to_string()),
            ..Default::default()
        });
        assert_eq!(
            req.path,
            "http://localhost:3000/v2/service_instances/inst-1/last_operation"
        );
        assert_eq!(req.query, vec![("operation".to_string(), "op1".to_string())]);

        let req = codec().build_binding_last_operation(&BindingLastOperationRequest {
            instance_id: "inst-1".to_string(),
            binding_id: "bind-1".to_string(),
            service_id: Some("svc".to_string()),
            plan_id: Some(String::new()),
            operation: None,
        });
        assert_eq!(
            req.path,
            "http://localhost:3000/v2/service_instances/inst-1/service_bindings/bind-1/last_operation"
        );
        assert_eq!(req.query, vec![("service_id".to_string(), "svc".to_string())]);
    }

    #[test]
    fn build_bind_skips_absent_optionals() {
        let req = codec().build_bind(&bind_request()).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(
            req.path,
            "http://localhost:3000/v2/service_instances/inst-1/service_bindings/bind-1"
        );
        let body = body_json(&req);
        assert_eq!(body, json!({"service_id":"svc","plan_id":"plan"}));
        assert!(body.get("bind_resource").is_none());
    }

    #[test]
    fn build_bind_with_resource() {
        let mut input = bind_request();
        input.app_guid = Some("app".to_string());
        input.bind_resource = Some(BindResource {
            app_guid: Some("app".to_string()),
            route: None,
        });
        let body = body_json(&codec().build_bind(&input).unwrap());
        assert_eq!(body["app_guid"], "app");
        assert_eq!(body["bind_resource"], json!({"app_guid": "app"}));
    }

    #[test]
    fn gets_never_accept_incomplete() {
        let c = codec();
        let gets = [
            c.build_catalog(),
            c.build_get_instance("inst-1"),
            c.build_get_binding(&GetBindingRequest {
                instance_id: "inst-1".to_string(),
                binding_id: "bind-1".to_string(),
                service_id: "svc".to_string(),
                plan_id: "plan".to_string(),
            }),
            c.build_instance_last_operation(&InstanceLastOperationRequest {
                instance_id: "inst-1".to_string(),
                ..Default::default()
            }),
        ];
        for req in gets {
            assert_eq!(req.method, HttpMethod::Get);
            assert_eq!(req.query_param("accepts_incomplete"), None, "{}", req.path);
        }
    }

    #[test]
    fn parse_provision_sync_empty_body() {
        let result = codec().parse_provision(response(201, "")).unwrap();
        assert_eq!(result, AsyncResult::Complete(Provisioned::default()));
        assert_eq!(result.operation(), None);
    }

    #[test]
    fn parse_provision_sync_with_dashboard() {
        let result = codec()
            .parse_provision(response(200, r#"{"dashboard_url":"http://dash"}"#))
            .unwrap();
        match result {
            AsyncResult::Complete(p) => assert_eq!(p.dashboard_url.as_deref(), Some("http://dash")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_provision_async() {
        let result = codec()
            .parse_provision(response(202, r#"{"operation":"provision_op1"}"#))
            .unwrap();
        assert!(!result.is_complete());
        assert_eq!(result.operation(), Some("provision_op1"));
    }

    #[test]
    fn parse_deprovision_gone_is_complete() {
        let result = codec().parse_deprovision(response(410, "{}")).unwrap();
        assert!(result.is_complete());
    }

    #[test]
    fn parse_unbind_empty_200_and_410() {
        assert!(codec().parse_unbind(response(200, "")).unwrap().is_complete());
        assert!(codec().parse_unbind(response(410, "")).unwrap().is_complete());
        let accepted = codec().parse_unbind(response(202, r#"{"operation":"u1"}"#)).unwrap();
        assert_eq!(accepted.operation(), Some("u1"));
    }

    #[test]
    fn parse_bind_sync_credentials() {
        let result = codec()
            .parse_bind(response(201, r#"{"credentials":{"foo":"bar"}}"#))
            .unwrap();
        match result {
            AsyncResult::Complete(binding) => {
                assert_eq!(binding.credentials.get("foo"), Some(&json!("bar")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_bind_conflict() {
        let err = codec().parse_bind(response(409, "{}")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn parse_last_operation_in_progress() {
        let op = codec()
            .parse_instance_last_operation(response(
                200,
                r#"{"state":"in-progress","description":"provisioning"}"#,
            ))
            .unwrap();
        assert_eq!(op.state, LastOperationState::InProgress);
        assert_eq!(op.description.as_deref(), Some("provisioning"));
    }

    #[test]
    fn parse_last_operation_gone_and_empty() {
        let err = codec().parse_binding_last_operation(response(410, "{}")).unwrap_err();
        assert!(err.is_gone());

        let err = codec().parse_instance_last_operation(response(200, "")).unwrap_err();
        assert!(matches!(err, BrokerError::MalformedResponse { .. }));
    }

    #[test]
    fn parse_get_binding_and_instance() {
        let binding = codec()
            .parse_get_binding(response(200, r#"{"credentials":{"uri":"db://"},"syslog_drain_url":"s"}"#))
            .unwrap();
        assert_eq!(binding.credentials["uri"], "db://");
        assert_eq!(binding.syslog_drain_url.as_deref(), Some("s"));

        let details = codec()
            .parse_get_instance(response(200, r#"{"service_id":"svc","plan_id":"plan"}"#))
            .unwrap();
        assert_eq!(details.plan_id.as_deref(), Some("plan"));
    }

    #[test]
    fn parse_catalog_bad_json() {
        let err = codec().parse_catalog(response(200, "not json")).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::MalformedResponse {
                operation: Operation::Catalog,
                ..
            }
        ));
    }
}
