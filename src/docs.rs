use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;

use crate::models;
use crate::routes;
use crate::token::TOKEN_HEADER;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::acl::create_policy,
		routes::acl::list_policies,
		routes::acl::create_token,
		routes::acl::authorize
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::acl::PolicyCreateRequest,
			models::acl::PolicyResponse,
			models::acl::PolicyLink,
			models::acl::ServiceIdentity,
			models::acl::NodeIdentity,
			models::acl::TokenCreateRequest,
			models::acl::TokenResponse,
			models::acl::AuthorizationRequest,
			models::acl::AuthorizationResponse
		)
	),
	tags(
		(name = "Health", description = "Liveness and backing store status"),
		(name = "ACL", description = "Policies, tokens and authorization checks")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	let root = doc
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("OpenAPI root must be an object"))?;
	ensure_security_components(root)?;
	root.entry("openapi")
		.or_insert_with(|| Value::String("3.1.0".to_string()));
	ensure_servers(root, port);

	Ok(serde_json::from_value(doc)?)
}

/// Serves the document as JSON at `/api-docs/openapi.json`.
pub fn openapi_routes(doc: &utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let doc_json = Arc::new(serde_json::to_value(doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new().route("/api-docs/openapi.json", json_route))
}

fn ensure_security_components(root: &mut Map<String, Value>) -> anyhow::Result<()> {
	let schemes = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.and_then(|components| {
			components
				.entry("securitySchemes")
				.or_insert_with(|| Value::Object(Map::new()))
				.as_object_mut()
		})
		.ok_or_else(|| anyhow::anyhow!("components.securitySchemes must be an object"))?;

	schemes.insert(
		"consul_token".to_string(),
		json!({
			"type": "apiKey",
			"in": "header",
			"name": TOKEN_HEADER
		}),
	);
	Ok(())
}

fn ensure_servers(root: &mut Map<String, Value>, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match root.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			root.insert("servers".to_string(), json!([{ "url": server_url }]));
		}
	}
}
