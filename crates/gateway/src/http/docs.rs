use axum::Json;
use axum::response::Html;
use serde_json::{Value, json};

const DOCS_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Kai Backend API</title></head>
<body>
<h1>Kai Backend API</h1>
<p>The machine-readable description of this API is served at <a href="/openapi.json">/openapi.json</a>.</p>
<ul>
<li><code>GET /</code> service status</li>
<li><code>GET /health</code> health check</li>
<li><code>GET /v1/user/me</code> current user profile</li>
<li><code>POST /v1/user/analyze</code> submit text for analysis</li>
<li><code>GET /v1/user/analyze</code> list analysis requests</li>
</ul>
</body>
</html>
"#;

pub(super) async fn docs() -> Html<&'static str> {
    Html(DOCS_PAGE)
}

pub(super) async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

fn envelope_schema(data: Value) -> Value {
    json!({
        "type": "object",
        "required": ["success", "statusCode", "data", "message"],
        "properties": {
            "success": {"type": "boolean"},
            "statusCode": {"type": "integer"},
            "data": data,
            "message": {"type": "string"},
        },
    })
}

fn ok(description: &str, data: Value) -> Value {
    json!({
        "description": description,
        "content": {"application/json": {"schema": envelope_schema(data)}},
    })
}

fn error_ref() -> Value {
    json!({
        "description": "Error envelope",
        "content": {"application/json": {"schema": schema_ref("ErrorEnvelope")}},
    })
}

fn openapi_document() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {"title": "Kai Backend API", "version": env!("CARGO_PKG_VERSION")},
        "paths": paths(),
        "components": {
            "securitySchemes": {
                "bearerAuth": {"type": "http", "scheme": "bearer", "bearerFormat": "JWT"},
            },
            "schemas": schemas(),
        },
    })
}

fn paths() -> Value {
    let secured = json!([{"bearerAuth": []}]);

    let submit = json!({
        "summary": "Submit text for asynchronous analysis",
        "security": secured,
        "requestBody": {
            "required": true,
            "content": {"application/json": {"schema": {
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string", "minLength": 3, "maxLength": 10000}},
            }}},
        },
        "responses": {
            "200": ok("Analysis request created", schema_ref("SubmittedAnalysis")),
            "401": error_ref(),
            "422": error_ref(),
            "500": error_ref(),
        },
    });

    let list = json!({
        "summary": "List the caller's analysis requests, newest first",
        "security": secured,
        "parameters": [
            {"name": "limit", "in": "query", "schema": {"type": "integer", "minimum": 1, "maximum": 100, "default": 50}},
            {"name": "offset", "in": "query", "schema": {"type": "integer", "minimum": 0, "default": 0}},
        ],
        "responses": {
            "200": ok("Analysis requests", schema_ref("AnalysisPage")),
            "401": error_ref(),
            "422": error_ref(),
            "500": error_ref(),
        },
    });

    let me = json!({
        "summary": "Current user profile",
        "security": secured,
        "responses": {
            "200": ok("User profile", schema_ref("UserProfile")),
            "401": error_ref(),
        },
    });

    json!({
        "/": {"get": {
            "summary": "Service status",
            "responses": {"200": ok("Service is running", json!({"type": "object"}))},
        }},
        "/health": {"get": {
            "summary": "Health check",
            "responses": {"200": ok("Service is healthy", json!({"type": "object"}))},
        }},
        "/v1/user/me": {"get": me},
        "/v1/user/analyze": {"post": submit, "get": list},
    })
}

fn schema_ref(name: &str) -> Value {
    json!({"$ref": format!("#/components/schemas/{}", name)})
}

fn schemas() -> Value {
    let error_envelope = json!({
        "type": "object",
        "required": ["success", "statusCode", "data", "message", "error"],
        "properties": {
            "success": {"type": "boolean", "const": false},
            "statusCode": {"type": "integer"},
            "data": {"type": "null"},
            "message": {"type": "string"},
            "error": {"type": "string"},
        },
    });

    let user_profile = json!({
        "type": "object",
        "properties": {
            "uid": {"type": "string"},
            "name": {"type": ["string", "null"]},
            "email": {"type": ["string", "null"]},
        },
    });

    let submitted = json!({
        "type": "object",
        "properties": {
            "document_id": {"type": "string"},
            "text": {"type": "string"},
            "status": {"type": "string", "enum": ["pending"]},
        },
    });

    let timestamp = json!({"type": "string", "format": "date-time"});
    let request = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "user_id": {"type": "string"},
            "text": {"type": "string"},
            "status": {"type": "string", "enum": ["pending", "processing", "completed", "failed"]},
            "result": {"type": "object"},
            "error_message": {"type": "string"},
            "created_at": timestamp,
            "updated_at": timestamp,
            "completed_at": timestamp,
        },
    });

    let page = json!({
        "type": "object",
        "properties": {
            "requests": {"type": "array", "items": schema_ref("AnalysisRequest")},
            "total": {"type": "integer"},
            "limit": {"type": "integer"},
            "offset": {"type": "integer"},
        },
    });

    json!({
        "ErrorEnvelope": error_envelope,
        "UserProfile": user_profile,
        "SubmittedAnalysis": submitted,
        "AnalysisRequest": request,
        "AnalysisPage": page,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_every_user_route() {
        let doc = openapi_document();
        assert_eq!(doc["openapi"], "3.1.0");
        assert!(doc["paths"]["/v1/user/me"]["get"].is_object());
        assert!(doc["paths"]["/v1/user/analyze"]["post"].is_object());
        assert!(doc["paths"]["/v1/user/analyze"]["get"].is_object());
    }
}
