//! API documentation under `/swagger/`.
//!
//! `/swagger/doc.json` serves the OpenAPI document; every other path under
//! the prefix serves a Swagger UI page that loads it. Without a document in
//! the options, one is generated from the route table: every route is listed
//! with the envelope as its `200` response.

use http::StatusCode;
use serde_json::{Map, Value, json};

use crate::method::Method;
use crate::response::{self, ContentType, Response};

pub(crate) const PREFIX: &str = "/swagger/";
const DOC_PATH: &str = "/swagger/doc.json";

pub(crate) fn matches(path: &str) -> bool {
    path.starts_with(PREFIX)
}

pub(crate) fn serve(path: &str, doc: &Value) -> Response {
    if path == DOC_PATH {
        return match serde_json::to_vec(doc) {
            Ok(body) => response::json(body),
            Err(_) => response::status(StatusCode::INTERNAL_SERVER_ERROR),
        };
    }
    response::bytes(StatusCode::OK, ContentType::Html, UI_PAGE)
}

/// Build an OpenAPI 3 document from `(method, path)` pairs.
pub(crate) fn generate<'a>(routes: impl IntoIterator<Item = (Method, &'a str)>) -> Value {
    let mut paths = Map::new();
    for (method, path) in routes {
        let item = paths
            .entry(openapi_path(path))
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(ops) = item {
            ops.insert(
                method.as_str().to_ascii_lowercase(),
                json!({ "responses": { "200": { "$ref": "#/components/responses/Envelope" } } }),
            );
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": { "title": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
        "paths": paths,
        "components": {
            "responses": {
                "Envelope": {
                    "description": "Unified envelope; `code` 0 is success.",
                    "content": { "application/json": { "schema": {
                        "type": "object",
                        "properties": {
                            "code": { "type": "integer" },
                            "msg": { "type": "string" },
                            "data": {},
                            "request_id": { "type": "string" }
                        }
                    } } }
                }
            }
        }
    })
}

/// `/files/{*rest}` → `/files/{rest}`.
fn openapi_path(path: &str) -> String {
    path.replace("{*", "{")
}

const UI_PAGE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>API documentation</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => { window.ui = SwaggerUIBundle({ url: "/swagger/doc.json", dom_id: "#swagger-ui" }); };
  </script>
</body>
</html>
"##;
