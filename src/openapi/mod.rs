//! Route documentation for the assembled pipeline.
//!
//! The pipeline builder collects a [`RouteDoc`] for every documented route a
//! stage mounts and serves the resulting OpenAPI-shaped document at a fixed
//! path. The route list itself comes from the modules; nothing here inspects
//! handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Fixed path where the assembled route document is served.
pub const DOC_PATH: &str = "/openapi.json";

/// Metadata for one documented route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDoc {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl RouteDoc {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            summary: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Build an OpenAPI 3 document describing the assembled routes.
pub fn document(service: &str, version: &str, routes: &[RouteDoc]) -> Value {
    let mut paths = serde_json::Map::new();
    for route in routes {
        let entry = paths
            .entry(route.path.clone())
            .or_insert_with(|| json!({}));
        if let Value::Object(operations) = entry {
            operations.insert(
                route.method.to_lowercase(),
                json!({
                    "summary": route.summary.clone().unwrap_or_default(),
                    "responses": { "200": { "description": "OK" } },
                }),
            );
        }
    }
    json!({
        "openapi": "3.0.3",
        "info": { "title": service, "version": version },
        "paths": Value::Object(paths),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_groups_methods_by_path() {
        let routes = vec![
            RouteDoc::get("/users").summary("List users"),
            RouteDoc::post("/users"),
            RouteDoc::get("/users/{id}"),
        ];
        let doc = document("identity", "0.1.0", &routes);

        assert_eq!(doc["info"]["title"], "identity");
        assert!(doc["paths"]["/users"]["get"].is_object());
        assert!(doc["paths"]["/users"]["post"].is_object());
        assert!(doc["paths"]["/users/{id}"]["get"].is_object());
        assert_eq!(doc["paths"]["/users"]["get"]["summary"], "List users");
    }

    #[test]
    fn test_document_with_no_routes() {
        let doc = document("empty", "0.0.1", &[]);
        assert!(doc["paths"].as_object().is_some_and(|p| p.is_empty()));
    }
}
