//! Firestore document store over the REST v1 API.
//!
//! Documents are addressed as
//! `{base}/projects/{project}/databases/(default)/documents/{collection}/{id}`.
//! Reads are `GET`, writes are `PATCH` without an update mask, which replaces
//! the whole document and creates it when absent.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use super::{Document, DocumentStore, StoreError};
use crate::http::HttpPolicy;

pub struct FirestoreStore {
    client: reqwest::Client,
    policy: HttpPolicy,
    documents_url: String,
    access_token: String,
}

impl FirestoreStore {
    pub fn new(
        base_url: String,
        project_id: String,
        access_token: String,
        policy: HttpPolicy,
    ) -> Result<Self, StoreError> {
        let client = policy.client()?;
        let documents_url = format!(
            "{}/projects/{}/databases/(default)/documents",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&project_id)
        );
        Ok(Self {
            client,
            policy,
            documents_url,
            access_token,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.documents_url,
            urlencoding::encode(collection),
            urlencoding::encode(id)
        )
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let url = self.document_url(collection, id);
        let response = self
            .policy
            .send_with_retry(|| self.client.get(&url).bearer_auth(&self.access_token))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        let fields = match body.get("fields") {
            None => return Ok(Some(Map::new())),
            Some(Value::Object(fields)) => fields,
            Some(_) => {
                return Err(StoreError::InvalidDocument {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    reason: "`fields` is not an object".to_string(),
                })
            }
        };

        decode_fields(fields)
            .map(Some)
            .map_err(|reason| StoreError::InvalidDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                reason,
            })
    }

    async fn set(&self, collection: &str, id: &str, document: Document) -> Result<(), StoreError> {
        let url = self.document_url(collection, id);
        let body = json!({ "fields": encode_fields(&document) });
        let response = self
            .policy
            .send_with_retry(|| {
                self.client
                    .patch(&url)
                    .bearer_auth(&self.access_token)
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Encode a JSON object as a Firestore `fields` map.
pub fn encode_fields(document: &Document) -> Map<String, Value> {
    document
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Encode a JSON value as a Firestore typed value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore carries 64-bit integers as decimal strings.
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or(0.0) }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Decode a Firestore `fields` map into a JSON object.
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Document, String> {
    fields
        .iter()
        .map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Decode a Firestore typed value into plain JSON.
pub fn decode_value(value: &Value) -> Result<Value, String> {
    let typed = value
        .as_object()
        .and_then(|o| o.iter().next())
        .map(|(kind, raw)| (kind.as_str(), raw))
        .ok_or_else(|| format!("expected a typed value, got {}", value))?;

    match typed {
        ("nullValue", _) => Ok(Value::Null),
        ("booleanValue", Value::Bool(b)) => Ok(Value::Bool(*b)),
        ("integerValue", Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("bad integerValue {:?}: {}", s, e)),
        ("integerValue", Value::Number(n)) => Ok(Value::Number(n.clone())),
        ("doubleValue", Value::Number(n)) => Ok(Value::Number(n.clone())),
        ("stringValue", Value::String(s))
        | ("timestampValue", Value::String(s))
        | ("referenceValue", Value::String(s))
        | ("bytesValue", Value::String(s)) => Ok(Value::String(s.clone())),
        ("geoPointValue", Value::Object(point)) => Ok(Value::Object(point.clone())),
        ("arrayValue", Value::Object(array)) => match array.get("values") {
            None => Ok(Value::Array(Vec::new())),
            Some(Value::Array(values)) => values
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Some(other) => Err(format!("bad arrayValue.values: {}", other)),
        },
        ("mapValue", Value::Object(map)) => match map.get("fields") {
            None => Ok(Value::Object(Map::new())),
            Some(Value::Object(fields)) => decode_fields(fields).map(Value::Object),
            Some(other) => Err(format!("bad mapValue.fields: {}", other)),
        },
        (kind, raw) => Err(format!("unsupported Firestore value {}: {}", kind, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> FirestoreStore {
        FirestoreStore::new(
            server.uri(),
            "proj".to_string(),
            "secret".to_string(),
            HttpPolicy::default(),
        )
        .expect("store")
    }

    #[test]
    fn encodes_nested_values() {
        let encoded = encode_value(&json!({
            "id": 42,
            "budget": {"minimum": 250.5},
            "tags": ["logo", true],
            "owner": null
        }));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "id": {"integerValue": "42"},
                "budget": {"mapValue": {"fields": {"minimum": {"doubleValue": 250.5}}}},
                "tags": {"arrayValue": {"values": [
                    {"stringValue": "logo"},
                    {"booleanValue": true}
                ]}},
                "owner": {"nullValue": null}
            }}})
        );
    }

    #[test]
    fn decodes_what_it_encodes() {
        let original = json!({"terms": "logo design", "interval": 60, "paused": false, "n": [1, 2.5]});
        let encoded = encode_fields(original.as_object().expect("object"));
        let decoded = decode_fields(&encoded).expect("decode");
        assert_eq!(Value::Object(decoded), original);
    }

    #[test]
    fn decodes_empty_containers_and_timestamps() {
        let decoded = decode_fields(
            json!({
                "a": {"arrayValue": {}},
                "m": {"mapValue": {}},
                "t": {"timestampValue": "2024-01-01T00:00:00Z"}
            })
            .as_object()
            .expect("object"),
        )
        .expect("decode");
        assert_eq!(
            Value::Object(decoded),
            json!({"a": [], "m": {}, "t": "2024-01-01T00:00:00Z"})
        );
    }

    #[test]
    fn rejects_unknown_value_kinds() {
        assert!(decode_value(&json!({"mysteryValue": 1})).is_err());
        assert!(decode_value(&json!("bare")).is_err());
    }

    #[tokio::test]
    async fn get_decodes_document_and_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/databases/(default)/documents/profile/u1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/databases/(default)/documents/profile/u1",
                "fields": {"email": {"stringValue": "a@b.com"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/databases/(default)/documents/profile/u2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store(&server);
        let profile = store.get("profile", "u1").await.expect("get").expect("exists");
        assert_eq!(profile.get("email"), Some(&json!("a@b.com")));
        assert!(store.get("profile", "u2").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn set_patches_encoded_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/projects/proj/databases/(default)/documents/jobs/p1"))
            .and(body_json(json!({"fields": {
                "id": {"stringValue": "p1"},
                "owner": {"stringValue": "u1"}
            }})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let document = json!({"id": "p1", "owner": "u1"});
        store(&server)
            .set("jobs", "p1", document.as_object().cloned().expect("object"))
            .await
            .expect("set");
    }

    #[tokio::test]
    async fn write_failure_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = store(&server)
            .set("jobs", "p1", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 403, ref body } if body == "denied"));
    }
}
