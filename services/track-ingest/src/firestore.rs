//!
//! src/firestore.rs  Oct 18th, 2026
//!
//! Document store over the Firestore REST api. Documents travel as plain
//! json inside the service and are converted to Firestore typed values
//! only at this boundary.
//!

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::config::{FirebaseConfig, HttpConfig};
use crate::errors::IngestError;
use crate::fetch::base_client;
use crate::store::{validate_field, DocumentStore};

#[derive(Clone, Debug)]
pub struct FirestoreClient {
    http: Client,
    database: Url,
    api_key: String,
    auth_token: Option<String>
}

impl FirestoreClient {
    pub fn new(http_config: &HttpConfig, cfg: &FirebaseConfig) ->
        Result<Self, IngestError> {
        let http = base_client(http_config)?;
        let database = cfg.firestore_base
            .join(&format!("projects/{}/databases/(default)/", cfg.project_id))?;

        Ok( Self {
            http,
            database,
            api_key: cfg.api_key.clone(),
            auth_token: cfg.auth_token.clone()
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<Url, IngestError> {
        let mut url = self.database.join("documents/")?;
        url.path_segments_mut()
            .map_err(|_| IngestError::Config(format!("cannot-be-a-base url {}", self.database)))?
            .pop_if_empty()
            .push(collection)
            .push(id);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.query(&[("key", self.api_key.as_str())]);
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req
        }
    }

    /// PATCH without a mask: full replace, creating the document if absent
    pub fn create_request(&self, collection: &str, id: &str, doc: &Value) ->
        Result<RequestBuilder, IngestError> {
        let url = self.document_url(collection, id)?;
        let body = json!({ "fields": to_fields(doc)? });
        Ok(self.authorize(self.http.patch(url)).json(&body))
    }

    /// PATCH masked to the given fields; fails if the document is missing
    pub fn update_request(&self, collection: &str, id: &str, fields: &Value) ->
        Result<RequestBuilder, IngestError> {
        let patch = fields.as_object()
            .ok_or_else(|| IngestError::Validation("update fields must be an object".into()))?;
        let url = self.document_url(collection, id)?;

        let mut mask: Vec<(&str, &str)> = patch.keys()
            .map(|k| ("updateMask.fieldPaths", k.as_str()))
            .collect();
        mask.push(("currentDocument.exists", "true"));

        let body = json!({ "fields": to_fields(fields)? });
        Ok(self.authorize(self.http.patch(url)).query(&mask).json(&body))
    }

    /// POST documents:runQuery with a single equality filter
    pub fn query_request(&self, collection: &str, field: &str, value: &str) ->
        Result<RequestBuilder, IngestError> {
        validate_field(field)?;
        let url = self.database.join("./documents:runQuery")?;
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": { "stringValue": value }
                    }
                }
            }
        });
        Ok(self.authorize(self.http.post(url)).json(&body))
    }

    async fn execute(&self, req: RequestBuilder) -> Result<Response, IngestError> {
        let resp = req.send()
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn status_error(status: StatusCode, body: &str) -> IngestError {
    let message = format!("firestore {status}: {}", body.trim());
    match status {
        StatusCode::BAD_REQUEST => IngestError::Validation(message),
        StatusCode::NOT_FOUND => IngestError::Db(message),
        _ => IngestError::StoreUnavailable(message)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn try_create(&self, collection: &str, id: &str, doc: &Value) ->
        Result<(), IngestError> {
        self.execute(self.create_request(collection, id, doc)?).await?;
        debug!(collection, id, "firestore.create");
        Ok(())
    }

    async fn try_update(&self, collection: &str, id: &str, fields: &Value) ->
        Result<(), IngestError> {
        self.execute(self.update_request(collection, id, fields)?).await?;
        debug!(collection, id, "firestore.update");
        Ok(())
    }

    async fn find_by_field(&self, collection: &str, field: &str, value: &str) ->
        Result<Vec<Value>, IngestError> {
        let resp = self.execute(self.query_request(collection, field, value)?).await?;
        let rows: Value = resp.json()
            .await
            .map_err(|e| IngestError::StoreUnavailable(format!("runQuery body: {e}")))?;
        parse_query_rows(&rows)
    }
}

/// Rows of a runQuery response; an empty result is a single row with only
/// a readTime
pub fn parse_query_rows(rows: &Value) -> Result<Vec<Value>, IngestError> {
    let Some(rows) = rows.as_array() else {
        return Err(IngestError::Parse("runQuery response is not an array".into()));
    };

    let mut docs = Vec::new();
    for row in rows {
        if let Some(error) = row.get("error") {
            return Err(IngestError::StoreUnavailable(format!("runQuery: {error}")));
        }
        if let Some(fields) = row.pointer("/document/fields") {
            docs.push(from_fields(fields));
        } else if row.get("document").is_some() {
            docs.push(Value::Object(Map::new()));
        }
    }
    Ok(docs)
}

/// Top level object to a Firestore `fields` map
pub fn to_fields(doc: &Value) -> Result<Value, IngestError> {
    match doc {
        Value::Object(map) => Ok(Value::Object(
            map.iter().map(|(k, v)| (k.clone(), to_typed(v))).collect()
        )),
        _ => Err(IngestError::Validation("document must be an object".into()))
    }
}

pub fn to_typed(v: &Value) -> Value {
    match v {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // int64 travels as a decimal string
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() })
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(to_typed).collect::<Vec<_>>() }
        }),
        Value::Object(_) => json!({
            "mapValue": { "fields": to_fields(v).unwrap_or_else(|_| json!({})) }
        })
    }
}

pub fn from_fields(fields: &Value) -> Value {
    match fields.as_object() {
        Some(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), from_typed(v))).collect()
        ),
        None => Value::Object(Map::new())
    }
}

pub fn from_typed(v: &Value) -> Value {
    let Some((kind, inner)) = v.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "integerValue" => inner.as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" | "booleanValue" | "stringValue" | "timestampValue"
            | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner.get("values")
                .and_then(|v| v.as_array())
                .map(|values| values.iter().map(from_typed).collect())
                .unwrap_or_default()
        ),
        "mapValue" => from_fields(inner.get("fields").unwrap_or(&Value::Null)),
        _ => Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FirestoreClient {
        let cfg = FirebaseConfig {
            project_id: "demo-proj".into(),
            api_key: "k3y".into(),
            storage_bucket: "demo-proj.appspot.com".into(),
            auth_token: None,
            firestore_base: Url::parse("https://firestore.googleapis.com/v1/").unwrap(),
            storage_base: Url::parse("https://firebasestorage.googleapis.com/v0/").unwrap()
        };
        FirestoreClient::new(&HttpConfig::default(), &cfg).unwrap()
    }

    #[test]
    fn typed_values_round_trip_a_track_document() {
        let doc = json!({
            "title": "Firestone",
            "active": true,
            "duration": 273.4,
            "playCount": 0,
            "genres": ["tropical house", "edm"],
            "meta": {"source": "deezer"},
            "ownerId": null
        });
        let fields = to_fields(&doc).unwrap();
        assert_eq!(fields["playCount"], json!({"integerValue": "0"}));
        assert_eq!(fields["duration"], json!({"doubleValue": 273.4}));
        assert_eq!(fields["genres"]["arrayValue"]["values"][1], json!({"stringValue": "edm"}));

        assert_eq!(from_fields(&fields), doc);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(matches!(to_fields(&json!([1])), Err(IngestError::Validation(_))));
    }

    #[test]
    fn request_urls() {
        let fs = client();
        let create = fs.create_request("tracks", "music_1_2", &json!({"a": 1}))
            .unwrap().build().unwrap();
        assert_eq!(create.method(), reqwest::Method::PATCH);
        assert_eq!(
            create.url().as_str(),
            "https://firestore.googleapis.com/v1/projects/demo-proj/databases/(default)/documents/tracks/music_1_2?key=k3y"
        );

        let query = fs.query_request("tracks", "fingerprint", "abc")
            .unwrap().build().unwrap();
        assert_eq!(
            query.url().path(),
            "/v1/projects/demo-proj/databases/(default)/documents:runQuery"
        );

        let update = fs.update_request("tracks", "x", &json!({"active": false}))
            .unwrap().build().unwrap();
        let q = update.url().query().unwrap();
        assert!(q.contains("updateMask.fieldPaths=active"));
        assert!(q.contains("currentDocument.exists=true"));
    }

    #[test]
    fn query_rejects_odd_field_names() {
        assert!(client().query_request("tracks", "a.b", "v").is_err());
    }

    #[test]
    fn parses_query_rows() {
        let empty = json!([{"readTime": "2026-10-18T00:00:00Z"}]);
        assert!(parse_query_rows(&empty).unwrap().is_empty());

        let rows = json!([
            {"document": {"name": "projects/p/databases/(default)/documents/tracks/a",
                          "fields": {"fingerprint": {"stringValue": "k"}}},
             "readTime": "2026-10-18T00:00:00Z"}
        ]);
        let docs = parse_query_rows(&rows).unwrap();
        assert_eq!(docs, vec![json!({"fingerprint": "k"})]);
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, ""), IngestError::Validation(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, ""), IngestError::StoreUnavailable(_)));
        assert!(matches!(status_error(StatusCode::SERVICE_UNAVAILABLE, ""), IngestError::StoreUnavailable(_)));
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
    }
}
