//! Content provisioning through Drupal's JSON:API module
//!
//! Every call sends the JSON:API media type and the session's CSRF token.
//! Nodes live under `/jsonapi/node/{bundle}`, taxonomy terms under
//! `/jsonapi/taxonomy_term/{vocabulary}`.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{status_error, CsrfToken, SessionManager};

/// JSON:API media type
pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

const CSRF_HEADER: &str = "X-CSRF-Token";
const TITLE_FILTER: &str = "title-match";
const DEFAULT_VOCABULARY: &str = "tags";

/// Top-level JSON:API document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: T,
}

/// Resource object sent on create
#[derive(Debug, Clone, Serialize)]
pub struct NewResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Value>,
}

/// Resource object returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub relationships: Option<Value>,
}

impl Resource {
    /// Server-assigned numeric node id
    pub fn nid(&self) -> Option<u64> {
        self.attributes.get("drupal_internal__nid").and_then(Value::as_u64)
    }

    pub fn title(&self) -> Option<&str> {
        self.attributes.get("title").and_then(Value::as_str)
    }
}

/// Client for node and taxonomy term provisioning
#[derive(Clone)]
pub struct ContentClient {
    session: SessionManager,
}

impl ContentClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// Log in with the given account and return its CSRF token
    pub async fn session_token(&self, user: &str, password: &str) -> Result<CsrfToken> {
        self.session.login_with(user, password).await?;
        self.session.fetch_token().await
    }

    /// Create a node and return its numeric id
    pub async fn create_node(
        &self,
        token: &CsrfToken,
        node_type: &str,
        primary: Value,
        secondary: Option<Value>,
    ) -> Result<u64> {
        let url = self.node_url(node_type, None)?;
        let document = Document {
            data: NewResource {
                kind: format!("node--{}", node_type),
                attributes: primary,
                relationships: secondary,
            },
        };

        let created = self.post_resource(token, url.clone(), &document).await?;
        let nid = created.nid().ok_or_else(|| Error::UnexpectedResponse {
            url: url.to_string(),
            reason: "missing data.attributes.drupal_internal__nid".to_string(),
        })?;

        info!("Created {} node {} ({})", node_type, nid, created.id);
        Ok(nid)
    }

    /// Delete a node by UUID and hand back the raw response body
    ///
    /// Error statuses are not raised; the body (a JSON:API `errors`
    /// document, or `Null` for 204) is for the caller to inspect.
    pub async fn delete_node(&self, token: &CsrfToken, node_type: &str, uuid: &str) -> Result<Value> {
        let (_, body) = self.send_delete(token, node_type, uuid).await?;
        Ok(body)
    }

    /// Look up nodes whose title equals `title`
    pub async fn get_nodes_with_title(
        &self,
        token: &CsrfToken,
        node_type: &str,
        title: &str,
    ) -> Result<Vec<Resource>> {
        let url = self.node_url(node_type, None)?;
        let path_key = format!("filter[{}][path]", TITLE_FILTER);
        let value_key = format!("filter[{}][value]", TITLE_FILTER);
        let operator_key = format!("filter[{}][operator]", TITLE_FILTER);

        let response = self
            .request(Method::GET, url, token)
            .query(&[
                (path_key.as_str(), "title"),
                (value_key.as_str(), title),
                (operator_key.as_str(), "="),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error("GET", response).await);
        }

        let document: Document<Vec<Resource>> = response.json().await?;
        debug!("{} {} node(s) titled {:?}", document.data.len(), node_type, title);
        Ok(document.data)
    }

    /// Delete every node carrying the new title, then create it again
    ///
    /// Deletes run one after another and must all finish before the create
    /// is sent, so the lookup after a reseed sees exactly one node.
    pub async fn reseed_article(
        &self,
        token: &CsrfToken,
        node_type: &str,
        primary: Value,
        secondary: Option<Value>,
    ) -> Result<u64> {
        let title = title_of(&primary)?;
        let existing = self.get_nodes_with_title(token, node_type, &title).await?;

        for node in &existing {
            let (status, body) = self.send_delete(token, node_type, &node.id).await?;
            if !status.is_success() {
                return Err(Error::UnexpectedStatus {
                    method: "DELETE".to_string(),
                    url: self.node_url(node_type, Some(&node.id))?.to_string(),
                    status: status.as_u16(),
                    body: body.to_string(),
                });
            }
        }

        if !existing.is_empty() {
            info!("Removed {} existing {} node(s) titled {:?}", existing.len(), node_type, title);
        }

        self.create_node(token, node_type, primary, secondary).await
    }

    /// Create a term in the `tags` vocabulary and return its UUID
    pub async fn create_taxonomy_term(&self, token: &CsrfToken, attributes: Value) -> Result<String> {
        self.create_term(token, DEFAULT_VOCABULARY, attributes).await
    }

    /// Create a term in any vocabulary and return its UUID
    pub async fn create_term(&self, token: &CsrfToken, vocabulary: &str, attributes: Value) -> Result<String> {
        let url = self.session.endpoint(&format!("/jsonapi/taxonomy_term/{}", vocabulary))?;
        let document = Document {
            data: NewResource {
                kind: format!("taxonomy_term--{}", vocabulary),
                attributes,
                relationships: None,
            },
        };

        let created = self.post_resource(token, url, &document).await?;
        info!("Created {} term {}", vocabulary, created.id);
        Ok(created.id)
    }

    async fn post_resource(
        &self,
        token: &CsrfToken,
        url: Url,
        document: &Document<NewResource>,
    ) -> Result<Resource> {
        let body = serde_json::to_vec(document)?;
        let response = self.request(Method::POST, url, token).body(body).send().await?;

        if !response.status().is_success() {
            return Err(status_error("POST", response).await);
        }

        let created: Document<Resource> = response.json().await?;
        Ok(created.data)
    }

    async fn send_delete(&self, token: &CsrfToken, node_type: &str, uuid: &str) -> Result<(StatusCode, Value)> {
        let url = self.node_url(node_type, Some(uuid))?;
        let response = self.request(Method::DELETE, url, token).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!("DELETE {} node {} returned {}", node_type, uuid, status);
        }

        Ok((status, parse_body(&text)))
    }

    fn request(&self, method: Method, url: Url, token: &CsrfToken) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.session
            .client()
            .request(method, url)
            .header(ACCEPT, JSONAPI_MEDIA_TYPE)
            .header(CONTENT_TYPE, JSONAPI_MEDIA_TYPE)
            .header(CSRF_HEADER, token.as_str())
    }

    fn node_url(&self, node_type: &str, uuid: Option<&str>) -> Result<Url> {
        match uuid {
            Some(uuid) => self.session.endpoint(&format!("/jsonapi/node/{}/{}", node_type, uuid)),
            None => self.session.endpoint(&format!("/jsonapi/node/{}", node_type)),
        }
    }
}

/// Title carried by a node's attributes, either `"..."` or `{"value": "..."}`
pub fn title_of(attributes: &Value) -> Result<String> {
    let title = attributes
        .get("title")
        .ok_or_else(|| Error::InvalidFields("missing title".to_string()))?;

    title
        .as_str()
        .or_else(|| title.get("value").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidFields(format!("title is not a string: {}", title)))
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
