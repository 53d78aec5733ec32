//! Session and JSON:API clients against an in-process fake of the site
//!
//! The fake keeps just enough of Drupal's behaviour: cookie login, 302 on
//! logout, a per-session CSRF token and a node/term store behind JSON:API.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use cmsprobe_common::{is_login_redirect, ContentClient, CsrfToken, Error, Role, SessionManager, SiteConfig};

const COOKIE_NAME: &str = "SESSfake";

#[derive(Default)]
struct FakeCms {
    accounts: HashMap<String, String>,
    sessions: HashSet<String>,
    nodes: Vec<StoredNode>,
    terms: Vec<String>,
    next_nid: u64,
    next_session: u64,
}

struct StoredNode {
    uuid: String,
    bundle: String,
    nid: u64,
    attributes: Value,
}

type Shared = Arc<Mutex<FakeCms>>;

#[derive(Deserialize)]
struct LoginForm {
    name: String,
    pass: String,
    form_id: String,
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_string())
}

fn active_session(state: &FakeCms, headers: &HeaderMap) -> Option<String> {
    session_id(headers).filter(|sid| state.sessions.contains(sid))
}

fn token_for(sid: &str) -> String {
    format!("token-{}", sid)
}

fn token_ok(state: &FakeCms, headers: &HeaderMap) -> bool {
    let sent = headers.get("X-CSRF-Token").and_then(|v| v.to_str().ok());
    match (active_session(state, headers), sent) {
        (Some(sid), Some(sent)) => sent == token_for(&sid),
        _ => false,
    }
}

fn jsonapi(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, "application/vnd.api+json")], body.to_string()).into_response()
}

fn forbidden() -> Response {
    jsonapi(
        StatusCode::FORBIDDEN,
        json!({"errors": [{"status": "403", "title": "Forbidden", "detail": "X-CSRF-Token request header is missing or invalid"}]}),
    )
}

async fn login(State(state): State<Shared>, Form(form): Form<LoginForm>) -> Response {
    let mut state = state.lock().unwrap();
    let valid = form.form_id == "user_login_form"
        && state.accounts.get(&form.name).map(|p| p == &form.pass).unwrap_or(false);

    if !valid {
        return (StatusCode::OK, "<form id=\"user-login-form\">Unrecognized username or password.</form>").into_response();
    }

    state.next_session += 1;
    let sid = format!("s{}", state.next_session);
    state.sessions.insert(sid.clone());

    (
        StatusCode::SEE_OTHER,
        [
            (header::SET_COOKIE, format!("{}={}; Path=/; HttpOnly", COOKIE_NAME, sid)),
            (header::LOCATION, "/user/1".to_string()),
        ],
    )
        .into_response()
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(sid) = session_id(&headers) {
        state.sessions.remove(&sid);
    }
    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}

async fn session_token(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();
    let token = match active_session(&state, &headers) {
        Some(sid) => token_for(&sid),
        None => "anonymous-token".to_string(),
    };
    (StatusCode::OK, token).into_response()
}

async fn admin_content(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();
    if active_session(&state, &headers).is_some() {
        (StatusCode::OK, "<h1>Content</h1>").into_response()
    } else {
        (StatusCode::FOUND, [(header::LOCATION, "/user/login?destination=/admin/content")]).into_response()
    }
}

async fn create_node(
    State(state): State<Shared>,
    Path(bundle): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if !token_ok(&state, &headers) {
        return forbidden();
    }

    let document: Value = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(_) => return jsonapi(StatusCode::BAD_REQUEST, json!({"errors": [{"status": "400"}]})),
    };
    if document["data"]["type"] != json!(format!("node--{}", bundle)) {
        return jsonapi(StatusCode::CONFLICT, json!({"errors": [{"status": "409"}]}));
    }

    let mut attributes = document["data"]["attributes"].clone();
    if let Some(title) = attributes.get("title").and_then(|t| t.get("value")).cloned() {
        attributes["title"] = title;
    }

    state.next_nid += 1;
    let nid = state.next_nid;
    attributes["drupal_internal__nid"] = json!(nid);
    let uuid = uuid::Uuid::new_v4().to_string();

    state.nodes.push(StoredNode {
        uuid: uuid.clone(),
        bundle: bundle.clone(),
        nid,
        attributes: attributes.clone(),
    });

    jsonapi(
        StatusCode::CREATED,
        json!({"data": {
            "id": uuid,
            "type": format!("node--{}", bundle),
            "attributes": attributes,
            "relationships": document["data"]["relationships"].clone(),
        }}),
    )
}

async fn list_nodes(
    State(state): State<Shared>,
    Path(bundle): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = state.lock().unwrap();
    let wanted = query
        .iter()
        .find(|(key, _)| key.starts_with("filter[") && key.ends_with("[value]"))
        .map(|(_, value)| value.clone());
    let operator_ok = query
        .iter()
        .filter(|(key, _)| key.ends_with("[operator]"))
        .all(|(_, value)| value == "=");
    if !operator_ok {
        return jsonapi(StatusCode::BAD_REQUEST, json!({"errors": [{"status": "400"}]}));
    }

    let data: Vec<Value> = state
        .nodes
        .iter()
        .filter(|node| node.bundle == bundle)
        .filter(|node| match &wanted {
            Some(title) => node.attributes["title"] == json!(title),
            None => true,
        })
        .map(|node| {
            json!({
                "id": node.uuid,
                "type": format!("node--{}", node.bundle),
                "attributes": node.attributes,
            })
        })
        .collect();

    jsonapi(StatusCode::OK, json!({ "data": data }))
}

async fn delete_node(
    State(state): State<Shared>,
    Path((bundle, uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    if !token_ok(&state, &headers) {
        return forbidden();
    }

    let before = state.nodes.len();
    state.nodes.retain(|node| !(node.bundle == bundle && node.uuid == uuid));
    if state.nodes.len() == before {
        return jsonapi(
            StatusCode::NOT_FOUND,
            json!({"errors": [{"status": "404", "title": "Not Found", "detail": format!("The \"entity\" parameter was not converted for the path \"/jsonapi/node/{}/{}\"", bundle, uuid)}]}),
        );
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn create_term(
    State(state): State<Shared>,
    Path(vocabulary): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if !token_ok(&state, &headers) {
        return forbidden();
    }

    let document: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let uuid = uuid::Uuid::new_v4().to_string();
    state.terms.push(uuid.clone());

    jsonapi(
        StatusCode::CREATED,
        json!({"data": {
            "id": uuid,
            "type": format!("taxonomy_term--{}", vocabulary),
            "attributes": document["data"]["attributes"].clone(),
        }}),
    )
}

async fn spawn_cms() -> (SiteConfig, Shared) {
    let mut cms = FakeCms::default();
    cms.accounts.insert("admin".to_string(), "admin".to_string());
    cms.accounts.insert("editor".to_string(), "editor".to_string());
    let state: Shared = Arc::new(Mutex::new(cms));

    let app = Router::new()
        .route("/user/login", post(login))
        .route("/user/logout", get(logout))
        .route("/session/token", get(session_token))
        .route("/admin/content", get(admin_content))
        .route("/jsonapi/node/:bundle", post(create_node).get(list_nodes))
        .route("/jsonapi/node/:bundle/:uuid", delete(delete_node))
        .route("/jsonapi/taxonomy_term/:vocabulary", post(create_term))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = SiteConfig {
        base_url: format!("http://{}/", addr),
        accept_invalid_certs: false,
        ..Default::default()
    };
    (config, state)
}

async fn admin_content_client(config: &SiteConfig) -> (ContentClient, CsrfToken) {
    let client = ContentClient::new(SessionManager::new(config).unwrap());
    let token = client.session_token("admin", "admin").await.unwrap();
    (client, token)
}

#[tokio::test]
async fn every_role_reaches_an_authenticated_page() {
    let (config, _) = spawn_cms().await;

    for role in Role::ALL {
        let session = SessionManager::new(&config).unwrap();

        let anonymous = session.get("/admin/content").await.unwrap();
        assert!(is_login_redirect(&anonymous), "anonymous visit must bounce to login");

        let logged_in = session.login(role).await.unwrap();
        assert_eq!(logged_in.role, Some(role));

        let page = session.get("/admin/content").await.unwrap();
        assert!(!is_login_redirect(&page), "{} was sent back to login", role);
        assert_eq!(page.status(), 200);
    }
}

#[tokio::test]
async fn logout_redirects_and_is_repeatable() {
    let (config, _) = spawn_cms().await;
    let session = SessionManager::new(&config).unwrap();
    session.login(Role::Editor).await.unwrap();

    session.logout().await.unwrap();
    session.logout().await.unwrap();

    let page = session.get("/admin/content").await.unwrap();
    assert!(is_login_redirect(&page));
}

#[tokio::test]
async fn created_node_is_found_by_title() {
    let (config, _) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    let fields = json!({"title": "Lookup me", "body": {"value": "Body text", "format": "basic_html"}});
    let nid = client.create_node(&token, "article", fields.clone(), None).await.unwrap();

    let nodes = client.get_nodes_with_title(&token, "article", "Lookup me").await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].nid(), Some(nid));
    assert_eq!(nodes[0].attributes["title"], fields["title"]);
    assert_eq!(nodes[0].attributes["body"], fields["body"]);
}

#[tokio::test]
async fn title_lookup_encodes_special_characters() {
    let (config, _) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    client
        .create_node(&token, "article", json!({"title": "Q&A = 100% #1"}), None)
        .await
        .unwrap();

    let nodes = client.get_nodes_with_title(&token, "article", "Q&A = 100% #1").await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(client.get_nodes_with_title(&token, "article", "Q").await.unwrap().is_empty());
}

#[tokio::test]
async fn reseeding_twice_leaves_one_node() {
    let (config, state) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    let fields = json!({"title": {"value": "Seeded article"}});
    client.create_node(&token, "article", fields.clone(), None).await.unwrap();
    client.create_node(&token, "article", fields.clone(), None).await.unwrap();

    let first = client.reseed_article(&token, "article", fields.clone(), None).await.unwrap();
    let second = client.reseed_article(&token, "article", fields, None).await.unwrap();
    assert_ne!(first, second);

    let nodes = client.get_nodes_with_title(&token, "article", "Seeded article").await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].nid(), Some(second));
    assert_eq!(state.lock().unwrap().nodes.len(), 1);
}

#[tokio::test]
async fn deleting_unknown_node_returns_error_body() {
    let (config, _) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    let body = client
        .delete_node(&token, "article", "00000000-0000-0000-0000-000000000000")
        .await
        .unwrap();
    assert_eq!(body["errors"][0]["status"], "404");
}

#[tokio::test]
async fn deleting_existing_node_returns_empty_body() {
    let (config, _) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    client.create_node(&token, "article", json!({"title": "Short lived"}), None).await.unwrap();
    let nodes = client.get_nodes_with_title(&token, "article", "Short lived").await.unwrap();

    let body = client.delete_node(&token, "article", &nodes[0].id).await.unwrap();
    assert_eq!(body, Value::Null);
    assert!(client.get_nodes_with_title(&token, "article", "Short lived").await.unwrap().is_empty());
}

#[tokio::test]
async fn taxonomy_term_feeds_node_relationship() {
    let (config, _) = spawn_cms().await;
    let (client, token) = admin_content_client(&config).await;

    let term_id = client.create_taxonomy_term(&token, json!({"name": "news"})).await.unwrap();
    assert!(!term_id.is_empty());

    let relationships = json!({"field_tags": {"data": [{"type": "taxonomy_term--tags", "id": term_id}]}});
    let nid = client
        .create_node(&token, "article", json!({"title": "Tagged"}), Some(relationships))
        .await
        .unwrap();
    assert!(nid > 0);
}

#[tokio::test]
async fn mutation_without_valid_token_fails() {
    let (config, _) = spawn_cms().await;
    let (client, _) = admin_content_client(&config).await;

    let result = client
        .create_node(&CsrfToken::new("forged"), "article", json!({"title": "Nope"}), None)
        .await;
    match result {
        Err(Error::UnexpectedStatus { method, status, .. }) => {
            assert_eq!(method, "POST");
            assert_eq!(status, 403);
        }
        other => panic!("expected 403, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn bad_password_does_not_authenticate() {
    let (config, _) = spawn_cms().await;
    let session = SessionManager::new(&config).unwrap();

    session.login_with("admin", "wrong").await.unwrap();
    let page = session.get("/admin/content").await.unwrap();
    assert!(is_login_redirect(&page));
}
