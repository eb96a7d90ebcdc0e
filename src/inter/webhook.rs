/*!
Identity-provider sync endpoint.

The provider POSTs signed events describing its own user records; this
is the trust boundary, so the signature is checked before anything else.
Non-2xx responses make the provider redeliver, which is the only retry
mechanism anywhere in the system.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::{
    config::Glob,
    user::{uname_from_email, Gender, NewUser, UserPatch},
};
use super::{json_ok, Fault, FieldError};

type HmacSha256 = Hmac<Sha256>;

static ID_HEADER: &str = "webhook-id";
static TIMESTAMP_HEADER: &str = "webhook-timestamp";
static SIGNATURE_HEADER: &str = "webhook-signature";

/// The three events the provider delivers.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IdentityEvent {
    #[serde(rename = "user.created")]
    Created(ProviderUser),
    #[serde(rename = "user.updated")]
    Updated(ProviderPatch),
    #[serde(rename = "user.deleted")]
    Deleted(ProviderRef),
}

#[derive(Debug, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderPatch {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderRef {
    pub id: String,
}

fn key_material(secret: &str) -> Result<Vec<u8>, String> {
    match secret.strip_prefix("whsec_") {
        Some(b64) => BASE64.decode(b64)
            .map_err(|e| format!("Bad webhook secret encoding: {}", &e)),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

/**
Check a delivery signature.

The signed content is `"{id}.{timestamp}.{body}"`, HMAC-SHA256 keyed
with the shared secret. The signature header may carry several
space-separated `v1,<base64>` candidates (the provider rolls keys this
way); any one constant-time match passes.
*/
pub fn verify_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    body: &str,
    signatures: &str,
) -> Result<(), String> {
    let key = key_material(secret)?;
    let signed = format!("{}.{}.{}", msg_id, timestamp, body);

    for candidate in signatures.split_whitespace() {
        let candidate = candidate.strip_prefix("v1,").unwrap_or(candidate);
        let sig = match BASE64.decode(candidate) {
            Ok(bytes) => bytes,
            Err(_) => { continue; },
        };

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| format!("Bad webhook key: {}", &e))?;
        mac.update(signed.as_bytes());
        if mac.verify_slice(&sig).is_ok() {
            return Ok(());
        }
    }

    Err("no candidate signature matched".to_owned())
}

/// Compute the `v1,<base64>` signature of a payload; the counterpart of
/// `verify_signature`, for local delivery tooling.
pub fn sign(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    body: &str,
) -> Result<String, String> {
    let key = key_material(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| format!("Bad webhook key: {}", &e))?;
    mac.update(format!("{}.{}.{}", msg_id, timestamp, body).as_bytes());
    Ok(format!("v1,{}", BASE64.encode(mac.finalize().into_bytes())))
}

fn required_header<'h>(headers: &'h HeaderMap, name: &str) -> Result<&'h str, Fault> {
    match headers.get(name) {
        Some(value) => value.to_str().map_err(|_| {
            Fault::BadSignature(format!("{} header unreadable", name))
        }),
        None => Err(Fault::BadSignature(format!("{} header missing", name))),
    }
}

/**
`POST /hooks/identity`

400 on missing headers, signature failure, or an unparseable body; 500
on a storage fault (so the provider redelivers); 200 otherwise. Events
for ids that never synced locally are acknowledged with a warning
rather than failed, so the provider doesn't redeliver them forever.
*/
pub async fn identity_webhook(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    body: String,
) -> Response {
    log::trace!("identity_webhook( [ {} byte body ] ) called.", body.len());

    let msg_id = match required_header(&headers, ID_HEADER) {
        Ok(v) => v,
        Err(f) => { return f.into_response(); },
    };
    let timestamp = match required_header(&headers, TIMESTAMP_HEADER) {
        Ok(v) => v,
        Err(f) => { return f.into_response(); },
    };
    let signatures = match required_header(&headers, SIGNATURE_HEADER) {
        Ok(v) => v,
        Err(f) => { return f.into_response(); },
    };

    {
        let glob = glob.read().await;
        if let Err(why) = verify_signature(
            &glob.webhook_secret, msg_id, timestamp, &body, signatures
        ) {
            return Fault::BadSignature(why).into_response();
        }
    }

    let event: IdentityEvent = match serde_json::from_str(&body) {
        Ok(ev) => ev,
        Err(e) => {
            log::warn!("Unparseable webhook delivery {:?}: {}", msg_id, &e);
            return Fault::Validation(vec![
                FieldError::new("body", format!("Unparseable event: {}", &e)),
            ]).into_response();
        },
    };
    log::info!("Webhook delivery {:?}: {:?}", msg_id, &event);

    {
        let glob = glob.read().await;
        match event {
            IdentityEvent::Created(pu) => {
                let nu = NewUser {
                    id: pu.id,
                    uname: pu.username
                        .unwrap_or_else(|| uname_from_email(&pu.email)),
                    first_name: pu.first_name.unwrap_or_default(),
                    last_name: pu.last_name.unwrap_or_default(),
                    email: pu.email,
                    phone: None,
                    address: None,
                    role: glob.webhook_default_role,
                    sex: Gender::Other,
                    birth_date: None,
                    credential: glob.webhook_placeholder_credential.clone(),
                };
                if let Err(e) = glob.store().insert_user(&nu).await {
                    return Fault::Storage(e).into_response();
                }
            },
            IdentityEvent::Updated(pp) => {
                let patch = UserPatch {
                    uname: pp.username,
                    first_name: pp.first_name,
                    last_name: pp.last_name,
                    email: pp.email,
                    ..UserPatch::default()
                };
                match glob.store().update_user(&pp.id, &patch).await {
                    Ok(0) => {
                        log::warn!(
                            "user.updated for unknown id {:?}; acknowledging.",
                            &pp.id
                        );
                    },
                    Ok(_) => {},
                    Err(e) => { return Fault::Storage(e).into_response(); },
                }
            },
            IdentityEvent::Deleted(pr) => {
                match glob.store().delete_user(&pr.id).await {
                    Ok(0) => {
                        log::warn!(
                            "user.deleted for unknown id {:?}; acknowledging.",
                            &pr.id
                        );
                    },
                    Ok(_) => {},
                    Err(e) => { return Fault::Storage(e).into_response(); },
                }
            },
        }
    }

    glob.write().await.invalidate_views("/users");
    json_ok(json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    static SECRET: &str = "whsec_dGVzdC1zaWduaW5nLWtleQ==";

    #[test]
    fn signatures_round_trip() {
        ensure_logging();
        let body = r#"{"type":"user.deleted","data":{"id":"u_1"}}"#;
        let sig = sign(SECRET, "msg_1", "1693000000", body).unwrap();

        assert!(sig.starts_with("v1,"));
        verify_signature(SECRET, "msg_1", "1693000000", body, &sig).unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        ensure_logging();
        let body = r#"{"type":"user.deleted","data":{"id":"u_1"}}"#;
        let sig = sign(SECRET, "msg_1", "1693000000", body).unwrap();

        let tampered = body.replace("u_1", "u_2");
        assert!(verify_signature(SECRET, "msg_1", "1693000000", &tampered, &sig).is_err());
        // A different message id or timestamp also breaks the signature.
        assert!(verify_signature(SECRET, "msg_2", "1693000000", body, &sig).is_err());
        assert!(verify_signature(SECRET, "msg_1", "1693000001", body, &sig).is_err());
        // And so does the wrong secret.
        assert!(verify_signature("whsec_b3RoZXIta2V5", "msg_1", "1693000000", body, &sig).is_err());
    }

    #[test]
    fn any_matching_candidate_passes() {
        ensure_logging();
        let body = "{}";
        let good = sign(SECRET, "msg_1", "0", body).unwrap();
        let header = format!("v1,AAAA {} v1,%%%notb64", &good);

        verify_signature(SECRET, "msg_1", "0", body, &header).unwrap();
        assert!(verify_signature(SECRET, "msg_1", "0", body, "v1,AAAA").is_err());
    }

    #[test]
    fn unprefixed_secrets_are_raw_key_material() {
        ensure_logging();
        let body = "{}";
        let sig = sign("plain-secret", "m", "0", body).unwrap();
        verify_signature("plain-secret", "m", "0", body, &sig).unwrap();
    }

    // The store handle points at a host that is never contacted; a 400
    // here proves rejection happens before any storage access.
    fn offline_glob() -> Arc<RwLock<Glob>> {
        use crate::config::Cfg;
        use crate::store::Store;

        Arc::new(RwLock::new(Glob::new(
            Store::new("host=nowhere".to_owned()),
            Cfg::default(),
        )))
    }

    async fn deliver(glob: &Arc<RwLock<Glob>>, msg_id: &str, body: &str) -> Response {
        let timestamp = "1693000000";
        let sig = sign(SECRET, msg_id, timestamp, body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(ID_HEADER, msg_id.parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, timestamp.parse().unwrap());
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());

        identity_webhook(headers, Extension(glob.clone()), body.to_owned()).await
    }

    // Live test; see `store::tests` for the required local Postgres setup.

    #[tokio::test]
    #[ignore]
    #[serial_test::serial]
    async fn signed_events_sync_users_end_to_end() {
        use axum::http::StatusCode;
        use crate::config::Cfg;
        use crate::store::{tests::TEST_CONNECTION, Store};
        use crate::user::Role;

        ensure_logging();
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
        db.ensure_db_schema().await.unwrap();

        let mut cfg = Cfg::default();
        cfg.db_connect_string = TEST_CONNECTION.to_owned();
        cfg.webhook_secret = SECRET.to_owned();
        let glob = Arc::new(RwLock::new(Glob::new(db, cfg)));

        let created = r#"{
            "type": "user.created",
            "data": { "id": "u_1", "email": "ada@ecole.example" }
        }"#;
        let resp = deliver(&glob, "msg_1", created).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let u = {
            let glob = glob.read().await;
            glob.store().get_user("u_1").await.unwrap().unwrap()
        };
        assert_eq!(u.uname, "ada");
        assert_eq!(u.role, Role::Student);
        assert_eq!(u.credential, "external");

        let updated = r#"{
            "type": "user.updated",
            "data": { "id": "u_1", "last_name": "Lovelace" }
        }"#;
        let resp = deliver(&glob, "msg_2", updated).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let u2 = {
            let glob = glob.read().await;
            glob.store().get_user("u_1").await.unwrap().unwrap()
        };
        assert_eq!(u2.last_name, "Lovelace");
        assert_eq!(u2.created_at, u.created_at);

        // An event for an id that never synced is acknowledged, not failed.
        let unknown = r#"{
            "type": "user.updated",
            "data": { "id": "u_999", "last_name": "Nobody" }
        }"#;
        let resp = deliver(&glob, "msg_3", unknown).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let deleted = r#"{
            "type": "user.deleted",
            "data": { "id": "u_1" }
        }"#;
        let resp = deliver(&glob, "msg_4", deleted).await;
        assert_eq!(resp.status(), StatusCode::OK);
        {
            let glob = glob.read().await;
            assert!(glob.store().get_user("u_1").await.unwrap().is_none());
            glob.store().nuke_database().await.unwrap();
        }
    }

    #[tokio::test]
    async fn deliveries_without_headers_are_rejected() {
        use axum::http::StatusCode;

        ensure_logging();
        let resp = identity_webhook(
            HeaderMap::new(),
            Extension(offline_glob()),
            r#"{"type":"user.deleted","data":{"id":"u_1"}}"#.to_owned(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deliveries_with_bad_signatures_are_rejected() {
        use axum::http::StatusCode;

        ensure_logging();
        let mut headers = HeaderMap::new();
        headers.insert(ID_HEADER, "msg_1".parse().unwrap());
        headers.insert(TIMESTAMP_HEADER, "1693000000".parse().unwrap());
        headers.insert(SIGNATURE_HEADER, "v1,AAAA".parse().unwrap());

        let resp = identity_webhook(
            headers,
            Extension(offline_glob()),
            r#"{"type":"user.deleted","data":{"id":"u_1"}}"#.to_owned(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn events_parse() {
        ensure_logging();

        let created = r#"{
            "type": "user.created",
            "data": {
                "id": "u_1",
                "email": "a@b.com",
                "first_name": "Ada",
                "last_name": null,
                "username": null
            }
        }"#;
        match serde_json::from_str::<IdentityEvent>(created).unwrap() {
            IdentityEvent::Created(pu) => {
                assert_eq!(pu.id, "u_1");
                assert_eq!(pu.email, "a@b.com");
                assert_eq!(pu.first_name.as_deref(), Some("Ada"));
                assert!(pu.username.is_none());
                // The derived uname for this payload.
                assert_eq!(uname_from_email(&pu.email), "a");
            },
            other => panic!("parsed as {:?}", other),
        }

        let updated = r#"{
            "type": "user.updated",
            "data": { "id": "u_1", "last_name": "Lovelace" }
        }"#;
        match serde_json::from_str::<IdentityEvent>(updated).unwrap() {
            IdentityEvent::Updated(pp) => {
                assert_eq!(pp.id, "u_1");
                assert_eq!(pp.last_name.as_deref(), Some("Lovelace"));
                assert!(pp.email.is_none());
            },
            other => panic!("parsed as {:?}", other),
        }

        let deleted = r#"{ "type": "user.deleted", "data": { "id": "u_1" } }"#;
        match serde_json::from_str::<IdentityEvent>(deleted).unwrap() {
            IdentityEvent::Deleted(pr) => { assert_eq!(pr.id, "u_1"); },
            other => panic!("parsed as {:?}", other),
        }

        let unknown = r#"{ "type": "user.banned", "data": { "id": "u_1" } }"#;
        assert!(serde_json::from_str::<IdentityEvent>(unknown).is_err());
    }
}
