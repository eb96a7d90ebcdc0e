/*!
Handlers for the user list view, user mutations, and parent links.
*/
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::header::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use serde_json::json;
use time::Date;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::Glob,
    page::{n_pages, Pagination},
    store::users::UserQuery,
    user::{uname_from_email, Gender, NewUser, Role, User, UserPatch},
    DATE_FMT,
};
use super::{json_ok, json_ok_raw, resolve_caller, Fault, FieldError};

/// Query parameters of the user list view.
#[derive(Debug, Deserialize)]
pub struct UserListParams {
    pub query: Option<String>,
    pub page: Option<u32>,
    pub role: Option<String>,
}

/// Form data for creating a user. `uname` is derived from the email
/// local-part when absent.
#[derive(Debug, Deserialize)]
pub struct UserForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: String,
    pub sex: String,
    pub birth_date: Option<String>,
    pub uname: Option<String>,
}

/// Form data for patching a user; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UserPatchForm {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: Option<String>,
    pub sex: Option<String>,
    pub birth_date: Option<String>,
    pub uname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParentForm {
    pub parent: String,
}

fn none_if_blank(v: Option<String>) -> Option<String> {
    v.and_then(|s| {
        let s = s.trim().to_owned();
        if s.is_empty() { None } else { Some(s) }
    })
}

fn parse_birth_date(s: &str) -> Result<Date, FieldError> {
    Date::parse(s, DATE_FMT).map_err(|e| FieldError::new(
        "birth_date",
        format!("{:?} is not a valid date: {}", s, &e),
    ))
}

/// Field-level validation of a creation form. All failures are collected
/// so the caller can surface every message next to its field at once.
fn validate_new_user(form: &UserForm) -> Result<(Role, Gender, Option<Date>), Vec<FieldError>> {
    let mut faults: Vec<FieldError> = Vec::new();

    if form.first_name.trim().is_empty() {
        faults.push(FieldError::new("first_name", "First name is required."));
    }
    if form.last_name.trim().is_empty() {
        faults.push(FieldError::new("last_name", "Last name is required."));
    }
    match form.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {},
        _ => {
            faults.push(FieldError::new(
                "email",
                format!("{:?} is not a plausible email address.", &form.email),
            ));
        },
    }

    let role = match form.role.parse::<Role>() {
        Ok(r) => Some(r),
        Err(e) => {
            faults.push(FieldError::new("role", e));
            None
        },
    };
    let sex = match form.sex.parse::<Gender>() {
        Ok(g) => Some(g),
        Err(e) => {
            faults.push(FieldError::new("sex", e));
            None
        },
    };

    let birth_date = match form.birth_date.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => match parse_birth_date(s) {
            Ok(d) => Some(d),
            Err(f) => {
                faults.push(f);
                None
            },
        },
    };

    if faults.is_empty() {
        // A failed parse pushes a fault, so both are Some here.
        Ok((role.unwrap(), sex.unwrap(), birth_date))
    } else {
        Err(faults)
    }
}

/// Turn a patch form into a `UserPatch`, validating the typed fields.
fn patch_from_form(form: UserPatchForm) -> Result<UserPatch, Vec<FieldError>> {
    let mut faults: Vec<FieldError> = Vec::new();

    let role = match none_if_blank(form.role) {
        None => None,
        Some(s) => match s.parse::<Role>() {
            Ok(r) => Some(r),
            Err(e) => {
                faults.push(FieldError::new("role", e));
                None
            },
        },
    };
    let sex = match none_if_blank(form.sex) {
        None => None,
        Some(s) => match s.parse::<Gender>() {
            Ok(g) => Some(g),
            Err(e) => {
                faults.push(FieldError::new("sex", e));
                None
            },
        },
    };
    let birth_date = match none_if_blank(form.birth_date) {
        None => None,
        Some(s) => match parse_birth_date(&s) {
            Ok(d) => Some(d),
            Err(f) => {
                faults.push(f);
                None
            },
        },
    };

    if let Some(ref email) = form.email {
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {},
            _ => {
                faults.push(FieldError::new(
                    "email",
                    format!("{:?} is not a plausible email address.", email),
                ));
            },
        }
    }

    if !faults.is_empty() {
        return Err(faults);
    }

    Ok(UserPatch {
        uname: none_if_blank(form.uname),
        first_name: none_if_blank(form.first_name),
        last_name: none_if_blank(form.last_name),
        email: form.email,
        phone: none_if_blank(form.phone),
        address: none_if_blank(form.address),
        role,
        sex,
        birth_date,
    })
}

pub fn user_json(u: &User) -> serde_json::Value {
    use time::format_description::well_known::Rfc3339;

    json!({
        "id": &u.id,
        "uname": &u.uname,
        "first_name": &u.first_name,
        "last_name": &u.last_name,
        "email": &u.email,
        "phone": &u.phone,
        "address": &u.address,
        "role": u.role.to_string(),
        "sex": u.sex.to_string(),
        "birth_date": u.birth_date
            .and_then(|d| d.format(DATE_FMT).ok()),
        "created_at": u.created_at.format(&Rfc3339).ok(),
        "updated_at": u.updated_at.format(&Rfc3339).ok(),
    })
}

/// Cache keys come from the normalized query, not the raw parameters,
/// so every spelling of the same page shares one rendering.
fn list_cache_key(q: &UserQuery) -> String {
    format!(
        "/users?query={}&page={}&role={}",
        &q.search,
        q.page.page(),
        q.role.map(|r| r.to_string()).unwrap_or_default(),
    )
}

/**
`GET /users?query=&page=&role=`

One page of users plus the page-count footer value. Successful renders
are cached in `Glob` until the next user mutation.
*/
pub async fn list_users(
    Query(params): Query<UserListParams>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("list_users( {:?} ) called.", &params);

    let role = match params.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => match s.parse::<Role>() {
            Ok(r) => Some(r),
            Err(e) => {
                return Fault::Validation(vec![FieldError::new("role", e)])
                    .into_response();
            },
        },
    };

    let q = UserQuery {
        search: params.query.as_deref().unwrap_or("").trim().to_owned(),
        role,
        page: Pagination::new(params.page.unwrap_or(1)),
    };

    let key = list_cache_key(&q);
    {
        let glob = glob.read().await;
        if let Some(body) = glob.cached_view(&key) {
            log::trace!("    ...serving cached view {:?}.", &key);
            return json_ok_raw(body.to_owned());
        }
    }

    let (users, total) = {
        let glob = glob.read().await;
        match glob.store().list_users(&q).await {
            Ok(page) => page,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };

    let body = json!({
        "rows": users.iter().map(user_json).collect::<Vec<_>>(),
        "total": total,
        "page": q.page.page(),
        "pages": n_pages(total),
    }).to_string();

    glob.write().await.cache_view(key, body.clone());
    json_ok_raw(body)
}

/// `GET /users/:id`
pub async fn get_user(
    Path(id): Path<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("get_user( {:?} ) called.", &id);

    let glob = glob.read().await;
    match glob.store().get_user(&id).await {
        Ok(Some(u)) => json_ok(user_json(&u)),
        Ok(None) => Fault::NotFound(format!("user {:?}", &id)).into_response(),
        Err(e) => Fault::Storage(e).into_response(),
    }
}

/**
`POST /users`

Creates a user from form data and bounces back to the list view. The
caller identity is required before anything touches the store.
*/
pub async fn create_user(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<UserForm>,
) -> Response {
    log::trace!("create_user( {:?} ) called.", &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let (role, sex, birth_date) = match validate_new_user(&form) {
        Ok(typed) => typed,
        Err(faults) => { return Fault::Validation(faults).into_response(); },
    };

    let placeholder = {
        glob.read().await.webhook_placeholder_credential.clone()
    };
    let nu = NewUser {
        id: Uuid::new_v4().to_string(),
        uname: none_if_blank(form.uname)
            .unwrap_or_else(|| uname_from_email(&form.email)),
        first_name: form.first_name.trim().to_owned(),
        last_name: form.last_name.trim().to_owned(),
        email: form.email.trim().to_owned(),
        phone: none_if_blank(form.phone),
        address: none_if_blank(form.address),
        role,
        sex,
        birth_date,
        credential: placeholder,
    };

    {
        let glob = glob.read().await;
        if let Err(e) = glob.store().insert_user(&nu).await {
            return Fault::Storage(e).into_response();
        }
    }

    log::info!("User {:?} created by {:?}.", &nu.uname, &caller);
    glob.write().await.invalidate_views("/users");
    Redirect::to("/users").into_response()
}

/// `PUT /users/:id`: partial patch; absent fields are left untouched.
pub async fn update_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<UserPatchForm>,
) -> Response {
    log::trace!("update_user( {:?}, {:?} ) called.", &id, &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let patch = match patch_from_form(form) {
        Ok(p) => p,
        Err(faults) => { return Fault::Validation(faults).into_response(); },
    };

    let n = {
        let glob = glob.read().await;
        match glob.store().update_user(&id, &patch).await {
            Ok(n) => n,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };
    if n == 0 {
        return Fault::NotFound(format!("user {:?}", &id)).into_response();
    }

    log::info!("User {:?} updated by {:?}.", &id, &caller);
    glob.write().await.invalidate_views("/users");
    Redirect::to("/users").into_response()
}

/// `DELETE /users/:id`
pub async fn delete_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("delete_user( {:?} ) called.", &id);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let n = {
        let glob = glob.read().await;
        match glob.store().delete_user(&id).await {
            Ok(n) => n,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };
    if n == 0 {
        return Fault::NotFound(format!("user {:?}", &id)).into_response();
    }

    log::info!("User {:?} deleted by {:?}.", &id, &caller);
    glob.write().await.invalidate_views("/users");
    Redirect::to("/users").into_response()
}

/// `GET /users/:id/parents`
pub async fn list_parents(
    Path(id): Path<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("list_parents( {:?} ) called.", &id);

    let glob = glob.read().await;
    match glob.store().get_user(&id).await {
        Ok(Some(_)) => {},
        Ok(None) => {
            return Fault::NotFound(format!("user {:?}", &id)).into_response();
        },
        Err(e) => { return Fault::Storage(e).into_response(); },
    }

    match glob.store().parents_of(&id).await {
        Ok(parents) => json_ok(json!({
            "rows": parents.iter().map(user_json).collect::<Vec<_>>(),
        })),
        Err(e) => Fault::Storage(e).into_response(),
    }
}

/// `POST /users/:id/parents`: link an existing user as a parent.
pub async fn link_parent(
    Path(id): Path<String>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<ParentForm>,
) -> Response {
    log::trace!("link_parent( {:?}, {:?} ) called.", &id, &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    {
        let glob = glob.read().await;
        let (student_res, parent_res) = tokio::join!(
            glob.store().get_user(&id),
            glob.store().get_user(&form.parent),
        );

        match student_res {
            Ok(Some(_)) => {},
            Ok(None) => {
                return Fault::NotFound(format!("user {:?}", &id)).into_response();
            },
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
        match parent_res {
            Ok(Some(_)) => {},
            Ok(None) => {
                return Fault::NotFound(format!("user {:?}", &form.parent))
                    .into_response();
            },
            Err(e) => { return Fault::Storage(e).into_response(); },
        }

        if let Err(e) = glob.store().link_parent(&id, &form.parent).await {
            return Fault::Storage(e).into_response();
        }
    }

    log::info!(
        "Parent {:?} linked to student {:?} by {:?}.",
        &form.parent, &id, &caller
    );
    glob.write().await.invalidate_views("/users");
    Redirect::to(&format!("/users/{}/parents", &id)).into_response()
}

/// `DELETE /users/:id/parents/:parent`
pub async fn unlink_parent(
    Path((id, parent)): Path<(String, String)>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("unlink_parent( {:?}, {:?} ) called.", &id, &parent);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let n = {
        let glob = glob.read().await;
        match glob.store().unlink_parent(&id, &parent).await {
            Ok(n) => n,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };
    if n == 0 {
        return Fault::NotFound(
            format!("parent link {:?} -> {:?}", &parent, &id)
        ).into_response();
    }

    log::info!(
        "Parent {:?} unlinked from student {:?} by {:?}.",
        &parent, &id, &caller
    );
    glob.write().await.invalidate_views("/users");
    Redirect::to(&format!("/users/{}/parents", &id)).into_response()
}
