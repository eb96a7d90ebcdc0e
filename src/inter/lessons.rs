/*!
Handlers for the lesson list view, lesson mutations, and subjects.
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
use tokio::sync::RwLock;

use crate::{
    config::Glob,
    lesson::{Lesson, LessonPatch, NewLesson},
    page::{n_pages, Pagination},
    store::lessons::LessonQuery,
};
use super::{json_ok, json_ok_raw, resolve_caller, Fault, FieldError};

/// Query parameters of the lesson list view.
#[derive(Debug, Deserialize)]
pub struct LessonListParams {
    pub query: Option<String>,
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LessonForm {
    pub title: String,
    pub content: String,
    pub subject: i64,
}

/// Partial lesson patch form; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct LessonPatchForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub subject: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubjectForm {
    pub name: String,
}

fn validate_lesson(form: &LessonForm) -> Result<(), Vec<FieldError>> {
    let mut faults: Vec<FieldError> = Vec::new();

    if form.title.trim().is_empty() {
        faults.push(FieldError::new("title", "Title is required."));
    }
    if form.content.trim().is_empty() {
        faults.push(FieldError::new("content", "Content is required."));
    }

    if faults.is_empty() { Ok(()) } else { Err(faults) }
}

pub fn lesson_json(l: &Lesson) -> serde_json::Value {
    use time::format_description::well_known::Rfc3339;

    json!({
        "id": l.id,
        "title": &l.title,
        "content": &l.content,
        "subject": l.subject,
        "subject_name": &l.subject_name,
        "created_at": l.created_at.format(&Rfc3339).ok(),
    })
}

/// Cache keys come from the normalized query, not the raw parameters,
/// so every spelling of the same page shares one rendering.
fn list_cache_key(q: &LessonQuery) -> String {
    format!("/lessons?query={}&page={}", &q.search, q.page.page())
}

/**
`GET /lessons?query=&page=`

One page of lessons (with their subject names) plus the page-count
footer value. Successful renders are cached in `Glob` until the next
lesson or subject mutation.
*/
pub async fn list_lessons(
    Query(params): Query<LessonListParams>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("list_lessons( {:?} ) called.", &params);

    let q = LessonQuery {
        search: params.query.as_deref().unwrap_or("").trim().to_owned(),
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

    let (lessons, total) = {
        let glob = glob.read().await;
        match glob.store().list_lessons(&q).await {
            Ok(page) => page,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };

    let body = json!({
        "rows": lessons.iter().map(lesson_json).collect::<Vec<_>>(),
        "total": total,
        "page": q.page.page(),
        "pages": n_pages(total),
    }).to_string();

    glob.write().await.cache_view(key, body.clone());
    json_ok_raw(body)
}

/// `GET /lessons/:id`
pub async fn get_lesson(
    Path(id): Path<i64>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("get_lesson( {} ) called.", &id);

    let glob = glob.read().await;
    match glob.store().get_lesson(id).await {
        Ok(Some(l)) => json_ok(lesson_json(&l)),
        Ok(None) => Fault::NotFound(format!("lesson {}", &id)).into_response(),
        Err(e) => Fault::Storage(e).into_response(),
    }
}

/**
`POST /lessons`

The referenced subject must exist; a dangling reference is a `NotFound`,
not a storage fault.
*/
pub async fn create_lesson(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<LessonForm>,
) -> Response {
    log::trace!("create_lesson( {:?} ) called.", &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    if let Err(faults) = validate_lesson(&form) {
        return Fault::Validation(faults).into_response();
    }

    {
        let glob = glob.read().await;
        match glob.store().get_subject(form.subject).await {
            Ok(Some(_)) => {},
            Ok(None) => {
                return Fault::NotFound(format!("subject {}", form.subject))
                    .into_response();
            },
            Err(e) => { return Fault::Storage(e).into_response(); },
        }

        let nl = NewLesson {
            title: form.title.trim().to_owned(),
            content: form.content.trim().to_owned(),
            subject: form.subject,
        };
        if let Err(e) = glob.store().insert_lesson(&nl).await {
            return Fault::Storage(e).into_response();
        }
    }

    log::info!("Lesson {:?} created by {:?}.", &form.title, &caller);
    glob.write().await.invalidate_views("/lessons");
    Redirect::to("/lessons").into_response()
}

/// `PUT /lessons/:id`: partial patch; absent fields are left untouched.
pub async fn update_lesson(
    Path(id): Path<i64>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<LessonPatchForm>,
) -> Response {
    log::trace!("update_lesson( {}, {:?} ) called.", &id, &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let patch = LessonPatch {
        title: form.title.and_then(|s| {
            let s = s.trim().to_owned();
            if s.is_empty() { None } else { Some(s) }
        }),
        content: form.content,
        subject: form.subject,
    };

    let n = {
        let glob = glob.read().await;

        if let Some(subject) = patch.subject {
            match glob.store().get_subject(subject).await {
                Ok(Some(_)) => {},
                Ok(None) => {
                    return Fault::NotFound(format!("subject {}", subject))
                        .into_response();
                },
                Err(e) => { return Fault::Storage(e).into_response(); },
            }
        }

        match glob.store().update_lesson(id, &patch).await {
            Ok(n) => n,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };
    if n == 0 {
        return Fault::NotFound(format!("lesson {}", &id)).into_response();
    }

    log::info!("Lesson {} updated by {:?}.", &id, &caller);
    glob.write().await.invalidate_views("/lessons");
    Redirect::to("/lessons").into_response()
}

/// `DELETE /lessons/:id`
pub async fn delete_lesson(
    Path(id): Path<i64>,
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("delete_lesson( {} ) called.", &id);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let n = {
        let glob = glob.read().await;
        match glob.store().delete_lesson(id).await {
            Ok(n) => n,
            Err(e) => { return Fault::Storage(e).into_response(); },
        }
    };
    if n == 0 {
        return Fault::NotFound(format!("lesson {}", &id)).into_response();
    }

    log::info!("Lesson {} deleted by {:?}.", &id, &caller);
    glob.write().await.invalidate_views("/lessons");
    Redirect::to("/lessons").into_response()
}

/// `GET /subjects`: unpaginated; feeds the lesson form's subject picker.
pub async fn list_subjects(
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("list_subjects() called.");

    let glob = glob.read().await;
    match glob.store().list_subjects().await {
        Ok(subjects) => json_ok(json!({
            "rows": subjects.iter().map(|s| json!({
                "id": s.id,
                "name": &s.name,
            })).collect::<Vec<_>>(),
        })),
        Err(e) => Fault::Storage(e).into_response(),
    }
}

/// `POST /subjects`
pub async fn create_subject(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<SubjectForm>,
) -> Response {
    log::trace!("create_subject( {:?} ) called.", &form);

    let caller = match resolve_caller(&headers) {
        Ok(c) => c,
        Err(f) => { return f.into_response(); },
    };

    let name = form.name.trim().to_owned();
    if name.is_empty() {
        return Fault::Validation(vec![
            FieldError::new("name", "Name is required."),
        ]).into_response();
    }

    {
        let glob = glob.read().await;
        if let Err(e) = glob.store().insert_subject(&name).await {
            return Fault::Storage(e).into_response();
        }
    }

    log::info!("Subject {:?} created by {:?}.", &name, &caller);
    // Lesson list rows carry subject names, so those renders are stale too.
    glob.write().await.invalidate_views("/lessons");
    Redirect::to("/subjects").into_response()
}
