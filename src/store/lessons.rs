/*!
`Store` methods for the `lessons` and `subjects` tables.

Lesson list reads search across the lesson title, its content, and the
name of the referenced subject, so the page query always joins
`subjects`.
*/
use tokio_postgres::{Row, types::ToSql};

use super::{DbError, Store};
use crate::lesson::{Lesson, LessonPatch, NewLesson, Subject};
use crate::page::Pagination;

/// Parameters of a lesson list read.
#[derive(Clone, Debug, Default)]
pub struct LessonQuery {
    pub search: String,
    pub page: Pagination,
}

const LESSON_COLUMNS: &str =
    "l.id, l.title, l.content, l.subject, s.name AS subject_name, l.created_at";

fn lesson_from_row(row: &Row) -> Result<Lesson, DbError> {
    Ok(Lesson {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        subject: row.try_get("subject")?,
        subject_name: row.try_get("subject_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn subject_from_row(row: &Row) -> Result<Subject, DbError> {
    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

/// Build the `WHERE` clause for a lesson list read; same contract as the
/// user builder: lowercased `ILIKE` fan-out, empty needle matches all.
fn lesson_where_clause(search: &str) -> (String, Vec<String>) {
    let needle = search.trim();
    if needle.is_empty() {
        return (String::new(), Vec::new());
    }

    let params = vec![format!("%{}%", needle.to_lowercase())];
    let clause =
        "WHERE (l.title ILIKE $1 OR l.content ILIKE $1 OR s.name ILIKE $1)".to_owned();
    (clause, params)
}

impl Store {
    /// One page of lessons matching `q`, plus the total match count.
    pub async fn list_lessons(&self, q: &LessonQuery) -> Result<(Vec<Lesson>, i64), DbError> {
        log::trace!("Store::list_lessons( {:?} ) called.", q);

        let (clause, params) = lesson_where_clause(&q.search);
        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let rows_sql = format!(
            "SELECT {} FROM lessons l JOIN subjects s ON l.subject = s.id
                {} ORDER BY l.created_at DESC, l.id DESC LIMIT {} OFFSET {}",
            LESSON_COLUMNS, &clause, q.page.limit(), q.page.offset()
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM lessons l JOIN subjects s ON l.subject = s.id {}",
            &clause
        );

        let client = self.connect().await?;
        let (rows_res, count_res) = tokio::join!(
            client.query(rows_sql.as_str(), &param_refs),
            client.query_one(count_sql.as_str(), &param_refs),
        );

        let rows = rows_res.map_err(|e| DbError::from(e)
            .annotate("Error reading lesson page"))?;
        let total: i64 = count_res.map_err(|e| DbError::from(e)
            .annotate("Error counting lessons"))?
            .try_get(0)?;

        let lessons = rows.iter()
            .map(lesson_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        log::trace!(
            "    ...list_lessons() returns {} of {} lessons.",
            lessons.len(), &total
        );
        Ok((lessons, total))
    }

    pub async fn get_lesson(&self, id: i64) -> Result<Option<Lesson>, DbError> {
        log::trace!("Store::get_lesson( {} ) called.", id);

        let client = self.connect().await?;
        let sql = format!(
            "SELECT {} FROM lessons l JOIN subjects s ON l.subject = s.id
                WHERE l.id = $1",
            LESSON_COLUMNS
        );
        match client.query_opt(sql.as_str(), &[&id]).await? {
            Some(row) => Ok(Some(lesson_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert a lesson and return its generated id. The referenced subject
    /// must already exist; callers check that before inserting.
    pub async fn insert_lesson(&self, nl: &NewLesson) -> Result<i64, DbError> {
        log::trace!(
            "Store::insert_lesson( {:?} / subject {} ) called.",
            &nl.title, &nl.subject
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO lessons (title, content, subject)
                VALUES ($1, $2, $3)
                RETURNING id",
            &[&nl.title, &nl.content, &nl.subject]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error inserting lesson"))?;

        let id: i64 = row.try_get(0)?;
        log::trace!("Inserted lesson {:?} as id {}.", &nl.title, &id);
        Ok(id)
    }

    /// Apply the supplied fields of `patch` to lesson `id`. Returns rows
    /// affected; zero means no such lesson.
    pub async fn update_lesson(&self, id: i64, patch: &LessonPatch) -> Result<u64, DbError> {
        log::trace!("Store::update_lesson( {}, {:?} ) called.", id, patch);

        if patch.is_empty() {
            // Nothing to apply; report whether the row exists at all.
            return match self.get_lesson(id).await? {
                Some(_) => Ok(1),
                None => Ok(0),
            };
        }

        let mut assignments: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(ref v) = patch.title {
            params.push(Box::new(v.clone()));
            assignments.push(format!("title = ${}", params.len()));
        }
        if let Some(ref v) = patch.content {
            params.push(Box::new(v.clone()));
            assignments.push(format!("content = ${}", params.len()));
        }
        if let Some(subject) = patch.subject {
            params.push(Box::new(subject));
            assignments.push(format!("subject = ${}", params.len()));
        }

        params.push(Box::new(id));
        let sql = format!(
            "UPDATE lessons SET {} WHERE id = ${}",
            assignments.join(", "), params.len()
        );

        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.connect().await?;
        let n = client.execute(sql.as_str(), &param_refs).await
            .map_err(|e| DbError::from(e)
                .annotate("Error updating lesson"))?;

        log::trace!("    ...update_lesson() affected {} row(s).", &n);
        Ok(n)
    }

    /// Hard-delete lesson `id`. Returns rows affected; zero means no such
    /// lesson.
    pub async fn delete_lesson(&self, id: i64) -> Result<u64, DbError> {
        log::trace!("Store::delete_lesson( {} ) called.", id);

        let client = self.connect().await?;
        let n = client.execute(
            "DELETE FROM lessons WHERE id = $1",
            &[&id]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error deleting lesson"))?;

        log::trace!("    ...delete_lesson() affected {} row(s).", &n);
        Ok(n)
    }

    /// All subjects, alphabetically. Unpaginated; this feeds the lesson
    /// form's subject picker.
    pub async fn list_subjects(&self) -> Result<Vec<Subject>, DbError> {
        log::trace!("Store::list_subjects() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT id, name FROM subjects ORDER BY name",
            &[]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error reading subjects"))?;

        rows.iter().map(subject_from_row).collect()
    }

    pub async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DbError> {
        log::trace!("Store::get_subject( {} ) called.", id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT id, name FROM subjects WHERE id = $1",
            &[&id]
        ).await? {
            Some(row) => Ok(Some(subject_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert a subject and return its generated id.
    pub async fn insert_subject(&self, name: &str) -> Result<i64, DbError> {
        log::trace!("Store::insert_subject( {:?} ) called.", name);

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO subjects (name) VALUES ($1) RETURNING id",
            &[&name]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error inserting subject"))?;

        let id: i64 = row.try_get(0)?;
        log::trace!("Inserted subject {:?} as id {}.", name, &id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    #[test]
    fn empty_search_builds_no_predicate() {
        ensure_logging();
        let (clause, params) = lesson_where_clause("");
        assert_eq!(clause, "");
        assert!(params.is_empty());
    }

    #[test]
    fn search_spans_title_content_and_subject_name() {
        ensure_logging();
        let (clause, params) = lesson_where_clause("Fractions");
        assert_eq!(
            clause,
            "WHERE (l.title ILIKE $1 OR l.content ILIKE $1 OR s.name ILIKE $1)"
        );
        assert_eq!(params, vec!["%fractions%".to_owned()]);

        assert_eq!(
            lesson_where_clause("FRACTIONS"),
            lesson_where_clause("fractions"),
        );
    }

    // Live tests; see `store::tests` for the required local Postgres setup.

    async fn fresh_store() -> Store {
        let db = Store::new(crate::store::tests::TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
        db.ensure_db_schema().await.unwrap();
        db
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn seven_lessons_page_as_the_contract_says() {
        ensure_logging();
        let db = fresh_store().await;

        let maths = db.insert_subject("Maths").await.unwrap();
        for i in 0..7 {
            let nl = NewLesson {
                title: format!("Lesson {}", i),
                content: "Content.".to_owned(),
                subject: maths,
            };
            db.insert_lesson(&nl).await.unwrap();
        }

        let (page1, total) = db.list_lessons(&LessonQuery::default()).await.unwrap();
        assert_eq!(total, 7);
        assert_eq!(page1.len(), 6);
        assert_eq!(crate::page::n_pages(total), 2);

        // Newest first.
        assert!(page1.windows(2).all(|w| {
            w[0].created_at > w[1].created_at
                || (w[0].created_at == w[1].created_at && w[0].id > w[1].id)
        }));

        let q2 = LessonQuery { page: Pagination::new(2), ..LessonQuery::default() };
        let (page2, _) = db.list_lessons(&q2).await.unwrap();
        assert_eq!(page2.len(), 1);

        let q3 = LessonQuery { page: Pagination::new(3), ..LessonQuery::default() };
        let (page3, _) = db.list_lessons(&q3).await.unwrap();
        assert!(page3.is_empty());

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn lesson_search_reaches_subject_names() {
        ensure_logging();
        let db = fresh_store().await;

        let maths = db.insert_subject("Mathématiques").await.unwrap();
        let history = db.insert_subject("Histoire").await.unwrap();
        db.insert_lesson(&NewLesson {
            title: "Équations".to_owned(),
            content: "ax + b = 0".to_owned(),
            subject: maths,
        }).await.unwrap();
        db.insert_lesson(&NewLesson {
            title: "Révolution".to_owned(),
            content: "1789.".to_owned(),
            subject: history,
        }).await.unwrap();

        let q = LessonQuery { search: "histoire".to_owned(), ..LessonQuery::default() };
        let (hits, total) = db.list_lessons(&q).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].title, "Révolution");
        assert_eq!(hits[0].subject_name, "Histoire");

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn lesson_update_and_delete_report_row_counts() {
        ensure_logging();
        let db = fresh_store().await;

        let subject = db.insert_subject("Chimie").await.unwrap();
        let id = db.insert_lesson(&NewLesson {
            title: "Atomes".to_owned(),
            content: "Protons.".to_owned(),
            subject,
        }).await.unwrap();

        let patch = LessonPatch {
            content: Some("Protons et neutrons.".to_owned()),
            ..LessonPatch::default()
        };
        assert_eq!(db.update_lesson(id, &patch).await.unwrap(), 1);
        assert_eq!(db.update_lesson(id + 1, &patch).await.unwrap(), 0);

        // An empty patch writes nothing but still reports existence.
        assert_eq!(db.update_lesson(id, &LessonPatch::default()).await.unwrap(), 1);
        assert_eq!(db.update_lesson(id + 1, &LessonPatch::default()).await.unwrap(), 0);

        let l = db.get_lesson(id).await.unwrap().unwrap();
        assert_eq!(l.content, "Protons et neutrons.");

        assert_eq!(db.delete_lesson(id).await.unwrap(), 1);
        assert_eq!(db.delete_lesson(id).await.unwrap(), 0);

        db.nuke_database().await.unwrap();
    }
}
