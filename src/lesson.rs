/*!
Lesson and subject records.
*/
use time::OffsetDateTime;

/// A subject, referenced by zero or more lessons.
#[derive(Clone, Debug)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

/// A lesson row, carrying the name of the subject it references.
#[derive(Clone, Debug)]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub subject: i64,
    pub subject_name: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct NewLesson {
    pub title: String,
    pub content: String,
    pub subject: i64,
}

/// Partial lesson update; `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct LessonPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub subject: Option<i64>,
}

impl LessonPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.subject.is_none()
    }
}
