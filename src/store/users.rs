/*!
`Store` methods for the `users` table and the student/parent relation.

List reads go through the filter/paginate query builder: an optional
case-insensitive substring predicate fanned across the text columns,
AND-ed with an optional role equality, ordered newest-first, bounded to
the fixed page size.
*/
use tokio_postgres::{Row, types::ToSql};

use super::{DbError, Store};
use crate::page::Pagination;
use crate::user::{NewUser, Role, User, UserPatch};

/// Parameters of a user list read.
#[derive(Clone, Debug, Default)]
pub struct UserQuery {
    pub search: String,
    pub role: Option<Role>,
    pub page: Pagination,
}

const USER_COLUMNS: &str =
    "id, uname, first_name, last_name, email, phone, address,
     role, sex, birth_date, credential, created_at, updated_at";

fn user_from_row(row: &Row) -> Result<User, DbError> {
    let role_str: &str = row.try_get("role")?;
    let sex_str: &str = row.try_get("sex")?;

    let u = User {
        id: row.try_get("id")?,
        uname: row.try_get("uname")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        role: role_str.parse()?,
        sex: sex_str.parse()?,
        birth_date: row.try_get("birth_date")?,
        credential: row.try_get("credential")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };

    Ok(u)
}

/**
Build the `WHERE` clause and its owned parameters for a user list read.

The search needle is lowercased before it becomes an `ILIKE` pattern, so
any casing of the same needle builds the identical query. An empty (or
all-whitespace) needle contributes no predicate and so matches everything.
*/
fn user_where_clause(search: &str, role: Option<Role>) -> (String, Vec<String>) {
    let mut predicates: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    let needle = search.trim();
    if !needle.is_empty() {
        params.push(format!("%{}%", needle.to_lowercase()));
        let n = params.len();
        predicates.push(format!(
            "(last_name ILIKE ${n} OR first_name ILIKE ${n} OR email ILIKE ${n} OR phone ILIKE ${n})"
        ));
    }

    if let Some(role) = role {
        params.push(role.to_string());
        predicates.push(format!("role = ${}", params.len()));
    }

    if predicates.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", predicates.join(" AND ")), params)
    }
}

impl Store {
    /**
    Return one page of users matching `q`, plus the total match count.

    A page number past the last page comes back as an empty page, not an
    error. Rows and count are fetched concurrently on the same pipelined
    connection.
    */
    pub async fn list_users(&self, q: &UserQuery) -> Result<(Vec<User>, i64), DbError> {
        log::trace!("Store::list_users( {:?} ) called.", q);

        let (clause, params) = user_where_clause(&q.search, q.role);
        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        let rows_sql = format!(
            "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            USER_COLUMNS, &clause, q.page.limit(), q.page.offset()
        );
        let count_sql = format!("SELECT COUNT(*) FROM users {}", &clause);

        let client = self.connect().await?;
        let (rows_res, count_res) = tokio::join!(
            client.query(rows_sql.as_str(), &param_refs),
            client.query_one(count_sql.as_str(), &param_refs),
        );

        let rows = rows_res.map_err(|e| DbError::from(e)
            .annotate("Error reading user page"))?;
        let total: i64 = count_res.map_err(|e| DbError::from(e)
            .annotate("Error counting users"))?
            .try_get(0)?;

        let users = rows.iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        log::trace!(
            "    ...list_users() returns {} of {} users.",
            users.len(), &total
        );
        Ok((users, total))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, DbError> {
        log::trace!("Store::get_user( {:?} ) called.", id);

        let client = self.connect().await?;
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        match client.query_opt(sql.as_str(), &[&id]).await? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_uname(&self, uname: &str) -> Result<Option<User>, DbError> {
        log::trace!("Store::get_user_by_uname( {:?} ) called.", uname);

        let client = self.connect().await?;
        let sql = format!("SELECT {} FROM users WHERE uname = $1", USER_COLUMNS);
        match client.query_opt(sql.as_str(), &[&uname]).await? {
            Some(row) => Ok(Some(user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert a new user. Both timestamps are assigned by the database;
    /// they are not touched again except for `updated_at` on patches.
    pub async fn insert_user(&self, nu: &NewUser) -> Result<(), DbError> {
        log::trace!(
            "Store::insert_user( {:?} / {:?} / {} ) called.",
            &nu.uname, &nu.email, &nu.role
        );

        let client = self.connect().await?;
        client.execute(
            "INSERT INTO users (
                id, uname, first_name, last_name, email,
                phone, address, role, sex, birth_date, credential
            )
            VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10, $11
            )",
            &[
                &nu.id, &nu.uname, &nu.first_name, &nu.last_name, &nu.email,
                &nu.phone, &nu.address, &nu.role.to_string(), &nu.sex.to_string(),
                &nu.birth_date, &nu.credential,
            ]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error inserting user"))?;

        log::trace!("Inserted user {:?} ({}).", &nu.uname, &nu.email);
        Ok(())
    }

    /**
    Apply the supplied fields of `patch` to user `id` and bump
    `updated_at`; everything absent from the patch is left alone.

    Returns the number of rows affected; zero means no such user.
    */
    pub async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<u64, DbError> {
        log::trace!("Store::update_user( {:?}, {:?} ) called.", id, patch);

        if patch.is_empty() {
            // Nothing to apply, not even an updated_at bump; report
            // whether the row exists at all.
            return match self.get_user(id).await? {
                Some(_) => Ok(1),
                None => Ok(0),
            };
        }

        let mut assignments: Vec<String> = vec!["updated_at = now()".to_owned()];
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        fn push(
            column: &str,
            value: Box<dyn ToSql + Sync + Send>,
            assignments: &mut Vec<String>,
            params: &mut Vec<Box<dyn ToSql + Sync + Send>>,
        ) {
            params.push(value);
            assignments.push(format!("{} = ${}", column, params.len()));
        }

        if let Some(ref v) = patch.uname {
            push("uname", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(ref v) = patch.first_name {
            push("first_name", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(ref v) = patch.last_name {
            push("last_name", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(ref v) = patch.email {
            push("email", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(ref v) = patch.phone {
            push("phone", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(ref v) = patch.address {
            push("address", Box::new(v.clone()), &mut assignments, &mut params);
        }
        if let Some(role) = patch.role {
            push("role", Box::new(role.to_string()), &mut assignments, &mut params);
        }
        if let Some(sex) = patch.sex {
            push("sex", Box::new(sex.to_string()), &mut assignments, &mut params);
        }
        if let Some(birth_date) = patch.birth_date {
            push("birth_date", Box::new(birth_date), &mut assignments, &mut params);
        }

        params.push(Box::new(id.to_owned()));
        let sql = format!(
            "UPDATE users SET {} WHERE id = ${}",
            assignments.join(", "), params.len()
        );

        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.connect().await?;
        let n = client.execute(sql.as_str(), &param_refs).await
            .map_err(|e| DbError::from(e)
                .annotate("Error updating user"))?;

        log::trace!("    ...update_user() affected {} row(s).", &n);
        Ok(n)
    }

    /**
    Hard-delete user `id`, clearing its relation rows first.

    Returns the number of user rows deleted; zero means no such user.
    */
    pub async fn delete_user(&self, id: &str) -> Result<u64, DbError> {
        log::trace!("Store::delete_user( {:?} ) called.", id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let params: [&(dyn ToSql + Sync); 1] = [&id];

        let (s_del_res, p_del_res) = tokio::join!(
            t.execute(
                "DELETE FROM student_parents WHERE student = $1",
                &params[..]
            ),
            t.execute(
                "DELETE FROM student_parents WHERE parent = $1",
                &params[..]
            ),
        );

        match s_del_res {
            Err(e) => { return Err(e.into()); },
            Ok(0) => {},
            Ok(n) => { log::trace!("{} parent link(s) of student {} deleted.", &n, id); },
        }
        match p_del_res {
            Err(e) => { return Err(e.into()); },
            Ok(0) => {},
            Ok(n) => { log::trace!("{} student link(s) of parent {} deleted.", &n, id); },
        }

        let n = t.execute(
            "DELETE FROM users WHERE id = $1",
            &[&id]
        ).await?;

        t.commit().await?;
        log::trace!("    ...delete_user() affected {} row(s).", &n);
        Ok(n)
    }

    /// All users linked as parents of student `id`, newest link last.
    pub async fn parents_of(&self, id: &str) -> Result<Vec<User>, DbError> {
        log::trace!("Store::parents_of( {:?} ) called.", id);

        let client = self.connect().await?;
        let sql = format!(
            "SELECT {} FROM users
                JOIN student_parents ON users.id = student_parents.parent
                WHERE student_parents.student = $1
                ORDER BY users.last_name, users.first_name",
            USER_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&id]).await
            .map_err(|e| DbError::from(e)
                .annotate("Error reading parent links"))?;

        rows.iter().map(user_from_row).collect()
    }

    /// Link `parent` to `student`. Linking twice is not an error.
    pub async fn link_parent(&self, student: &str, parent: &str) -> Result<(), DbError> {
        log::trace!("Store::link_parent( {:?}, {:?} ) called.", student, parent);

        let client = self.connect().await?;
        client.execute(
            "INSERT INTO student_parents (student, parent)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING",
            &[&student, &parent]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error inserting parent link"))?;

        Ok(())
    }

    /// Remove a parent link. Returns rows affected; zero means no link.
    pub async fn unlink_parent(&self, student: &str, parent: &str) -> Result<u64, DbError> {
        log::trace!("Store::unlink_parent( {:?}, {:?} ) called.", student, parent);

        let client = self.connect().await?;
        let n = client.execute(
            "DELETE FROM student_parents WHERE student = $1 AND parent = $2",
            &[&student, &parent]
        ).await
            .map_err(|e| DbError::from(e)
                .annotate("Error deleting parent link"))?;

        Ok(n)
    }
}
