/*!
User records and the enumerations that type them.
*/
use time::{Date, OffsetDateTime};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Role {
    Student,
    Teacher,
    Parent,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Parent  => "Parent",
            Role::Admin   => "Admin",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Student" => Ok(Role::Student),
            "Teacher" => Ok(Role::Teacher),
            "Parent"  => Ok(Role::Parent),
            "Admin"   => Ok(Role::Admin),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Gender::Male   => "Male",
            Gender::Female => "Female",
            Gender::Other  => "Other",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Male"   => Ok(Gender::Male),
            "Female" => Ok(Gender::Female),
            "Other"  => Ok(Gender::Other),
            _ => Err(format!("{:?} is not a valid Gender.", s)),
        }
    }
}

/// A user row as stored, regardless of role.
#[derive(Clone, Debug)]
pub struct User {
    pub id: String,
    pub uname: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub sex: Gender,
    pub birth_date: Option<Date>,
    /// Opaque placeholder; real credentials live with the identity provider.
    pub credential: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Everything required to insert a user. Timestamps are assigned by the
/// database at insert time.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub id: String,
    pub uname: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub sex: Gender,
    pub birth_date: Option<Date>,
    pub credential: String,
}

/// A partial update. `None` fields are left untouched; `updated_at` is
/// bumped on every applied patch and `created_at` is never written.
#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub uname: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: Option<Role>,
    pub sex: Option<Gender>,
    pub birth_date: Option<Date>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.uname.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.address.is_none()
            && self.role.is_none()
            && self.sex.is_none()
            && self.birth_date.is_none()
    }
}

/**
Derive a display username from an email address when none is supplied:
the local part, up to the first `@`.

An address with no `@` (which validation should have rejected anyway)
derives to the whole string rather than failing.
*/
pub fn uname_from_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, _)) => local.to_owned(),
        None => email.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn roles_round_trip() {
        ensure_logging();
        for role in [Role::Student, Role::Teacher, Role::Parent, Role::Admin] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("Principal".parse::<Role>().is_err());
        assert!("student".parse::<Role>().is_err());
    }

    #[test]
    fn genders_round_trip() {
        ensure_logging();
        for sex in [Gender::Male, Gender::Female, Gender::Other] {
            let parsed: Gender = sex.to_string().parse().unwrap();
            assert_eq!(parsed, sex);
        }
        assert!("".parse::<Gender>().is_err());
    }

    #[test]
    fn unames_derive_from_local_part() {
        ensure_logging();
        assert_eq!(uname_from_email("a@b.com"), "a");
        assert_eq!(uname_from_email("marie.dupont@ecole.example"), "marie.dupont");
        assert_eq!(uname_from_email("odd@multiple@ats"), "odd");
        assert_eq!(uname_from_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn empty_patch_detected() {
        ensure_logging();
        assert!(UserPatch::default().is_empty());

        let p = UserPatch {
            phone: Some("555-0100".to_owned()),
            ..UserPatch::default()
        };
        assert!(!p.is_empty());
    }
}
