//! Identity data delivered with the custom authentication response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KEY_FACULTY_ID: &str = "faculty_id";
pub const KEY_FACULTY_NAME: &str = "faculty_name";
pub const KEY_FULL_NAME: &str = "full_name";
pub const KEY_IN_GAME_NICKNAME: &str = "in_game_nickname";
pub const KEY_UNIVERSITY_NAME: &str = "university_name";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_USER_UNIV_ROLE: &str = "user_univ_role";
pub const KEY_UNIVERSITY_ID: &str = "user_university_id";
pub const KEY_GENDER: &str = "gender";
pub const KEY_AUTH_COOKIE: &str = "auth_cookie";

/// Reasons an authentication response cannot be turned into a profile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("authentication response is missing `{0}`")]
    MissingKey(&'static str),

    #[error("`{key}` should be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("unknown university role `{0}`")]
    UnknownRole(String),

    #[error("unknown gender `{0}`")]
    UnknownGender(String),
}

/// Role of a user within their university.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniversityRole {
    Student,
    Lecturer,
    Administrator,
}

impl UniversityRole {
    /// Accepts the labels the authentication service sends (`Mahasiswa`,
    /// `Dosen`, `Administrator`) as well as the English names.
    pub fn parse(label: &str) -> Result<Self, ProfileError> {
        match label {
            "Mahasiswa" | "Student" => Ok(Self::Student),
            "Dosen" | "Lecturer" => Ok(Self::Lecturer),
            "Administrator" => Ok(Self::Administrator),
            other => Err(ProfileError::UnknownRole(other.to_string())),
        }
    }

    /// Lecturers and administrators may create rooms and run meetings.
    pub fn is_staff(self) -> bool {
        !matches!(self, Self::Student)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(label: &str) -> Result<Self, ProfileError> {
        match label {
            "Male" => Ok(Self::Male),
            "Female" => Ok(Self::Female),
            other => Err(ProfileError::UnknownGender(other.to_string())),
        }
    }
}

/// Who is logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub faculty_id: i64,
    pub faculty_name: String,
    pub full_name: String,
    pub in_game_nickname: String,
    pub university_name: String,
    pub user_id: String,
    pub role: UniversityRole,
    pub university_id: i64,
    pub gender: Gender,
}

/// Web session cookie kept for authenticated requests.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    cookie: String,
}

impl AuthSession {
    pub fn cookie(&self) -> &str {
        &self.cookie
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession").finish_non_exhaustive()
    }
}

impl UserProfile {
    /// Parses the key/value map returned by the authentication service.
    pub fn from_auth_response(
        data: &Map<String, Value>,
    ) -> Result<(UserProfile, AuthSession), ProfileError> {
        let profile = UserProfile {
            faculty_id: integer(data, KEY_FACULTY_ID)?,
            faculty_name: text(data, KEY_FACULTY_NAME)?,
            full_name: text(data, KEY_FULL_NAME)?,
            in_game_nickname: text(data, KEY_IN_GAME_NICKNAME)?,
            university_name: text(data, KEY_UNIVERSITY_NAME)?,
            user_id: text(data, KEY_USER_ID)?,
            role: UniversityRole::parse(&text(data, KEY_USER_UNIV_ROLE)?)?,
            university_id: integer(data, KEY_UNIVERSITY_ID)?,
            gender: Gender::parse(&text(data, KEY_GENDER)?)?,
        };
        let session = AuthSession {
            cookie: text(data, KEY_AUTH_COOKIE)?,
        };
        Ok((profile, session))
    }

    /// Name shown above the avatar.
    pub fn display_name(&self) -> &str {
        if self.in_game_nickname.is_empty() {
            &self.full_name
        } else {
            &self.in_game_nickname
        }
    }
}

fn field<'a>(data: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, ProfileError> {
    data.get(key).ok_or(ProfileError::MissingKey(key))
}

/// Strings are taken as-is, numbers are stringified.
fn text(data: &Map<String, Value>, key: &'static str) -> Result<String, ProfileError> {
    match field(data, key)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ProfileError::WrongType {
            key,
            expected: "a string",
        }),
    }
}

/// Integers, or strings holding one.
fn integer(data: &Map<String, Value>, key: &'static str) -> Result<i64, ProfileError> {
    let wrong = ProfileError::WrongType {
        key,
        expected: "an integer",
    };
    match field(data, key)? {
        Value::Number(n) => n.as_i64().ok_or(wrong),
        Value::String(s) => s.trim().parse().map_err(|_| wrong),
        _ => Err(wrong),
    }
}
