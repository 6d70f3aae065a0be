use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Account document stored in the `students` collection. Admin accounts
/// live in the same collection, distinguished by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: AccountRole,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::bson_datetime_as_chrono_option"
    )]
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    #[default]
    Student,
    Admin,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Student => "student",
            AccountRole::Admin => "admin",
        }
    }
}

/// Profile returned to clients (no credential material).
#[derive(Debug, Serialize)]
pub struct StudentProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: AccountRole,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub date_of_birth: Option<String>,
    pub nationality: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<Student> for StudentProfile {
    fn from(student: Student) -> Self {
        StudentProfile {
            id: student.id.map(|id| id.to_hex()).unwrap_or_default(),
            full_name: student.full_name,
            email: student.email,
            role: student.role,
            email_verified: student.email_verified,
            phone_number: student.phone_number,
            country_code: student.country_code,
            state: student.state,
            date_of_birth: student.date_of_birth,
            nationality: student.nationality,
            created_at: student.created_at,
            last_login_at: student.last_login_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub full_name: String,
}

/// Admin signup carries the shared provisioning code checked against
/// configuration.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminRegisterRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub account: RegisterRequest,

    #[validate(length(min = 1, message = "signup_code is required"))]
    pub signup_code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

/// Profile update; only the listed fields are writable.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub date_of_birth: Option<String>,
    pub nationality: Option<String>,
}

impl UpdateProfileRequest {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.phone_number.is_none()
            && self.country_code.is_none()
            && self.state.is_none()
            && self.date_of_birth.is_none()
            && self.nationality.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub student: StudentProfile,
}
