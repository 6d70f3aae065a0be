use anyhow::Context;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;
use rand::Rng;
use redis::aio::ConnectionManager;

use crate::error::AppError;
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::student::{
    AccountRole, AuthResponse, LoginRequest, RegisterRequest, Student, StudentProfile,
    UpdateProfileRequest, VerifyOtpRequest,
};
use crate::services::email_service::EmailService;

const OTP_TTL_SECONDS: u64 = 600;
const FAILED_LOGIN_LOCKOUT: u32 = 5;
const FAILED_LOGIN_WINDOW_SECONDS: u64 = 900;

pub struct AuthService {
    mongo: Database,
    redis: ConnectionManager,
    jwt_service: JwtService,
    access_token_ttl_seconds: i64,
}

impl AuthService {
    pub const STUDENTS: &'static str = "students";

    pub fn new(mongo: Database, redis: ConnectionManager, jwt_service: JwtService) -> Self {
        let access_token_ttl_seconds = std::env::var("JWT_ACCESS_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(3600);

        Self {
            mongo,
            redis,
            jwt_service,
            access_token_ttl_seconds,
        }
    }

    fn students(&self) -> mongodb::Collection<Student> {
        self.mongo.collection(Self::STUDENTS)
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AppError> {
        hash(password, DEFAULT_COST)
            .context("Failed to hash password")
            .map_err(AppError::Infrastructure)
    }

    pub fn verify_password(&self, password: &str, hashed: &str) -> Result<bool, AppError> {
        verify(password, hashed)
            .context("Failed to verify password")
            .map_err(AppError::Infrastructure)
    }

    /// Register a student account. A 6-digit verification code is stored
    /// in Redis for ten minutes and emailed to the address.
    pub async fn register(
        &self,
        req: RegisterRequest,
        email_service: Option<&EmailService>,
    ) -> Result<AuthResponse, AppError> {
        self.register_with_role(req, AccountRole::Student, email_service)
            .await
    }

    /// Admin registration behind the signup code check done in the
    /// handler. Admin accounts skip the email verification flow.
    pub async fn register_admin(&self, req: RegisterRequest) -> Result<AuthResponse, AppError> {
        self.register_with_role(req, AccountRole::Admin, None).await
    }

    async fn register_with_role(
        &self,
        req: RegisterRequest,
        role: AccountRole,
        email_service: Option<&EmailService>,
    ) -> Result<AuthResponse, AppError> {
        let students = self.students();

        let existing = students.find_one(doc! { "email": &req.email }).await?;
        if existing.is_some() {
            return Err(AppError::Validation(
                "An account with this email already exists".into(),
            ));
        }

        let password_hash = self.hash_password(&req.password)?;
        let now = Utc::now();
        let student = Student {
            id: None,
            full_name: req.full_name,
            email: req.email.clone(),
            password_hash,
            role,
            email_verified: role == AccountRole::Admin,
            phone_number: None,
            country_code: None,
            state: None,
            date_of_birth: None,
            nationality: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        let insert_result = students.insert_one(&student).await?;
        let student_id = insert_result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AppError::Infrastructure(anyhow::anyhow!("inserted id missing")))?;

        if role == AccountRole::Student {
            let otp = self.issue_otp(&req.email).await?;
            if let Some(service) = email_service {
                if let Err(err) = service
                    .send_otp_email(&req.email, &student.full_name, &otp)
                    .await
                {
                    // Registration stands even when delivery fails; the
                    // client can request a resend.
                    tracing::error!("Failed to send verification email: {:#}", err);
                    crate::metrics::OTP_EMAILS_SENT_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                } else {
                    crate::metrics::OTP_EMAILS_SENT_TOTAL
                        .with_label_values(&["sent"])
                        .inc();
                }
            }
        }

        let access_token = self.generate_access_token(&student_id, role)?;
        let mut student_with_id = student;
        student_with_id.id = Some(student_id);

        tracing::info!(
            student_id = %student_id.to_hex(),
            role = role.as_str(),
            "Account registered"
        );

        Ok(AuthResponse {
            access_token,
            student: StudentProfile::from(student_with_id),
        })
    }

    async fn issue_otp(&self, email: &str) -> Result<String, AppError> {
        let code: u32 = rand::rng().random_range(100_000..1_000_000);
        let otp = code.to_string();

        let mut conn = self.redis.clone();
        redis::cmd("SETEX")
            .arg(format!("otp:signup:{}", email))
            .arg(OTP_TTL_SECONDS)
            .arg(&otp)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(otp)
    }

    pub async fn verify_otp(&self, req: VerifyOtpRequest) -> Result<StudentProfile, AppError> {
        let key = format!("otp:signup:{}", req.email);
        let mut conn = self.redis.clone();

        let stored: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        let stored = stored.ok_or_else(|| {
            AppError::Validation("Verification code expired or never issued".into())
        })?;

        if stored != req.otp {
            return Err(AppError::Validation("Invalid verification code".into()));
        }

        redis::cmd("DEL")
            .arg(&key)
            .query_async::<()>(&mut conn)
            .await?;

        let students = self.students();
        let student = students
            .find_one_and_update(
                doc! { "email": &req.email },
                doc! { "$set": { "email_verified": true } },
            )
            .return_document(mongodb::options::ReturnDocument::After)
            .await?
            .ok_or(AppError::NotFound("Student"))?;

        tracing::info!(email = %req.email, "Email verified");
        Ok(StudentProfile::from(student))
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AppError> {
        if self.is_locked_out(&req.email).await? {
            return Err(AppError::Unauthorized(
                "Too many failed attempts, try again later".into(),
            ));
        }

        let students = self.students();
        let student = students
            .find_one(doc! { "email": &req.email })
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid email or password".into()))?;

        if !self.verify_password(&req.password, &student.password_hash)? {
            let fails = self.record_failed_attempt(&req.email).await?;
            tracing::warn!(email = %req.email, fails, "Failed login attempt");
            return Err(AppError::Unauthorized("Invalid email or password".into()));
        }

        self.clear_failed_attempts(&req.email).await?;

        let student_id = student
            .id
            .ok_or_else(|| AppError::Infrastructure(anyhow::anyhow!("student has no id")))?;

        students
            .update_one(
                doc! { "_id": student_id },
                doc! { "$set": { "last_login_at": mongodb::bson::DateTime::now() } },
            )
            .await?;

        let access_token = self.generate_access_token(&student_id, student.role)?;

        tracing::info!(student_id = %student_id.to_hex(), "Successful login");

        Ok(AuthResponse {
            access_token,
            student: StudentProfile::from(student),
        })
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<StudentProfile, AppError> {
        let object_id = ObjectId::parse_str(user_id)
            .map_err(|_| AppError::Validation("Invalid account id".into()))?;
        let student = self
            .students()
            .find_one(doc! { "_id": object_id })
            .await?
            .ok_or(AppError::NotFound("Student"))?;
        Ok(StudentProfile::from(student))
    }

    /// Apply an allow-listed profile patch in a single update.
    pub async fn update_profile(
        &self,
        user_id: &str,
        req: UpdateProfileRequest,
    ) -> Result<StudentProfile, AppError> {
        if req.is_empty() {
            return Err(AppError::Validation(
                "No valid fields provided for update".into(),
            ));
        }

        let object_id = ObjectId::parse_str(user_id)
            .map_err(|_| AppError::Validation("Invalid account id".into()))?;

        let mut set = Document::new();
        if let Some(v) = req.full_name {
            set.insert("full_name", v);
        }
        if let Some(v) = req.phone_number {
            set.insert("phone_number", v);
        }
        if let Some(v) = req.country_code {
            set.insert("country_code", v);
        }
        if let Some(v) = req.state {
            set.insert("state", v);
        }
        if let Some(v) = req.date_of_birth {
            set.insert("date_of_birth", v);
        }
        if let Some(v) = req.nationality {
            set.insert("nationality", v);
        }
        set.insert("updated_at", mongodb::bson::DateTime::now());

        let student = self
            .students()
            .find_one_and_update(doc! { "_id": object_id }, doc! { "$set": set })
            .return_document(mongodb::options::ReturnDocument::After)
            .await?
            .ok_or(AppError::NotFound("Student"))?;

        Ok(StudentProfile::from(student))
    }

    fn generate_access_token(
        &self,
        user_id: &ObjectId,
        role: AccountRole,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_token_ttl_seconds);

        let claims = JwtClaims {
            sub: user_id.to_hex(),
            role: role.as_str().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        self.jwt_service
            .generate_token(claims)
            .map_err(|e| AppError::Infrastructure(anyhow::anyhow!("Failed to generate token: {}", e)))
    }

    async fn is_locked_out(&self, email: &str) -> Result<bool, AppError> {
        let mut conn = self.redis.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(format!("failed_login:{}", email))
            .query_async(&mut conn)
            .await?;
        Ok(count.unwrap_or(0) >= FAILED_LOGIN_LOCKOUT)
    }

    async fn record_failed_attempt(&self, email: &str) -> Result<u32, AppError> {
        let key = format!("failed_login:{}", email);
        let mut conn = self.redis.clone();

        let count: u32 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(FAILED_LOGIN_WINDOW_SECONDS)
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(count)
    }

    async fn clear_failed_attempts(&self, email: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(format!("failed_login:{}", email))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
