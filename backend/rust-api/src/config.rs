use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub jwt_secret: String,
    /// Gate for creating admin accounts through the public endpoint.
    pub admin_signup_code: String,
    pub smtp: Option<SmtpSettings>,
    pub payment: Option<PaymentSettings>,
    pub storage: Option<ObjectStorageSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub from_name: String,
    pub from_email: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSettings {
    pub gateway_url: String,
    pub key_id: String,
    pub key_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env_name)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "examprep".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env_name == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let admin_signup_code = settings
            .get_string("auth.admin_signup_code")
            .or_else(|_| env::var("ADMIN_SIGNUP_CODE"))
            .unwrap_or_default();

        let smtp = Self::load_smtp(&settings);
        let payment = Self::load_payment(&settings);
        let storage = Self::load_storage(&settings);

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            admin_signup_code,
            smtp,
            payment,
            storage,
        })
    }

    fn load_smtp(settings: &config::Config) -> Option<SmtpSettings> {
        let server = settings
            .get_string("smtp.server")
            .or_else(|_| env::var("SMTP_SERVER"))
            .ok()?;
        Some(SmtpSettings {
            server,
            port: settings
                .get_int("smtp.port")
                .ok()
                .and_then(|p| u16::try_from(p).ok())
                .or_else(|| env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()))
                .unwrap_or(587),
            login: settings
                .get_string("smtp.login")
                .or_else(|_| env::var("SMTP_LOGIN"))
                .unwrap_or_default(),
            password: settings
                .get_string("smtp.password")
                .or_else(|_| env::var("SMTP_PASSWORD"))
                .unwrap_or_default(),
            from_name: settings
                .get_string("smtp.from_name")
                .or_else(|_| env::var("SMTP_FROM_NAME"))
                .unwrap_or_else(|_| "ExamPrep".to_string()),
            from_email: settings
                .get_string("smtp.from_email")
                .or_else(|_| env::var("SMTP_FROM_EMAIL"))
                .unwrap_or_else(|_| "no-reply@examprep.local".to_string()),
            use_tls: settings
                .get_bool("smtp.use_tls")
                .ok()
                .or_else(|| env::var("SMTP_USE_TLS").ok().map(|v| v == "1"))
                .unwrap_or(true),
        })
    }

    fn load_payment(settings: &config::Config) -> Option<PaymentSettings> {
        let key_id = settings
            .get_string("payment.key_id")
            .or_else(|_| env::var("PAYMENT_KEY_ID"))
            .ok()?;
        Some(PaymentSettings {
            gateway_url: settings
                .get_string("payment.gateway_url")
                .or_else(|_| env::var("PAYMENT_GATEWAY_URL"))
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            key_id,
            key_secret: settings
                .get_string("payment.key_secret")
                .or_else(|_| env::var("PAYMENT_KEY_SECRET"))
                .unwrap_or_default(),
        })
    }

    fn load_storage(settings: &config::Config) -> Option<ObjectStorageSettings> {
        let bucket = settings
            .get_string("storage.bucket")
            .or_else(|_| env::var("STORAGE_BUCKET"))
            .ok()?;
        Some(ObjectStorageSettings {
            endpoint: settings
                .get_string("storage.endpoint")
                .or_else(|_| env::var("STORAGE_ENDPOINT"))
                .unwrap_or_else(|_| "https://storage.yandexcloud.net".to_string()),
            bucket,
            region: settings
                .get_string("storage.region")
                .or_else(|_| env::var("STORAGE_REGION"))
                .unwrap_or_else(|_| "ru-central1".to_string()),
            access_key: settings
                .get_string("storage.access_key")
                .or_else(|_| env::var("STORAGE_ACCESS_KEY"))
                .unwrap_or_default(),
            secret_key: settings
                .get_string("storage.secret_key")
                .or_else(|_| env::var("STORAGE_SECRET_KEY"))
                .unwrap_or_default(),
            prefix: settings
                .get_string("storage.prefix")
                .or_else(|_| env::var("STORAGE_PREFIX"))
                .unwrap_or_else(|_| "diagrams".to_string()),
        })
    }
}
