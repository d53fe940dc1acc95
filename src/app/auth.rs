use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app::error::{check_text, ServiceError, ServiceResult, ValidationErrors};
use crate::domain::user::{NewUser, Session, User};
use crate::infra::store::{EntityStore, USERS_EMAIL_KEY};

const TOKEN_ISSUER: &str = "quillpost";
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 128;
const EMAIL_TAKEN: &str = "The email has already been taken.";
const INVALID_CREDENTIALS: &str = "invalid credentials";
const UNAUTHENTICATED: &str = "Unauthenticated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: i64,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthGrant {
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn EntityStore>,
    access_key: [u8; 32],
    access_ttl_minutes: u64,
}

impl AuthService {
    pub fn new(store: Arc<dyn EntityStore>, access_key: [u8; 32], access_ttl_minutes: u64) -> Self {
        Self {
            store,
            access_key,
            access_ttl_minutes,
        }
    }

    pub async fn register(&self, input: RegisterInput) -> ServiceResult<AuthGrant> {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "name", input.name.as_deref(), 255);
        check_text(&mut errors, "email", input.email.as_deref(), 255);
        let email = input.email.as_deref().map(str::trim).unwrap_or_default();
        if !errors.contains("email") && !looks_like_email(email) {
            errors.add("email", "The email field must be a valid email address.");
        }
        validate_password(
            &mut errors,
            input.password.as_deref(),
            input.password_confirmation.as_deref(),
        );
        errors.into_result()?;

        if self.store.email_taken(email).await? {
            return Err(ServiceError::validation("email", EMAIL_TAKEN));
        }

        let password_hash = hash_password(input.password.as_deref().unwrap_or_default())?;
        let user = match self
            .store
            .insert_user(NewUser {
                name: input.name.as_deref().map(str::trim).unwrap_or_default().to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await
        {
            Ok(user) => user,
            Err(err) if err.is_conflict_on(USERS_EMAIL_KEY) => {
                return Err(ServiceError::validation("email", EMAIL_TAKEN));
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(user_id = user.id, "user registered");
        self.grant(user).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ServiceResult<AuthGrant> {
        let credentials = self
            .store
            .find_credentials(email.trim())
            .await?
            .ok_or(ServiceError::Unauthenticated(INVALID_CREDENTIALS))?;

        if credentials.password_hash.is_empty()
            || !verify_password(password, &credentials.password_hash)?
        {
            return Err(ServiceError::Unauthenticated(INVALID_CREDENTIALS));
        }

        self.grant(credentials.user).await
    }

    pub async fn logout(&self, session: AuthSession) -> ServiceResult<()> {
        self.store.delete_session(session.session_id).await?;
        Ok(())
    }

    pub async fn authenticate(&self, token: &str) -> ServiceResult<AuthSession> {
        let claims = self
            .decrypt_claims(token)?
            .ok_or(ServiceError::Unauthenticated(UNAUTHENTICATED))?;
        if !has_token_type(&claims, "access") {
            return Err(ServiceError::Unauthenticated(UNAUTHENTICATED));
        }
        let (user_id, session_id) = match (claim_user_id(&claims), claim_uuid(&claims, "jti")) {
            (Some(user_id), Some(session_id)) => (user_id, session_id),
            _ => return Err(ServiceError::Unauthenticated(UNAUTHENTICATED)),
        };

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or(ServiceError::Unauthenticated(UNAUTHENTICATED))?;
        if session.user_id != user_id
            || session.expires_at <= OffsetDateTime::now_utc()
            || session.token_hash != hash_token(token)
        {
            return Err(ServiceError::Unauthenticated(UNAUTHENTICATED));
        }

        Ok(AuthSession {
            user_id,
            session_id,
        })
    }

    pub async fn current_user(&self, user_id: i64) -> ServiceResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::Unauthenticated(UNAUTHENTICATED))
    }

    /// Mints an access token bound to a fresh session for `user_id`.
    pub async fn issue_token(&self, user_id: i64) -> ServiceResult<(String, OffsetDateTime)> {
        let session_id = Uuid::new_v4();
        let (claims, expires_at) = self
            .build_access_claims(user_id, session_id)
            .map_err(internal)?;
        let key = SymmetricKey::<V4>::from(&self.access_key).map_err(internal)?;
        let token = local::encrypt(&key, &claims, None, None).map_err(internal)?;

        self.store
            .insert_session(&Session {
                id: session_id,
                user_id,
                token_hash: hash_token(&token),
                expires_at,
            })
            .await?;

        Ok((token, expires_at))
    }

    async fn grant(&self, user: User) -> ServiceResult<AuthGrant> {
        let (access_token, expires_at) = self.issue_token(user.id).await?;
        Ok(AuthGrant {
            access_token,
            expires_at,
            user,
        })
    }

    fn decrypt_claims(&self, token: &str) -> ServiceResult<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.access_key).map_err(internal)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }

    fn build_access_claims(
        &self,
        user_id: i64,
        session_id: Uuid,
    ) -> Result<(Claims, OffsetDateTime), pasetors::errors::Error> {
        let duration = std::time::Duration::from_secs(self.access_ttl_minutes * 60);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&user_id.to_string())?;
        claims.token_identifier(&session_id.to_string())?;
        claims.add_additional("typ", "access")?;
        let expires_at =
            OffsetDateTime::now_utc() + Duration::minutes(self.access_ttl_minutes as i64);
        Ok((claims, expires_at))
    }
}

fn internal(err: impl std::fmt::Display) -> ServiceError {
    ServiceError::Unexpected(err.to_string())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn validate_password(
    errors: &mut ValidationErrors,
    password: Option<&str>,
    confirmation: Option<&str>,
) {
    let Some(password) = password.filter(|password| !password.is_empty()) else {
        errors.add("password", "The password field is required.");
        return;
    };
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        errors.add(
            "password",
            format!("The password field must be at least {} characters.", PASSWORD_MIN),
        );
    } else if len > PASSWORD_MAX {
        errors.add(
            "password",
            format!(
                "The password field must not be greater than {} characters.",
                PASSWORD_MAX
            ),
        );
    }
    if confirmation != Some(password) {
        errors.add("password", "The password field confirmation does not match.");
    }
}

fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| internal(format!("failed to hash password: {}", err)))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> ServiceResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| internal(format!("failed to parse password hash: {}", err)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn claim_user_id(claims: &Claims) -> Option<i64> {
    claims
        .get_claim("sub")
        .and_then(|value| value.as_str())
        .and_then(|value| value.parse().ok())
}

fn claim_uuid(claims: &Claims, name: &str) -> Option<Uuid> {
    claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .and_then(|value| Uuid::parse_str(value).ok())
}

fn has_token_type(claims: &Claims, expected: &str) -> bool {
    claims
        .get_claim("typ")
        .and_then(|value| value.as_str())
        .map(|value| value == expected)
        .unwrap_or(false)
}
