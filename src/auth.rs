//! Authentication module.

use crate::db::{Database, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    registration_enabled: bool,
    starting_coins: i64,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        db: Database,
        session_duration_days: u32,
        registration_enabled: bool,
        starting_coins: i64,
    ) -> Self {
        Self {
            db,
            session_duration_days,
            registration_enabled,
            starting_coins,
        }
    }

    /// Register a new reader with the starting wallet balance.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Forbidden("Registration is disabled".to_string()));
        }

        self.create_user(username, email, password, "user")
    }

    /// Create a new user (admin function).
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<User> {
        // Validate username
        if username.is_empty() || username.len() > 64 {
            return Err(AppError::InvalidInput(
                "Username must be 1-64 characters".to_string(),
            ));
        }

        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::InvalidInput(
                "Username can only contain letters, numbers, _ and -".to_string(),
            ));
        }

        let email = email.trim();
        if !email.contains('@') || email.len() > 254 {
            return Err(AppError::InvalidInput("Invalid email address".to_string()));
        }

        // Validate password
        if password.len() < 4 {
            return Err(AppError::InvalidInput(
                "Password must be at least 4 characters".to_string(),
            ));
        }

        // Validate role
        if role != "admin" && role != "user" {
            return Err(AppError::InvalidInput(
                "Role must be 'admin' or 'user'".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_lowercase(),
            password_hash,
            role: role.to_string(),
            is_blocked: false,
            coins: self.starting_coins,
            created_at: now_timestamp(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        tracing::info!(username = %user.username, role = %user.role, "User created");
        Ok(user)
    }

    /// Login and create a session.
    pub fn login(&self, username: &str, password: &str) -> Result<(User, String)> {
        let user = self
            .db
            .get_user_by_username(username)?
            .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }

        if user.is_blocked {
            return Err(AppError::Forbidden(
                "Your account has been blocked.".to_string(),
            ));
        }

        // Update last login
        self.db.update_user_last_login(&user.id)?;

        // Create session
        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;

        Ok((user, token))
    }

    /// Validate a session token and return the user.
    ///
    /// Expired sessions are deleted. Blocked users do not authenticate.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        Ok(self
            .db
            .get_user_by_id(&session.user_id)?
            .filter(|user| !user.is_blocked))
    }

    /// Logout (delete session).
    pub fn logout(&self, token: &str) -> Result<()> {
        self.db.delete_session(token)
    }

    /// Change user password.
    pub fn change_password(&self, username: &str, new_password: &str) -> Result<bool> {
        if new_password.len() < 4 {
            return Err(AppError::InvalidInput(
                "Password must be at least 4 characters".to_string(),
            ));
        }

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(username, &password_hash)
    }

    /// Delete a user.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        self.db.delete_user(username)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Check if a user is admin.
    pub fn is_admin(&self, user: &User) -> bool {
        user.role == "admin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(Database::open_memory().unwrap(), 30, true, 1000)
    }

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_generate_token() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_eq!(token1.len(), 43); // Base64 of 32 bytes
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_register_grants_starting_coins() {
        let auth = service();
        let user = auth.register("alice", "Alice@Example.com", "secret").unwrap();
        assert_eq!(user.coins, 1000);
        assert_eq!(user.email, "alice@example.com");
        assert!(!auth.is_admin(&user));
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let auth = service();
        assert!(auth.register("bad name", "a@b.c", "secret").is_err());
        assert!(auth.register("bob", "not-an-email", "secret").is_err());
        assert!(auth.register("bob", "bob@b.c", "abc").is_err());

        auth.register("bob", "bob@b.c", "secret").unwrap();
        assert!(matches!(
            auth.register("bob", "other@b.c", "secret"),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_registration_disabled() {
        let auth = AuthService::new(Database::open_memory().unwrap(), 30, false, 1000);
        assert!(matches!(
            auth.register("alice", "a@b.c", "secret"),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_login_and_validate() {
        let auth = service();
        auth.register("alice", "a@b.c", "secret").unwrap();

        assert!(matches!(
            auth.login("alice", "wrong"),
            Err(AppError::Unauthorized(_))
        ));

        let (user, token) = auth.login("alice", "secret").unwrap();
        let validated = auth.validate_token(&token).unwrap().unwrap();
        assert_eq!(validated.id, user.id);

        auth.logout(&token).unwrap();
        assert!(auth.validate_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_blocked_user_cannot_authenticate() {
        let db = Database::open_memory().unwrap();
        let auth = AuthService::new(db.clone(), 30, true, 1000);
        let user = auth.register("mallory", "m@b.c", "secret").unwrap();
        let (_, token) = auth.login("mallory", "secret").unwrap();

        assert_eq!(db.toggle_user_block(&user.id).unwrap(), Some(true));
        assert!(auth.validate_token(&token).unwrap().is_none());
        assert!(matches!(
            auth.login("mallory", "secret"),
            Err(AppError::Forbidden(_))
        ));
    }
}
