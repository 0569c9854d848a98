//! Caller identity and roles carried in bearer tokens

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Role names understood by the lending endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Librarian,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Librarian => "librarian",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Librarian | Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reader" => Ok(Role::Reader),
            "librarian" => Ok(Role::Librarian),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// JWT claims for an authenticated member.
///
/// Tokens are issued elsewhere; this server only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberClaims {
    pub sub: String,
    pub member_id: i32,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl MemberClaims {
    /// Create a signed token (HS256)
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse and verify a token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Known roles; unknown role names are ignored
    pub fn roles(&self) -> Vec<Role> {
        self.roles.iter().filter_map(|r| r.parse().ok()).collect()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles().contains(&role)
    }

    pub fn is_staff(&self) -> bool {
        self.roles().iter().any(Role::is_staff)
    }

    // Authorization checks
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Authorization("Staff role required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.has_role(Role::Admin) {
            Ok(())
        } else {
            Err(AppError::Authorization("Admin role required".to_string()))
        }
    }

    /// Members may act on their own records; staff may act on anyone's
    pub fn require_self_or_staff(&self, member_id: i32) -> Result<(), AppError> {
        if self.member_id == member_id || self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Authorization(
                "Insufficient rights to access another member's loans".to_string(),
            ))
        }
    }
}
