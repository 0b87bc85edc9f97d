//! Shared server state

use std::collections::HashMap;

use ats_core::protocol::{Organization, TokenPair, User};
use ats_core::token::{Role, now_secs};

use crate::auth::{self, AuthError, TokenIssuer};

/// Registered user with their password hash
pub struct UserRecord {
    pub user: User,
    pub password_hash: String,
}

/// Outstanding refresh token
pub struct RefreshRecord {
    pub user_id: String,
    pub expires_at: i64,
}

/// Shared application state
pub struct AppState {
    /// Access token signer
    pub issuer: TokenIssuer,

    /// Users keyed by id
    pub users: HashMap<String, UserRecord>,

    pub organizations: HashMap<String, Organization>,

    /// Refresh tokens that have not been used or revoked yet
    pub refresh_tokens: HashMap<String, RefreshRecord>,
}

impl AppState {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self {
            issuer,
            users: HashMap::new(),
            organizations: HashMap::new(),
            refresh_tokens: HashMap::new(),
        }
    }

    pub fn find_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users
            .values()
            .find(|r| r.user.email.eq_ignore_ascii_case(email))
    }

    /// Create an organization and its first user, who administers it
    pub fn register(
        &mut self,
        email: &str,
        password_hash: String,
        name: &str,
        organization_name: &str,
    ) -> (User, Organization) {
        let now = chrono::Utc::now().to_rfc3339();

        let organization = Organization {
            id: uuid::Uuid::new_v4().to_string(),
            name: organization_name.to_string(),
            slug: slugify(organization_name),
        };
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            role: Role::Admin,
            organization_id: organization.id.clone(),
            last_login: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.organizations
            .insert(organization.id.clone(), organization.clone());
        self.users.insert(
            user.id.clone(),
            UserRecord {
                user: user.clone(),
                password_hash,
            },
        );

        (user, organization)
    }

    pub fn touch_last_login(&mut self, user_id: &str) -> Option<User> {
        let record = self.users.get_mut(user_id)?;
        let now = chrono::Utc::now().to_rfc3339();
        record.user.last_login = Some(now.clone());
        record.user.updated_at = now;
        Some(record.user.clone())
    }

    pub fn organization_of(&self, user: &User) -> Option<Organization> {
        self.organizations.get(&user.organization_id).cloned()
    }

    /// Fresh access token plus a newly tracked refresh token
    pub fn issue_pair(&mut self, user: &User) -> Result<TokenPair, AuthError> {
        let access_token = self.issuer.issue_access_token(user)?;
        let refresh_token = auth::generate_refresh_token();

        // tokens abandoned by clients that never came back
        let now = now_secs();
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|_, record| record.expires_at >= now);
        let pruned = before - self.refresh_tokens.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped expired refresh tokens");
        }

        self.refresh_tokens.insert(
            refresh_token.clone(),
            RefreshRecord {
                user_id: user.id.clone(),
                expires_at: self.issuer.refresh_expiry(),
            },
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Consume a refresh token. It is invalid afterwards whether or not the
    /// caller goes on to issue a new pair.
    pub fn redeem(&mut self, refresh_token: &str) -> Option<User> {
        let record = self.refresh_tokens.remove(refresh_token)?;
        if record.expires_at < now_secs() {
            return None;
        }
        self.users.get(&record.user_id).map(|r| r.user.clone())
    }

    pub fn revoke(&mut self, refresh_token: &str) -> bool {
        self.refresh_tokens.remove(refresh_token).is_some()
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
