use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 0 for tokens issued before a user exists (external signup)
    pub user_id: u64,
    /// user email
    pub sub: String,
    pub role: u8,
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
    /// Absent for platform admins and external signup tokens
    pub org_id: Option<u64>,
    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,

    /// Display name carried by external signup tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Google account id carried by external signup tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_sub: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
    /// Issued after the first factor when TOTP is enabled
    TwoFactor,
    /// Issued when a Google login has no matching user yet
    ExternalSignup,
}
