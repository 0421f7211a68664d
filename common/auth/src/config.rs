/// Runtime configuration for the signed-token codec.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HS256 signing secret shared by access and QR tokens.
    pub secret: String,
    /// Access token lifetime in minutes.
    pub access_ttl_minutes: i64,
    /// QR table-token lifetime in days.
    pub qr_ttl_days: i64,
    /// Allowable clock skew in seconds when validating exp.
    pub leeway_seconds: u64,
}

impl TokenConfig {
    /// Construct config with the platform defaults (5 minute access tokens,
    /// 365 day QR tokens, 30 second leeway).
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl_minutes: 5,
            qr_ttl_days: 365,
            leeway_seconds: 30,
        }
    }

    pub fn with_access_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_ttl_minutes = minutes;
        self
    }

    pub fn with_qr_ttl_days(mut self, days: i64) -> Self {
        self.qr_ttl_days = days;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
