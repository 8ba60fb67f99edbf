//! Caller identity carried through request extensions.
//!
//! Upstream authentication middleware (outside this crate) attaches a
//! [`ClientIdentity`] to each request. The cache layer reads the role for
//! role-conditional policies; the rate limit layer reads the IP and user id
//! to derive limiting keys. Every field is optional — an unauthenticated
//! request simply limits as `anonymous`.

use std::net::IpAddr;

use http::Request;

/// Identity attached to a request by the surrounding application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub ip: Option<IpAddr>,
    pub user_id: Option<String>,
    pub role: Option<String>,
}

impl ClientIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Reads the identity from a request's extensions, if present.
    pub fn from_request<B>(req: &Request<B>) -> Option<&ClientIdentity> {
        req.extensions().get::<ClientIdentity>()
    }
}
