//! Request preconditions checked before any session logic runs.

use crate::error::GuardRejection;
use crate::request::SessionRequest;
use std::net::{IpAddr, SocketAddr};
use warden_log::warn;

/// Longest accepted user agent, in bytes.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Client identification extracted by [`RequestGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub remote_address: IpAddr,
    /// May be empty
    pub user_agent: String,
}

/// Fail-closed check that a request carries a usable client address and
/// user agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestGuard;

impl RequestGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, request: &SessionRequest) -> Result<ClientInfo, GuardRejection> {
        let remote_address = match request.remote_addr.as_deref().map(str::trim) {
            None | Some("") => return Err(reject(GuardRejection::MissingRemoteAddress)),
            Some(raw) => parse_address(raw).ok_or_else(|| reject(GuardRejection::InvalidRemoteAddress))?,
        };

        let user_agent = request
            .user_agent()
            .ok_or_else(|| reject(GuardRejection::MissingUserAgent))?;

        if user_agent.len() > MAX_USER_AGENT_LEN || user_agent.chars().any(char::is_control) {
            return Err(reject(GuardRejection::InvalidUserAgent));
        }

        Ok(ClientInfo {
            remote_address,
            user_agent: user_agent.to_string(),
        })
    }
}

fn parse_address(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

fn reject(rejection: GuardRejection) -> GuardRejection {
    warn!(target: "warden::session", "Request rejected by guard: {:?}", rejection);
    rejection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SessionRequest {
        SessionRequest::get("/")
            .with_remote_addr("203.0.113.5")
            .with_user_agent("Mozilla/5.0")
    }

    #[test]
    fn test_accepts_well_formed_request() {
        let info = RequestGuard.check(&request()).unwrap();
        assert_eq!(info.remote_address, "203.0.113.5".parse::<IpAddr>().unwrap());
        assert_eq!(info.user_agent, "Mozilla/5.0");
    }

    #[test]
    fn test_accepts_socket_address_and_empty_agent() {
        let request = SessionRequest::get("/")
            .with_remote_addr("[2001:db8::7]:443")
            .with_user_agent("");
        let info = RequestGuard.check(&request).unwrap();
        assert!(info.remote_address.is_ipv6());
        assert!(info.user_agent.is_empty());
    }

    #[test]
    fn test_address_rejections() {
        let mut missing = request();
        missing.remote_addr = None;
        assert_eq!(
            RequestGuard.check(&missing),
            Err(GuardRejection::MissingRemoteAddress)
        );

        let bogus = request().with_remote_addr("not-an-ip");
        assert_eq!(
            RequestGuard.check(&bogus),
            Err(GuardRejection::InvalidRemoteAddress)
        );
    }

    #[test]
    fn test_agent_rejections() {
        let mut missing = request();
        missing.headers.remove("user-agent");
        assert_eq!(
            RequestGuard.check(&missing),
            Err(GuardRejection::MissingUserAgent)
        );

        let long = request().with_user_agent("x".repeat(MAX_USER_AGENT_LEN + 1));
        assert_eq!(
            RequestGuard.check(&long),
            Err(GuardRejection::InvalidUserAgent)
        );

        let control = request().with_user_agent("agent\r\nX-Injected: 1");
        assert_eq!(
            RequestGuard.check(&control),
            Err(GuardRejection::InvalidUserAgent)
        );
    }
}
