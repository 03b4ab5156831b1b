//! Origin policy for WebSocket upgrades

use axum::http::{header, HeaderMap};

/// Which `Origin` headers may open a relay connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    /// Accept any origin, including none
    #[default]
    Any,
    /// Accept only these origins (compared case-insensitively)
    List(Vec<String>),
}

impl OriginPolicy {
    /// Parse `*` or a comma separated list of origins
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "*" {
            return OriginPolicy::Any;
        }

        OriginPolicy::List(
            value.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::List(allowed) => allowed
                .iter()
                .any(|a| a.eq_ignore_ascii_case(origin.trim())),
        }
    }

    /// Check the `Origin` header of a request (missing counts as empty)
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        self.is_origin_allowed(origin)
    }
}
