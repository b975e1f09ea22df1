//! CMIS bindings.

use std::str::FromStr;

use super::error::CmisError;

/// Web-service endpoints of the CMIS web-services binding.
pub const WS_SERVICES: [&str; 9] = [
    "ACLService",
    "DiscoveryService",
    "MultiFilingService",
    "NavigationService",
    "ObjectService",
    "PolicyService",
    "RelationshipService",
    "RepositoryService",
    "VersioningService",
];

/// How the connector talks to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// AtomPub over HTTP.
    Atom,
    /// SOAP web services.
    Ws,
}

impl Binding {
    /// Returns the parameter value for this binding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atom => "atom",
            Self::Ws => "ws",
        }
    }
}

impl FromStr for Binding {
    type Err = CmisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atom" => Ok(Self::Atom),
            "ws" => Ok(Self::Ws),
            other => Err(CmisError::UnknownBinding(other.to_string())),
        }
    }
}

/// Returns the WSDL URL of every web service under `endpoint`.
pub fn ws_service_urls(endpoint: &str) -> Vec<(&'static str, String)> {
    let base = endpoint.trim_end_matches('/');
    WS_SERVICES
        .iter()
        .map(|service| (*service, format!("{base}/{service}?wsdl")))
        .collect()
}

/// Returns the SOAP address of one web service.
pub fn ws_service_address(endpoint: &str, service: &str) -> String {
    format!("{}/{service}", endpoint.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!("atom".parse::<Binding>().unwrap(), Binding::Atom);
        assert_eq!("ws".parse::<Binding>().unwrap(), Binding::Ws);
        assert!(matches!(
            "browser".parse::<Binding>(),
            Err(CmisError::UnknownBinding(ref b)) if b == "browser"
        ));
    }

    #[test]
    fn test_ws_service_urls() {
        let urls = ws_service_urls("http://repo.local/cmis/services/");
        assert_eq!(urls.len(), 9);
        assert_eq!(
            urls[0],
            ("ACLService", "http://repo.local/cmis/services/ACLService?wsdl".to_string())
        );
        assert_eq!(
            urls[8].1,
            "http://repo.local/cmis/services/VersioningService?wsdl"
        );
    }
}
