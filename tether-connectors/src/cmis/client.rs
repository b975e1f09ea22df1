//! CMIS session factory.
//!
//! Sessions are opened against the AtomPub service document or the SOAP
//! repository service. Requests are driven on the calling worker thread so
//! they look blocking to the session manager; the worker's interrupt is
//! polled while a request is in flight.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use tether_core::{ConnectionParams, CoreError, ErrorTaxonomy, Interrupt, SessionFactory};
use tether_fetch::StreamThrottle;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};
use url::Url;

use super::binding::{Binding, ws_service_address, ws_service_urls};
use super::error::{CmisError, CmisTaxonomy};
use super::parser::{
    RepositoryInfo, Selection, parse_service_document, parse_soap_repositories, select_repository,
};
use crate::connector::FetchTarget;

// ============================================================================
// Constants
// ============================================================================

/// Parameter names.
pub mod params {
    /// `atom` or `ws`.
    pub const BINDING: &str = "binding";
    /// Repository user.
    pub const USERNAME: &str = "username";
    /// Repository password.
    pub const PASSWORD: &str = "password";
    /// Service document URL or web-services base URL.
    pub const ENDPOINT: &str = "endpoint";
    /// Repository to open; the first listed when absent.
    pub const REPOSITORY_ID: &str = "repositoryId";
}

/// Connect timeout for repository requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often an in-flight request checks its interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

const ATOMSVC: &str = "application/atomsvc+xml, application/xml;q=0.9";

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
struct CmisConfig {
    binding: Binding,
    endpoint: Url,
    username: String,
    password: String,
    repository_id: Option<String>,
}

impl CmisConfig {
    fn from_params(params: &ConnectionParams) -> Result<Self, CmisError> {
        let binding = params.get_or(params::BINDING, "").parse::<Binding>()?;
        let raw = params.get_or(params::ENDPOINT, "");
        let endpoint = parse_endpoint(raw)?;
        Ok(Self {
            binding,
            endpoint,
            username: params.get_or(params::USERNAME, "").to_string(),
            password: params.get_or(params::PASSWORD, "").to_string(),
            repository_id: params.get(params::REPOSITORY_ID).map(str::to_string),
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, CmisError> {
    let url = Url::parse(raw).map_err(|source| CmisError::InvalidEndpoint {
        url: raw.to_string(),
        source,
    })?;
    if matches!(url.scheme(), "http" | "https") {
        Ok(url)
    } else {
        Err(CmisError::InvalidEndpoint {
            url: raw.to_string(),
            source: url::ParseError::RelativeUrlWithoutBase,
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// A live CMIS repository session.
#[derive(Debug)]
pub struct CmisSession {
    http: reqwest::Client,
    config: CmisConfig,
    repository: RepositoryInfo,
    services: Vec<(&'static str, String)>,
}

impl CmisSession {
    /// Returns the selected repository.
    pub fn repository(&self) -> &RepositoryInfo {
        &self.repository
    }

    /// Returns the binding in use.
    pub fn binding(&self) -> Binding {
        self.config.binding
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Returns the WSDL URL of every web service; empty for AtomPub.
    pub fn services(&self) -> &[(&'static str, String)] {
        &self.services
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Opens CMIS sessions.
#[derive(Debug, Clone)]
pub struct CmisFactory {
    http: reqwest::Client,
}

impl CmisFactory {
    /// Creates a factory with its own HTTP client.
    pub fn new() -> Result<Self, CmisError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CmisError::Client)?;
        Ok(Self { http })
    }

    fn list_repositories(
        http: &reqwest::Client,
        config: &CmisConfig,
        interrupt: &Interrupt,
    ) -> Result<Vec<RepositoryInfo>, CmisError> {
        match config.binding {
            Binding::Atom => {
                let url = config.endpoint.as_str();
                let request = http
                    .get(url)
                    .basic_auth(&config.username, Some(&config.password))
                    .header(ACCEPT, HeaderValue::from_static(ATOMSVC));
                let body = execute(request, url, interrupt)?;
                Ok(parse_service_document(&body))
            }
            Binding::Ws => {
                let url = ws_service_address(config.endpoint.as_str(), "RepositoryService");
                let request = http
                    .post(&url)
                    .basic_auth(&config.username, Some(&config.password))
                    .header(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"))
                    .header("SOAPAction", HeaderValue::from_static("\"\""))
                    .body(get_repositories_envelope(&config.username, &config.password));
                let body = execute(request, &url, interrupt)?;
                Ok(parse_soap_repositories(&body))
            }
        }
    }
}

impl SessionFactory for CmisFactory {
    type Session = CmisSession;
    type Error = CmisError;

    fn name(&self) -> &str {
        "cmis"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[params::BINDING, params::USERNAME, params::PASSWORD, params::ENDPOINT]
    }

    fn validate(&self, params: &ConnectionParams) -> Result<(), CoreError> {
        CmisConfig::from_params(params).map(|_| ()).map_err(|err| match err {
            CmisError::UnknownBinding(value) => CoreError::invalid(
                params::BINDING,
                format!("{value} is not a binding; expected atom or ws"),
            ),
            other => CoreError::invalid(params::ENDPOINT, other.to_string()),
        })
    }

    #[instrument(skip_all, fields(endpoint = params.get_or(params::ENDPOINT, "")))]
    fn connect(&self, params: &ConnectionParams, interrupt: &Interrupt) -> Result<CmisSession, CmisError> {
        let config = CmisConfig::from_params(params)?;
        let services = match config.binding {
            Binding::Atom => Vec::new(),
            Binding::Ws => ws_service_urls(config.endpoint.as_str()),
        };

        let repositories = Self::list_repositories(&self.http, &config, interrupt)?;
        debug!(count = repositories.len(), "Repositories listed");
        let repository = select_repository(repositories, config.repository_id.as_deref())
            .map_err(|selection| match selection {
                Selection::Empty => CmisError::NoRepositories(config.endpoint.to_string()),
                Selection::NotFound => {
                    CmisError::RepositoryNotFound(config.repository_id.clone().unwrap_or_default())
                }
            })?;

        info!(
            repository = %repository.id,
            binding = config.binding.as_str(),
            "CMIS session created"
        );
        Ok(CmisSession {
            http: self.http.clone(),
            config,
            repository,
            services,
        })
    }

    fn check(&self, session: &CmisSession, interrupt: &Interrupt) -> Result<(), CmisError> {
        let repositories = Self::list_repositories(&session.http, &session.config, interrupt)?;
        if repositories.iter().any(|repo| repo.id == session.repository.id) {
            Ok(())
        } else {
            Err(CmisError::RepositoryNotFound(session.repository.id.clone()))
        }
    }

    fn teardown(&self, session: &CmisSession) -> Result<(), CmisError> {
        debug!(repository = %session.repository.id, "CMIS session closed");
        Ok(())
    }

    fn taxonomy(&self) -> Arc<dyn ErrorTaxonomy> {
        Arc::new(CmisTaxonomy)
    }
}

impl FetchTarget for CmisFactory {
    fn bin_name(params: &ConnectionParams) -> String {
        let raw = params.get_or(params::ENDPOINT, "");
        Url::parse(raw)
            .ok()
            .and_then(|url| {
                let host = url.host_str()?.to_string();
                Some(match url.port_or_known_default() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                })
            })
            .unwrap_or_else(|| raw.to_string())
    }

    fn sample(
        session: &CmisSession,
        throttle: &StreamThrottle,
        interrupt: &Interrupt,
    ) -> Result<u64, CmisError> {
        let url = session.config.endpoint.as_str();
        let request = session
            .http
            .get(url)
            .basic_auth(&session.config.username, Some(&session.config.password));
        let handle = Handle::try_current().map_err(|_| CmisError::NoRuntime)?;

        handle.block_on(async {
            let transfer = async {
                let mut response = send(request, url).await?;
                while let Some(chunk) = response.chunk().await.map_err(|source| CmisError::Request {
                    url: url.to_string(),
                    source,
                })? {
                    throttle.obtain_read_permission(chunk.len()).await?;
                    throttle.release_read_permission(chunk.len(), chunk.len());
                }
                Ok(throttle.bytes_read())
            };
            tokio::select! {
                result = transfer => result,
                () = interrupted(interrupt) => Err(CmisError::Interrupted),
            }
        })
    }
}

// ============================================================================
// HTTP Helpers
// ============================================================================

fn execute(
    request: reqwest::RequestBuilder,
    url: &str,
    interrupt: &Interrupt,
) -> Result<String, CmisError> {
    if interrupt.is_requested() {
        return Err(CmisError::Interrupted);
    }
    let handle = Handle::try_current().map_err(|_| CmisError::NoRuntime)?;
    handle.block_on(async {
        let exchange = async {
            let response = send(request, url).await?;
            response.text().await.map_err(|source| CmisError::Request {
                url: url.to_string(),
                source,
            })
        };
        tokio::select! {
            result = exchange => result,
            () = interrupted(interrupt) => Err(CmisError::Interrupted),
        }
    })
}

async fn send(request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, CmisError> {
    let response = request.send().await.map_err(|source| CmisError::Request {
        url: url.to_string(),
        source,
    })?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CmisError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

async fn interrupted(interrupt: &Interrupt) {
    while !interrupt.is_requested() {
        tokio::time::sleep(INTERRUPT_POLL).await;
    }
}

fn get_repositories_envelope(username: &str, password: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:cmism="http://docs.oasis-open.org/ns/cmis/messaging/200908/">"#,
            "<soapenv:Header>",
            r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">"#,
            "<wsse:UsernameToken><wsse:Username>{}</wsse:Username>",
            r#"<wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText">{}</wsse:Password>"#,
            "</wsse:UsernameToken></wsse:Security></soapenv:Header>",
            "<soapenv:Body><cmism:getRepositories/></soapenv:Body></soapenv:Envelope>"
        ),
        escape(username),
        escape(password)
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_params() -> ConnectionParams {
        ConnectionParams::new()
            .with(params::BINDING, "atom")
            .with(params::USERNAME, "crawler")
            .with(params::PASSWORD, "s3cret")
            .with(params::ENDPOINT, "http://repo.local/cmis/atom")
    }

    #[test]
    fn test_validate_accepts_atom() {
        let factory = CmisFactory::new().unwrap();
        assert!(factory.validate(&atom_params()).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_binding() {
        let factory = CmisFactory::new().unwrap();
        let err = factory
            .validate(&atom_params().with(params::BINDING, "browser"))
            .unwrap_err();
        assert!(err.to_string().contains("binding"));
    }

    #[test]
    fn test_validate_rejects_malformed_endpoint() {
        let factory = CmisFactory::new().unwrap();
        assert!(
            factory
                .validate(&atom_params().with(params::ENDPOINT, "not a url"))
                .is_err()
        );
        assert!(
            factory
                .validate(&atom_params().with(params::ENDPOINT, "ftp://repo.local/"))
                .is_err()
        );
    }

    #[test]
    fn test_config_reads_optional_repository() {
        let config = CmisConfig::from_params(&atom_params()).unwrap();
        assert_eq!(config.repository_id, None);

        let config =
            CmisConfig::from_params(&atom_params().with(params::REPOSITORY_ID, "A1")).unwrap();
        assert_eq!(config.repository_id.as_deref(), Some("A1"));
    }

    #[test]
    fn test_bin_is_endpoint_authority() {
        assert_eq!(CmisFactory::bin_name(&atom_params()), "repo.local:80");
        let https = atom_params().with(params::ENDPOINT, "https://dms.example.com:8443/cmis");
        assert_eq!(CmisFactory::bin_name(&https), "dms.example.com:8443");
    }

    #[test]
    fn test_envelope_escapes_credentials() {
        let envelope = get_repositories_envelope("a<b", "p&w");
        assert!(envelope.contains("<wsse:Username>a&lt;b</wsse:Username>"));
        assert!(envelope.contains(">p&amp;w</wsse:Password>"));
        assert!(envelope.contains("<cmism:getRepositories/>"));
    }

    #[test]
    fn test_connect_without_runtime_is_configuration() {
        let factory = CmisFactory::new().unwrap();
        let err = factory
            .connect(&atom_params(), &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, CmisError::NoRuntime));
    }
}
