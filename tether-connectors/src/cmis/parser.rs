//! Repository listing parsers.
//!
//! Both the AtomPub service document and the SOAP `getRepositories`
//! response list repositories as blocks of simple elements. Namespace
//! prefixes vary between servers, so matching ignores them.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// ============================================================================
// Regex Patterns
// ============================================================================

/// An AtomPub `<app:workspace>` block.
static WORKSPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?workspace\b[^>]*>(.*?)</(?:[\w-]+:)?workspace>")
        .expect("Invalid regex")
});

/// A SOAP `<repositories>` entry.
static SOAP_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?repositories\b[^>]*>(.*?)</(?:[\w-]+:)?repositories>")
        .expect("Invalid regex")
});

/// Any simple element, capturing its local name and text.
static ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?(\w+)\b[^>/]*>([^<]*)</(?:[\w-]+:)?(\w+)>")
        .expect("Invalid regex")
});

// ============================================================================
// Repository Info
// ============================================================================

/// What the connector knows about the selected repository.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RepositoryInfo {
    /// Repository identifier.
    pub id: String,
    /// Display name, if advertised.
    pub name: Option<String>,
    /// Server product name, if advertised.
    pub product: Option<String>,
    /// Supported CMIS version, if advertised.
    pub cmis_version: Option<String>,
}

impl RepositoryInfo {
    fn from_block(block: &str) -> Option<Self> {
        let mut info = RepositoryInfo::default();
        for caps in ELEMENT_RE.captures_iter(block) {
            let (open, text, close) = (&caps[1], caps[2].trim(), &caps[3]);
            if open != close || text.is_empty() {
                continue;
            }
            let text = unescape(text);
            match open {
                "repositoryId" if info.id.is_empty() => info.id = text,
                "repositoryName" => info.name = Some(text),
                "productName" => info.product = Some(text),
                "cmisVersionSupported" => info.cmis_version = Some(text),
                _ => {}
            }
        }
        (!info.id.is_empty()).then_some(info)
    }
}

/// Lists the repositories in an AtomPub service document.
pub fn parse_service_document(xml: &str) -> Vec<RepositoryInfo> {
    WORKSPACE_RE
        .captures_iter(xml)
        .filter_map(|caps| RepositoryInfo::from_block(&caps[1]))
        .collect()
}

/// Lists the repositories in a SOAP `getRepositories` response.
pub fn parse_soap_repositories(xml: &str) -> Vec<RepositoryInfo> {
    SOAP_ENTRY_RE
        .captures_iter(xml)
        .filter_map(|caps| RepositoryInfo::from_block(&caps[1]))
        .collect()
}

/// Picks the configured repository, or the first one when none is set.
pub fn select_repository(
    repositories: Vec<RepositoryInfo>,
    wanted: Option<&str>,
) -> Result<RepositoryInfo, Selection> {
    match wanted {
        Some(id) => repositories
            .into_iter()
            .find(|repo| repo.id == id)
            .ok_or(Selection::NotFound),
        None => repositories.into_iter().next().ok_or(Selection::Empty),
    }
}

/// Why no repository could be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The endpoint lists none.
    Empty,
    /// The configured id is not listed.
    NotFound,
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ============================================================================
// Tests
// ============================================================================
