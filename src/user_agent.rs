//! Contact-identifying User-Agent for every outbound request.
//!
//! SEC EDGAR rejects requests that do not name a contact (403), and the other
//! providers ask for the same courtesy, so one format is shared by all sources.

/// Project URL used when no contact is configured (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

/// Builds the User-Agent: `harvester/<version> (<contact>)`.
///
/// Without a contact the project URL is used instead; EDGAR modes refuse to
/// start without a contact, so the fallback only reaches HuggingFace/arXiv.
#[must_use]
pub fn user_agent(contact: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match contact.map(str::trim).filter(|c| !c.is_empty()) {
        Some(contact) => format!("harvester/{version} ({contact})"),
        None => format!("harvester/{version} (research-data-harvester; +{PROJECT_UA_URL})"),
    }
}
