//! Shared User-Agent string for Codex API traffic.

/// Product token sent in every User-Agent header.
const PRODUCT: &str = "CodexScraper";

/// Returns the User-Agent for a configured release version.
///
/// Falls back to the crate version when `version` is blank.
#[must_use]
pub fn codex_user_agent(version: &str) -> String {
    let version = version.trim();
    if version.is_empty() {
        format!("{PRODUCT}/{}", env!("CARGO_PKG_VERSION"))
    } else {
        format!("{PRODUCT}/{version}")
    }
}
