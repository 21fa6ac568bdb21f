//! Client identification sent with every request.

use serde::Serialize;

/// Describes the SDK build issuing requests.
///
/// Rendered as the `User-Agent` header and, serialized to JSON, as
/// `X-Payjp-Client-User-Agent`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Bindings identifier
    pub bindings_name: String,

    /// Bindings version
    pub bindings_version: String,

    /// Wrapping plugin, if the SDK is embedded in another framework
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings_plugin: Option<String>,

    /// Operating system and architecture
    #[serde(rename = "uname")]
    pub uname_string: String,

    /// Platform name
    pub platform: String,

    /// Publisher of the bindings
    pub publisher: String,

    /// Card form flavor in use, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_form_type: Option<String>,
}

impl ClientInfo {
    /// Builds client info for this crate, optionally naming a plugin and publisher.
    pub fn make_info(plugin: Option<&str>, publisher: Option<&str>) -> Self {
        Self {
            bindings_name: "jp.pay.rs".to_string(),
            bindings_version: env!("CARGO_PKG_VERSION").to_string(),
            bindings_plugin: plugin.map(str::to_string),
            uname_string: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            platform: "rust".to_string(),
            publisher: publisher.unwrap_or("payjp").to_string(),
            card_form_type: None,
        }
    }

    /// Sets the card form flavor.
    pub fn with_card_form_type(mut self, form_type: impl Into<String>) -> Self {
        self.card_form_type = Some(form_type.into());
        self
    }

    /// `name/version[@plugin]`
    pub fn binding_info(&self) -> String {
        match &self.bindings_plugin {
            Some(plugin) => format!("{}/{}@{}", self.bindings_name, self.bindings_version, plugin),
            None => format!("{}/{}", self.bindings_name, self.bindings_version),
        }
    }

    /// Value of the `User-Agent` header.
    pub fn user_agent(&self) -> String {
        format!("{}; {}", self.binding_info(), self.uname_string)
    }

    /// Value of the `X-Payjp-Client-User-Agent` header.
    pub fn json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::make_info(None, None)
    }
}
