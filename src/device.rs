//! Externally owned account and camera descriptors
//!
//! Both arrive wholesale from the device-directory collaborator; this crate
//! only reads them.

use serde::Deserialize;

/// Caller identity, as issued by the external account service
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub phone_id: String,
    pub open_user_id: String,
}

impl Account {
    /// Identity variant used when opening a camera's substream; the trimmed
    /// phone id makes the camera treat it as a distinct client.
    pub fn for_substream(&self) -> Account {
        let phone_id = if self.phone_id.len() > 2 {
            self.phone_id[2..].to_string()
        } else {
            self.phone_id.clone()
        };
        Account {
            phone_id,
            open_user_id: self.open_user_id.clone(),
        }
    }
}

/// Device identity and connection parameters
#[derive(Debug, Clone, Deserialize)]
pub struct CameraDescriptor {
    /// Peer id used to reach the camera over the vendor transport
    pub p2p_id: String,
    pub mac: String,
    /// Device secret used for key derivation and the auth digest
    pub enr: String,
    pub product_model: String,
    /// URL-safe stream name, also the pipe name stem
    pub name_uri: String,
    /// Camera requires the derived-key connect strategy
    #[serde(default)]
    pub dtls: bool,
    /// Camera is reached through a hub that requires the derived key
    #[serde(default)]
    pub parent_dtls: bool,
    #[serde(default)]
    pub parent_enr: Option<String>,
    #[serde(default)]
    pub parent_mac: Option<String>,
    /// Firmware ships a native RTSP server
    #[serde(default)]
    pub rtsp_firmware: bool,
    #[serde(default = "default_sample_rate")]
    pub default_sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    16_000
}

impl CameraDescriptor {
    /// Battery models that sleep between sessions; they need a wake MAC in
    /// the connect challenge and cannot use transport-level resend.
    pub fn is_low_power(&self) -> bool {
        matches!(self.product_model.as_str(), "WVOD1" | "HL_WCO2")
    }

    /// Models whose firmware only understands the legacy resolution command.
    pub fn uses_legacy_resolution_command(&self) -> bool {
        matches!(
            self.product_model.as_str(),
            "WYZEDB3" | "WVOD1" | "HL_WCO2" | "WYZEC1"
        )
    }

    /// Whether connecting requires the derived auth key.
    pub fn needs_auth_key(&self) -> bool {
        self.dtls || self.parent_dtls
    }

    /// Secret and MAC used for key derivation: the hub's when the camera
    /// hangs off one, the camera's own otherwise.
    pub fn auth_material(&self) -> (&str, &str) {
        if self.parent_dtls {
            (
                self.parent_enr.as_deref().unwrap_or(""),
                self.parent_mac.as_deref().unwrap_or(""),
            )
        } else {
            (&self.enr, &self.mac)
        }
    }

    /// Combined device secret fed into the auth digest.
    pub fn combined_enr(&self) -> String {
        format!("{}{}", self.enr, self.parent_enr.as_deref().unwrap_or(""))
    }
}
