//! Statically tabulated per-security-level Chrome flag/preference diff.
//! Grounded on the Python original's `SecurityConfig.from_level` table: no
//! runtime introspection, just four explicit presets.

use crate::config::schema::SecurityLevel;
use serde_json::{json, Value};

/// The flag and preference diff a security level resolves to.
pub struct SecurityPreset {
    pub args: Vec<String>,
    pub prefs: Value,
    pub accept_insecure_certs: bool,
}

pub fn preset_for(level: SecurityLevel) -> SecurityPreset {
    match level {
        SecurityLevel::Strict => SecurityPreset {
            args: vec![],
            prefs: json!({
                "safebrowsing": { "enabled": true, "enhanced": true },
            }),
            accept_insecure_certs: false,
        },
        SecurityLevel::Standard => SecurityPreset {
            args: vec![],
            prefs: json!({
                "safebrowsing": { "enabled": true, "enhanced": false },
            }),
            accept_insecure_certs: false,
        },
        SecurityLevel::Relaxed => SecurityPreset {
            args: vec![
                "--ignore-certificate-errors".into(),
                "--allow-insecure-localhost".into(),
                "--disable-site-isolation-trials".into(),
                "--disable-features=IsolateOrigins,site-per-process".into(),
            ],
            prefs: json!({
                "safebrowsing": { "enabled": true, "enhanced": false },
            }),
            accept_insecure_certs: true,
        },
        SecurityLevel::Permissive => SecurityPreset {
            args: vec![
                "--ignore-certificate-errors".into(),
                "--allow-insecure-localhost".into(),
                "--disable-site-isolation-trials".into(),
                "--disable-features=IsolateOrigins,site-per-process".into(),
                "--disable-web-security".into(),
                "--allow-running-insecure-content".into(),
                "--ssl-version-min=tls1".into(),
            ],
            prefs: json!({
                "safebrowsing": { "enabled": false, "enhanced": false, "disable_download_protection": true },
                "profile": {
                    "default_content_setting_values": {
                        "notifications": 1,
                        "geolocation": 1,
                        "media_stream_camera": 1,
                        "media_stream_mic": 1,
                    }
                }
            }),
            accept_insecure_certs: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_rejects_invalid_certs() {
        let preset = preset_for(SecurityLevel::Strict);
        assert!(!preset.accept_insecure_certs);
        assert!(preset.args.is_empty());
    }

    #[test]
    fn test_permissive_disables_web_security_and_safebrowsing() {
        let preset = preset_for(SecurityLevel::Permissive);
        assert!(preset.args.iter().any(|a| a == "--disable-web-security"));
        assert_eq!(preset.prefs["safebrowsing"]["enabled"], json!(false));
        assert!(preset.accept_insecure_certs);
    }

    #[test]
    fn test_relaxed_and_permissive_both_accept_invalid_certs() {
        assert!(preset_for(SecurityLevel::Relaxed).accept_insecure_certs);
        assert!(preset_for(SecurityLevel::Permissive).accept_insecure_certs);
    }
}
