// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Static device metadata collected once per session.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Sentinel for any metadata field that cannot be determined. Partial
/// information must never block the validation flow.
pub const UNKNOWN: &str = "Unknown";

/// Immutable snapshot of static device metadata.
///
/// Built once per session and attached to authorization requests; never
/// persisted and carries no identity of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub platform: String,
    pub os_version: String,
    pub model: String,
    pub brand: String,
    pub device_name: String,
    pub device_type: String,
}

impl DeviceDescriptor {
    /// Collect the descriptor from platform facts.
    ///
    /// Each probe that fails collapses to [`UNKNOWN`]; the build itself
    /// cannot fail.
    pub fn collect() -> Self {
        Self {
            platform: non_empty(env::consts::OS.to_string()),
            os_version: os_release_field("PRETTY_NAME")
                .or_else(|| os_release_field("VERSION_ID"))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            model: read_trimmed("/sys/devices/virtual/dmi/id/product_name")
                .unwrap_or_else(|| UNKNOWN.to_string()),
            brand: read_trimmed("/sys/devices/virtual/dmi/id/sys_vendor")
                .unwrap_or_else(|| UNKNOWN.to_string()),
            device_name: hostname().unwrap_or_else(|| UNKNOWN.to_string()),
            device_type: device_type_for(env::consts::OS).to_string(),
        }
    }
}

fn non_empty(value: String) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

fn device_type_for(os: &str) -> &'static str {
    match os {
        "android" | "ios" => "handset",
        "linux" | "macos" | "windows" | "freebsd" | "openbsd" | "netbsd" => "desktop",
        _ => UNKNOWN,
    }
}

fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pull a field out of `/etc/os-release` (values may be quoted).
fn os_release_field(field: &str) -> Option<String> {
    let raw = fs::read_to_string("/etc/os-release").ok()?;
    parse_os_release_field(&raw, field)
}

fn parse_os_release_field(raw: &str, field: &str) -> Option<String> {
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix(field).and_then(|s| s.strip_prefix('=')) {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn hostname() -> Option<String> {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| env::var("COMPUTERNAME").ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| read_trimmed("/etc/hostname"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_never_fails_and_fills_every_field() {
        let descriptor = DeviceDescriptor::collect();
        for field in [
            &descriptor.platform,
            &descriptor.os_version,
            &descriptor.model,
            &descriptor.brand,
            &descriptor.device_name,
            &descriptor.device_type,
        ] {
            assert!(!field.is_empty());
        }
    }

    #[test]
    fn current_platform_is_known() {
        let descriptor = DeviceDescriptor::collect();
        assert_ne!(descriptor.platform, UNKNOWN);
    }

    #[test]
    fn missing_probe_collapses_to_unknown() {
        assert_eq!(read_trimmed("/nonexistent/probe/path"), None);
        assert_eq!(device_type_for("some-new-os"), UNKNOWN);
    }

    #[test]
    fn os_release_parsing_strips_quotes() {
        let raw = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nVERSION_ID=\"12\"\n";
        assert_eq!(
            parse_os_release_field(raw, "PRETTY_NAME").as_deref(),
            Some("Debian GNU/Linux 12 (bookworm)")
        );
        assert_eq!(parse_os_release_field(raw, "VERSION_ID").as_deref(), Some("12"));
        assert_eq!(parse_os_release_field(raw, "BUILD_ID"), None);
    }

    #[test]
    fn descriptor_serializes_with_snake_case_fields() {
        let descriptor = DeviceDescriptor {
            platform: "linux".into(),
            os_version: "12".into(),
            model: "ThinkPad".into(),
            brand: "Lenovo".into(),
            device_name: "test-host".into(),
            device_type: "desktop".into(),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["platform"], "linux");
        assert_eq!(json["device_type"], "desktop");
    }
}
