//! Typed parsers for emulator command output.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::context::Resolution;
use crate::platforms::InstanceStatus;

static SIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*x\s*(\d+)").expect("valid size pattern"));

static TRAILING_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*$").expect("valid index pattern"));

/// Parses the instance listing. Each line is
/// `index,title,window_handle,started,pid[,...]`.
///
/// Lines that are empty or malformed are skipped so a single bad row does not
/// hide the rest of the listing.
pub fn parse_instance_listing(raw: &str) -> Vec<InstanceStatus> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let status = parse_instance_line(line);
            if status.is_none() {
                warn!("Skipping malformed instance line: {line:?}");
            }
            status
        })
        .collect()
}

fn parse_instance_line(line: &str) -> Option<InstanceStatus> {
    let parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    let index = parts[0].parse::<u32>().ok()?;
    let started = parts[3];
    if started.parse::<i64>().is_err() {
        return None;
    }
    let running = started != "0" && started != "-1";
    let pid = parts
        .get(4)
        .and_then(|p| p.parse::<i64>().ok())
        .filter(|p| *p > 0)
        .and_then(|p| u32::try_from(p).ok());

    Some(InstanceStatus {
        index,
        title: parts[1].to_string(),
        running,
        pid,
    })
}

/// Parses a screen-size response such as `Physical size: 1920x1080`.
/// When an override size is reported after the physical one, the last
/// reported size wins since it is what the display actually uses.
pub fn parse_resolution(raw: &str) -> Option<Resolution> {
    SIZE_PATTERN.captures_iter(raw).last().and_then(|caps| {
        let width: u32 = caps[1].parse().ok()?;
        let height: u32 = caps[2].parse().ok()?;
        (width > 0 && height > 0).then_some(Resolution::new(width, height))
    })
}

/// Extracts the new instance index from a clone response such as
/// `SUCCESS: clone instance 3`.
pub fn parse_clone_output(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if !trimmed.to_ascii_uppercase().starts_with("SUCCESS") {
        return None;
    }
    TRAILING_INDEX
        .captures(trimmed)
        .and_then(|caps| caps[1].parse().ok())
}

/// Interprets the `isvmrunning` response.
pub fn parse_running_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("running")
}

/// Interprets a proxy setting read back from the device. `:0`, `null` and an
/// empty string all mean no proxy.
pub fn parse_proxy(raw: &str) -> Option<String> {
    let value = raw.trim();
    match value {
        "" | ":0" | "null" => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_skips_malformed_rows() {
        let raw = "0,Base,0,0,0,1024\n\
                   garbage\n\
                   1,Pilot_1810_1200,394562,1,7788,2048\n\
                   x,Broken,0,1,1,1\n\
                   \n\
                   2,Pilot_1810_1300,0,-1\n";
        let listing = parse_instance_listing(raw);
        assert_eq!(listing.len(), 3);
        assert_eq!(listing[0].index, 0);
        assert!(!listing[0].running);
        assert_eq!(listing[0].pid, None);
        assert!(listing[1].running);
        assert_eq!(listing[1].pid, Some(7788));
        assert_eq!(listing[1].state_label(), "Running");
        assert_eq!(listing[2].title, "Pilot_1810_1300");
        assert_eq!(listing[2].state_label(), "Stopped");
    }

    #[test]
    fn listing_of_empty_output_is_empty() {
        assert!(parse_instance_listing("").is_empty());
        assert!(parse_instance_listing("\n\n").is_empty());
    }

    #[test]
    fn resolution_prefers_override_size() {
        assert_eq!(
            parse_resolution("Physical size: 1920x1080"),
            Some(Resolution::new(1920, 1080))
        );
        assert_eq!(
            parse_resolution("Physical size: 1920x1080\nOverride size: 1280x720"),
            Some(Resolution::new(1280, 720))
        );
        assert_eq!(parse_resolution("1600 x 900"), Some(Resolution::new(1600, 900)));
        assert_eq!(parse_resolution("error: device offline"), None);
        assert_eq!(parse_resolution("0x0"), None);
    }

    #[test]
    fn clone_output_yields_new_index() {
        assert_eq!(parse_clone_output("SUCCESS: clone instance 7"), Some(7));
        assert_eq!(parse_clone_output("ERROR: clone failed"), None);
        assert_eq!(parse_clone_output(""), None);
    }

    #[test]
    fn proxy_unset_values() {
        assert_eq!(parse_proxy(":0\n"), None);
        assert_eq!(parse_proxy("null"), None);
        assert_eq!(
            parse_proxy("10.0.0.2:8080"),
            Some("10.0.0.2:8080".to_string())
        );
    }
}
