//! Subject names for every protocol role.
//!
//! These strings are the wire contract with the Soren host and must not
//! change. Control-plane subjects live under `soren.v2`, execution-plane
//! subjects under `soren.cpu`.

/// Root namespace shared by all plugin subjects.
pub const NAMESPACE: &str = "soren";

/// Submit subject suffix used when settings declare no `reply_to`.
pub const DEFAULT_SETTINGS_REPLY_TO: &str = "_settings.config.submit";

fn control(plugin_id: &str, suffix: &str) -> String {
    format!("{NAMESPACE}.v2.{plugin_id}.{suffix}")
}

fn execution(plugin_id: &str, suffix: &str) -> String {
    format!("{NAMESPACE}.cpu.{plugin_id}.{suffix}")
}

pub fn intro(plugin_id: &str) -> String {
    control(plugin_id, "@intro")
}

pub fn settings(plugin_id: &str) -> String {
    control(plugin_id, "@settings")
}

pub fn actions_list(plugin_id: &str) -> String {
    control(plugin_id, "@actions")
}

/// Subject the host queries for the input form of one action.
pub fn form(plugin_id: &str, method: &str) -> String {
    control(plugin_id, &format!("{method}.@form"))
}

/// Subject the host sends action invocations to.
pub fn execute(plugin_id: &str, method: &str) -> String {
    execution(plugin_id, method)
}

/// Subject for one job command, e.g. `soren.cpu.<id>.<job>.progress`.
pub fn job(plugin_id: &str, job_id: &str, command: &str) -> String {
    execution(plugin_id, &format!("{job_id}.{command}"))
}

/// Wildcard matching every command of one job.
pub fn job_wildcard(plugin_id: &str, job_id: &str) -> String {
    job(plugin_id, job_id, "*")
}

/// Control-plane subject with an arbitrary suffix (requirements and settings submit).
pub fn custom(plugin_id: &str, suffix: &str) -> String {
    control(plugin_id, suffix)
}

pub fn event_log(event_channel: &str, plugin_id: &str) -> String {
    format!("{event_channel}.{plugin_id}.log")
}

/// Resolve the settings submit suffix, falling back to the default when unset or empty.
pub fn settings_reply_to(reply_to: Option<&str>) -> &str {
    match reply_to {
        Some(reply_to) if !reply_to.is_empty() => reply_to,
        _ => DEFAULT_SETTINGS_REPLY_TO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_subjects() {
        assert_eq!(intro("abc"), "soren.v2.abc.@intro");
        assert_eq!(settings("abc"), "soren.v2.abc.@settings");
        assert_eq!(actions_list("abc"), "soren.v2.abc.@actions");
        assert_eq!(form("abc", "scan"), "soren.v2.abc.scan.@form");
        assert_eq!(
            custom("abc", DEFAULT_SETTINGS_REPLY_TO),
            "soren.v2.abc._settings.config.submit"
        );
    }

    #[test]
    fn execution_plane_subjects() {
        assert_eq!(execute("abc", "scan.gen.graph"), "soren.cpu.abc.scan.gen.graph");
        assert_eq!(job("abc", "j1", "progress"), "soren.cpu.abc.j1.progress");
        assert_eq!(job("abc", "j1", "context/path"), "soren.cpu.abc.j1.context/path");
        assert_eq!(job_wildcard("abc", "j1"), "soren.cpu.abc.j1.*");
    }

    #[test]
    fn method_subjects_are_distinct_per_method() {
        let methods = ["prepare", "scan", "scan.gen", "scan.gen.graph", ""];
        for (i, a) in methods.iter().enumerate() {
            for b in methods.iter().skip(i + 1) {
                assert_ne!(execute("p", a), execute("p", b));
                assert_ne!(form("p", a), form("p", b));
            }
            assert_eq!(execute("p", a), execute("p", a));
        }
    }

    #[test]
    fn empty_and_missing_reply_to_share_default() {
        assert_eq!(settings_reply_to(None), DEFAULT_SETTINGS_REPLY_TO);
        assert_eq!(settings_reply_to(Some("")), DEFAULT_SETTINGS_REPLY_TO);
        assert_eq!(settings_reply_to(Some("custom.submit")), "custom.submit");
    }

    #[test]
    fn event_log_subject() {
        assert_eq!(event_log("soren.events", "abc"), "soren.events.abc.log");
    }
}
