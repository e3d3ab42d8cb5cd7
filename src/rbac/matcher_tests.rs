use super::*;

#[test]
fn wildcard_patterns() {
    assert!(resource_matches("*", "anything/at/all"));
    assert!(resource_matches("dev/app1", "dev/app1"));
    assert!(resource_matches("dev/*", "dev/app1"));
    assert!(resource_matches("dev/*", "dev/team/app1"));
    assert!(!resource_matches("dev/*", "prod/app1"));
    assert!(!resource_matches("dev/*", "xdev/app1"));
    assert!(resource_matches("*/network", "prod/network"));
    assert!(!resource_matches("dev.app", "devXapp"), "dots are literal");
    assert!(!resource_matches("dev/app", "dev/app1"));
}

#[test]
fn glob_regex_is_anchored() {
    let rx = glob_to_regex("team/*").unwrap();
    assert!(rx.is_match("team/a"));
    assert!(!rx.is_match("my-team/a"));
}

#[test]
fn rule_needs_action_and_resource() {
    let rule = PermissionRule::allow(&[Action::Read], &["dev/*"]);
    assert!(rule_matches(&rule, Action::Read, "dev/app1"));
    assert!(!rule_matches(&rule, Action::Write, "dev/app1"));
    assert!(!rule_matches(&rule, Action::Read, "prod/app1"));

    let any = PermissionRule::allow(&[Action::All], &["*"]);
    assert!(rule_matches(&any, Action::Delete, "x"));
}

#[test]
fn deny_overrides_earlier_allow() {
    let rules = vec![
        PermissionRule::allow(&[Action::Read, Action::Write], &["prod/*"]),
        PermissionRule::deny(&[Action::Write], &["prod/core"]),
    ];
    assert!(decide(&rules, Action::Write, "prod/app"));
    assert!(!decide(&rules, Action::Write, "prod/core"));
    assert!(decide(&rules, Action::Read, "prod/core"));
}

#[test]
fn default_is_deny() {
    assert!(!decide(&[], Action::Read, "anything"));
    let rules = vec![PermissionRule::allow(&[Action::Read], &["dev/*"])];
    assert!(!decide(&rules, Action::Read, "prod/app1"));
}

#[test]
fn dotted_action_names_deserialize() {
    let rule: PermissionRule = serde_json::from_str(
        r#"{"actions":["unit.read","lock","*"],"resources":["dev/*"],"effect":"allow"}"#,
    )
    .unwrap();
    assert_eq!(rule.actions, vec![Action::Read, Action::Lock, Action::All]);
    assert_eq!(serde_json::to_string(&Action::Manage).unwrap(), "\"manage\"");
}
