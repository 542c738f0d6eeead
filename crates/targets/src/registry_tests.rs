use super::*;

#[test]
fn known_target_is_found_by_name() {
    let target = get_target("victoriametrics").expect("registered");
    assert_eq!(target.name(), "victoriametrics");
    assert_eq!(
        target.flag_default("urls"),
        Some("http://localhost:8428/write")
    );
}

#[test]
fn unknown_target_lists_supported_formats() {
    let err = get_target("cassandra").err().expect("not registered");

    assert_eq!(err.name, "cassandra");
    let msg = err.to_string();
    assert!(msg.contains("cassandra"), "{msg}");
    assert!(msg.contains("victoriametrics"), "{msg}");
}

#[test]
fn registry_names_are_unique() {
    let mut names = supported_formats();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
}
