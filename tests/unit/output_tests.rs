use replmux::output::{OutputChannel, OutputLog};

#[test]
fn lines_are_kept_in_order() {
    let log = OutputLog::new(10);
    log.append_line("Hooking up nREPL sessions...");
    log.append_line("Connected session: primary");

    assert_eq!(
        log.lines(),
        vec![
            "Hooking up nREPL sessions...".to_owned(),
            "Connected session: primary".to_owned()
        ]
    );
    assert!(log.contains("session: primary"));
    assert!(!log.contains("secondary"));
}

#[test]
fn zero_capacity_still_keeps_latest_line() {
    let log = OutputLog::new(0);
    log.append_line("a");
    log.append_line("b");
    assert_eq!(log.lines(), vec!["b".to_owned()]);
}
