//! Unit tests for `AppError` display format and conversions.

use replmux::AppError;

#[test]
fn display_prefixes_match_variant() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Discovery("x".into()), "discovery: x"),
        (AppError::BadEndpoint("x".into()), "bad endpoint: x"),
        (AppError::Handshake("x".into()), "handshake: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::NotConnected("x".into()), "not connected: x"),
        (AppError::Ipc("x".into()), "ipc: x"),
        (AppError::Io("x".into()), "io: x"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn message_has_no_trailing_period() {
    let err = AppError::Transport("connection reset".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe gone")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err: AppError = parse_err.into();
    assert!(err.to_string().starts_with("config: invalid config:"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Handshake("no session".into()));
}
