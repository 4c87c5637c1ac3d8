use hcsim_proto::*;

// Raw host page messages paired with the command they should decode to
pub fn sample_commands() -> Vec<(&'static str, ClientMessage)> {
    vec![
        (
            r#"{"type":"download","content":"ykm"}"#,
            ClientMessage::Download(DownloadTarget::One("ykm".to_string())),
        ),
        (
            r#"{"type":"download","content":["shandong-hc","weihai-hc"]}"#,
            ClientMessage::Download(DownloadTarget::Many(vec![
                "shandong-hc".to_string(),
                "weihai-hc".to_string(),
            ])),
        ),
        (r#"{"type":"clear"}"#, ClientMessage::Clear),
        (r#"{"type":"check"}"#, ClientMessage::Check),
    ]
}

// Payloads a host page might send that must be ignored
pub fn malformed_commands() -> Vec<&'static str> {
    vec![
        "",
        "not json",
        "null",
        "{}",
        r#"{"content":"ykm"}"#,
        r#"{"type":"progress","content":"0.50"}"#,
        r#"{"type":"download"}"#,
        r#"{"type":"download","content":42}"#,
        r#"{"type":"download","content":[1,2]}"#,
    ]
}
