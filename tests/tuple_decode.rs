// Tuple-level decode behavior through the public api surface.
use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use tuple_reader::api::{
    DecodeConfig, DecodedBody, FailureKind, GetOptions, Stage, StreamFailure, dechunk,
    decode_body, decode_stream, decode_tuple, derive_flags, path, process_tuple,
};

fn b64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

#[test]
fn plain_json_components_decode_and_other_keys_are_untouched() {
    let mut tuple = json!({
        "connectionId": "0242acfffe1d0008-0000000a-00000003-5e5e0b5b0d1a9f32-2d3a94fc.1",
        "numRequests": 1,
        "sourceRequest": {
            "Request-URI": "/movies/_doc/1",
            "Method": "PUT",
            "Content-Type": "application/json",
            "body": b64(r#"{"title":"Dune","year":1965}"#)
        },
        "sourceResponse": {
            "HTTP-Version": "HTTP/1.1",
            "Status-Code": 201,
            "content-type": "application/json",
            "body": b64(r#"{"result":"created"}"#)
        },
        "targetRequest": {
            "Request-URI": "/movies/_doc/1",
            "Content-Type": "application/json",
            "body": b64(r#"{"title":"Dune","year":1965}"#)
        },
        "targetResponses": [
            {"Content-Type": "application/json", "body": b64(r#"{"result":"created"}"#)}
        ]
    });
    let before = tuple.clone();

    let stats = decode_tuple(&mut tuple, 1);
    assert_eq!(stats.decoded, 4);
    assert!(stats.failures.is_empty());

    assert_eq!(tuple["sourceRequest"]["body"], json!({"title": "Dune", "year": 1965}));
    assert_eq!(tuple["sourceResponse"]["body"], json!({"result": "created"}));
    assert_eq!(tuple["targetResponses"][0]["body"], json!({"result": "created"}));

    let mut restored = tuple.clone();
    for body_path in [
        "sourceRequest.body",
        "sourceResponse.body",
        "targetRequest.body",
        "targetResponses.0.body",
    ] {
        let original = path::get(body_path, &before, GetOptions::required())
            .unwrap()
            .unwrap()
            .clone();
        path::set(body_path, &mut restored, original).unwrap();
    }
    assert_eq!(restored, before);
}

#[test]
fn json_values_survive_encode_then_decode() {
    let flags = derive_flags(&json!({"Content-Type": "application/json"}), false);
    for value in [
        json!({"nested": {"list": [1, 2.5, "three", null, true]}}),
        json!([{"a": 1}, {"b": [2]}]),
        json!("just a string"),
        json!(12345678901234567890u64),
    ] {
        let body = Value::String(b64(&value.to_string()));
        let decoded = decode_body(&body, flags, "sourceRequest", 1).unwrap();
        assert_eq!(decoded.into_value(), value);
    }
}

#[test]
fn non_json_content_type_keeps_text_verbatim() {
    let flags = derive_flags(&json!({"Content-Type": "text/plain"}), false);
    let text = r#"{"looks":"like json"}"#;
    let decoded = decode_body(&Value::String(b64(text)), flags, "sourceResponse", 9).unwrap();
    assert_eq!(decoded, DecodedBody::Text(text.to_string()));
}

#[test]
fn chunked_wire_example_dechunks() {
    let out = dechunk(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n").unwrap();
    assert_eq!(out, b"Wikipedia");
}

#[test]
fn bulk_request_decodes_to_ordered_documents() {
    let mut tuple = json!({
        "sourceRequest": {
            "Request-URI": "/_bulk?refresh=true",
            "Content-Type": "application/json",
            "body": b64("{\"index\":{}}\n{\"a\":1}\n")
        }
    });
    let stats = decode_tuple(&mut tuple, 3);
    assert!(stats.failures.is_empty());
    assert_eq!(tuple["sourceRequest"]["body"], json!([{"index": {}}, {"a": 1}]));
}

#[test]
fn chunked_gzipped_json_response_decodes() {
    let compressed = gzip(br#"{"hits":{"total":3}}"#);
    let (head, tail) = compressed.split_at(compressed.len() / 2);
    let mut framed = Vec::new();
    for part in [head, tail] {
        framed.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        framed.extend_from_slice(part);
        framed.extend_from_slice(b"\r\n");
    }
    framed.extend_from_slice(b"0\r\n\r\n");

    let mut tuple = json!({
        "sourceRequest": {"Request-URI": "/idx/_search"},
        "sourceResponse": {
            "Content-Type": "application/json",
            "Transfer-Encoding": "chunked",
            "Content-Encoding": "gzip",
            "body": STANDARD.encode(&framed)
        }
    });
    let stats = decode_tuple(&mut tuple, 1);
    assert!(stats.failures.is_empty(), "{:?}", stats.failures);
    assert_eq!(tuple["sourceResponse"]["body"], json!({"hits": {"total": 3}}));
}

#[test]
fn malformed_base64_is_isolated_to_its_component() {
    let input = [
        json!({
            "sourceRequest": {
                "Request-URI": "/idx/_doc",
                "Content-Type": "application/json",
                "body": b64(r#"{"ok":true}"#)
            },
            "sourceResponse": {"Content-Type": "application/json", "body": "not*base64"},
            "targetResponses": [{"Content-Type": "application/json", "body": b64("{}")}]
        }),
        json!({
            "sourceRequest": {
                "Request-URI": "/idx/_doc",
                "Content-Type": "application/json",
                "body": b64(r#"{"n":2}"#)
            }
        }),
    ]
    .iter()
    .map(Value::to_string)
    .collect::<Vec<_>>()
    .join("\n");

    let mut out = Vec::new();
    let mut failures = Vec::new();
    decode_stream(input.as_bytes(), &mut out, DecodeConfig::default(), |failure| {
        failures.push(failure)
    })
    .unwrap();
    let lines: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines[0]["sourceResponse"]["body"], "not*base64");
    assert_eq!(lines[0]["sourceRequest"]["body"], json!({"ok": true}));
    assert_eq!(lines[0]["targetResponses"][0]["body"], json!({}));
    assert_eq!(lines[1]["sourceRequest"]["body"], json!({"n": 2}));

    assert_eq!(failures.len(), 1);
    let StreamFailure::Field(record) = &failures[0] else {
        panic!("expected a field failure, got {:?}", failures[0]);
    };
    assert_eq!(record.line, 1);
    assert_eq!(record.component.as_deref(), Some("sourceResponse"));
    assert_eq!(record.kind, FailureKind::Decode(Stage::Base64));
    assert!(record.message.contains("sourceResponse"));
    assert!(record.message.contains("line 1"));
}

#[test]
fn missing_target_responses_stays_absent() {
    let line = json!({
        "sourceRequest": {"Request-URI": "/", "Content-Type": "application/json", "body": b64("[1]")},
        "targetRequest": {"Content-Type": "application/json", "body": b64("[2]")}
    })
    .to_string();
    let report = process_tuple(&line, 1).unwrap();
    assert!(report.failures.is_empty());
    assert!(report.tuple.get("targetResponses").is_none());
    assert!(report.tuple.get("sourceResponse").is_none());
    assert_eq!(report.tuple["sourceRequest"]["body"], json!([1]));
    assert_eq!(report.tuple["targetRequest"]["body"], json!([2]));
}

#[test]
fn missing_request_uri_returns_tuple_unmodified() {
    let tuple = json!({
        "sourceRequest": {"Method": "GET", "Content-Type": "application/json", "body": b64("{}")},
        "sourceResponse": {"Content-Type": "application/json", "body": b64("{}")},
        "targetResponses": [{"Content-Type": "text/plain", "body": b64("x")}]
    });
    let report = process_tuple(&tuple.to_string(), 8).unwrap();
    assert_eq!(report.tuple, tuple);
    assert_eq!(report.decoded, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.short_circuited());
    assert!(report.failures[0].message.contains("Request-URI"));
}

#[test]
fn written_tuples_keep_key_order_and_number_text() {
    // Compared as text: `Value` equality ignores object key order.
    let line = format!(
        concat!(
            r#"{{"zeta":1,"#,
            r#""sourceRequest":{{"Request-URI":"/idx/_doc","body":"{req}","Content-Type":"application/json","Host":"a"}},"#,
            r#""mid":[2.50,7],"#,
            r#""targetResponses":[{{"status":200,"content-type":"application/json","body":"{resp}","x-trace":"t"}}],"#,
            r#""alpha":2.50}}"#
        ),
        req = b64(r#"{"price":2.50,"b":1,"a":2}"#),
        resp = b64(r#"{"z":0,"y":[1.10]}"#),
    );
    let expected = concat!(
        r#"{"zeta":1,"#,
        r#""sourceRequest":{"Request-URI":"/idx/_doc","body":{"price":2.50,"b":1,"a":2},"Content-Type":"application/json","Host":"a"},"#,
        r#""mid":[2.50,7],"#,
        r#""targetResponses":[{"status":200,"content-type":"application/json","body":{"z":0,"y":[1.10]},"x-trace":"t"}],"#,
        r#""alpha":2.50}"#,
        "\n"
    );

    let mut out = Vec::new();
    let summary = decode_stream(line.as_bytes(), &mut out, DecodeConfig::default(), |_| {}).unwrap();
    assert_eq!(summary.components_decoded, 2);
    assert_eq!(String::from_utf8(out).unwrap(), expected);
}
