//! Contract tests for the wire codec: golden JSON shapes in, validated
//! envelopes out, and byte-identical semantics back.

use relay_protocol::{
    decode_batch_request, decode_request, decode_response, encode_request, encode_response,
    error_codes, BatchResponse, Meta, ProtocolError, Request, Response, RpcError,
};
use serde_json::{json, Value};

/// Helper: decode, re-encode, and compare as JSON values.
fn round_trip_request(text: &str) -> Request {
    let request = decode_request(text).expect("request should decode");
    let encoded = encode_request(&request).expect("request should encode");
    let original: Value = serde_json::from_str(text).unwrap();
    let round_tripped: Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(original, round_tripped, "round-trip mismatch for {text}");
    request
}

#[test]
fn full_request_round_trip() {
    let request = round_trip_request(
        r#"{"id":"req-1","method":"api.users.get","params":{"userId":"u-9"},"meta":{"timestamp":1700000000000,"traceId":"trace-1","token":"tok","headers":{"x-tenant":"t1"}}}"#,
    );
    assert_eq!(request.method, "api.users.get");
    let meta = request.meta.expect("meta should survive");
    assert_eq!(meta.trace_id.as_deref(), Some("trace-1"));
    assert_eq!(meta.token.as_deref(), Some("tok"));
}

#[test]
fn null_params_round_trip_absent_params_stay_absent() {
    let with_null = round_trip_request(r#"{"id":"r","method":"m","params":null}"#);
    assert_eq!(with_null.params, Some(Value::Null));

    let absent = round_trip_request(r#"{"id":"r","method":"m"}"#);
    assert_eq!(absent.params, None);
}

#[test]
fn rejection_matrix_for_requests() {
    let cases: &[&str] = &[
        "",
        "   ",
        "{",
        "null",
        "[1,2]",
        r#""just a string""#,
        r#"{"method":"m"}"#,
        r#"{"id":null,"method":"m"}"#,
        r#"{"id":5,"method":"m"}"#,
        r#"{"id":"","method":"m"}"#,
        r#"{"id":"r"}"#,
        r#"{"id":"r","method":null}"#,
        r#"{"id":"r","method":12}"#,
    ];
    for case in cases {
        assert!(
            decode_request(case).is_err(),
            "expected rejection for {case:?}"
        );
    }
}

#[test]
fn response_exactly_one_of_result_and_error() {
    assert!(decode_response(r#"{"id":"r","result":42}"#).is_ok());
    assert!(decode_response(r#"{"id":"r","error":{"code":-32603,"message":"x"}}"#).is_ok());
    // Void return: neither result nor error.
    assert!(decode_response(r#"{"id":"r"}"#).is_ok());
    assert!(decode_response(
        r#"{"id":"r","result":42,"error":{"code":-32603,"message":"x"}}"#
    )
    .is_err());
}

#[test]
fn encode_side_enforces_the_same_exclusivity() {
    // The constructors make an invalid envelope unrepresentable; a manually
    // assembled one still decodes as invalid.
    let bad = Response {
        id: Some("r".to_owned()),
        result: Some(json!(1)),
        error: Some(RpcError::internal("x")),
        meta: None,
    };
    let encoded = encode_response(&bad).unwrap();
    assert!(matches!(
        decode_response(&encoded),
        Err(ProtocolError::InvalidResponse(_))
    ));
}

#[test]
fn request_id_asymmetry_empty_request_id_rejected_empty_response_id_accepted() {
    assert!(decode_request(r#"{"id":"","method":"m"}"#).is_err());
    let broadcast = decode_response(r#"{"id":"","result":{"channel":"jobs","data":{}}}"#)
        .expect("broadcast envelope should decode");
    assert!(broadcast.is_broadcast());
}

#[test]
fn batch_request_members_validate_independently() {
    let batch = decode_batch_request(
        r#"{"id":"b1","requests":[{"id":"r1","method":"a.b.c","params":[1]},{"id":"r2","method":"a.b.d"}]}"#,
    )
    .unwrap();
    assert_eq!(batch.requests.len(), 2);
    assert!(!batch.aborts_on_error());

    assert!(decode_batch_request(r#"{"id":"b1","requests":[{"id":"r1"}]}"#).is_err());
    assert!(decode_batch_request(r#"{"id":"b1","requests":[]}"#).is_err());
    assert!(decode_batch_request(r#"{"requests":[{"id":"r1","method":"m"}]}"#).is_err());
    assert!(
        decode_batch_request(r#"{"id":"b1","requests":[{"id":"r1","method":"m"}],"abortOnError":"yes"}"#)
            .is_err()
    );
}

#[test]
fn batch_response_wire_shape_uses_camel_case_and_plain_fields() {
    let encoded = serde_json::to_value(BatchResponse {
        id: "b1".to_owned(),
        responses: vec![Response::success("r1", json!("ok"))],
        success: true,
        duration: None,
    })
    .unwrap();
    assert_eq!(encoded["id"], "b1");
    assert_eq!(encoded["success"], true);
    assert_eq!(encoded["responses"][0]["result"], "ok");
    assert!(encoded.get("duration").is_none());
}

#[test]
fn duration_meta_round_trips_on_responses() {
    let response = Response {
        meta: Some(Meta {
            duration: Some(18),
            ..Meta::default()
        }),
        ..Response::success("r1", json!(1))
    };
    let encoded = encode_response(&response).unwrap();
    assert!(encoded.contains(r#""duration":18"#));
    let decoded = decode_response(&encoded).unwrap();
    assert_eq!(decoded.meta.unwrap().duration, Some(18));
}

#[test]
fn error_codes_match_the_frozen_table() {
    let table: &[(i64, i64)] = &[
        (error_codes::PARSE_ERROR, -32700),
        (error_codes::INVALID_REQUEST, -32600),
        (error_codes::METHOD_NOT_FOUND, -32601),
        (error_codes::INVALID_PARAMS, -32602),
        (error_codes::INTERNAL_ERROR, -32603),
        (error_codes::UNAUTHORIZED, -32001),
        (error_codes::FORBIDDEN, -32002),
        (error_codes::NOT_FOUND, -32003),
        (error_codes::CONFLICT, -32004),
        (error_codes::RATE_LIMITED, -32005),
        (error_codes::TIMEOUT, -32006),
    ];
    for (actual, expected) in table {
        assert_eq!(actual, expected);
    }
}
