//! Frame codec vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use wspoll_core::protocol::{extract_payload, parse_header, FrameError};

mod vector_loader;
use vector_loader::load;

#[test]
fn frame_vectors() {
    let files = [
        "text_unmasked.json",
        "text_masked_rfc.json",
        "ping_unmasked.json",
        "binary_len16.json",
        "text_first_fragment.json",
        "rsv1_set.json",
        "close_one_byte.json",
        "ping_one_byte.json",
        "pong_one_byte.json",
        "ping_too_long.json",
        "ping_not_final.json",
        "unknown_opcode.json",
        "truncated_payload.json",
        "header_one_byte.json",
        "header_len16_short.json",
        "header_mask_short.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();

        let Some(header) = parse_header(&raw) else {
            let err = v.expect_error.expect("header unexpectedly incomplete");
            assert_eq!(err.code, "HEADER_INCOMPLETE", "vector={}", v.description);
            continue;
        };
        let res = extract_payload(&raw, &header);

        if let Some(err) = v.expect_error {
            let code = match res.expect_err("expected error") {
                FrameError::Incomplete => "INCOMPLETE",
                FrameError::Protocol(violation) => violation.as_str(),
            };
            assert_eq!(code, err.code, "vector={}", v.description);
            continue;
        }

        let payload = res.expect("expected payload");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(header.fin, ex.fin, "vector={}", v.description);
        assert_eq!(header.rsv, ex.rsv, "vector={}", v.description);
        assert_eq!(header.opcode, ex.opcode, "vector={}", v.description);
        assert_eq!(header.masked, ex.masked, "vector={}", v.description);
        assert_eq!(header.length, ex.length, "vector={}", v.description);
        assert_eq!(hex::encode(&payload), ex.payload_hex, "vector={}", v.description);
        assert_eq!(header.frame_len() as usize, raw.len(), "vector={}", v.description);
    }
}
