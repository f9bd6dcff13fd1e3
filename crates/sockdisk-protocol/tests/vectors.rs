use sockdisk_protocol::{
    decode_request, encode_len_prefix, encode_read_request, encode_write_request, read_len_prefix,
    Error, ReadRequest, Request, WriteRequest, CMD_WRITE, READ_REQUEST_LEN,
};

const SECTOR_SIZE: usize = 8;

#[test]
fn read_request_vectors() {
    // (origin, ahead, expected wire bytes)
    let vectors: &[(u32, u8, [u8; READ_REQUEST_LEN])] = &[
        (0, 1, [1, 0, 0, 0, 0, 1]),
        (0, 255, [1, 0, 0, 0, 0, 255]),
        (510, 255, [1, 0xFE, 0x01, 0, 0, 255]),
        (8, 4, [1, 8, 0, 0, 0, 4]),
        (0xFFFF_FF00, 128, [1, 0x00, 0xFF, 0xFF, 0xFF, 128]),
    ];

    for &(origin, ahead, expected) in vectors {
        let encoded = encode_read_request(origin, ahead).unwrap();
        assert_eq!(encoded, expected, "origin={origin} ahead={ahead}");

        match decode_request(&encoded, SECTOR_SIZE).unwrap() {
            Request::Read(ReadRequest {
                origin: o,
                ahead_range: a,
            }) => {
                assert_eq!(o, origin);
                assert_eq!(a, ahead);
            }
            other => panic!("expected read request, decoded {other:?}"),
        }
    }
}

#[test]
fn write_request_vectors() {
    let payload = *b"ABCDEFGH";
    let encoded = encode_write_request(0x0201, &payload).unwrap();
    assert_eq!(&encoded[..5], &[CMD_WRITE, 0x01, 0x02, 0, 0]);
    assert_eq!(&encoded[5..], &payload);

    match decode_request(&encoded, SECTOR_SIZE).unwrap() {
        Request::Write(WriteRequest {
            sector,
            payload: decoded,
        }) => {
            assert_eq!(sector, 0x0201);
            assert_eq!(decoded, &payload);
        }
        other => panic!("expected write request, decoded {other:?}"),
    }
}

#[test]
fn len_prefix_reassembles_from_chunked_bytes() {
    // The transport may deliver the prefix in 1..3 byte pieces; reassembly of
    // the four bytes must be order- and chunking-insensitive.
    let pieces: [&[u8]; 3] = [&[1], &[2], &[3, 4]];
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    for piece in pieces {
        prefix[filled..filled + piece.len()].copy_from_slice(piece);
        filled += piece.len();
    }
    assert_eq!(filled, 4);
    assert_eq!(read_len_prefix(prefix), 0x0403_0201);
}

#[test]
fn decode_rejects_malformed_requests() {
    assert_eq!(
        decode_request(&[], SECTOR_SIZE),
        Err(Error::RequestTooShort { len: 0 })
    );
    assert_eq!(
        decode_request(&[1, 0, 0, 0, 0], SECTOR_SIZE),
        Err(Error::ReadRequestWrongLen { len: 5 })
    );
    assert_eq!(
        decode_request(&[1, 0, 0, 0, 0, 4, 9], SECTOR_SIZE),
        Err(Error::ReadRequestWrongLen { len: 7 })
    );
    assert_eq!(
        decode_request(&[1, 0, 0, 0, 0, 0], SECTOR_SIZE),
        Err(Error::ZeroAheadRange)
    );
    assert_eq!(
        decode_request(&[1, 3, 0, 0, 0, 4], SECTOR_SIZE),
        Err(Error::UnalignedOrigin {
            origin: 3,
            ahead_range: 4
        })
    );
    assert_eq!(
        decode_request(&[2, 0, 0, 0, 0, 1, 2, 3], SECTOR_SIZE),
        Err(Error::WriteRequestWrongLen {
            len: 8,
            expected: 13
        })
    );
    assert_eq!(
        decode_request(&[9, 0, 0, 0, 0, 1], SECTOR_SIZE),
        Err(Error::UnknownCommand { command: 9 })
    );
}

#[test]
fn encode_write_rejects_oversized_payload() {
    let oversized = vec![0u8; sockdisk_protocol::MAX_PAYLOAD_LEN + 1];
    assert!(matches!(
        encode_write_request(0, &oversized),
        Err(Error::PayloadTooLarge { .. })
    ));
    assert!(matches!(
        encode_write_request(0, &[]),
        Err(Error::PayloadTooLarge { .. })
    ));
}
