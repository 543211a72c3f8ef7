mod common;
use common::*;

use bytes::BytesMut;
use lxp_poller::lxp::checksum::checksum;
use lxp_poller::lxp::packet::*;
use lxp_poller::lxp::packet_decoder::PacketDecoder;
use lxp_poller::prelude::*;
use tokio_util::codec::Decoder;

#[tokio::test]
async fn read_request_layout() {
    common_setup();

    let frame = TcpFrameFactory::read_request(
        Factory::serial(),
        Factory::datalog(),
        40,
        40,
        DeviceFunction::ReadInput,
    );

    assert_eq!(frame.len(), 38);
    assert_eq!(frame[0..2], PREFIX);
    assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 32);
    assert_eq!(frame[7], 194);
    assert_eq!(&frame[8..18], Factory::datalog().as_bytes());
    assert_eq!(u16::from_le_bytes([frame[18], frame[19]]), 18);
    assert_eq!(
        u16::from_le_bytes([frame[36], frame[37]]),
        checksum(&frame[20..36])
    );
}

#[tokio::test]
async fn read_request_round_trip() {
    common_setup();

    let frame = TcpFrameFactory::read_request(
        Factory::serial(),
        Factory::datalog(),
        40,
        40,
        DeviceFunction::ReadInput,
    );
    let td = translated_data(&frame);

    assert_eq!(td.register(), 40);
    assert_eq!(td.device_function(), DeviceFunction::ReadInput);
    assert_eq!(td.inverter(), Factory::serial());
    assert_eq!(td.datalog(), Factory::datalog());
    assert_eq!(td.values, vec![40, 0]);
}

#[tokio::test]
async fn write_request_round_trip() {
    common_setup();

    let frame = TcpFrameFactory::write_request(Factory::serial(), Factory::datalog(), 21, 0x1234);
    let td = translated_data(&frame);

    assert_eq!(td.device_function(), DeviceFunction::WriteSingle);
    assert_eq!(td.register(), 21);
    assert_eq!(td.pairs(), vec![(21, 0x1234)]);
}

#[tokio::test]
async fn parses_inverter_response() {
    common_setup();

    let values = Factory::payload(80, &[(0, 9), (7, 500)]);
    let frame = Factory::response(DeviceFunction::ReadInput, 0, &values);
    let td = translated_data(&frame);

    assert_eq!(td.protocol(), 2);
    assert_eq!(td.descriptor.address, 1);
    assert_eq!(td.register(), 0);
    assert_eq!(td.values, values);
    assert_eq!(td.pairs()[7], (7, 500));
}

#[tokio::test]
async fn short_input_is_incomplete() {
    common_setup();

    let frame = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    for len in 0..RESPONSE_MIN_LEN {
        assert!(
            matches!(Parser::parse(&frame[..len]), Err(LxpError::Incomplete)),
            "len {}",
            len
        );
    }
    // long enough to read the header but short of the declared length
    assert!(matches!(
        Parser::parse(&frame[..frame.len() - 1]),
        Err(LxpError::Incomplete)
    ));
}

#[tokio::test]
async fn short_heartbeat_shaped_input_is_incomplete() {
    common_setup();

    // a heartbeat followed by the start of the next frame
    let mut buffer = Factory::heartbeat();
    buffer.extend_from_slice(&[0xA1, 0x1A, 0x02, 0x00, 0x0D, 0x00, 0x01, 0xC1]);
    buffer.resize(RESPONSE_MIN_LEN, 0);

    for len in 0..RESPONSE_MIN_LEN {
        let result = Parser::parse(&buffer[..len]);
        if len == HEARTBEAT_LEN {
            assert!(matches!(result, Ok(Packet::Heartbeat(_))), "len {}", len);
        } else {
            assert!(matches!(result, Err(LxpError::Incomplete)), "len {}: {:?}", len, result);
        }
    }
}

#[tokio::test]
async fn bad_prefix() {
    common_setup();

    let mut frame = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    frame[0] = 0x00;
    assert!(matches!(Parser::parse(&frame), Err(LxpError::BadPrefix)));
}

#[tokio::test]
async fn corrupted_byte_fails_checksum() {
    common_setup();

    let frame = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    for i in HEADER_LEN..frame.len() - 2 {
        let mut corrupt = frame.clone();
        corrupt[i] ^= 0x55;
        assert!(
            matches!(Parser::parse(&corrupt), Err(LxpError::ChecksumError { .. })),
            "byte {}",
            i
        );
    }
}

#[tokio::test]
async fn trailing_bytes_are_a_length_mismatch() {
    common_setup();

    let mut frame = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    frame.push(0);
    assert!(matches!(
        Parser::parse(&frame),
        Err(LxpError::LengthMismatch {
            declared: 117,
            actual: 118
        })
    ));
}

#[tokio::test]
async fn unknown_tcp_function() {
    common_setup();

    let mut frame = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    frame[7] = 195;
    assert!(matches!(
        Parser::parse(&frame),
        Err(LxpError::UnexpectedFunction(195))
    ));
}

#[tokio::test]
async fn exception_response_is_rejected() {
    common_setup();

    let frame = Factory::response_raw(0x84, 0, &[0; 2]);
    assert!(matches!(
        Parser::parse(&frame),
        Err(LxpError::UnexpectedFunction(0x84))
    ));
}

#[tokio::test]
async fn heartbeat_is_kept_verbatim() {
    common_setup();

    let frame = Factory::heartbeat();
    assert_eq!(frame.len(), HEARTBEAT_LEN);

    match Parser::parse(&frame) {
        Ok(Packet::Heartbeat(hb)) => {
            assert_eq!(hb.datalog(), Factory::datalog());
            assert_eq!(hb.bytes, frame);
            assert_eq!(TcpFrameFactory::heartbeat_echo(&hb), frame);
        }
        other => panic!("expected heartbeat, got {:?}", other),
    }
}

#[tokio::test]
async fn decoder_splits_stream() {
    common_setup();

    let response = Factory::response(DeviceFunction::ReadInput, 40, &[0; 80]);
    let heartbeat = Factory::heartbeat();

    let mut stream = vec![0xFF, 0x00];
    stream.extend_from_slice(&heartbeat);
    stream.extend_from_slice(&response);

    let mut decoder = PacketDecoder::new();
    let mut buf = BytesMut::new();
    let mut packets = Vec::new();

    // three bytes at a time, as a slow socket might deliver them
    for chunk in stream.chunks(3) {
        buf.extend_from_slice(chunk);
        while let Some(packet) = decoder.decode(&mut buf).unwrap() {
            packets.push(packet);
        }
    }

    assert_eq!(packets.len(), 2);
    assert!(matches!(packets[0], Packet::Heartbeat(_)));
    match &packets[1] {
        Packet::TranslatedData(td) => assert_eq!(td.register(), 40),
        other => panic!("expected translated data, got {:?}", other),
    }
    assert_eq!(decoder.discarded(), 2);
    assert!(buf.is_empty());
}

#[tokio::test]
async fn decoder_continues_after_bad_checksum() {
    common_setup();

    let mut bad = Factory::response(DeviceFunction::ReadInput, 0, &[0; 80]);
    bad[40] ^= 0xFF;
    let good = Factory::response(DeviceFunction::ReadInput, 40, &[0; 80]);

    let mut buf = BytesMut::from(&bad[..]);
    buf.extend_from_slice(&good);

    let mut decoder = PacketDecoder::new();
    assert!(matches!(
        decoder.decode(&mut buf),
        Err(LxpError::ChecksumError { .. })
    ));
    assert!(matches!(
        decoder.decode(&mut buf),
        Ok(Some(Packet::TranslatedData(_)))
    ));
}
