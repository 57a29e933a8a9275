//! End-to-end parser behavior: chunk boundaries, reset, pipelining and
//! parse/generate round trips

use bytes::{BufMut, BytesMut};
use proptest::prelude::*;
use siplet_sip_core::prelude::*;
use siplet_sip_core::{BadMessage, State};

const INVITE: &[u8] = b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds;received=192.0.2.1\r\n\
Via: SIP/2.0/UDP bigbox3.site3.atlanta.com;branch=z9hG4bK77ef4c2312983.1\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.com>\r\n\
From: \"Alice Liddell\" <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@pc33.atlanta.com>\r\n\
Subject: lunch\r\n\
 tomorrow?\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 32\r\n\
\r\n\
v=0\r\no=alice 2890844526 IN IP4\r\n";

const RINGING: &[u8] = b"SIP/2.0 180 Ringing\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
To: Bob <sip:bob@biloxi.com>;tag=a6c85cf\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Content-Length: 0\r\n\
\r\n";

const MESSAGE: &[u8] = b"MESSAGE sip:bob@biloxi.com SIP/2.0\r\n\
Via: SIP/2.0/TCP pc33.atlanta.com;branch=z9hG4bKnashds8;rport\r\n\
Max-Forwards: 70\r\n\
From: Alice Liddell <sip:alice@atlanta.com>;tag=49583\r\n\
To: \"Bob, B.\" <sip:bob@biloxi.com>\r\n\
Call-ID: asd88asd77a@1.2.3.4\r\n\
CSeq: 1 MESSAGE\r\n\
Content-Type: text/plain\r\n\
Content-Length: 5\r\n\
\r\n\
hello";

/// Result of parsing one message
#[derive(Debug, PartialEq)]
enum Outcome {
    Message(SipMessage),
    Bad(BadMessage),
}

fn take_outcome(builder: &mut MessageBuilder) -> Outcome {
    match (builder.take_message(), builder.take_bad()) {
        (Some(message), None) => Outcome::Message(message),
        (None, Some(bad)) => Outcome::Bad(bad),
        other => panic!("unexpected builder result {:?}", other),
    }
}

fn parse_whole(input: &[u8]) -> (Outcome, BytesMut) {
    let mut parser = SipParser::new();
    let mut builder = MessageBuilder::new(Framing::Stream);
    let mut buf = BytesMut::from(input);
    assert!(parser.parse_next(&mut buf, &mut builder));
    (take_outcome(&mut builder), buf)
}

/// Feed `input` in pieces, cutting at every offset in `cuts`
fn parse_chunked(input: &[u8], cuts: &[usize]) -> Outcome {
    let mut parser = SipParser::new();
    let mut builder = MessageBuilder::new(Framing::Stream);
    let mut buf = BytesMut::new();
    let mut start = 0;
    let mut bounds: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
    bounds.sort_unstable();
    bounds.push(input.len());
    for end in bounds {
        if end < start {
            continue;
        }
        buf.put_slice(&input[start..end]);
        start = end;
        if parser.parse_next(&mut buf, &mut builder) {
            return take_outcome(&mut builder);
        }
    }
    panic!("message never completed, parser in {:?}", parser.state());
}

#[test]
fn test_full_invite() {
    let (outcome, rest) = parse_whole(INVITE);
    assert!(rest.is_empty());
    let message = match outcome {
        Outcome::Message(message) => message,
        Outcome::Bad(bad) => panic!("bad message {:?}", bad),
    };
    let request = message.as_request().unwrap();
    assert_eq!(request.vias().len(), 2);
    assert_eq!(request.top_via().unwrap().received(), Some("192.0.2.1"));
    assert_eq!(
        request.from_header().unwrap().display_name(),
        Some("Alice Liddell")
    );
    assert_eq!(request.header_text(&HeaderName::Subject), Some("lunch tomorrow?"));
    assert_eq!(request.body().len(), 32);
}

#[test]
fn test_pipelined_messages_share_one_parser() {
    let mut input = BytesMut::new();
    input.put_slice(RINGING);
    input.put_slice(b"\r\n");
    input.put_slice(INVITE);

    let mut parser = SipParser::new();
    let mut builder = MessageBuilder::new(Framing::Stream);
    assert!(parser.parse_next(&mut input, &mut builder));
    let first = builder.take_message().unwrap();
    assert!(!first.is_request());

    parser.reset();
    builder.reset();
    assert!(parser.parse_next(&mut input, &mut builder));
    let second = builder.take_message().unwrap();
    assert!(second.is_request());
    assert!(input.is_empty());
}

#[test]
fn test_reset_matches_fresh_parser() {
    let mut parser = SipParser::new();
    let mut builder = MessageBuilder::new(Framing::Stream);

    let mut a = BytesMut::from(INVITE);
    assert!(parser.parse_next(&mut a, &mut builder));
    let _ = builder.take_message();
    parser.reset();
    builder.reset();

    let mut b = BytesMut::from(RINGING);
    assert!(parser.parse_next(&mut b, &mut builder));
    let reused = take_outcome(&mut builder);
    let (fresh, _) = parse_whole(RINGING);
    assert_eq!(reused, fresh);
    assert_eq!(parser.state(), State::End);
}

#[test]
fn test_garbage_leaves_next_message_intact() {
    let mut input = BytesMut::new();
    input.put_slice(b"\x01\x02\xff garbage\r\n");
    input.put_slice(RINGING);

    let mut parser = SipParser::new();
    let mut builder = MessageBuilder::new(Framing::Stream);
    assert!(parser.parse_next(&mut input, &mut builder));
    assert_eq!(parser.state(), State::End);
    let bad = builder.take_bad().unwrap();
    assert_eq!(bad.status, 400);
    assert!(bad.request.is_none());

    parser.reset();
    builder.reset();
    assert!(parser.parse_next(&mut input, &mut builder));
    assert!(builder.take_message().is_some());
}

#[test]
fn test_round_trip_through_generator() {
    let (outcome, _) = parse_whole(INVITE);
    let original = match outcome {
        Outcome::Message(message) => message,
        Outcome::Bad(bad) => panic!("bad message {:?}", bad),
    };
    let wire = Generator::new().to_bytes(&original, 4096).unwrap();
    let (again, _) = parse_whole(&wire);
    assert_eq!(again, Outcome::Message(original.clone()));

    let compact = Generator::new()
        .with_header_form(siplet_sip_core::HeaderForm::Compact)
        .to_bytes(&original, 4096)
        .unwrap();
    assert!(compact.len() < wire.len());
    let (again, _) = parse_whole(&compact);
    assert_eq!(again, Outcome::Message(original));

    for wire in [RINGING, MESSAGE] {
        let message = match parse_whole(wire).0 {
            Outcome::Message(message) => message,
            Outcome::Bad(bad) => panic!("bad message {:?}", bad),
        };
        let regenerated = Generator::new().to_bytes(&message, 4096).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&regenerated),
            String::from_utf8_lossy(wire)
        );
    }
}

#[test]
fn test_udp_mtu_overflow_is_signalled() {
    let mut request = Request::new(Method::Message, "sip:bob@biloxi.com".parse().unwrap());
    request.set_body(vec![b'a'; 1600], Some("text/plain")).unwrap();
    let err = Generator::new()
        .to_bytes(&SipMessage::Request(request), 1500)
        .unwrap_err();
    assert!(err.is_message_too_long());
}

proptest! {
    #[test]
    fn prop_chunk_boundaries_do_not_change_the_result(
        cuts in proptest::collection::vec(any::<usize>(), 0..12)
    ) {
        let (whole, _) = parse_whole(INVITE);
        prop_assert_eq!(parse_chunked(INVITE, &cuts), whole);
    }

    #[test]
    fn prop_single_byte_feeding_of_responses(
        cut in 0usize..RINGING.len()
    ) {
        let (whole, _) = parse_whole(RINGING);
        let cuts: Vec<usize> = (cut..RINGING.len()).collect();
        prop_assert_eq!(parse_chunked(RINGING, &cuts), whole);
    }

    #[test]
    fn prop_unknown_bytes_reach_end(data in proptest::collection::vec(1u8..32, 1..64)) {
        prop_assume!(data[0] != b'\r' && data[0] != b'\n');
        let mut buf = BytesMut::from(&data[..]);
        let mut parser = SipParser::new();
        let mut builder = MessageBuilder::new(Framing::Datagram);
        prop_assert!(parser.parse_next(&mut buf, &mut builder));
        prop_assert!(builder.take_bad().is_some());
    }
}
