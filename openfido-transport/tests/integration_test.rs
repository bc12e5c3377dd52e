//! End-to-end framing tests
//!
//! Drives each transport through its public link trait with an in-memory
//! link and a stub authenticator.

use std::collections::VecDeque;
use std::time::Duration;

use hex_literal::hex;
use openfido_transport::ble::{self, BleLink, BleTransport};
use openfido_transport::ctaphid::{BROADCAST_CID, PACKET_SIZE};
use openfido_transport::hid::{HidLink, HidTransport};
use openfido_transport::nfc::{NfcEvent, NfcLink, NfcTransport};
use openfido_transport::{Cmd, CommandHandler, Error, Message, Packet, Result, Transport, poll_all};

/// Answers getInfo with a canned body and U2F version with `U2F_V2`
#[derive(Default)]
struct StubAuthenticator {
    requests: Vec<(Cmd, Vec<u8>)>,
    cancels: u32,
}

impl CommandHandler for StubAuthenticator {
    fn handle_command(&mut self, cmd: Cmd, data: &[u8]) -> Result<Vec<u8>> {
        self.requests.push((cmd, data.to_vec()));
        match (cmd, data.first()) {
            (Cmd::Cbor, Some(0x04)) => Ok(hex!("00 a1 01 82 66 55 32 46 5f 56 32 68 46 49 44 4f 5f 32 5f 30").to_vec()),
            (Cmd::Cbor, _) => Ok(vec![0x01]),
            (Cmd::Msg, _) => Ok(b"U2F_V2\x90\x00".to_vec()),
            _ => Err(Error::InvalidCommand),
        }
    }

    fn cancel(&mut self) {
        self.cancels += 1;
    }
}

#[derive(Default)]
struct HidQueue {
    incoming: VecDeque<[u8; PACKET_SIZE]>,
    outgoing: Vec<Packet>,
}

impl HidLink for HidQueue {
    fn read_report(&mut self, _timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>> {
        Ok(self.incoming.pop_front())
    }

    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()> {
        self.outgoing.push(Packet::from_bytes(*report));
        Ok(())
    }
}

fn hid_exchange(
    transport: &mut HidTransport<HidQueue>,
    handler: &mut StubAuthenticator,
    request: Message,
) -> Option<Message> {
    for packet in request.to_packets().unwrap() {
        transport.link_mut().incoming.push_back(*packet.as_bytes());
    }
    transport.poll(handler).unwrap();
    let out = std::mem::take(&mut transport.link_mut().outgoing);
    (!out.is_empty()).then(|| Message::from_packets(&out).unwrap())
}

#[test]
fn test_hid_init_then_get_info() {
    let mut transport = HidTransport::new(HidQueue::default());
    let mut handler = StubAuthenticator::default();

    let nonce = hex!("0102030405060708");
    let init = hid_exchange(
        &mut transport,
        &mut handler,
        Message::new(BROADCAST_CID, Cmd::Init, nonce.to_vec()),
    )
    .unwrap();
    assert_eq!(init.cid, BROADCAST_CID);
    assert_eq!(&init.data[..8], &nonce);
    assert_eq!(&init.data[12..], &hex!("02 01 00 02 05"));
    let cid = u32::from_be_bytes(init.data[8..12].try_into().unwrap());

    let info = hid_exchange(&mut transport, &mut handler, Message::new(cid, Cmd::Cbor, vec![0x04]))
        .unwrap();
    assert_eq!(info.cid, cid);
    assert_eq!(info.cmd, Cmd::Cbor);
    assert_eq!(info.data[0], 0x00);
    assert_eq!(handler.requests, vec![(Cmd::Cbor, vec![0x04])]);
}

#[test]
fn test_hid_raw_init_report() {
    let mut transport = HidTransport::new(HidQueue::default());
    let mut report = [0u8; PACKET_SIZE];
    report[..15].copy_from_slice(&hex!("ffffffff 86 0008 cafebabedeadbeef"));
    transport.link_mut().incoming.push_back(report);

    transport.poll(&mut StubAuthenticator::default()).unwrap();

    let reply = transport.link().outgoing[0].as_bytes();
    assert_eq!(&reply[..7], &hex!("ffffffff 86 0011"));
    assert_eq!(&reply[7..15], &hex!("cafebabedeadbeef"));
}

#[test]
fn test_hid_channels_are_independent() {
    let mut transport = HidTransport::new(HidQueue::default());
    let mut handler = StubAuthenticator::default();

    let mut cids = Vec::new();
    for nonce in [[0x11u8; 8], [0x22u8; 8]] {
        let init = hid_exchange(
            &mut transport,
            &mut handler,
            Message::new(BROADCAST_CID, Cmd::Init, nonce.to_vec()),
        )
        .unwrap();
        cids.push(u32::from_be_bytes(init.data[8..12].try_into().unwrap()));
    }
    assert_ne!(cids[0], cids[1]);

    for (cid, text) in cids.iter().zip([&b"channel one"[..], &b"channel two"[..]]) {
        let pong = hid_exchange(&mut transport, &mut handler, Message::new(*cid, Cmd::Ping, text.to_vec()))
            .unwrap();
        assert_eq!(pong.cid, *cid);
        assert_eq!(pong.data, text);
    }
}

#[test]
fn test_hid_cancel_is_silent() {
    let mut transport = HidTransport::new(HidQueue::default());
    let mut handler = StubAuthenticator::default();
    let init = hid_exchange(
        &mut transport,
        &mut handler,
        Message::new(BROADCAST_CID, Cmd::Init, vec![0; 8]),
    )
    .unwrap();
    let cid = u32::from_be_bytes(init.data[8..12].try_into().unwrap());

    assert!(hid_exchange(&mut transport, &mut handler, Message::new(cid, Cmd::Cancel, vec![])).is_none());
    assert_eq!(handler.cancels, 1);
}

#[derive(Default)]
struct BleQueue {
    writes: VecDeque<Vec<u8>>,
    notifications: Vec<Vec<u8>>,
}

impl BleLink for BleQueue {
    fn read_write(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        Ok(self.writes.pop_front())
    }

    fn notify(&mut self, frame: &[u8]) -> Result<()> {
        self.notifications.push(frame.to_vec());
        Ok(())
    }

    fn notifications_done(&mut self) -> bool {
        true
    }

    fn frame_size(&self) -> usize {
        20
    }
}

#[test]
fn test_ble_fragmented_get_info() {
    let mut transport = BleTransport::new(BleQueue::default());
    let mut handler = StubAuthenticator::default();

    transport.link_mut().writes.push_back(hex!("83 0001 04").to_vec());
    transport.poll(&mut handler).unwrap();

    let notes = &transport.link().notifications;
    assert_eq!(notes[0], hex!("82 0001 01"));
    // 20-byte response in a 20-byte frame: 17 bytes, then 3
    assert_eq!(&notes[1][..3], &hex!("83 0014"));
    assert_eq!(notes[2][0], 0x00);
    assert_eq!(notes[1].len() + notes[2].len(), 3 + 1 + 20);
}

#[test]
fn test_ble_u2f_message() {
    let mut transport = BleTransport::new(BleQueue::default());
    let mut handler = StubAuthenticator::default();

    transport.link_mut().writes.push_back(hex!("83 0004 00030000").to_vec());
    transport.poll(&mut handler).unwrap();

    assert_eq!(handler.requests[0].0, Cmd::Msg);
    let last = transport.link().notifications.last().unwrap();
    assert_eq!(last, &hex!("83 0008 5532465f5632 9000"));
}

#[test]
fn test_ble_orphan_continuation() {
    let mut transport = BleTransport::new(BleQueue::default());
    let mut handler = StubAuthenticator::default();

    transport.link_mut().writes.push_back(hex!("00 aabbcc").to_vec());
    transport.poll(&mut handler).unwrap();

    assert_eq!(transport.link().notifications, vec![hex!("bf 0001 04").to_vec()]);
    assert!(handler.requests.is_empty());
}

#[test]
fn test_ble_cancel_frame() {
    let mut transport = BleTransport::new(BleQueue::default());
    let mut handler = StubAuthenticator::default();

    transport.link_mut().writes.push_back(vec![ble::cmd::CANCEL, 0, 0]);
    transport.poll(&mut handler).unwrap();

    assert_eq!(handler.cancels, 1);
    assert!(transport.link().notifications.is_empty());
}

#[derive(Default)]
struct NfcQueue {
    events: VecDeque<NfcEvent>,
    responses: Vec<Vec<u8>>,
}

impl NfcLink for NfcQueue {
    fn next_event(&mut self, _timeout: Duration) -> Result<Option<NfcEvent>> {
        Ok(self.events.pop_front())
    }

    fn send_response(&mut self, response: &[u8]) -> Result<()> {
        self.responses.push(response.to_vec());
        Ok(())
    }
}

#[test]
fn test_nfc_select_and_get_info() {
    let mut transport = NfcTransport::new(NfcQueue::default());
    let mut handler = StubAuthenticator::default();

    let events = [
        NfcEvent::FieldOn,
        NfcEvent::Apdu(hex!("00 a4 04 00 08 a0000006472f0001").to_vec()),
        NfcEvent::Apdu(hex!("80 10 00 00 01 04 00").to_vec()),
        NfcEvent::FieldOff,
    ];
    transport.link_mut().events.extend(events);
    for _ in 0..4 {
        transport.poll(&mut handler).unwrap();
    }

    let responses = &transport.link().responses;
    assert_eq!(responses[0], b"FIDO_2_0\x90\x00");
    assert_eq!(responses[1][0], 0x00);
    assert_eq!(&responses[1][responses[1].len() - 2..], &hex!("9000"));
    assert_eq!(handler.requests, vec![(Cmd::Cbor, vec![0x04])]);
}

#[test]
fn test_nfc_field_on_drops_selection() {
    let mut transport = NfcTransport::new(NfcQueue::default());
    let mut handler = StubAuthenticator::default();

    let events = [
        NfcEvent::Apdu(hex!("00 a4 04 00 08 a0000006472f0001").to_vec()),
        NfcEvent::FieldOn,
        NfcEvent::Apdu(hex!("80 10 00 00 01 04").to_vec()),
    ];
    transport.link_mut().events.extend(events);
    for _ in 0..3 {
        transport.poll(&mut handler).unwrap();
    }

    assert_eq!(transport.link().responses[1], hex!("6d00"));
    assert!(handler.requests.is_empty());
}

#[test]
fn test_poll_all_services_every_transport() {
    let mut hid = HidQueue::default();
    let packets = Message::new(BROADCAST_CID, Cmd::Ping, b"hi".to_vec()).to_packets().unwrap();
    hid.incoming.push_back(*packets[0].as_bytes());

    let mut ble = BleQueue::default();
    ble.writes.push_back(hex!("81 0002 6869").to_vec());

    let mut nfc = NfcQueue::default();
    nfc.events.push_back(NfcEvent::Apdu(hex!("00 b0 00 00 00").to_vec()));

    let mut transports: Vec<Box<dyn Transport>> = vec![
        Box::new(HidTransport::new(hid)),
        Box::new(BleTransport::new(ble)),
        Box::new(NfcTransport::new(nfc)),
    ];
    let names: Vec<_> = transports.iter().map(|t| t.name()).collect();
    assert_eq!(names, ["hid", "ble", "nfc"]);

    assert_eq!(poll_all(&mut transports, &mut StubAuthenticator::default()), 0);
}
