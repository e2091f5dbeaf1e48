mod common;
use common::*;

use stm32_uart_loader::{Capability, Error, Options, State, UART_NACK};

#[test]
fn handshake_populates_session() {
    let mem = [0xDE, 0xAD, 0xBE, 0xEF];
    let mut replies = vec![ACK, ACK, ACK];
    replies.extend_from_slice(&mem);

    let mut b = ready(Options::default(), &OPCODES, &replies);
    assert_eq!(b.state(), State::Ready);

    let s = b.session().expect("no session").clone();
    assert_eq!(s.bootloader_version(), BL_VERSION);
    assert_eq!(s.version(), VERSION);
    assert_eq!(s.option_bytes(), (OPTION1, OPTION2));
    assert_eq!(s.product_id(), 0xABCD);
    assert_eq!(b.chip_id(), Some(0xABCD));

    let c = s.capabilities();
    let expected = [
        (Capability::Get, 0x00),
        (Capability::GetVersion, 0x01),
        (Capability::GetId, 0x02),
        (Capability::ReadMemory, 0x11),
        (Capability::Go, 0x21),
        (Capability::WriteMemory, 0x31),
        (Capability::Erase, 0x43),
        (Capability::WriteProtect, 0x63),
        (Capability::WriteUnprotect, 0x73),
        (Capability::ReadoutProtect, 0x82),
        (Capability::ReadoutUnprotect, 0x92),
    ];
    for (cap, op) in expected.iter() {
        assert_eq!(c.get(*cap), Some(*op), "{:?}", cap);
    }

    assert_eq!(b.read_memory_vec(0x0800_0000, 4), Ok(mem.to_vec()));

    let port = b.release();
    assert_eq!(&port.tx[..HANDSHAKE_TX.len()], &HANDSHAKE_TX);
    assert_eq!(port.pending(), 0);
}

#[test]
fn init_nack_leaves_no_session() {
    let mut b = bootloader(Options::default(), &[UART_NACK]);

    assert_eq!(b.init().err(), Some(Error::Nack { opcode: 0x7F }));
    assert_eq!(b.state(), State::Failed);
    assert!(b.session().is_none());
    assert_eq!(b.chip_id(), None);

    assert_eq!(b.read_memory_vec(0, 4), Err(Error::NotReady));
    assert_eq!(b.release().tx, vec![0x7F]);
}

#[test]
fn init_without_reply_is_serial_error() {
    let mut b = bootloader(Options::default(), &[]);

    assert_eq!(b.init().err(), Some(Error::Serial(MockError::Exhausted)));
    assert_eq!(b.state(), State::Failed);
    assert!(b.session().is_none());
}

#[test]
fn init_unexpected_reply() {
    let mut b = bootloader(Options::default(), &[0x00]);

    assert_eq!(
        b.init().err(),
        Some(Error::InvalidResponse {
            opcode: 0x7F,
            reply: 0x00
        })
    );
    assert_eq!(b.state(), State::Failed);
}

#[test]
fn get_with_ten_opcodes() {
    let b = ready(Options::default(), &OPCODES[..10], &[]);
    let c = b.session().expect("no session").capabilities();

    for (cap, op) in Capability::ALL.iter().zip(OPCODES.iter()).take(10) {
        assert_eq!(c.get(*cap), Some(*op));
    }
    assert_eq!(c.get(Capability::ReadoutUnprotect), None);
}

#[test]
fn get_extra_opcodes_are_drained() {
    let mut opcodes = OPCODES.to_vec();
    opcodes.extend_from_slice(&[0xA1, 0xB4]);

    let b = ready(Options::default(), &opcodes, &[]);
    assert_eq!(b.state(), State::Ready);

    let c = b.session().expect("no session").capabilities();
    assert_eq!(c.iter().count(), Capability::COUNT);
    assert!(c.iter().all(|(_, op)| op != 0xA1 && op != 0xB4));
    assert_eq!(c.get(Capability::ReadoutUnprotect), Some(0x92));

    // GET VERSION and GET ID still followed the trailing ACK
    assert_eq!(b.chip_id(), Some(PID));
    assert_eq!(b.release().pending(), 0);
}

#[test]
fn get_missing_trailing_ack() {
    let mut replies = vec![ACK, ACK, OPCODES.len() as u8, BL_VERSION];
    replies.extend_from_slice(&OPCODES);
    replies.push(UART_NACK);

    let mut b = bootloader(Options::default(), &replies);
    assert_eq!(b.init().err(), Some(Error::Nack { opcode: 0x00 }));
    assert_eq!(b.state(), State::Failed);
}

#[test]
fn get_id_must_be_two_bytes() {
    let mut replies = handshake_replies(&OPCODES, PID);
    // Replace the GET ID reply with a three byte ID
    let id_start = replies.len() - 4;
    replies.truncate(id_start);
    replies.extend_from_slice(&[2, 0x04, 0x10, 0x00, ACK]);

    let mut b = bootloader(Options::default(), &replies);
    assert_eq!(b.init().err(), Some(Error::UnsupportedDevice(3)));
    assert_eq!(b.state(), State::Failed);
    assert!(b.session().is_none());

    // ID bytes and ACK are consumed
    assert_eq!(b.release().pending(), 0);
}

#[test]
fn init_after_unsupported_id() {
    let mut replies = handshake_replies(&OPCODES, PID);
    let id_start = replies.len() - 4;
    replies.truncate(id_start);
    replies.extend_from_slice(&[3, 0x04, 0x10, 0x00, 0x01, ACK]);
    replies.extend_from_slice(&handshake_replies(&OPCODES, PID));

    let mut b = bootloader(Options::default(), &replies);
    assert_eq!(b.init().err(), Some(Error::UnsupportedDevice(4)));

    let s = b.init().expect("retry failed").clone();
    assert_eq!(s.product_id(), PID);
    assert_eq!(b.state(), State::Ready);
}

#[test]
fn get_version_nack() {
    let mut replies = vec![ACK, ACK, OPCODES.len() as u8, BL_VERSION];
    replies.extend_from_slice(&OPCODES);
    replies.extend_from_slice(&[ACK, UART_NACK]);

    let mut b = bootloader(Options::default(), &replies);
    assert_eq!(b.init().err(), Some(Error::Nack { opcode: 0x01 }));
    assert_eq!(b.state(), State::Failed);
}

#[test]
fn missing_get_id_capability() {
    let mut b = bootloader(
        Options::default(),
        &[ACK, ACK, 2, BL_VERSION, 0x00, 0x01, ACK, ACK, VERSION, 0, 0, ACK],
    );

    assert_eq!(b.init().err(), Some(Error::Unsupported(Capability::GetId)));
    assert_eq!(b.state(), State::Failed);
}

#[test]
fn reinit_after_failure() {
    let mut replies = vec![UART_NACK];
    replies.extend(handshake_replies(&OPCODES, PID));

    let mut b = bootloader(Options::default(), &replies);
    assert!(b.init().is_err());
    assert_eq!(b.state(), State::Failed);

    let s = b.init().expect("second handshake failed");
    assert_eq!(s.product_id(), PID);
    assert_eq!(b.state(), State::Ready);
}

#[test]
fn reset_toggles_control_lines() {
    let options = Options {
        reset: true,
        reset_ms: 50,
        init_delay_ms: 5,
        ..Options::default()
    };

    let mut b = bootloader(options, &handshake_replies(&OPCODES, PID));
    b.init().expect("handshake failed");

    let port = b.release();
    assert_eq!(port.dtr, vec![true, false]);
    assert_eq!(port.rts, vec![true, false]);
}

#[test]
fn no_reset_by_default() {
    let mut b = bootloader(Options::default(), &handshake_replies(&OPCODES, PID));
    b.init().expect("handshake failed");

    let port = b.release();
    assert!(port.dtr.is_empty());
    assert!(port.rts.is_empty());
}
