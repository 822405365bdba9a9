//! Master and slave wired back to back through in-memory outboxes,
//! driven by an explicit millisecond clock.

use std::sync::{Arc, Mutex};

use serimod_engine::{ByteFeeder, Config, FrameMode, Master, RegisterBank, Slave};

type Outbox = Arc<Mutex<Vec<Vec<u8>>>>;

fn outbox() -> (Outbox, impl FnMut(&[u8]) + Send + 'static) {
    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outbox);
    (outbox, move |frame: &[u8]| {
        sink.lock().unwrap().push(frame.to_vec())
    })
}

fn pump(outbox: &Outbox, feeder: &ByteFeeder, now_ms: u32) {
    for frame in outbox.lock().unwrap().drain(..) {
        for byte in frame {
            assert!(feeder.push(byte, now_ms));
        }
    }
}

fn link(mode: FrameMode, bank: RegisterBank) -> (Master, Slave<RegisterBank>, Outbox, Outbox) {
    let (master_out, master_send) = outbox();
    let (slave_out, slave_send) = outbox();
    let mut master = Master::new(Config::new(0x01, mode), master_send);
    master.set_timeouts(Some(5), Some(50));
    let mut slave = Slave::new(Config::new(0x01, mode), bank, slave_send);
    slave.set_receive_timeout(5);
    (master, slave, master_out, slave_out)
}

/// One full request/response exchange with generous silence gaps.
fn exchange(
    master: &mut Master,
    slave: &mut Slave<RegisterBank>,
    master_out: &Outbox,
    slave_out: &Outbox,
    t: &mut u32,
) {
    master.poll(*t);
    pump(master_out, &slave.feeder(), *t);
    slave.poll(*t);
    *t += 10;
    slave.poll(*t);
    pump(slave_out, &master.feeder(), *t);
    master.poll(*t);
    *t += 10;
    master.poll(*t);
}

#[test]
fn rtu_read_round_trip() {
    let bank = RegisterBank::new(vec![0, 0xFFFF, 0xFFFE, 0xFFFD, 0xFFFC, 0xFFFB, 0xFFFA]);
    let (mut master, mut slave, master_out, slave_out) = link(FrameMode::Rtu, bank);

    let result: Arc<Mutex<Option<Vec<u16>>>> = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .read_registers(0, 5, move |values| {
            *captured.lock().unwrap() = Some(values.to_vec());
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(
        result.lock().unwrap().as_deref(),
        Some(&[0, 0xFFFF, 0xFFFE, 0xFFFD, 0xFFFC][..])
    );
    assert_eq!(master.queue_len(), 0);
}

#[test]
fn rtu_write_single_round_trip() {
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Rtu, RegisterBank::zeroed(8));

    let result = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .write_register(2, 0x0005, move |address, count| {
            *captured.lock().unwrap() = Some((address, count));
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(*result.lock().unwrap(), Some((2, 1)));
    assert_eq!(slave.store().get(2), Some(0x0005));
}

#[test]
fn rtu_write_multiple_round_trip() {
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Rtu, RegisterBank::zeroed(8));

    let result = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .write_registers(0, &[1, 2, 3, 4], move |address, count| {
            *captured.lock().unwrap() = Some((address, count));
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(*result.lock().unwrap(), Some((0, 4)));
    for (address, expected) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
        assert_eq!(slave.store().get(address), Some(expected));
    }
}

#[test]
fn ascii_read_round_trip() {
    let bank = RegisterBank::new(vec![0x0102, 0x0304, 0x0506]);
    let (mut master, mut slave, master_out, slave_out) = link(FrameMode::Ascii, bank);

    let result: Arc<Mutex<Option<Vec<u16>>>> = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .read_registers(0, 3, move |values| {
            *captured.lock().unwrap() = Some(values.to_vec());
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(
        result.lock().unwrap().as_deref(),
        Some(&[0x0102, 0x0304, 0x0506][..])
    );
}

#[test]
fn ascii_write_multiple_round_trip() {
    // The byte-count quirk on the ASCII wire must not confuse the slave.
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Ascii, RegisterBank::zeroed(8));

    let result = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .write_registers(1, &[0xAA55, 0x1234], move |address, count| {
            *captured.lock().unwrap() = Some((address, count));
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(*result.lock().unwrap(), Some((1, 2)));
    assert_eq!(slave.store().get(1), Some(0xAA55));
    assert_eq!(slave.store().get(2), Some(0x1234));
}

#[test]
fn unanswered_command_times_out_exactly_once() {
    let (master_out, master_send) = outbox();
    let mut master = Master::new(Config::new(0x01, FrameMode::Rtu), master_send);
    master.set_timeouts(Some(5), Some(5));

    let fired = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&fired);
    master
        .read_registers(0, 2, move |values| {
            assert!(values.is_empty());
            *counter.lock().unwrap() += 1;
        })
        .unwrap();

    master.poll(0);
    assert_eq!(master_out.lock().unwrap().len(), 1);
    for t in [2, 4, 10, 20, 30] {
        master.poll(t);
    }
    assert_eq!(*fired.lock().unwrap(), 1);
    assert_eq!(master.queue_len(), 0);
}

#[test]
fn fast_mode_transmits_only_the_newest_command() {
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Rtu, RegisterBank::zeroed(8));
    master.set_fast_mode(true);

    master
        .write_register(0, 0x0001, |_, _| panic!("stale command completed"))
        .unwrap();
    master
        .write_register(1, 0x0002, |_, _| panic!("stale command completed"))
        .unwrap();
    let result = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&result);
    master
        .write_register(2, 0x0003, move |address, count| {
            *captured.lock().unwrap() = Some((address, count));
        })
        .unwrap();

    let mut t = 0;
    exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);

    assert_eq!(*result.lock().unwrap(), Some((2, 1)));
    assert_eq!(slave.store().get(0), Some(0));
    assert_eq!(slave.store().get(1), Some(0));
    assert_eq!(slave.store().get(2), Some(0x0003));
}

#[test]
fn corrupted_ascii_response_is_not_matched() {
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Ascii, RegisterBank::zeroed(4));
    master.set_timeouts(Some(5), Some(50));

    let fired = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&fired);
    master
        .read_registers(0, 2, move |values| {
            captured.lock().unwrap().push(values.to_vec());
        })
        .unwrap();

    let mut t = 0;
    master.poll(t);
    pump(&master_out, &slave.feeder(), t);
    slave.poll(t);
    t += 10;
    slave.poll(t);

    // Flip one hex character in the response's LRC digits.
    let mut frames = slave_out.lock().unwrap();
    let response = &mut frames[0];
    let lrc_pos = response.len() - 3;
    response[lrc_pos] = if response[lrc_pos] == b'0' { b'1' } else { b'0' };
    let feeder = master.feeder();
    for byte in frames.drain(..).flatten() {
        feeder.push(byte, t);
    }
    drop(frames);

    master.poll(t);
    // Discarded, not matched: the command is still pending.
    assert!(fired.lock().unwrap().is_empty());
    assert_eq!(master.queue_len(), 1);

    // The send timeout eventually settles it with the failure sentinel.
    t += 100;
    master.poll(t);
    assert_eq!(fired.lock().unwrap().as_slice(), &[Vec::<u16>::new()]);
    assert_eq!(master.queue_len(), 0);
}

#[test]
fn back_to_back_exchanges_share_the_link() {
    let (mut master, mut slave, master_out, slave_out) =
        link(FrameMode::Rtu, RegisterBank::zeroed(8));

    let reads = Arc::new(Mutex::new(Vec::new()));
    let mut t = 0;
    for round in 0..3u16 {
        let captured = Arc::clone(&reads);
        master
            .write_register(0, round, |_, _| {})
            .unwrap();
        master
            .read_registers(0, 1, move |values| {
                captured.lock().unwrap().push(values.to_vec());
            })
            .unwrap();
        exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);
        exchange(&mut master, &mut slave, &master_out, &slave_out, &mut t);
    }

    assert_eq!(
        reads.lock().unwrap().as_slice(),
        &[vec![0u16], vec![1], vec![2]]
    );
    assert_eq!(master.queue_len(), 0);
}
