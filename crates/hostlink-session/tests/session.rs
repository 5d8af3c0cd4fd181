//! End-to-end session behaviour against a scripted host on the other end of
//! a socket pair.
#![cfg(unix)]

use std::cell::{Cell, RefCell};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use hostlink_frame::{put_string, Command, FrameReader, FrameWriter, PluginVersion, Tag};
use hostlink_session::{
    Announcement, Application, ConnectionState, ReturnType, Result, Session, SessionConfig,
    SessionError, Signature, UpdateSide, Value, PROTOCOL_VERSION,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Host {
    reader: FrameReader<UnixStream>,
    writer: FrameWriter<UnixStream>,
}

impl Host {
    fn send(&mut self, tag: Tag, payload: &[u8]) {
        self.writer.send(tag, payload).expect("host send");
    }

    fn announce(&mut self, protocol_version: u32) {
        let announcement = Announcement {
            protocol_version,
            plugin_version: PluginVersion::new(0, 9, 1, 0),
        };
        self.send(Tag::Announce, &announcement.to_payload());
    }

    fn expect(&mut self, tag: Tag) -> Command {
        let command = self.reader.read_command().expect("host read");
        assert_eq!(command.tag, tag, "unexpected command {command:?}");
        command
    }

    /// Block until the client closes the pipe.
    fn wait_closed(&mut self) {
        if let Ok(command) = self.reader.read_command() {
            panic!("expected close, got {command:?}");
        }
    }
}

fn connect(config: SessionConfig) -> (Session, Host) {
    let (left, right) = UnixStream::pair().unwrap();
    let session = Session::with_stream(left.into(), config).unwrap();
    let host = Host {
        reader: FrameReader::new(right.try_clone().unwrap()),
        writer: FrameWriter::new(right),
    };
    (session, host)
}

fn config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Some(Duration::from_secs(5)),
        response_timeout: Some(Duration::from_secs(5)),
        ..SessionConfig::default()
    }
}

fn script(mut host: Host, steps: impl FnOnce(&mut Host) + Send + 'static) -> JoinHandle<()> {
    thread::spawn(move || steps(&mut host))
}

fn call(name: &str, fill: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut payload = BytesMut::new();
    put_string(&mut payload, name).unwrap();
    fill(&mut payload);
    payload
}

struct Init<F>(F);

impl<F: FnMut(&Session) -> Result<()>> Application for Init<F> {
    fn initialize(&mut self, session: &Session) -> Result<()> {
        (self.0)(session)
    }
}

#[test]
fn newer_host_protocol_aborts_before_initialize() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| host.announce(PROTOCOL_VERSION + 1));

    let initialized = Rc::new(Cell::new(false));
    let flag = Rc::clone(&initialized);
    let err = session
        .run(Init(move |_: &Session| {
            flag.set(true);
            Ok(())
        }))
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::ProtocolVersionMismatch {
            update: UpdateSide::GameMode,
            ..
        }
    ));
    assert!(!initialized.get());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    host.join().unwrap();
}

#[test]
fn matching_protocol_initializes_after_skipping_early_commands() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.send(Tag::Tick, b"");
        host.announce(PROTOCOL_VERSION);
        host.wait_closed();
    });

    let seen = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&seen);
    session
        .run(Init(move |session: &Session| {
            assert_eq!(session.state(), ConnectionState::AnnounceReceived);
            *slot.borrow_mut() = session.announcement();
            session.stop();
            Ok(())
        }))
        .unwrap();

    let announcement = (*seen.borrow()).expect("announcement recorded");
    assert_eq!(announcement.protocol_version, PROTOCOL_VERSION);
    assert_eq!(announcement.plugin_version.to_string(), "0.9.1");
    host.join().unwrap();
}

#[test]
fn public_call_replies_only_for_registered_callbacks() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        let register = host.expect(Tag::RegisterCall);
        assert_eq!(register.payload.as_ref(), b"onFoo\0\x01\x00");
        host.expect(Tag::Start);

        host.send(Tag::PublicCall, &call("onFoo", |p| p.put_i32_le(5)));
        let reply = host.expect(Tag::Response);
        assert_eq!(reply.payload.as_ref(), &[1, 10, 0, 0, 0]);

        // No reply for an unknown name: the next Response belongs to the next call.
        host.send(Tag::PublicCall, &call("onBar", |p| p.put_i32_le(5)));
        host.send(Tag::PublicCall, &call("onFoo", |p| p.put_i32_le(1)));
        let reply = host.expect(Tag::Response);
        assert_eq!(reply.payload.as_ref(), &[1, 2, 0, 0, 0]);
    });

    let received = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&received);
    let err = session
        .run(Init(move |session: &Session| {
            let log = Rc::clone(&log);
            session.register_callback(
                "onFoo",
                Signature::new(ReturnType::Int).value(),
                move |args| {
                    let n = args.int(0)?;
                    log.borrow_mut().push(n);
                    Some(Value::Int(n * 2))
                },
            )?;
            session.start()
        }))
        .unwrap_err();

    // The host hung up after its script.
    assert!(matches!(err, SessionError::Disconnected(_)));
    assert_eq!(*received.borrow(), vec![5, 1]);
    host.join().unwrap();
}

#[test]
fn commands_diverted_by_a_native_wait_keep_their_order() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::RegisterCall);
        host.expect(Tag::RegisterCall);
        let find = host.expect(Tag::FindNative);
        assert_eq!(find.payload.as_ref(), b"X\0");

        host.send(Tag::PublicCall, b"onA\0");
        host.send(Tag::Response, &7i32.to_le_bytes());
        host.send(Tag::PublicCall, b"onB\0");

        // The second lookup of X is served from the cache.
        host.expect(Tag::Start);
        assert_eq!(host.expect(Tag::Response).payload.as_ref(), &[0]);
        assert_eq!(host.expect(Tag::Response).payload.as_ref(), &[0]);
    });

    let order = Rc::new(RefCell::new(Vec::new()));
    let handles = Rc::new(RefCell::new(Vec::new()));
    let (log, found) = (Rc::clone(&order), Rc::clone(&handles));
    let err = session
        .run(Init(move |session: &Session| {
            for name in ["onA", "onB"] {
                let log = Rc::clone(&log);
                session.register_callback(name, Signature::new(ReturnType::Void), move |_| {
                    log.borrow_mut().push(name);
                    None
                })?;
            }
            found.borrow_mut().push(session.native("X")?);
            found.borrow_mut().push(session.native("X")?);
            session.start()
        }))
        .unwrap_err();

    assert!(matches!(err, SessionError::Disconnected(_)));
    assert_eq!(*order.borrow(), vec!["onA", "onB"]);
    assert_eq!(*handles.borrow(), vec![7, 7]);
    host.join().unwrap();
}

#[test]
fn malformed_find_native_response_fails_only_that_call() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::FindNative);
        host.send(Tag::Response, &[1, 2, 3]);
        host.expect(Tag::FindNative);
        host.send(Tag::Response, &9i32.to_le_bytes());
        let invoke = host.expect(Tag::InvokeNative);
        host.send(Tag::Response, &invoke.payload);
        host.wait_closed();
    });

    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&outcomes);
    session
        .run(Init(move |session: &Session| {
            let bad = session.resolve_handle("X");
            log.borrow_mut().push(matches!(
                bad,
                Err(SessionError::ResponseShape {
                    expected: 4,
                    actual: 3
                })
            ));
            log.borrow_mut().push(session.resolve_handle("Y")? == 9);
            let echoed = session.invoke_native(&[9, 0, 0, 0, 0, 0, 0, 0])?;
            log.borrow_mut().push(echoed.as_ref() == [9, 0, 0, 0, 0, 0, 0, 0]);
            session.stop();
            Ok(())
        }))
        .unwrap();

    assert_eq!(*outcomes.borrow(), vec![true, true, true]);
    host.join().unwrap();
}

#[test]
fn native_timeout_ends_the_session() {
    let _serial = serial();
    let (session, host) = connect(SessionConfig {
        response_timeout: Some(Duration::from_millis(50)),
        ..config()
    });
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::FindNative);
        host.wait_closed();
    });

    let err = session
        .run(Init(|session: &Session| {
            assert!(matches!(
                session.resolve_handle("Slow"),
                Err(SessionError::Timeout(_))
            ));
            assert_eq!(session.state(), ConnectionState::Disconnected);
            Ok(())
        }))
        .unwrap_err();

    assert!(matches!(err, SessionError::Timeout(_)));
    host.join().unwrap();
}

#[test]
fn pings_resolve_in_order() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::Start);
        for _ in 0..3 {
            host.expect(Tag::Ping);
            host.send(Tag::Pong, b"");
        }
        host.wait_closed();
    });

    let rtts = Rc::new(RefCell::new(Vec::new()));
    let results = Rc::clone(&rtts);
    session
        .run(Init(move |session: &Session| {
            session.start()?;
            let pinger = session.clone();
            let results = Rc::clone(&results);
            session.spawn(async move {
                for _ in 0..3 {
                    let rtt = pinger.ping().await;
                    results.borrow_mut().push(rtt.is_ok());
                }
                pinger.stop();
            })
        }))
        .unwrap();

    assert_eq!(*rtts.borrow(), vec![true, true, true]);
    host.join().unwrap();
}

#[test]
fn unsolicited_response_is_fatal() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::Start);
        host.send(Tag::Reply, &[0]);
        host.wait_closed();
    });

    let err = session.run(Init(|session: &Session| session.start())).unwrap_err();

    assert!(matches!(err, SessionError::UnexpectedResponse(Tag::Reply)));
    host.join().unwrap();
}

struct Ticker {
    ticks: Rc<Cell<u32>>,
}

impl Application for Ticker {
    fn initialize(&mut self, session: &Session) -> Result<()> {
        session.register_callback(
            "onFoo",
            Signature::new(ReturnType::Int).value(),
            |args| args.int(0).map(|n| Value::Int(n * 2)),
        )?;
        session.start()
    }

    fn on_tick(&mut self, session: &Session) {
        self.ticks.set(self.ticks.get() + 1);
        session.stop();
    }
}

#[test]
fn anomalies_are_logged_and_the_loop_continues() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        host.expect(Tag::RegisterCall);
        host.expect(Tag::Start);

        host.send(Tag::Pong, b"");
        host.send(Tag::Unknown(0x7f), b"??");
        host.send(Tag::Connect, b"");
        host.send(Tag::Announce, &[1, 0, 0, 0, 0, 9, 1, 0]);

        // Arguments missing: the host still gets an answer.
        host.send(Tag::PublicCall, b"onFoo\0");
        assert_eq!(host.expect(Tag::Response).payload.as_ref(), &[0]);

        host.send(Tag::PublicCall, &call("onFoo", |p| p.put_i32_le(3)));
        assert_eq!(host.expect(Tag::Response).payload.as_ref(), &[1, 6, 0, 0, 0]);

        host.send(Tag::Tick, b"");
        host.wait_closed();
    });

    let ticks = Rc::new(Cell::new(0));
    session
        .run(Ticker {
            ticks: Rc::clone(&ticks),
        })
        .unwrap();

    assert_eq!(ticks.get(), 1);
    host.join().unwrap();
}

#[test]
fn reregistering_replaces_the_handler_without_notifying_the_host() {
    let _serial = serial();
    let (session, host) = connect(config());
    let host = script(host, |host| {
        host.announce(PROTOCOL_VERSION);
        let register = host.expect(Tag::RegisterCall);
        assert_eq!(register.payload.as_ref(), b"foo\0\x01\x00");
        host.expect(Tag::Start);

        host.send(Tag::PublicCall, &call("foo", |p| put_string(p, "x").unwrap()));
        assert_eq!(host.expect(Tag::Response).payload.as_ref(), &[1, 2, 0, 0, 0]);
    });

    let counts = Rc::new(Cell::new(0));
    let count = Rc::clone(&counts);
    let err = session
        .run(Init(move |session: &Session| {
            session.register_callback("foo", Signature::new(ReturnType::Void).value(), |_| {
                None
            })?;
            session.register_callback("foo", Signature::new(ReturnType::Int).string(), |args| {
                (args.string(0) == Some("x")).then_some(Value::Int(2))
            })?;
            count.set(session.callback_count());
            session.start()
        }))
        .unwrap_err();

    assert!(matches!(err, SessionError::Disconnected(_)));
    assert_eq!(counts.get(), 1);
    host.join().unwrap();
}

#[test]
fn second_session_is_rejected_while_one_is_alive() {
    let _serial = serial();
    let (first, _host) = connect(config());
    let (left, _right) = UnixStream::pair().unwrap();

    let err = Session::with_stream(left.into(), config()).unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive));

    drop(first);
    let (left, _right) = UnixStream::pair().unwrap();
    assert!(Session::with_stream(left.into(), config()).is_ok());
}
