//! The invoker against a scripted stand-in for `launcherd`.

use std::{
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use invoker::{Outcome, invoke, plan::Plan, session::InvokerError};
use launcher_common::{
    ChildStatus, Opcode, SessionOptions, WireCodec,
    protocol_common::parse_handshake,
};
use tempfile::TempDir;

#[derive(Debug, Default)]
struct Seen {
    options: SessionOptions,
    name: String,
    exec: String,
    args: Vec<String>,
    env: Vec<String>,
    stdio_fds: usize,
    priority: Option<i32>,
    ops: Vec<Opcode>,
}

fn serve_one<F>(listener: UnixListener, reply: F) -> JoinHandle<Seen>
where
    F: FnOnce(&mut WireCodec<UnixStream>, &Seen) + Send + 'static,
{
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut codec = WireCodec::new(stream);
        let mut seen = Seen {
            options: parse_handshake(codec.read_u32().unwrap()).unwrap(),
            ..Seen::default()
        };
        codec.send_ack().unwrap();
        codec.expect(Opcode::Name).unwrap();
        seen.name = codec.read_string().unwrap();
        codec.send_ack().unwrap();

        loop {
            let op = codec.read_opcode().unwrap();
            seen.ops.push(op);
            match op {
                Opcode::Exec => seen.exec = codec.read_string().unwrap(),
                Opcode::Args => seen.args = codec.read_strings().unwrap(),
                Opcode::Env => seen.env = codec.read_strings().unwrap(),
                Opcode::Io => seen.stdio_fds = codec.recv_fds(3).unwrap().len(),
                Opcode::Prio => {
                    seen.priority = Some(codec.read_u32().unwrap() as i32);
                }
                Opcode::End => {
                    codec.send_ack().unwrap();
                    break;
                }
                other => panic!("invoker sent {other:?}"),
            }
            codec.send_ack().unwrap();
        }

        reply(&mut codec, &seen);
        seen
    })
}

fn setup() -> (TempDir, PathBuf, UnixListener) {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("launcher.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    (dir, socket, listener)
}

fn plan(socket: PathBuf, delay: u64) -> Plan {
    Plan {
        socket,
        unit: PathBuf::from("/opt/apps/notes.launch"),
        argv: vec!["/opt/apps/notes.launch".into(), "todo.txt".into()],
        delay,
    }
}

#[test]
fn waiting_invoker_reports_the_exit_status() {
    let (_dir, socket, listener) = setup();
    let server = serve_one(listener, |codec, seen| {
        assert!(seen.options.waits());
        codec.write_opcode(Opcode::Pid).unwrap();
        codec.write_u32(999_999).unwrap();
        codec.write_opcode(Opcode::Exit).unwrap();
        codec.write_u32(ChildStatus::Exited(3).to_wire()).unwrap();
    });

    let outcome = invoke(&plan(socket, 0)).unwrap();
    let seen = server.join().unwrap();

    assert_eq!(outcome, Outcome::Exited(ChildStatus::Exited(3)));
    assert_eq!(seen.name, "notes.launch");
    assert_eq!(seen.exec, "/opt/apps/notes.launch");
    assert_eq!(seen.args, vec!["/opt/apps/notes.launch", "todo.txt"]);
    assert!(seen.env.iter().all(|e| e.contains('=')));
    assert_eq!(seen.stdio_fds, 3);
    assert!(seen.priority.is_some());
    assert_eq!(seen.ops.first(), Some(&Opcode::Exec));
    assert_eq!(seen.ops.last(), Some(&Opcode::End));
}

#[test]
fn signal_deaths_are_carried_through() {
    let (_dir, socket, listener) = setup();
    let crashed = ChildStatus::Signaled {
        signal: libc_sigsegv(),
        core_dumped: true,
    };
    let server = serve_one(listener, move |codec, _| {
        codec.write_opcode(Opcode::Pid).unwrap();
        codec.write_u32(999_998).unwrap();
        codec.write_opcode(Opcode::Exit).unwrap();
        codec.write_u32(crashed.to_wire()).unwrap();
    });

    let outcome = invoke(&plan(socket, 0)).unwrap();
    server.join().unwrap();
    assert_eq!(outcome, Outcome::Exited(crashed));
}

fn libc_sigsegv() -> i32 {
    nix::sys::signal::Signal::SIGSEGV as i32
}

#[test]
fn detaching_invoker_lingers_then_leaves() {
    let (_dir, socket, listener) = setup();
    let server = serve_one(listener, |_, seen| {
        assert!(!seen.options.waits());
    });

    let started = Instant::now();
    let outcome = invoke(&plan(socket, 1)).unwrap();
    server.join().unwrap();

    assert_eq!(outcome, Outcome::Detached);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[test]
fn refused_handshake_is_reported() {
    let (_dir, socket, listener) = setup();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut codec = WireCodec::new(stream);
        codec.read_u32().unwrap();
        // hang up without acking, as a mismatched daemon does
    });

    let err = invoke(&plan(socket, 0)).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, InvokerError::Refused), "{err}");
}

#[test]
fn missing_daemon_is_a_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = invoke(&plan(dir.path().join("nobody.sock"), 0)).unwrap_err();
    assert!(matches!(err, InvokerError::Connect { .. }), "{err}");
}

#[test]
fn daemon_vanishing_before_the_pid_is_an_error() {
    let (_dir, socket, listener) = setup();
    let server = serve_one(listener, |_, _| {});

    let err = invoke(&plan(socket, 0)).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, InvokerError::Protocol { .. }), "{err}");
}
