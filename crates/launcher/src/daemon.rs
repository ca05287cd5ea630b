//! The fork-server loop.
//!
//! One thread, blocked in `accept(2)` most of the time. Signals interrupt
//! the accept and are serviced at the top of the next iteration; each
//! connection is read to the end of its request, forked, and either
//! tracked (synchronous invokers) or closed (detached ones).

use std::{io, os::unix::net::UnixStream, path::PathBuf, thread, time::Duration};

use launcher_common::{ChildStatus, ProtocolError, WireCodec};
use nix::{
    errno::Errno,
    unistd::{ForkResult, Pid, fork, getpid},
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, error, info, warn};

use crate::{
    booster::{BoosterError, BoosterSet},
    child::run_child,
    config::LauncherConfig,
    control_socket::ControlSocket,
    kindergarten::{ChildRecord, INITIAL_SLOTS, Kindergarten, Untracked},
    notify::{BusNotifier, DeathNotifier},
    oom::OomProtector,
    pidfile::PidFile,
    reaper,
    rpc_daemon::{InvocationRequest, receive_invocation, send_exit, send_pid},
    signals,
};

/// Pause after an accept failure that is not an interruption, so that
/// descriptor exhaustion does not turn into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Snafu, Debug)]
pub enum DaemonError {
    #[snafu(display("booster start-up failed: {source}"))]
    Booster { source: BoosterError },
    #[snafu(display("cannot install signal handlers: {source}"))]
    Signals { source: Errno },
    #[snafu(display("cannot listen on {}: {source}", path.display()))]
    Bind { path: PathBuf, source: io::Error },
    #[snafu(display("cannot write pidfile {}: {source}", path.display()))]
    Pidfile { path: PathBuf, source: io::Error },
}

/// Which side of a fork the loop finds itself on.
enum Turn {
    Parent,
    Child(InvocationRequest),
}

pub struct Launcher {
    socket: ControlSocket,
    boosters: BoosterSet,
    kindergarten: Kindergarten,
    notifier: Box<dyn DeathNotifier>,
    oom: OomProtector,
    pidfile: PidFile,
}

impl Launcher {
    /// Load and pre-warm boosters, then open for business.
    pub fn start(config: &LauncherConfig) -> Result<Self, DaemonError> {
        let mut boosters =
            BoosterSet::load(&config.booster_dir, &config.boosters)
                .context(BoosterSnafu)?;
        boosters
            .prewarm_all(&config.prewarm_args)
            .context(BoosterSnafu)?;

        Self::with_boosters(config, boosters, Box::new(BusNotifier))
    }

    pub fn with_boosters(
        config: &LauncherConfig,
        boosters: BoosterSet,
        notifier: Box<dyn DeathNotifier>,
    ) -> Result<Self, DaemonError> {
        signals::install().context(SignalsSnafu)?;

        let pidfile = PidFile::create(&config.pidfile).context(PidfileSnafu {
            path: &config.pidfile,
        })?;
        let socket = ControlSocket::bind(&config.socket).context(BindSnafu {
            path: &config.socket,
        })?;

        let oom = OomProtector::new(&config.oom_defender);
        oom.protect(getpid());

        info!(
            "listening on {} with boosters {:?}",
            socket.path().display(),
            boosters
        );
        Ok(Self {
            socket,
            boosters,
            kindergarten: Kindergarten::new(INITIAL_SLOTS, config.max_children),
            notifier,
            oom,
            pidfile,
        })
    }

    /// Serve until SIGTERM or SIGINT. Only returns in the daemon; forked
    /// children leave through [`run_child`].
    pub fn run(mut self) {
        loop {
            if signals::shutdown_requested() {
                break;
            }
            self.service_signals();

            let stream = match self.socket.accept() {
                Ok(stream) => stream,
                // interrupted by a signal or woken to look at the flags
                Err(Errno::EINTR | Errno::EAGAIN | Errno::ECONNABORTED) => {
                    continue;
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            match self.serve(stream) {
                Turn::Parent => {}
                Turn::Child(request) => self.become_child(request),
            }
        }
        info!(
            "shutting down, {} tracked children left",
            self.kindergarten.used()
        );
        debug!("removing {}", self.pidfile.path().display());
    }

    fn service_signals(&mut self) {
        if signals::take_reload_requested() {
            info!("SIGHUP: reloading boosters");
            self.boosters.reload_all();
        }
        if signals::take_child_exited() {
            for reaped in reaper::harvest() {
                reaper::settle(
                    &mut self.kindergarten,
                    reaped,
                    self.notifier.as_mut(),
                );
            }
        }
    }

    fn serve(&mut self, stream: UnixStream) -> Turn {
        let mut codec = WireCodec::new(stream);
        let request = match receive_invocation(&mut codec) {
            Ok(request) => request,
            Err(ProtocolError::Disconnected) => {
                debug!("invoker hung up mid-session");
                return Turn::Parent;
            }
            Err(e) => {
                warn!("dropping connection: {e}");
                return Turn::Parent;
            }
        };

        // SAFETY: the daemon is single threaded; the child only runs the
        // launch sequence and never returns into this loop.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(codec);
                Turn::Child(request)
            }
            Ok(ForkResult::Parent { child }) => {
                self.track(codec, request, child);
                Turn::Parent
            }
            Err(e) => {
                error!("fork for {} failed: {e}", request.name);
                Turn::Parent
            }
        }
    }

    fn track(
        &mut self,
        mut codec: WireCodec<UnixStream>,
        request: InvocationRequest,
        pid: Pid,
    ) {
        info!("launched {} ({}) as {pid}", request.name, request.exec);
        if !request.options.waits() {
            // detached: dropping the codec closes the socket
            return;
        }

        if let Err(e) = send_pid(&mut codec, pid) {
            debug!("invoker for {pid} left before the pid reply: {e}");
            return;
        }

        let record = ChildRecord {
            name: request.name,
            socket: codec.into_inner(),
            pid,
        };
        if let Err(Untracked(record)) = self.kindergarten.assign(record) {
            warn!(
                "kindergarten full ({} children), {} ({pid}) is untracked",
                self.kindergarten.used(),
                record.name
            );
            if let Err(e) = send_exit(&record.socket, ChildStatus::SUCCESS) {
                debug!("could not release invoker of {pid}: {e}");
            }
            return;
        }

        self.oom.protect(pid);
    }

    /// Shed everything that belongs to the daemon, then turn into the
    /// application.
    fn become_child(self, request: InvocationRequest) -> ! {
        let Self {
            socket,
            boosters,
            mut kindergarten,
            notifier,
            oom: _,
            pidfile,
        } = self;
        drop(socket);
        drop(pidfile);
        drop(notifier);
        kindergarten.forget_all();
        run_child(request, &boosters)
    }
}
