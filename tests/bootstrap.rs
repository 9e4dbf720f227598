use std::{
    cell::Cell,
    collections::HashSet,
    io,
    process::Command,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use blazor_host::{
    config::Config,
    error::{BrokerError, HandoffError, ListenerTableError, ShellError, WebHostError},
    helper::{
        bootstrap::{launch, resolve_lease},
        election::Role,
        handoff::{Mailbox, PortRecord},
        listener_table::ListenerTable,
        port_broker::{Endpoint, PortLease},
        shell::{NoopShellEvents, Shell, ShellEvents, ShellOptions},
        web_host::{ServerHandle, WebHost},
    },
};

/// Listener table shared with the fake web server.
#[derive(Clone, Default)]
struct Listeners(Arc<Mutex<HashSet<u16>>>);

impl Listeners {
    fn occupied(ports: &[u16]) -> Self {
        Self(Arc::new(Mutex::new(ports.iter().copied().collect())))
    }
}

impl ListenerTable for Listeners {
    fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError> {
        Ok(self.0.lock().unwrap().contains(&port))
    }
}

/// Starts "listening" on a background thread shortly after being asked to.
struct FakeServer {
    listeners: Listeners,
    started: Cell<u32>,
}

impl FakeServer {
    fn new(listeners: &Listeners) -> Self {
        Self {
            listeners: listeners.clone(),
            started: Cell::new(0),
        }
    }
}

impl WebHost for FakeServer {
    fn start(&self, endpoint: &Endpoint) -> Result<ServerHandle, WebHostError> {
        self.started.set(self.started.get() + 1);
        let listeners = self.listeners.clone();
        let port = endpoint.port;
        let thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            listeners.0.lock().unwrap().insert(port);
        });
        Ok(ServerHandle::from_thread(thread))
    }
}

/// Accepts the start request but never listens.
struct DeadServer;

impl WebHost for DeadServer {
    fn start(&self, _endpoint: &Endpoint) -> Result<ServerHandle, WebHostError> {
        Ok(ServerHandle::from_thread(thread::spawn(|| {})))
    }
}

/// Cannot even be started.
struct MissingServer;

impl WebHost for MissingServer {
    fn start(&self, _endpoint: &Endpoint) -> Result<ServerHandle, WebHostError> {
        Err(WebHostError::Spawn {
            program: "missing".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }
}

#[derive(Default)]
struct RecordingShell {
    opened: Vec<String>,
}

impl Shell for RecordingShell {
    fn run(
        &mut self,
        options: &ShellOptions,
        _events: &mut dyn ShellEvents,
    ) -> Result<(), ShellError> {
        self.opened.push(options.start_url.clone());
        Ok(())
    }
}

fn config(dir: &tempfile::TempDir, range: std::ops::Range<u16>) -> Config {
    Config {
        mailbox_dir: Some(dir.path().to_path_buf()),
        port_range_start: range.start,
        port_range_end: range.end,
        readiness_timeout_ms: 200,
        handoff_timeout_ms: 300,
        ..Config::default()
    }
}

/// Pid of a process that has already exited and been reaped.
fn exited_pid() -> u32 {
    let mut child = if cfg!(windows) {
        Command::new("cmd").args(["/C", "exit"]).spawn().unwrap()
    } else {
        Command::new("true").spawn().unwrap()
    };
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn follower_opens_the_port_the_leader_published() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5052);
    let listeners = Listeners::occupied(&[5050]);
    let server = FakeServer::new(&listeners);

    let leader = resolve_lease(Role::Leader, &config, &listeners, &server).unwrap();
    assert_eq!(leader.lease, PortLease::Bound(5051));
    assert!(leader.is_serving());
    assert_eq!(server.started.get(), 1);

    let follower = resolve_lease(Role::Follower, &config, &listeners, &server).unwrap();
    assert_eq!(follower.lease, PortLease::Bound(5051));
    assert!(!follower.is_serving());
    assert_eq!(server.started.get(), 1);

    let mut shell = RecordingShell::default();
    assert!(launch(&follower, &config, &mut shell, &mut NoopShellEvents).unwrap());
    assert_eq!(shell.opened, ["https://127.0.0.1:5051"]);
}

#[test]
fn exhausted_range_publishes_the_sentinel_and_opens_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5051);
    let listeners = Listeners::occupied(&[5050]);
    let server = FakeServer::new(&listeners);

    let leader = resolve_lease(Role::Leader, &config, &listeners, &server).unwrap();
    assert_eq!(leader.lease, PortLease::Unavailable);
    assert!(!leader.is_serving());
    assert_eq!(server.started.get(), 0);

    let mut shell = RecordingShell::default();
    assert!(!launch(&leader, &config, &mut shell, &mut NoopShellEvents).unwrap());
    drop(leader);

    // the sentinel outlives the leader that published it
    let follower = resolve_lease(Role::Follower, &config, &listeners, &server).unwrap();
    assert_eq!(follower.lease, PortLease::Unavailable);
    assert!(follower.endpoint(&config).is_none());
    assert!(!launch(&follower, &config, &mut shell, &mut NoopShellEvents).unwrap());
    assert!(shell.opened.is_empty());
}

#[test]
fn server_that_never_listens_times_out_and_releases_followers() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let listeners = Listeners::default();

    let result = resolve_lease(Role::Leader, &config, &listeners, &DeadServer);
    assert!(matches!(
        result,
        Err(BrokerError::ReadinessTimeout { port: 5050, .. })
    ));

    let follower = resolve_lease(Role::Follower, &config, &listeners, &DeadServer).unwrap();
    assert_eq!(follower.lease, PortLease::Unavailable);
}

#[test]
fn server_that_cannot_start_releases_followers() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let listeners = Listeners::default();

    let result = resolve_lease(Role::Leader, &config, &listeners, &MissingServer);
    assert!(matches!(result, Err(BrokerError::WebHost(_))));

    let record = Mailbox::new(dir.path(), &config.mailbox_name)
        .read()
        .unwrap()
        .unwrap();
    assert_eq!(record.lease, PortLease::Unavailable);
}

#[test]
fn follower_without_a_leader_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let listeners = Listeners::default();

    let result = resolve_lease(Role::Follower, &config, &listeners, &MissingServer);
    assert!(matches!(
        result,
        Err(BrokerError::Handoff(HandoffError::Timeout(_)))
    ));
}

#[test]
fn leader_withdraws_its_port_on_exit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let listeners = Listeners::default();
    let server = FakeServer::new(&listeners);

    let leader = resolve_lease(Role::Leader, &config, &listeners, &server).unwrap();
    let mailbox = Mailbox::new(dir.path(), &config.mailbox_name);
    assert!(mailbox.read().unwrap().is_some());

    drop(leader);
    assert!(mailbox.read().unwrap().is_none());
}

#[test]
fn follower_ignores_the_sentinel_of_a_previous_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let mailbox = Mailbox::new(dir.path(), &config.mailbox_name);
    std::fs::write(
        mailbox.path(),
        PortRecord {
            leader_pid: exited_pid(),
            lease: PortLease::Unavailable,
        }
        .encode(),
    )
    .unwrap();

    let leader_config = config.clone();
    let leader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        let listeners = Listeners::default();
        let server = FakeServer::new(&listeners);
        resolve_lease(Role::Leader, &leader_config, &listeners, &server).unwrap()
    });

    let follower =
        resolve_lease(Role::Follower, &config, &Listeners::default(), &MissingServer).unwrap();
    assert_eq!(follower.lease, PortLease::Bound(5050));
    drop(leader.join().unwrap());
}

#[test]
fn follower_ignores_the_port_of_a_crashed_leader() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, 5050..5060);
    let mailbox = Mailbox::new(dir.path(), &config.mailbox_name);
    std::fs::write(
        mailbox.path(),
        PortRecord {
            leader_pid: exited_pid(),
            lease: PortLease::Bound(5055),
        }
        .encode(),
    )
    .unwrap();

    let result = resolve_lease(Role::Follower, &config, &Listeners::default(), &MissingServer);
    assert!(matches!(
        result,
        Err(BrokerError::Handoff(HandoffError::Timeout(_)))
    ));
}
